use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::{mean, round2, AttainmentSummary, Question, QuestionGroup, QuestionMetric};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CoData {
    pub co_attainment: BTreeMap<String, f64>,
    pub co_attainment_theory: BTreeMap<String, f64>,
    pub co_attainment_lab: BTreeMap<String, f64>,
    pub summary: AttainmentSummary,
}

/// Rolls question attainment up to course outcomes.
///
/// Per CO and group the figure is the plain mean of the mapped questions'
/// percentages; a question mapped to several COs counts in full for each.
/// A group with no mapped question is undefined and reported as 0, and it
/// does not pull the overall figure down.
pub fn aggregate(
    questions: &[Question],
    metrics: &BTreeMap<String, QuestionMetric>,
    question_co_map: &BTreeMap<String, Vec<String>>,
    course_outcomes: &BTreeSet<String>,
) -> CoData {
    let mut theory: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    let mut lab: BTreeMap<&str, Vec<f64>> = BTreeMap::new();

    for q in questions {
        let (Some(cos), Some(metric)) = (question_co_map.get(&q.id), metrics.get(&q.id)) else {
            continue;
        };
        let bucket = match q.group {
            QuestionGroup::Theory => &mut theory,
            QuestionGroup::Lab => &mut lab,
        };
        for co in cos {
            bucket
                .entry(co.as_str())
                .or_default()
                .push(metric.co_attainment);
        }
    }

    let mut data = CoData::default();
    for co in course_outcomes {
        let t = theory.get(co.as_str()).and_then(|v| mean(v)).map(round2);
        let l = lab.get(co.as_str()).and_then(|v| mean(v)).map(round2);
        let overall = match (t, l) {
            (Some(t), Some(l)) => round2((t + l) / 2.0),
            (Some(v), None) | (None, Some(v)) => v,
            (None, None) => 0.0,
        };
        data.co_attainment.insert(co.clone(), overall);
        data.co_attainment_theory.insert(co.clone(), t.unwrap_or(0.0));
        data.co_attainment_lab.insert(co.clone(), l.unwrap_or(0.0));
    }

    data.summary = AttainmentSummary {
        average_attainment: average(&data.co_attainment),
        average_theory: average(&data.co_attainment_theory),
        average_lab: average(&data.co_attainment_lab),
    };
    data
}

fn average(values: &BTreeMap<String, f64>) -> f64 {
    let v: Vec<f64> = values.values().copied().collect();
    mean(&v).map(round2).unwrap_or(0.0)
}
