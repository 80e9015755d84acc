use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{round2, Question, QuestionGroup, StudentResponse};

/// Marks are typed in by hand with at most a couple of decimals; this keeps
/// `0.7 * 3` from rejecting a score of exactly 2.1.
const THRESHOLD_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionMetric {
    pub max_mark: f64,
    pub threshold: f64,
    pub num_attempted: usize,
    pub num_above_threshold: usize,
    /// Share of attempting students at or above the threshold, in percent.
    /// A score counts as reaching the threshold within `THRESHOLD_EPSILON`.
    pub co_attainment: f64,
    pub group: QuestionGroup,
}

pub fn calculate(
    questions: &[Question],
    responses: &[StudentResponse],
) -> BTreeMap<String, QuestionMetric> {
    questions
        .iter()
        .map(|q| (q.id.clone(), metric_for(q, responses)))
        .collect()
}

fn metric_for(question: &Question, responses: &[StudentResponse]) -> QuestionMetric {
    let threshold = question.threshold_value();
    let mut num_attempted = 0usize;
    let mut num_above_threshold = 0usize;

    for score in responses.iter().filter_map(|r| r.scores.get(&question.id)) {
        num_attempted += 1;
        if *score + THRESHOLD_EPSILON >= threshold {
            num_above_threshold += 1;
        }
    }

    let co_attainment = if num_attempted == 0 {
        0.0
    } else {
        round2(num_above_threshold as f64 / num_attempted as f64 * 100.0)
    };

    QuestionMetric {
        max_mark: question.max_mark,
        threshold,
        num_attempted,
        num_above_threshold,
        co_attainment,
        group: question.group,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: &str, max_mark: f64, fraction: f64) -> Question {
        Question {
            id: id.to_string(),
            max_mark,
            group: QuestionGroup::Theory,
            threshold_fraction: fraction,
        }
    }

    fn responses(qid: &str, scores: &[Option<f64>]) -> Vec<StudentResponse> {
        scores
            .iter()
            .enumerate()
            .map(|(i, s)| StudentResponse {
                student_id: format!("S{}", i + 1),
                scores: s
                    .map(|v| BTreeMap::from([(qid.to_string(), v)]))
                    .unwrap_or_default(),
            })
            .collect()
    }

    #[test]
    fn two_students_one_passing() {
        let q = question("Q1", 10.0, 0.6);
        let metrics = calculate(&[q], &responses("Q1", &[Some(8.0), Some(4.0)]));
        let m = &metrics["Q1"];
        assert_eq!(m.threshold, 6.0);
        assert_eq!(m.num_attempted, 2);
        assert_eq!(m.num_above_threshold, 1);
        assert_eq!(m.co_attainment, 50.0);
    }

    #[test]
    fn threshold_is_inclusive() {
        let q = question("Q1", 10.0, 0.6);
        let metrics = calculate(&[q], &responses("Q1", &[Some(6.0)]));
        assert_eq!(metrics["Q1"].num_above_threshold, 1);

        let q = question("Q2", 3.0, 0.7);
        let metrics = calculate(&[q], &responses("Q2", &[Some(2.1), Some(2.09)]));
        assert_eq!(metrics["Q2"].num_above_threshold, 1);
    }

    #[test]
    fn absent_scores_are_not_attempts() {
        let q = question("Q1", 10.0, 0.6);
        let metrics = calculate(&[q], &responses("Q1", &[Some(0.0), None, Some(9.0)]));
        let m = &metrics["Q1"];
        assert_eq!(m.num_attempted, 2);
        assert_eq!(m.num_above_threshold, 1);
        assert_eq!(m.co_attainment, 50.0);
    }

    #[test]
    fn zero_attempts_is_zero_not_nan() {
        let q = question("Q1", 10.0, 0.6);
        let metrics = calculate(&[q], &responses("Q1", &[None, None]));
        let m = &metrics["Q1"];
        assert_eq!(m.num_attempted, 0);
        assert_eq!(m.co_attainment, 0.0);
    }

    #[test]
    fn raising_threshold_never_adds_passes() {
        let scores = responses(
            "Q1",
            &[Some(2.0), Some(5.5), Some(6.0), Some(7.5), Some(9.0), Some(10.0)],
        );
        let mut previous = usize::MAX;
        for step in 1..=10 {
            let fraction = step as f64 / 10.0;
            let metrics = calculate(&[question("Q1", 10.0, fraction)], &scores);
            let above = metrics["Q1"].num_above_threshold;
            assert!(above <= previous, "fraction {fraction}: {above} > {previous}");
            previous = above;
        }
    }
}
