//! Course-level roll-up across the stored evaluations of one offering.
//!
//! Continuous internal evaluations (`CIE*`) and the semester end exam
//! (`SEE*`) are averaged separately per CO, then weighted together.
//! Other evaluation types are listed but do not count.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::attainment::po::{program_outcomes, weighted_attainment};
use crate::attainment::{mean, round2, CoPoMatrix, EvaluationInput};

#[derive(Debug, Clone, PartialEq)]
pub struct CourseSettings {
    pub cie_weight: f64,
    pub see_weight: f64,
    pub high_band: f64,
    pub medium_band: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Cie,
    See,
}

impl Phase {
    pub fn classify(evaluation_type: &str) -> Option<Self> {
        let t = evaluation_type.trim().to_ascii_uppercase();
        if t.starts_with("CIE") {
            Some(Self::Cie)
        } else if t.starts_with("SEE") {
            Some(Self::See)
        } else {
            None
        }
    }
}

pub struct CourseEvaluation<'a> {
    pub evaluation_type: &'a str,
    pub co_attainment: &'a BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseCo {
    pub cie: Option<f64>,
    pub see: Option<f64>,
    pub overall: f64,
    pub band: Band,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CourseSummary {
    pub average_co_attainment: f64,
    pub average_po_attainment: f64,
    pub cie_evaluations: usize,
    pub see_evaluations: usize,
    pub ignored_evaluations: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CourseAttainment {
    pub course_outcomes: BTreeMap<String, CourseCo>,
    pub po_attainment: BTreeMap<String, f64>,
    pub summary: CourseSummary,
}

impl CourseSettings {
    fn band(&self, value: f64) -> Band {
        if value >= self.high_band {
            Band::High
        } else if value >= self.medium_band {
            Band::Medium
        } else {
            Band::Low
        }
    }

    fn combine(&self, cie: Option<f64>, see: Option<f64>) -> f64 {
        match (cie, see) {
            (Some(c), Some(s)) => {
                let total = self.cie_weight + self.see_weight;
                if total > 0.0 {
                    round2((self.cie_weight * c + self.see_weight * s) / total)
                } else {
                    round2((c + s) / 2.0)
                }
            }
            (Some(v), None) | (None, Some(v)) => v,
            (None, None) => 0.0,
        }
    }
}

/// Correlation strengths of a stored input, dropping anything off the 0..=3 scale.
pub fn matrix_from_input(input: &EvaluationInput) -> CoPoMatrix {
    input
        .co_po_matrix
        .iter()
        .map(|(co, row)| {
            let cells = row
                .iter()
                .filter_map(|(po, w)| {
                    u8::try_from(*w)
                        .ok()
                        .filter(|w| *w <= 3)
                        .map(|w| (po.clone(), w))
                })
                .collect();
            (co.clone(), cells)
        })
        .collect()
}

pub fn roll_up(
    evaluations: &[CourseEvaluation<'_>],
    matrix: &CoPoMatrix,
    settings: &CourseSettings,
) -> CourseAttainment {
    let mut cie: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    let mut see: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    let mut outcomes: BTreeSet<&str> = BTreeSet::new();
    let mut summary = CourseSummary::default();

    for e in evaluations {
        let bucket = match Phase::classify(e.evaluation_type) {
            Some(Phase::Cie) => {
                summary.cie_evaluations += 1;
                &mut cie
            }
            Some(Phase::See) => {
                summary.see_evaluations += 1;
                &mut see
            }
            None => {
                summary.ignored_evaluations += 1;
                continue;
            }
        };
        for (co, value) in e.co_attainment {
            outcomes.insert(co.as_str());
            bucket.entry(co.as_str()).or_default().push(*value);
        }
    }

    let mut out = CourseAttainment::default();
    let mut overall = BTreeMap::new();
    for co in outcomes {
        let c = cie.get(co).and_then(|v| mean(v)).map(round2);
        let s = see.get(co).and_then(|v| mean(v)).map(round2);
        let value = settings.combine(c, s);
        overall.insert(co.to_string(), value);
        out.course_outcomes.insert(
            co.to_string(),
            CourseCo {
                cie: c,
                see: s,
                overall: value,
                band: settings.band(value),
            },
        );
    }

    let mut correlated = Vec::new();
    for po in program_outcomes(matrix) {
        let value = weighted_attainment(&overall, matrix, &po);
        if let Some(v) = value {
            correlated.push(v);
        }
        out.po_attainment.insert(po, value.unwrap_or(0.0));
    }

    let co_values: Vec<f64> = overall.values().copied().collect();
    summary.average_co_attainment = mean(&co_values).map(round2).unwrap_or(0.0);
    summary.average_po_attainment = mean(&correlated).map(round2).unwrap_or(0.0);
    out.summary = summary;
    out
}
