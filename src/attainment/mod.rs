//! Outcome attainment engine.
//!
//! Validate once, then run the forward pipeline
//! question metrics -> course outcomes -> program outcomes.
//! Each stage borrows the previous stage's output and returns a fresh value.

pub mod co;
pub mod po;
pub mod questions;
mod validate;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::AttainmentError;

pub use co::CoData;
pub use po::PoData;
pub use questions::QuestionMetric;
pub use validate::{resolve_questions, validate};

pub const DEFAULT_THRESHOLD_FRACTION: f64 = 0.6;
pub const DEFAULT_LAB_PREFIX: &str = "LAB_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionGroup {
    Theory,
    Lab,
}

impl QuestionGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Theory => "theory",
            Self::Lab => "lab",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "theory" => Some(Self::Theory),
            "lab" => Some(Self::Lab),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub default_threshold_fraction: f64,
    /// Questions without an explicit group are `lab` when their id starts with this.
    pub lab_question_prefix: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            default_threshold_fraction: DEFAULT_THRESHOLD_FRACTION,
            lab_question_prefix: DEFAULT_LAB_PREFIX.to_string(),
        }
    }
}

/// A question as submitted; optional fields are resolved by [`validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDef {
    pub id: String,
    pub max_mark: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<QuestionGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_fraction: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Question {
    pub id: String,
    pub max_mark: f64,
    pub group: QuestionGroup,
    pub threshold_fraction: f64,
}

impl Question {
    pub fn threshold_value(&self) -> f64 {
        self.max_mark * self.threshold_fraction
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResponseInput {
    pub student_id: String,
    /// `null` means not attempted, same as an absent key.
    #[serde(default)]
    pub scores: BTreeMap<String, Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentResponse {
    pub student_id: String,
    pub scores: BTreeMap<String, f64>,
}

impl From<StudentResponse> for ResponseInput {
    fn from(r: StudentResponse) -> Self {
        Self {
            student_id: r.student_id,
            scores: r.scores.into_iter().map(|(q, v)| (q, Some(v))).collect(),
        }
    }
}

/// The engine input document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluationInput {
    pub questions: Vec<QuestionDef>,
    #[serde(default)]
    pub question_co_map: BTreeMap<String, Vec<String>>,
    /// Kept signed so out-of-range strengths can be reported rather than rejected by serde.
    #[serde(default)]
    pub co_po_matrix: BTreeMap<String, BTreeMap<String, i64>>,
    #[serde(default)]
    pub responses: Vec<ResponseInput>,
}

pub type CoPoMatrix = BTreeMap<String, BTreeMap<String, u8>>;

/// Input that passed every check. Computing from it cannot fail.
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    pub questions: Vec<Question>,
    pub responses: Vec<StudentResponse>,
    pub question_co_map: BTreeMap<String, Vec<String>>,
    pub course_outcomes: BTreeSet<String>,
    pub co_po_matrix: CoPoMatrix,
}

impl Validated {
    /// The input document with trimmed keys and every default resolved.
    /// Validating it again yields the same `Validated`.
    pub fn to_input(&self) -> EvaluationInput {
        EvaluationInput {
            questions: self
                .questions
                .iter()
                .map(|q| QuestionDef {
                    id: q.id.clone(),
                    max_mark: q.max_mark,
                    group: Some(q.group),
                    threshold_fraction: Some(q.threshold_fraction),
                })
                .collect(),
            question_co_map: self.question_co_map.clone(),
            co_po_matrix: self
                .co_po_matrix
                .iter()
                .map(|(co, row)| {
                    let cells = row.iter().map(|(po, w)| (po.clone(), i64::from(*w))).collect();
                    (co.clone(), cells)
                })
                .collect(),
            responses: self.responses.iter().cloned().map(ResponseInput::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_students: usize,
    pub total_questions: usize,
}

/// The engine output document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttainmentReport {
    pub question_metrics: BTreeMap<String, QuestionMetric>,
    pub co_data: CoData,
    pub po_data: PoData,
    pub summary: ReportSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AttainmentSummary {
    pub average_attainment: f64,
    pub average_theory: f64,
    pub average_lab: f64,
}

/// Who the mark sheet belongs to. Opaque strings; the engine never interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EvaluationContext {
    #[serde(default)]
    pub subject_code: String,
    #[serde(default)]
    pub subject_name: String,
    #[serde(default)]
    pub evaluation_type: String,
    #[serde(default)]
    pub batch_id: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub semester: String,
    #[serde(default)]
    pub academic_year: String,
}

impl EvaluationContext {
    pub fn normalized(&self) -> Result<Self, AttainmentError> {
        let ctx = Self {
            subject_code: self.subject_code.trim().to_string(),
            subject_name: self.subject_name.trim().to_string(),
            evaluation_type: self.evaluation_type.trim().to_string(),
            batch_id: self.batch_id.trim().to_string(),
            section: self.section.trim().to_string(),
            semester: self.semester.trim().to_string(),
            academic_year: self.academic_year.trim().to_string(),
        };
        if ctx.subject_code.is_empty() {
            return Err(AttainmentError::MissingContextField {
                field: "subject_code",
            });
        }
        if ctx.evaluation_type.is_empty() {
            return Err(AttainmentError::MissingContextField {
                field: "evaluation_type",
            });
        }
        Ok(ctx)
    }
}

pub fn compute(input: &Validated) -> AttainmentReport {
    let question_metrics = questions::calculate(&input.questions, &input.responses);
    let co_data = co::aggregate(
        &input.questions,
        &question_metrics,
        &input.question_co_map,
        &input.course_outcomes,
    );
    let po_data = po::aggregate(&co_data, &input.co_po_matrix);

    tracing::debug!(
        students = input.responses.len(),
        questions = input.questions.len(),
        course_outcomes = co_data.co_attainment.len(),
        program_outcomes = po_data.po_attainment.len(),
        "attainment computed"
    );

    AttainmentReport {
        question_metrics,
        co_data,
        po_data,
        summary: ReportSummary {
            total_students: input.responses.len(),
            total_questions: input.questions.len(),
        },
    }
}

pub fn run(input: &EvaluationInput, opts: &EngineOptions) -> Result<AttainmentReport, AttainmentError> {
    let validated = validate(input, opts)?;
    Ok(compute(&validated))
}

pub fn round2(x: f64) -> f64 {
    if !x.is_finite() {
        return 0.0;
    }
    (x * 100.0).round() / 100.0
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn q(id: &str, max_mark: f64, group: QuestionGroup) -> QuestionDef {
        QuestionDef {
            id: id.to_string(),
            max_mark,
            group: Some(group),
            threshold_fraction: None,
        }
    }

    fn resp(student: &str, scores: &[(&str, f64)]) -> ResponseInput {
        ResponseInput {
            student_id: student.to_string(),
            scores: scores
                .iter()
                .map(|(k, v)| (k.to_string(), Some(*v)))
                .collect(),
        }
    }

    fn sample_input() -> EvaluationInput {
        EvaluationInput {
            questions: vec![
                q("Q1", 10.0, QuestionGroup::Theory),
                q("Q2", 10.0, QuestionGroup::Theory),
                q("LAB_1_Q1", 20.0, QuestionGroup::Lab),
            ],
            question_co_map: BTreeMap::from([
                ("Q1".to_string(), vec!["CO1".to_string()]),
                ("Q2".to_string(), vec!["CO1".to_string(), "CO2".to_string()]),
                ("LAB_1_Q1".to_string(), vec!["CO2".to_string()]),
            ]),
            co_po_matrix: BTreeMap::from([
                (
                    "CO1".to_string(),
                    BTreeMap::from([("PO1".to_string(), 3), ("PO2".to_string(), 0)]),
                ),
                (
                    "CO2".to_string(),
                    BTreeMap::from([("PO1".to_string(), 1), ("PO2".to_string(), 0)]),
                ),
            ]),
            responses: vec![
                resp("S1", &[("Q1", 8.0), ("Q2", 3.0), ("LAB_1_Q1", 15.0)]),
                resp("S2", &[("Q1", 4.0), ("Q2", 9.0), ("LAB_1_Q1", 5.0)]),
                resp("S3", &[("Q1", 6.0), ("Q2", 6.0), ("LAB_1_Q1", 11.0)]),
                resp("S4", &[("Q1", 7.0), ("Q2", 2.0), ("LAB_1_Q1", 18.0)]),
            ],
        }
    }

    #[test]
    fn running_twice_serializes_identically() {
        let input = sample_input();
        let a = run(&input, &EngineOptions::default()).expect("run");
        let b = run(&input, &EngineOptions::default()).expect("run");
        assert_eq!(
            serde_json::to_string(&a).expect("json"),
            serde_json::to_string(&b).expect("json")
        );
    }

    #[test]
    fn every_percentage_stays_in_bounds() {
        let report = run(&sample_input(), &EngineOptions::default()).expect("run");
        let in_bounds = |v: f64| (0.0..=100.0).contains(&v);
        for m in report.question_metrics.values() {
            assert!(in_bounds(m.co_attainment));
            assert!(m.num_above_threshold <= m.num_attempted);
            assert!(m.num_attempted <= report.summary.total_students);
        }
        for map in [
            &report.co_data.co_attainment,
            &report.co_data.co_attainment_theory,
            &report.co_data.co_attainment_lab,
            &report.po_data.po_attainment,
            &report.po_data.po_attainment_theory,
            &report.po_data.po_attainment_lab,
        ] {
            assert!(map.values().all(|v| in_bounds(*v)));
        }
    }

    #[test]
    fn pipeline_end_to_end_figures() {
        let report = run(&sample_input(), &EngineOptions::default()).expect("run");
        // Q1 3/4 pass, Q2 2/4, lab 2/4 against a threshold of 12
        assert_eq!(report.question_metrics["Q1"].co_attainment, 75.0);
        assert_eq!(report.question_metrics["Q2"].co_attainment, 50.0);
        assert_eq!(report.question_metrics["LAB_1_Q1"].threshold, 12.0);
        assert_eq!(report.question_metrics["LAB_1_Q1"].co_attainment, 50.0);

        assert_eq!(report.co_data.co_attainment_theory["CO1"], 62.5);
        assert_eq!(report.co_data.co_attainment_lab["CO1"], 0.0);
        assert_eq!(report.co_data.co_attainment["CO1"], 62.5);
        assert_eq!(report.co_data.co_attainment["CO2"], 50.0);
        assert_eq!(report.co_data.summary.average_attainment, 56.25);
        assert_eq!(report.co_data.summary.average_lab, 25.0);

        // PO1 = (3 * 62.5 + 1 * 50) / 4
        assert_eq!(report.po_data.po_attainment["PO1"], 59.38);
        assert_eq!(report.po_data.po_attainment_lab["PO1"], 12.5);
        assert_eq!(report.po_data.po_attainment["PO2"], 0.0);
        assert_eq!(report.po_data.summary.average_attainment, 59.38);
        assert_eq!(report.summary.total_students, 4);
        assert_eq!(report.summary.total_questions, 3);
    }

    #[test]
    fn canonical_input_trims_keys_and_revalidates_identically() {
        let mut input = sample_input();
        input.questions[0].id = " Q1 ".to_string();
        input.questions[2].group = None;
        let row = input.co_po_matrix.remove("CO1").expect("row");
        input.co_po_matrix.insert("CO1 ".to_string(), row);
        let s1 = input.responses[0].scores.remove("Q1").expect("score");
        input.responses[0].scores.insert("Q1\t".to_string(), s1);

        let opts = EngineOptions::default();
        let validated = validate(&input, &opts).expect("valid");
        let canonical = validated.to_input();

        assert!(canonical.co_po_matrix.contains_key("CO1"));
        assert!(!canonical.co_po_matrix.contains_key("CO1 "));
        assert_eq!(canonical.questions[0].id, "Q1");
        assert_eq!(canonical.questions[2].group, Some(QuestionGroup::Lab));
        assert_eq!(canonical.questions[2].threshold_fraction, Some(0.6));
        assert_eq!(canonical.responses[0].scores["Q1"], Some(8.0));
        assert_eq!(validate(&canonical, &opts).expect("valid again"), validated);
    }

    #[test]
    fn context_requires_subject_and_evaluation_type() {
        let ctx = EvaluationContext {
            subject_code: " 21CS51 ".into(),
            evaluation_type: "".into(),
            ..Default::default()
        };
        assert_eq!(
            ctx.normalized(),
            Err(AttainmentError::MissingContextField {
                field: "evaluation_type"
            })
        );
        let ok = EvaluationContext {
            evaluation_type: "CIE-1".into(),
            ..ctx
        }
        .normalized()
        .expect("valid context");
        assert_eq!(ok.subject_code, "21CS51");
    }

    #[test]
    fn rounding_never_surfaces_nan() {
        assert_eq!(round2(f64::NAN), 0.0);
        assert_eq!(round2(200.0 / 3.0), 66.67);
        assert_eq!(mean(&[]), None);
    }
}
