use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use super::{
    CoPoMatrix, EngineOptions, EvaluationInput, Question, QuestionDef, QuestionGroup,
    StudentResponse, Validated,
};
use crate::error::AttainmentError;

const MAX_CORRELATION: i64 = 3;

fn valid_fraction(f: f64) -> bool {
    f.is_finite() && f > 0.0 && f <= 1.0
}

/// Resolves defaults (threshold, group) and checks every declared question.
pub fn resolve_questions(
    defs: &[QuestionDef],
    opts: &EngineOptions,
) -> Result<Vec<Question>, AttainmentError> {
    if defs.is_empty() {
        return Err(AttainmentError::NoQuestions);
    }

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(defs.len());
    for (index, def) in defs.iter().enumerate() {
        let id = def.id.trim().to_string();
        if id.is_empty() {
            return Err(AttainmentError::EmptyQuestionId { index });
        }
        if !seen.insert(id.clone()) {
            return Err(AttainmentError::DuplicateQuestion { question_id: id });
        }
        if !def.max_mark.is_finite() || def.max_mark <= 0.0 {
            return Err(AttainmentError::InvalidMaxMark {
                question_id: id,
                max_mark: def.max_mark,
            });
        }
        let fraction = def
            .threshold_fraction
            .unwrap_or(opts.default_threshold_fraction);
        if !valid_fraction(fraction) {
            return Err(AttainmentError::InvalidThreshold {
                question_id: id,
                fraction,
            });
        }
        let group = def.group.unwrap_or_else(|| {
            if !opts.lab_question_prefix.is_empty() && id.starts_with(&opts.lab_question_prefix) {
                QuestionGroup::Lab
            } else {
                QuestionGroup::Theory
            }
        });
        out.push(Question {
            id,
            max_mark: def.max_mark,
            group,
            threshold_fraction: fraction,
        });
    }
    Ok(out)
}

pub fn validate(input: &EvaluationInput, opts: &EngineOptions) -> Result<Validated, AttainmentError> {
    let questions = resolve_questions(&input.questions, opts)?;
    let by_id: HashMap<&str, &Question> = questions.iter().map(|q| (q.id.as_str(), q)).collect();

    let mut question_co_map = BTreeMap::new();
    let mut course_outcomes = BTreeSet::new();
    for (qid, cos) in &input.question_co_map {
        let qid = qid.trim();
        if !by_id.contains_key(qid) {
            return Err(AttainmentError::UnknownMappedQuestion {
                question_id: qid.to_string(),
            });
        }
        let mut mapped: Vec<String> = Vec::new();
        for co in cos.iter().map(|c| c.trim()).filter(|c| !c.is_empty()) {
            if !mapped.iter().any(|m| m == co) {
                mapped.push(co.to_string());
            }
        }
        if mapped.is_empty() {
            return Err(AttainmentError::EmptyCoMapping {
                question_id: qid.to_string(),
            });
        }
        if question_co_map.contains_key(qid) {
            return Err(AttainmentError::DuplicateMappedQuestion {
                question_id: qid.to_string(),
            });
        }
        course_outcomes.extend(mapped.iter().cloned());
        question_co_map.insert(qid.to_string(), mapped);
    }

    let mut co_po_matrix = CoPoMatrix::new();
    for (co, row) in &input.co_po_matrix {
        let co = co.trim();
        if !course_outcomes.contains(co) {
            return Err(AttainmentError::UndeclaredCourseOutcome {
                co_id: co.to_string(),
            });
        }
        if co_po_matrix.contains_key(co) {
            return Err(AttainmentError::DuplicateMatrixRow {
                co_id: co.to_string(),
            });
        }
        let mut cells = BTreeMap::new();
        for (po, strength) in row {
            let strength = *strength;
            let Ok(w) = u8::try_from(strength) else {
                return Err(AttainmentError::InvalidCorrelation {
                    co_id: co.to_string(),
                    po_id: po.clone(),
                    strength,
                });
            };
            if i64::from(w) > MAX_CORRELATION {
                return Err(AttainmentError::InvalidCorrelation {
                    co_id: co.to_string(),
                    po_id: po.clone(),
                    strength,
                });
            }
            let po = po.trim();
            if cells.insert(po.to_string(), w).is_some() {
                return Err(AttainmentError::DuplicateCorrelation {
                    co_id: co.to_string(),
                    po_id: po.to_string(),
                });
            }
        }
        co_po_matrix.insert(co.to_string(), cells);
    }

    let mut students = HashSet::new();
    let mut responses = Vec::with_capacity(input.responses.len());
    for (i, r) in input.responses.iter().enumerate() {
        let row = i + 1;
        let student_id = r.student_id.trim().to_string();
        if student_id.is_empty() {
            return Err(AttainmentError::MissingStudentId { row });
        }
        if !students.insert(student_id.clone()) {
            return Err(AttainmentError::DuplicateStudent { row, student_id });
        }

        let mut scores = BTreeMap::new();
        for (qid, value) in &r.scores {
            let Some(value) = *value else {
                continue;
            };
            let Some(q) = by_id.get(qid.trim()) else {
                return Err(AttainmentError::UndeclaredScore {
                    row,
                    student_id,
                    question_id: qid.clone(),
                });
            };
            if !value.is_finite() || value < 0.0 || value > q.max_mark {
                return Err(AttainmentError::ScoreOutOfRange {
                    row,
                    column: None,
                    student_id,
                    question_id: q.id.clone(),
                    value,
                    max_mark: q.max_mark,
                });
            }
            if scores.insert(q.id.clone(), value).is_some() {
                return Err(AttainmentError::DuplicateScore {
                    row,
                    student_id,
                    question_id: q.id.clone(),
                });
            }
        }
        responses.push(StudentResponse { student_id, scores });
    }

    Ok(Validated {
        questions,
        responses,
        question_co_map,
        course_outcomes,
        co_po_matrix,
    })
}
