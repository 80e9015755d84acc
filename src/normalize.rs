use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::attainment::{Question, StudentResponse};
use crate::error::AttainmentError;

/// One spreadsheet cell as it arrives over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Number(f64),
    Text(String),
    Empty,
}

impl Cell {
    /// Numeric value, or `None` for blank and non-numeric cells.
    pub fn score(&self) -> Option<f64> {
        let v = match self {
            Cell::Number(n) => *n,
            Cell::Text(s) => s.trim().parse::<f64>().ok()?,
            Cell::Empty => return None,
        };
        v.is_finite().then_some(v)
    }

    pub fn text(&self) -> String {
        match self {
            Cell::Number(n) => n.to_string(),
            Cell::Text(s) => s.trim().to_string(),
            Cell::Empty => String::new(),
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            Cell::Number(_) => false,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Empty => true,
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

fn default_header_rows() -> usize {
    1
}

/// Raw tabular marks: column 0 is the student id, `column_map` says which
/// other columns carry which question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetTable {
    pub rows: Vec<Vec<Cell>>,
    #[serde(default = "default_header_rows")]
    pub header_rows: usize,
    pub column_map: BTreeMap<usize, String>,
}

pub fn normalize(
    table: &SheetTable,
    questions: &[Question],
) -> Result<Vec<StudentResponse>, AttainmentError> {
    let declared: HashMap<&str, &Question> =
        questions.iter().map(|q| (q.id.as_str(), q)).collect();

    let mut columns: Vec<(usize, &Question)> = Vec::with_capacity(table.column_map.len());
    let mut mapped = HashSet::new();
    for (&column, qid) in &table.column_map {
        let qid = qid.trim();
        let Some(q) = declared.get(qid) else {
            return Err(AttainmentError::UndeclaredColumnQuestion {
                column,
                question_id: qid.to_string(),
            });
        };
        if column == 0 {
            return Err(AttainmentError::StudentIdColumnMapped {
                question_id: qid.to_string(),
            });
        }
        if !mapped.insert(qid) {
            return Err(AttainmentError::DuplicateColumnMapping {
                question_id: qid.to_string(),
            });
        }
        columns.push((column, q));
    }
    if let Some(q) = questions.iter().find(|q| !mapped.contains(q.id.as_str())) {
        return Err(AttainmentError::MissingQuestionColumn {
            question_id: q.id.clone(),
        });
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for (offset, cells) in table.rows.iter().enumerate().skip(table.header_rows) {
        let row = offset + 1;
        if cells.iter().all(Cell::is_blank) {
            continue;
        }
        let student_id = cells.first().map(Cell::text).unwrap_or_default();
        if student_id.is_empty() {
            return Err(AttainmentError::MissingStudentId { row });
        }
        if !seen.insert(student_id.clone()) {
            return Err(AttainmentError::DuplicateStudent { row, student_id });
        }

        let mut scores = BTreeMap::new();
        for &(column, q) in &columns {
            let Some(value) = cells.get(column).and_then(Cell::score) else {
                continue;
            };
            if value < 0.0 || value > q.max_mark {
                return Err(AttainmentError::ScoreOutOfRange {
                    row,
                    column: Some(column),
                    student_id,
                    question_id: q.id.clone(),
                    value,
                    max_mark: q.max_mark,
                });
            }
            scores.insert(q.id.clone(), value);
        }
        out.push(StudentResponse { student_id, scores });
    }

    tracing::debug!(students = out.len(), columns = columns.len(), "sheet normalized");
    Ok(out)
}

/// Joins per-sheet responses by student id, keeping first-seen order.
pub fn merge_responses(sheets: Vec<Vec<StudentResponse>>) -> Vec<StudentResponse> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<StudentResponse> = Vec::new();
    for sheet in sheets {
        for r in sheet {
            match index.get(&r.student_id) {
                Some(&i) => merged[i].scores.extend(r.scores),
                None => {
                    index.insert(r.student_id.clone(), merged.len());
                    merged.push(r);
                }
            }
        }
    }
    merged
}
