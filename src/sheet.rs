//! Reader for the department's CSV mark-sheet layout.
//!
//! Within the first few rows the sheet carries a `COs mapped` row, a
//! `Maximum Marks` row and a header row naming `USN` and `STUDENT NAME`.
//! Student rows follow the header. Question columns are the header cells
//! starting with `Q`.

use anyhow::{bail, Context};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::attainment::{
    resolve_questions, EngineOptions, EvaluationInput, QuestionDef, QuestionGroup, ResponseInput,
};
use crate::error::AttainmentError;
use crate::normalize::{self, Cell, SheetTable};

const HEADER_SCAN_ROWS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetStudent {
    pub usn: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedSheet {
    pub group: QuestionGroup,
    pub questions: Vec<QuestionDef>,
    pub question_co_map: BTreeMap<String, Vec<String>>,
    pub students: Vec<SheetStudent>,
    /// Skipped question columns that had no CO mapping.
    pub unmapped_columns: Vec<String>,
    pub table: SheetTable,
}

fn contains_ci(cell: &str, needle: &str) -> bool {
    cell.to_ascii_uppercase().contains(&needle.to_ascii_uppercase())
}

fn row_has(row: &[String], needle: &str) -> bool {
    row.iter().any(|c| contains_ci(c, needle))
}

fn column_of(row: &[String], needle: &str) -> Option<usize> {
    row.iter().position(|c| contains_ci(c, needle))
}

fn read_records(text: &str) -> anyhow::Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("malformed CSV record {}", i + 1))?;
        rows.push(record.iter().map(|s| s.to_string()).collect());
    }
    Ok(rows)
}

/// Parses one mark sheet. `prefix` is prepended to every question id so
/// lab sheets do not collide with theory questions (`LAB_1_Q1`).
pub fn parse_mark_sheet(text: &str, group: QuestionGroup, prefix: &str) -> anyhow::Result<ParsedSheet> {
    let rows = read_records(text)?;
    let scan = rows.len().min(HEADER_SCAN_ROWS);

    let mut co_row = None;
    let mut max_row = None;
    let mut header_row = None;
    for (i, row) in rows.iter().take(scan).enumerate() {
        if co_row.is_none() && row_has(row, "COs mapped") {
            co_row = Some(i);
        }
        if max_row.is_none() && row_has(row, "Maximum Marks") {
            max_row = Some(i);
        }
        if header_row.is_none() && row_has(row, "USN") && row_has(row, "STUDENT NAME") {
            header_row = Some(i);
        }
    }
    let (Some(co_row), Some(max_row), Some(header_row)) = (co_row, max_row, header_row) else {
        bail!(
            "mark sheet must carry 'COs mapped', 'Maximum Marks' and 'USN'/'STUDENT NAME' rows within the first {} rows",
            HEADER_SCAN_ROWS
        );
    };

    let header = &rows[header_row];
    let usn_col = column_of(header, "USN").context("header row has no USN column")?;
    let name_col = column_of(header, "STUDENT NAME");

    let mut questions = Vec::new();
    let mut question_co_map = BTreeMap::new();
    let mut unmapped_columns = Vec::new();
    let mut column_map = BTreeMap::new();
    let mut source_columns = Vec::new();

    for (idx, title) in header.iter().enumerate() {
        if idx == usn_col || Some(idx) == name_col || !title.to_ascii_uppercase().starts_with('Q') {
            continue;
        }
        let question_id = format!("{prefix}{title}");
        let cos: Vec<String> = rows[co_row]
            .get(idx)
            .map(|c| {
                c.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        if cos.is_empty() {
            tracing::warn!(question = %question_id, "question column has no CO mapping; skipped");
            unmapped_columns.push(question_id);
            continue;
        }
        let raw_max = rows[max_row].get(idx).map(|s| s.as_str()).unwrap_or("");
        let max_mark: f64 = raw_max.parse().with_context(|| {
            format!("question {question_id} has no numeric maximum mark (found '{raw_max}')")
        })?;
        if !max_mark.is_finite() || max_mark <= 0.0 {
            bail!("question {question_id} has a non-positive maximum mark ({max_mark})");
        }

        source_columns.push(idx);
        column_map.insert(source_columns.len(), question_id.clone());
        question_co_map.insert(question_id.clone(), cos);
        questions.push(QuestionDef {
            id: question_id,
            max_mark,
            group: Some(group),
            threshold_fraction: None,
        });
    }
    if questions.is_empty() {
        bail!("mark sheet has no question columns with a CO mapping");
    }

    let mut students = Vec::new();
    let mut table_rows = Vec::new();
    for row in rows.iter().skip(header_row + 1) {
        let usn = row.get(usn_col).map(|s| s.trim()).unwrap_or("");
        if usn.is_empty() {
            continue;
        }
        let name = name_col
            .and_then(|c| row.get(c))
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        students.push(SheetStudent {
            usn: usn.to_string(),
            name,
        });

        let mut cells = Vec::with_capacity(source_columns.len() + 1);
        cells.push(Cell::from(usn));
        for &src in &source_columns {
            cells.push(row.get(src).map(|s| Cell::from(s.as_str())).unwrap_or(Cell::Empty));
        }
        table_rows.push(cells);
    }

    tracing::debug!(
        questions = questions.len(),
        students = students.len(),
        skipped = unmapped_columns.len(),
        "mark sheet parsed"
    );

    Ok(ParsedSheet {
        group,
        questions,
        question_co_map,
        students,
        unmapped_columns,
        table: SheetTable {
            rows: table_rows,
            header_rows: 0,
            column_map,
        },
    })
}

pub fn read_mark_sheet(path: &Path, group: QuestionGroup, prefix: &str) -> anyhow::Result<ParsedSheet> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read mark sheet {}", path.to_string_lossy()))?;
    parse_mark_sheet(&text, group, prefix)
        .with_context(|| format!("failed to parse mark sheet {}", path.to_string_lossy()))
}

/// Question id prefix for the n-th sheet of a group (1-based).
pub fn sheet_prefix(group: QuestionGroup, ordinal: usize, opts: &EngineOptions) -> String {
    match group {
        QuestionGroup::Theory => String::new(),
        QuestionGroup::Lab => format!("{}{}_", opts.lab_question_prefix, ordinal),
    }
}

/// Normalizes every sheet and folds them into one engine input document.
pub fn build_input(
    sheets: &[ParsedSheet],
    co_po_matrix: BTreeMap<String, BTreeMap<String, i64>>,
    opts: &EngineOptions,
) -> Result<EvaluationInput, AttainmentError> {
    let mut questions = Vec::new();
    let mut question_co_map = BTreeMap::new();
    let mut per_sheet = Vec::with_capacity(sheets.len());
    for sheet in sheets {
        let resolved = resolve_questions(&sheet.questions, opts)?;
        per_sheet.push(normalize::normalize(&sheet.table, &resolved)?);
        questions.extend(sheet.questions.iter().cloned());
        question_co_map.extend(
            sheet
                .question_co_map
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
    }

    Ok(EvaluationInput {
        questions,
        question_co_map,
        co_po_matrix,
        responses: normalize::merge_responses(per_sheet)
            .into_iter()
            .map(ResponseInput::from)
            .collect(),
    })
}
