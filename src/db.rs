use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use uuid::Uuid;

use crate::attainment::{AttainmentReport, EvaluationContext, EvaluationInput, Validated};

pub const DB_FILE_NAME: &str = "attaind.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluations(
            id TEXT PRIMARY KEY,
            subject_code TEXT NOT NULL,
            subject_name TEXT NOT NULL,
            evaluation_type TEXT NOT NULL,
            batch_id TEXT NOT NULL,
            section TEXT NOT NULL,
            semester TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            input_digest TEXT NOT NULL,
            input_json TEXT NOT NULL,
            result_json TEXT NOT NULL,
            submission_seq INTEGER NOT NULL DEFAULT 0,
            UNIQUE(subject_code, evaluation_type, batch_id, section, semester, academic_year)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluations_course
         ON evaluations(subject_code, batch_id, section, semester, academic_year)",
        [],
    )?;
    ensure_evaluations_submission_seq(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_marks(
            evaluation_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            question_id TEXT NOT NULL,
            score REAL NOT NULL,
            PRIMARY KEY(evaluation_id, student_id, question_id),
            FOREIGN KEY(evaluation_id) REFERENCES evaluations(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS question_cos(
            evaluation_id TEXT NOT NULL,
            question_id TEXT NOT NULL,
            co_id TEXT NOT NULL,
            max_mark REAL NOT NULL,
            question_group TEXT NOT NULL,
            PRIMARY KEY(evaluation_id, question_id, co_id),
            FOREIGN KEY(evaluation_id) REFERENCES evaluations(id)
        )",
        [],
    )?;

    Ok(conn)
}

/// Workspaces created before submissions were sequenced get the column,
/// numbered in submission order.
fn ensure_evaluations_submission_seq(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "evaluations", "submission_seq")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE evaluations ADD COLUMN submission_seq INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    let mut stmt = conn.prepare("SELECT id FROM evaluations ORDER BY submitted_at, rowid")?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    for (i, id) in ids.iter().enumerate() {
        conn.execute(
            "UPDATE evaluations SET submission_seq = ? WHERE id = ?",
            (i as i64 + 1, id),
        )?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("setting {key} is not valid JSON"))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// SHA-256 hex of the serialized document. Maps are ordered, so equal
/// inputs always give the same digest.
pub fn digest_json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(value)?);
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRow {
    pub evaluation_id: String,
    pub context: EvaluationContext,
    pub submitted_at: String,
    pub input_digest: String,
}

#[derive(Debug, Clone)]
pub struct StoredEvaluation {
    pub row: EvaluationRow,
    pub input: EvaluationInput,
    pub result: AttainmentReport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SavedEvaluation {
    pub evaluation_id: String,
    pub replaced: bool,
    pub input_digest: String,
}

/// Selects the evaluations that make up one course offering.
#[derive(Debug, Clone, Default)]
pub struct CourseKey {
    pub subject_code: String,
    pub batch_id: String,
    pub section: String,
    pub semester: String,
    pub academic_year: String,
}

/// Stores one evaluation, replacing any earlier submission with the same
/// identity. The input is kept in its validated form, so stored keys match
/// the keys of the stored result. Callers run this inside a transaction.
pub fn save_evaluation(
    conn: &Connection,
    ctx: &EvaluationContext,
    validated: &Validated,
    result: &AttainmentReport,
) -> anyhow::Result<SavedEvaluation> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM evaluations
             WHERE subject_code = ? AND evaluation_type = ? AND batch_id = ?
               AND section = ? AND semester = ? AND academic_year = ?",
            (
                &ctx.subject_code,
                &ctx.evaluation_type,
                &ctx.batch_id,
                &ctx.section,
                &ctx.semester,
                &ctx.academic_year,
            ),
            |r| r.get(0),
        )
        .optional()?;

    let input = validated.to_input();
    let input_json = serde_json::to_string(&input)?;
    let result_json = serde_json::to_string(result)?;
    let input_digest = digest_json(&input)?;
    let submitted_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
    let submission_seq: i64 = conn.query_row(
        "SELECT COALESCE(MAX(submission_seq), 0) + 1 FROM evaluations",
        [],
        |r| r.get(0),
    )?;

    let replaced = existing.is_some();
    let evaluation_id = match existing {
        Some(id) => {
            conn.execute("DELETE FROM student_marks WHERE evaluation_id = ?", [&id])?;
            conn.execute("DELETE FROM question_cos WHERE evaluation_id = ?", [&id])?;
            conn.execute(
                "UPDATE evaluations
                 SET subject_name = ?, submitted_at = ?, input_digest = ?,
                     input_json = ?, result_json = ?, submission_seq = ?
                 WHERE id = ?",
                (
                    &ctx.subject_name,
                    &submitted_at,
                    &input_digest,
                    &input_json,
                    &result_json,
                    submission_seq,
                    &id,
                ),
            )?;
            id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO evaluations(
                    id, subject_code, subject_name, evaluation_type, batch_id, section,
                    semester, academic_year, submitted_at, input_digest, input_json, result_json,
                    submission_seq
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    id,
                    ctx.subject_code,
                    ctx.subject_name,
                    ctx.evaluation_type,
                    ctx.batch_id,
                    ctx.section,
                    ctx.semester,
                    ctx.academic_year,
                    submitted_at,
                    input_digest,
                    input_json,
                    result_json,
                    submission_seq,
                ],
            )?;
            id
        }
    };

    let mut marks = conn.prepare(
        "INSERT INTO student_marks(evaluation_id, student_id, question_id, score)
         VALUES(?, ?, ?, ?)",
    )?;
    for r in &validated.responses {
        for (qid, score) in &r.scores {
            marks.execute((&evaluation_id, &r.student_id, qid, score))?;
        }
    }

    let mut cos = conn.prepare(
        "INSERT INTO question_cos(evaluation_id, question_id, co_id, max_mark, question_group)
         VALUES(?, ?, ?, ?, ?)",
    )?;
    for q in &validated.questions {
        let Some(mapped) = validated.question_co_map.get(&q.id) else {
            continue;
        };
        for co in mapped {
            cos.execute((&evaluation_id, &q.id, co, q.max_mark, q.group.as_str()))?;
        }
    }

    Ok(SavedEvaluation {
        evaluation_id,
        replaced,
        input_digest,
    })
}

const ROW_COLUMNS: &str = "id, subject_code, subject_name, evaluation_type, batch_id, section,
     semester, academic_year, submitted_at, input_digest";

fn map_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<EvaluationRow> {
    Ok(EvaluationRow {
        evaluation_id: r.get(0)?,
        context: EvaluationContext {
            subject_code: r.get(1)?,
            subject_name: r.get(2)?,
            evaluation_type: r.get(3)?,
            batch_id: r.get(4)?,
            section: r.get(5)?,
            semester: r.get(6)?,
            academic_year: r.get(7)?,
        },
        submitted_at: r.get(8)?,
        input_digest: r.get(9)?,
    })
}

pub fn list_evaluations(
    conn: &Connection,
    subject_code: Option<&str>,
    batch_id: Option<&str>,
) -> anyhow::Result<Vec<EvaluationRow>> {
    let sql = format!(
        "SELECT {ROW_COLUMNS} FROM evaluations
         WHERE (?1 IS NULL OR subject_code = ?1) AND (?2 IS NULL OR batch_id = ?2)
         ORDER BY subject_code, batch_id, section, evaluation_type"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((subject_code, batch_id), map_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn load_documents(
    conn: &Connection,
    row: EvaluationRow,
) -> anyhow::Result<StoredEvaluation> {
    let (input_json, result_json): (String, String) = conn.query_row(
        "SELECT input_json, result_json FROM evaluations WHERE id = ?",
        [&row.evaluation_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    let input = serde_json::from_str(&input_json)
        .with_context(|| format!("stored input of {} is corrupt", row.evaluation_id))?;
    let result = serde_json::from_str(&result_json)
        .with_context(|| format!("stored result of {} is corrupt", row.evaluation_id))?;
    Ok(StoredEvaluation { row, input, result })
}

pub fn get_evaluation(conn: &Connection, evaluation_id: &str) -> anyhow::Result<Option<StoredEvaluation>> {
    let row = conn
        .query_row(
            &format!("SELECT {ROW_COLUMNS} FROM evaluations WHERE id = ?"),
            [evaluation_id],
            map_row,
        )
        .optional()?;
    row.map(|r| load_documents(conn, r)).transpose()
}

/// Returns false when no evaluation has that id.
pub fn delete_evaluation(conn: &Connection, evaluation_id: &str) -> anyhow::Result<bool> {
    conn.execute(
        "DELETE FROM student_marks WHERE evaluation_id = ?",
        [evaluation_id],
    )?;
    conn.execute(
        "DELETE FROM question_cos WHERE evaluation_id = ?",
        [evaluation_id],
    )?;
    let n = conn.execute("DELETE FROM evaluations WHERE id = ?", [evaluation_id])?;
    Ok(n > 0)
}

/// Every evaluation of one course offering, most recent submission first.
pub fn course_evaluations(conn: &Connection, key: &CourseKey) -> anyhow::Result<Vec<StoredEvaluation>> {
    let sql = format!(
        "SELECT {ROW_COLUMNS} FROM evaluations
         WHERE subject_code = ? AND batch_id = ? AND section = ? AND semester = ? AND academic_year = ?
         ORDER BY submission_seq DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            (
                &key.subject_code,
                &key.batch_id,
                &key.section,
                &key.semester,
                &key.academic_year,
            ),
            map_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(|r| load_documents(conn, r)).collect()
}

pub fn count_student_marks(conn: &Connection, evaluation_id: &str) -> anyhow::Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM student_marks WHERE evaluation_id = ?",
        [evaluation_id],
        |r| r.get(0),
    )?)
}
