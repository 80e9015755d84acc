use serde_json::json;

use crate::course::{self, CourseEvaluation};
use crate::db::{self, CourseKey};
use crate::ipc::helpers::{current_setup, optional_str, require_db, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};

fn attainment(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let key = CourseKey {
        subject_code: required_str(req, "subject_code")?.to_string(),
        batch_id: optional_str(req, "batch_id").unwrap_or_default().to_string(),
        section: optional_str(req, "section").unwrap_or_default().to_string(),
        semester: optional_str(req, "semester").unwrap_or_default().to_string(),
        academic_year: optional_str(req, "academic_year")
            .unwrap_or_default()
            .to_string(),
    };
    let settings = current_setup(state)?.course_settings();

    let stored = db::course_evaluations(conn, &key).map_err(HandlerErr::infra("db_query_failed"))?;
    // Newest first, so the head carries the matrix in force.
    let Some(latest) = stored.first() else {
        return Err(HandlerErr::with_details(
            "not_found",
            "no evaluations stored for this course",
            json!({ "subject_code": key.subject_code, "batch_id": key.batch_id }),
        ));
    };
    let matrix = course::matrix_from_input(&latest.input);

    let inputs: Vec<CourseEvaluation<'_>> = stored
        .iter()
        .map(|e| CourseEvaluation {
            evaluation_type: &e.row.context.evaluation_type,
            co_attainment: &e.result.co_data.co_attainment,
        })
        .collect();
    let rolled = course::roll_up(&inputs, &matrix, &settings);

    let evaluations: Vec<serde_json::Value> = stored
        .iter()
        .map(|e| {
            json!({
                "evaluationId": e.row.evaluation_id,
                "evaluationType": e.row.context.evaluation_type,
                "submittedAt": e.row.submitted_at,
            })
        })
        .collect();

    Ok(json!({
        "course_outcomes": rolled.course_outcomes,
        "po_attainment": rolled.po_attainment,
        "summary": rolled.summary,
        "evaluations": evaluations,
        "matrixEvaluationId": latest.row.evaluation_id,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "course.attainment" => Some(respond(req, attainment(state, req))),
        _ => None,
    }
}
