use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeMap;

use crate::attainment::{self, EvaluationContext, EvaluationInput, QuestionGroup};
use crate::db;
use crate::ipc::handlers::attainment::{parse_group, read_sheet};
use crate::ipc::helpers::{
    current_setup, optional_str, parse_param, require_db, required_str, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::setup::AttainmentSetup;
use crate::sheet;

/// Validate, compute, then store in one transaction. Nothing is written
/// when validation fails.
fn store(
    conn: &Connection,
    ctx: &EvaluationContext,
    input: &EvaluationInput,
    setup: &AttainmentSetup,
) -> Result<serde_json::Value, HandlerErr> {
    let validated = attainment::validate(input, &setup.engine_options())?;
    let result = attainment::compute(&validated);

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let saved = match db::save_evaluation(&tx, ctx, &validated, &result) {
        Ok(s) => s,
        Err(e) => {
            let _ = tx.rollback();
            return Err(HandlerErr::new("db_insert_failed", format!("{e:#}")));
        }
    };
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    tracing::info!(
        evaluation_id = %saved.evaluation_id,
        subject = %ctx.subject_code,
        evaluation_type = %ctx.evaluation_type,
        replaced = saved.replaced,
        students = validated.responses.len(),
        "evaluation stored"
    );

    Ok(json!({
        "evaluationId": saved.evaluation_id,
        "replaced": saved.replaced,
        "inputDigest": saved.input_digest,
        "result": result,
    }))
}

fn submit(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let ctx: EvaluationContext = parse_param(req, "context")?;
    let ctx = ctx.normalized()?;
    let input: EvaluationInput = parse_param(req, "input")?;
    let setup = current_setup(state)?;
    store(conn, &ctx, &input, &setup)
}

fn submit_sheets(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let ctx: EvaluationContext = parse_param(req, "context")?;
    let ctx = ctx.normalized()?;
    let Some(descriptors) = req.params.get("sheets").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "sheets must be an array"));
    };
    if descriptors.is_empty() {
        return Err(HandlerErr::new("bad_params", "sheets must not be empty"));
    }
    let matrix: BTreeMap<String, BTreeMap<String, i64>> = match req.params.get("co_po_matrix") {
        Some(_) => parse_param(req, "co_po_matrix")?,
        None => BTreeMap::new(),
    };
    let setup = current_setup(state)?;
    let opts = setup.engine_options();

    let mut parsed = Vec::with_capacity(descriptors.len());
    let mut lab_ordinal = 0;
    for (index, d) in descriptors.iter().enumerate() {
        let group = parse_group(d)?;
        if group == QuestionGroup::Lab {
            lab_ordinal += 1;
        }
        let prefix = sheet::sheet_prefix(group, lab_ordinal, &opts);
        let sheet = read_sheet(d, group, &prefix).map_err(|e| match e {
            HandlerErr::Plain { code, message, .. } => {
                HandlerErr::with_details(code, message, json!({ "sheet": index }))
            }
            other => other,
        })?;
        parsed.push(sheet);
    }

    let input = sheet::build_input(&parsed, matrix, &opts)?;
    store(conn, &ctx, &input, &setup)
}

fn list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let rows = db::list_evaluations(
        conn,
        optional_str(req, "subject_code"),
        optional_str(req, "batch_id"),
    )
    .map_err(HandlerErr::infra("db_query_failed"))?;
    Ok(json!({ "evaluations": rows }))
}

fn get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let stored = db::get_evaluation(conn, evaluation_id)
        .map_err(HandlerErr::infra("db_query_failed"))?
        .ok_or_else(|| {
            HandlerErr::with_details(
                "not_found",
                "evaluation not found",
                json!({ "evaluationId": evaluation_id }),
            )
        })?;
    let marks = db::count_student_marks(conn, evaluation_id)
        .map_err(HandlerErr::infra("db_query_failed"))?;
    Ok(json!({
        "evaluation": stored.row,
        "storedMarks": marks,
        "input": stored.input,
        "result": stored.result,
    }))
}

fn delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let deleted = match db::delete_evaluation(&tx, evaluation_id) {
        Ok(d) => d,
        Err(e) => {
            let _ = tx.rollback();
            return Err(HandlerErr::new("db_delete_failed", format!("{e:#}")));
        }
    };
    if !deleted {
        let _ = tx.rollback();
        return Err(HandlerErr::with_details(
            "not_found",
            "evaluation not found",
            json!({ "evaluationId": evaluation_id }),
        ));
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tracing::info!(evaluation_id, "evaluation deleted");
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "evaluations.submit" => Some(respond(req, submit(state, req))),
        "evaluations.submitSheets" => Some(respond(req, submit_sheets(state, req))),
        "evaluations.list" => Some(respond(req, list(state, req))),
        "evaluations.get" => Some(respond(req, get(state, req))),
        "evaluations.delete" => Some(respond(req, delete(state, req))),
        _ => None,
    }
}
