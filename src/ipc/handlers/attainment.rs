use serde_json::json;
use std::path::PathBuf;

use crate::attainment::{self, resolve_questions, EvaluationInput, QuestionDef, QuestionGroup};
use crate::ipc::helpers::{current_setup, optional_str, parse_param, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::normalize::{self, SheetTable};
use crate::sheet;

fn compute(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let input: EvaluationInput = parse_param(req, "")?;
    let opts = current_setup(state)?.engine_options();
    let report = attainment::run(&input, &opts)?;
    serde_json::to_value(&report).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

fn sheet_normalize(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let table: SheetTable = parse_param(req, "")?;
    let defs: Vec<QuestionDef> = parse_param(req, "questions")?;
    let opts = current_setup(state)?.engine_options();
    let questions = resolve_questions(&defs, &opts)?;
    let responses = normalize::normalize(&table, &questions)?;
    Ok(json!({
        "totalStudents": responses.len(),
        "responses": responses,
    }))
}

pub(crate) fn parse_group(params: &serde_json::Value) -> Result<QuestionGroup, HandlerErr> {
    match params.get("group").and_then(|v| v.as_str()) {
        None => Ok(QuestionGroup::Theory),
        Some(raw) => QuestionGroup::parse(raw).ok_or_else(|| {
            HandlerErr::with_details(
                "bad_params",
                "group must be one of: theory, lab",
                json!({ "group": raw }),
            )
        }),
    }
}

/// Reads `csvText` or `csvPath` from a sheet descriptor.
pub(crate) fn read_sheet(
    params: &serde_json::Value,
    group: QuestionGroup,
    prefix: &str,
) -> Result<sheet::ParsedSheet, HandlerErr> {
    let text = params.get("csvText").and_then(|v| v.as_str());
    let path = params
        .get("csvPath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let parsed = match (text, path) {
        (Some(text), _) => sheet::parse_mark_sheet(text, group, prefix),
        (None, Some(path)) => sheet::read_mark_sheet(&path, group, prefix),
        (None, None) => {
            return Err(HandlerErr::new("bad_params", "missing csvText or csvPath"));
        }
    };
    parsed.map_err(HandlerErr::infra("sheet_parse_failed"))
}

fn sheet_parse(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let opts = current_setup(state)?.engine_options();
    let group = parse_group(&req.params)?;
    let prefix = match optional_str(req, "prefix") {
        Some(p) => p.to_string(),
        None => sheet::sheet_prefix(group, 1, &opts),
    };
    let parsed = read_sheet(&req.params, group, &prefix)?;
    serde_json::to_value(&parsed).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attainment.compute" => Some(respond(req, compute(state, req))),
        "sheet.normalize" => Some(respond(req, sheet_normalize(state, req))),
        "sheet.parse" => Some(respond(req, sheet_parse(state, req))),
        _ => None,
    }
}
