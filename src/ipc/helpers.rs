use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::AttainmentError;
use crate::ipc::error::{attainment_err, err};
use crate::ipc::types::{AppState, Request};
use crate::setup::{self, AttainmentSetup};

pub enum HandlerErr {
    Plain {
        code: &'static str,
        message: String,
        details: Option<serde_json::Value>,
    },
    Attainment(AttainmentError),
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self::Plain {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: &'static str, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Plain {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    /// Maps an infrastructure failure, keeping the full context chain.
    pub fn infra(code: &'static str) -> impl Fn(anyhow::Error) -> HandlerErr {
        move |e| HandlerErr::new(code, format!("{e:#}"))
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        match self {
            Self::Plain {
                code,
                message,
                details,
            } => err(id, code, message, details),
            Self::Attainment(e) => {
                tracing::info!(code = e.code(), error = %e, "submission rejected");
                attainment_err(id, &e)
            }
        }
    }
}

impl From<AttainmentError> for HandlerErr {
    fn from(e: AttainmentError) -> Self {
        Self::Attainment(e)
    }
}

pub fn respond(req: &Request, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(v) => crate::ipc::error::ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn required_str<'a>(req: &'a Request, key: &str) -> Result<&'a str, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing params.{key}")))
}

pub fn optional_str<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Deserializes `params.<key>`, or the whole params object when `key` is empty.
pub fn parse_param<T: DeserializeOwned>(req: &Request, key: &str) -> Result<T, HandlerErr> {
    let raw = if key.is_empty() {
        &req.params
    } else {
        req.params
            .get(key)
            .ok_or_else(|| HandlerErr::new("bad_params", format!("missing params.{key}")))?
    };
    serde_json::from_value(raw.clone()).map_err(|e| {
        let field = if key.is_empty() { "params" } else { key };
        HandlerErr::with_details(
            "bad_params",
            format!("invalid {field}: {e}"),
            json!({ "field": field }),
        )
    })
}

/// Workspace settings, or the built-in defaults when no workspace is open.
pub fn current_setup(state: &AppState) -> Result<AttainmentSetup, HandlerErr> {
    match state.db.as_ref() {
        Some(conn) => setup::load_attainment(conn).map_err(HandlerErr::infra("db_query_failed")),
        None => Ok(setup::defaults()),
    }
}
