//! Workspace settings for attainment runs, stored as JSON under
//! `setup.attainment` and merged over the defaults on every read.

use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::attainment::{EngineOptions, DEFAULT_LAB_PREFIX, DEFAULT_THRESHOLD_FRACTION};
use crate::course::CourseSettings;
use crate::db;

pub const ATTAINMENT_KEY: &str = "setup.attainment";

pub fn default_attainment() -> Value {
    json!({
        "defaultThresholdFraction": DEFAULT_THRESHOLD_FRACTION,
        "labQuestionPrefix": DEFAULT_LAB_PREFIX,
        "cieWeight": 0.5,
        "seeWeight": 0.5,
        "highBand": 70.0,
        "mediumBand": 60.0
    })
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttainmentSetup {
    pub default_threshold_fraction: f64,
    pub lab_question_prefix: String,
    pub cie_weight: f64,
    pub see_weight: f64,
    pub high_band: f64,
    pub medium_band: f64,
}

impl AttainmentSetup {
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            default_threshold_fraction: self.default_threshold_fraction,
            lab_question_prefix: self.lab_question_prefix.clone(),
        }
    }

    pub fn course_settings(&self) -> CourseSettings {
        CourseSettings {
            cie_weight: self.cie_weight,
            see_weight: self.see_weight,
            high_band: self.high_band,
            medium_band: self.medium_band,
        }
    }
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64, min_inclusive: bool) -> Result<f64, String> {
    let n = v
        .as_f64()
        .ok_or_else(|| format!("{} must be a number", key))?;
    let above_min = if min_inclusive { n >= min } else { n > min };
    if !n.is_finite() || !above_min || n > max {
        let open = if min_inclusive { '[' } else { '(' };
        return Err(format!("{} must be in {}{}, {}]", key, open, min, max));
    }
    Ok(n)
}

fn parse_prefix(v: &Value, key: &str) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.is_empty() || s.len() > 16 {
        return Err(format!("{} must be 1..=16 characters", key));
    }
    if s.contains(',') {
        return Err(format!("{} must not contain commas", key));
    }
    Ok(s.to_string())
}

/// Applies `patch` field by field. Unknown fields and out-of-range values
/// are rejected; on error `current` may be half-updated, so merge into a copy.
pub fn merge_attainment_patch(current: &mut Value, patch: &Map<String, Value>) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match k.as_str() {
            "defaultThresholdFraction" => {
                obj.insert(k.clone(), Value::from(parse_f64_range(v, k, 0.0, 1.0, false)?));
            }
            "labQuestionPrefix" => {
                obj.insert(k.clone(), Value::String(parse_prefix(v, k)?));
            }
            "cieWeight" | "seeWeight" => {
                obj.insert(k.clone(), Value::from(parse_f64_range(v, k, 0.0, 1.0, true)?));
            }
            "highBand" | "mediumBand" => {
                obj.insert(k.clone(), Value::from(parse_f64_range(v, k, 0.0, 100.0, true)?));
            }
            _ => return Err(format!("unknown attainment field: {}", k)),
        }
    }

    let num = |key: &str| obj.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0);
    if num("cieWeight") + num("seeWeight") <= 0.0 {
        return Err("cieWeight and seeWeight cannot both be 0".into());
    }
    if num("mediumBand") > num("highBand") {
        return Err("mediumBand must not exceed highBand".into());
    }
    Ok(())
}

pub fn load_attainment_value(conn: &Connection) -> anyhow::Result<Value> {
    let mut current = default_attainment();
    if let Some(saved) = db::settings_get_json(conn, ATTAINMENT_KEY)? {
        if let Some(saved_obj) = saved.as_object() {
            let mut merged = current.clone();
            // Stale or hand-edited values fall back to the defaults.
            if merge_attainment_patch(&mut merged, saved_obj).is_ok() {
                current = merged;
            } else {
                tracing::warn!(key = ATTAINMENT_KEY, "stored settings rejected; using defaults");
            }
        }
    }
    Ok(current)
}

pub fn load_attainment(conn: &Connection) -> anyhow::Result<AttainmentSetup> {
    Ok(serde_json::from_value(load_attainment_value(conn)?)?)
}

/// Settings for callers without a workspace.
pub fn defaults() -> AttainmentSetup {
    AttainmentSetup {
        default_threshold_fraction: DEFAULT_THRESHOLD_FRACTION,
        lab_question_prefix: DEFAULT_LAB_PREFIX.to_string(),
        cie_weight: 0.5,
        see_weight: 0.5,
        high_band: 70.0,
        medium_band: 60.0,
    }
}
