use rusqlite::Connection;
use serde_json::Value;

use crate::calc::{CalcContext, EngineError, GradeScale};
use crate::config::GradingConfig;
use crate::ipc::error::{err, ok};
use crate::ipc::types::AppState;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<EngineError> for HandlerErr {
    fn from(e: EngineError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

pub fn reply(id: &str, result: Result<Value, HandlerErr>) -> Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

/// Distinguishes an absent key (leave unchanged) from an explicit null (clear).
pub fn patch_str(params: &Value, key: &str) -> Result<Option<Option<String>>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(v) => v
            .as_str()
            .map(|s| {
                let t = s.trim();
                Some(if t.is_empty() { None } else { Some(t.to_string()) })
            })
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a string or null", key))),
    }
}

pub fn required_f64(params: &Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key)))
}

pub fn optional_bool(params: &Value, key: &str) -> Result<bool, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

pub fn grade_scale(conn: &Connection) -> Result<GradeScale, HandlerErr> {
    GradingConfig::load(conn)
        .map(|cfg| cfg.grade_scale)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

/// Runs `f` against the class and term named in `params`.
pub fn with_context<T>(
    conn: &Connection,
    params: &Value,
    f: impl FnOnce(&CalcContext<'_>) -> Result<T, HandlerErr>,
) -> Result<T, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let term_id = required_str(params, "termId")?;
    let scale = grade_scale(conn)?;
    let ctx = CalcContext {
        conn,
        class_id: &class_id,
        term_id: &term_id,
        scale: &scale,
    };
    f(&ctx)
}
