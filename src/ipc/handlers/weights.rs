use rusqlite::Connection;
use serde_json::json;

use crate::calc::{validate_weights, ScoreCategory, WeightScope};
use crate::ipc::helpers::{db_conn, reply, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store;

fn scope_from_params(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<(WeightScope, String), HandlerErr> {
    let scope_raw = required_str(params, "scope")?;
    let scope = WeightScope::parse(&scope_raw)
        .ok_or_else(|| HandlerErr::bad_params("scope must be class or subject"))?;
    let scope_id = required_str(params, "scopeId")?;
    let exists = match scope {
        WeightScope::Class => store::class_exists(conn, &scope_id),
        WeightScope::Subject => conn
            .query_row("SELECT COUNT(*) FROM subjects WHERE id = ?", [&scope_id], |r| {
                r.get::<_, i64>(0)
            })
            .map(|n| n > 0),
    }
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    if !exists {
        return Err(HandlerErr {
            code: "not_found",
            message: format!("{} not found", scope.as_str()),
            details: Some(json!({ "scope": scope.as_str(), "scopeId": scope_id })),
        });
    }
    Ok((scope, scope_id))
}

fn weights_set(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (scope, scope_id) = scope_from_params(conn, params)?;
    let Some(obj) = params.get("weights").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params(
            "weights must be an object of category -> fraction",
        ));
    };

    let mut parsed: Vec<(ScoreCategory, f64)> = Vec::with_capacity(obj.len());
    for (k, v) in obj {
        let category = ScoreCategory::parse(k)
            .ok_or_else(|| HandlerErr::bad_params(format!("unknown category: {}", k)))?;
        let fraction = v
            .as_f64()
            .ok_or_else(|| HandlerErr::bad_params(format!("weight for {} must be a number", k)))?;
        parsed.push((category, fraction));
    }
    validate_weights(scope, &scope_id, &parsed)?;
    parsed.sort_by_key(|(c, _)| *c);

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    store::replace_scope_weights(&tx, scope, &scope_id, &parsed)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    tracing::info!(
        scope = scope.as_str(),
        scope_id = %scope_id,
        categories = parsed.len(),
        "category weights replaced"
    );
    weights_get_inner(conn, scope, &scope_id)
}

fn weights_get_inner(
    conn: &Connection,
    scope: WeightScope,
    scope_id: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let rows = store::scope_weights(conn, scope, scope_id)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let mut weights = serde_json::Map::new();
    for w in &rows {
        weights.insert(w.category.as_str().to_string(), json!(w.weight_fraction));
    }
    Ok(json!({
        "scope": scope.as_str(),
        "scopeId": scope_id,
        "weights": weights,
    }))
}

fn weights_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (scope, scope_id) = scope_from_params(conn, params)?;
    weights_get_inner(conn, scope, &scope_id)
}

fn handle_weights_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| weights_set(conn, &req.params));
    reply(&req.id, result)
}

fn handle_weights_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| weights_get(conn, &req.params));
    reply(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "weights.set" => Some(handle_weights_set(state, req)),
        "weights.get" => Some(handle_weights_get(state, req)),
        _ => None,
    }
}
