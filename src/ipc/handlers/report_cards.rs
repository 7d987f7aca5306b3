use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::calc::{EngineError, EngineResult};
use crate::ipc::helpers::{
    db_conn, optional_bool, optional_str, patch_str, reply, required_str, with_context, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::store;

/// One student's line in a class-wide compile or publish.
fn batch_outcome<T: Serialize>(student_id: String, outcome: EngineResult<T>) -> serde_json::Value {
    match outcome {
        Ok(v) => json!({ "studentId": student_id, "ok": true, "result": v }),
        Err(e) => json!({ "studentId": student_id, "ok": false, "error": error_json(&e) }),
    }
}

fn error_json(e: &EngineError) -> serde_json::Value {
    let mut out = json!({ "code": e.code(), "message": e.to_string() });
    if let Some(d) = e.details() {
        out["details"] = d;
    }
    out
}

fn batch_result<T: Serialize>(outcomes: Vec<(String, EngineResult<T>)>) -> serde_json::Value {
    let failed = outcomes.iter().filter(|(_, r)| r.is_err()).count();
    let succeeded = outcomes.len() - failed;
    let students: Vec<serde_json::Value> = outcomes
        .into_iter()
        .map(|(id, r)| batch_outcome(id, r))
        .collect();
    json!({
        "succeeded": succeeded,
        "failed": failed,
        "students": students,
    })
}

fn handle_compile(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| {
        with_context(conn, &req.params, |ctx| {
            let student_id = required_str(&req.params, "studentId")?;
            Ok(json!(ctx.compile(&student_id, Utc::now())?))
        })
    });
    reply(&req.id, result)
}

fn handle_compile_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| {
        with_context(conn, &req.params, |ctx| {
            let outcomes = ctx.compile_class(Utc::now())?;
            Ok(batch_result(outcomes))
        })
    });
    reply(&req.id, result)
}

fn handle_publish(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| {
        with_context(conn, &req.params, |ctx| {
            let student_id = required_str(&req.params, "studentId")?;
            let reissue = optional_bool(&req.params, "reissue")?;
            Ok(json!(ctx.publish(&student_id, reissue, Utc::now())?))
        })
    });
    reply(&req.id, result)
}

fn handle_publish_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| {
        with_context(conn, &req.params, |ctx| {
            let reissue = optional_bool(&req.params, "reissue")?;
            let outcomes = ctx.publish_class(reissue, Utc::now())?;
            Ok(batch_result(outcomes))
        })
    });
    reply(&req.id, result)
}

fn handle_acknowledge(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| {
        with_context(conn, &req.params, |ctx| {
            let student_id = required_str(&req.params, "studentId")?;
            let by = optional_str(&req.params, "acknowledgedBy")?
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            Ok(json!(ctx.acknowledge(&student_id, by.as_deref(), Utc::now())?))
        })
    });
    reply(&req.id, result)
}

fn handle_set_comments(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| {
        with_context(conn, &req.params, |ctx| {
            let student_id = required_str(&req.params, "studentId")?;
            let teacher = patch_str(&req.params, "teacherComments")?;
            let principal = patch_str(&req.params, "principalComments")?;
            if teacher.is_none() && principal.is_none() {
                return Err(HandlerErr::bad_params(
                    "provide teacherComments and/or principalComments",
                ));
            }
            Ok(json!(ctx.set_comments(&student_id, teacher, principal, Utc::now())?))
        })
    });
    reply(&req.id, result)
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| {
        with_context(conn, &req.params, |ctx| {
            let student_id = required_str(&req.params, "studentId")?;
            Ok(json!(ctx.report_card(&student_id)?))
        })
    });
    reply(&req.id, result)
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| {
        with_context(conn, &req.params, |ctx| {
            ctx.ensure_class_and_term()?;
            let cards = store::list_report_cards(ctx.conn, ctx.class_id, ctx.term_id)
                .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
            Ok(json!({ "reportCards": cards }))
        })
    });
    reply(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reportCards.compile" => Some(handle_compile(state, req)),
        "reportCards.compileClass" => Some(handle_compile_class(state, req)),
        "reportCards.publish" => Some(handle_publish(state, req)),
        "reportCards.publishClass" => Some(handle_publish_class(state, req)),
        "reportCards.acknowledge" => Some(handle_acknowledge(state, req)),
        "reportCards.setComments" => Some(handle_set_comments(state, req)),
        "reportCards.get" => Some(handle_get(state, req)),
        "reportCards.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
