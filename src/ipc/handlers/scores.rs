use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::json;

use crate::calc::{normalize, timestamp, ScoreCategory, ScoreRecord, SubjectKey};
use crate::ipc::helpers::{
    db_conn, optional_bool, optional_str, reply, required_f64, required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::store;

fn parse_recorded_at(params: &serde_json::Value) -> Result<Option<DateTime<Utc>>, HandlerErr> {
    let Some(raw) = optional_str(params, "recordedAt")? else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| Some(dt.with_timezone(&Utc)))
        .map_err(|e| HandlerErr::bad_params(format!("recordedAt must be RFC 3339: {}", e)))
}

fn ensure_key_exists(conn: &Connection, key: &SubjectKey) -> Result<(), HandlerErr> {
    let db_err = |e: rusqlite::Error| HandlerErr::new("db_query_failed", e.to_string());
    if !store::class_exists(conn, &key.class_id).map_err(db_err)? {
        return Err(HandlerErr::new("not_found", "class not found"));
    }
    if !store::term_exists(conn, &key.term_id).map_err(db_err)? {
        return Err(HandlerErr::new("not_found", "term not found"));
    }
    if !store::student_in_class(conn, &key.class_id, &key.student_id).map_err(db_err)? {
        return Err(HandlerErr::new("not_found", "student not found in class"));
    }
    if !store::subject_in_class(conn, &key.class_id, &key.subject_id).map_err(db_err)? {
        return Err(HandlerErr::new("not_found", "subject not found in class"));
    }
    Ok(())
}

fn key_from_params(params: &serde_json::Value) -> Result<SubjectKey, HandlerErr> {
    Ok(SubjectKey {
        student_id: required_str(params, "studentId")?,
        subject_id: required_str(params, "subjectId")?,
        class_id: required_str(params, "classId")?,
        term_id: required_str(params, "termId")?,
    })
}

fn scores_record(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let key = key_from_params(params)?;
    let category_raw = required_str(params, "category")?;
    let category = ScoreCategory::parse(&category_raw).ok_or_else(|| {
        HandlerErr::bad_params("category must be one of: assignment, quiz, exam, other")
    })?;
    let raw_score = required_f64(params, "rawScore")?;
    let max_score = required_f64(params, "maxScore")?;
    let percentage = normalize(raw_score, max_score)?;
    let is_late = optional_bool(params, "isLate")?;
    let title = optional_str(params, "title")?;
    let recorded_at = parse_recorded_at(params)?.unwrap_or_else(Utc::now);

    ensure_key_exists(conn, &key)?;

    let record = ScoreRecord {
        id: uuid::Uuid::new_v4().to_string(),
        student_id: key.student_id,
        subject_id: key.subject_id,
        class_id: key.class_id,
        term_id: key.term_id,
        category,
        title,
        raw_score,
        max_score,
        recorded_at: timestamp(recorded_at),
        is_late,
        superseded_by: None,
    };
    store::insert_score_record(conn, &record)
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    Ok(json!({
        "scoreId": record.id,
        "percentage": percentage,
        "recordedAt": record.recorded_at,
    }))
}

/// Re-grading never edits a record: it inserts the replacement and marks the prior superseded.
fn scores_regrade(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let score_id = required_str(params, "scoreId")?;
    let prior = store::score_record(conn, &score_id)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .ok_or_else(|| HandlerErr::new("not_found", "score record not found"))?;
    if prior.is_superseded() {
        return Err(HandlerErr {
            code: "already_superseded",
            message: "score record was already re-graded".into(),
            details: Some(json!({ "scoreId": prior.id, "supersededBy": prior.superseded_by })),
        });
    }

    let raw_score = required_f64(params, "rawScore")?;
    let max_score = match params.get("maxScore") {
        None | Some(serde_json::Value::Null) => prior.max_score,
        Some(_) => required_f64(params, "maxScore")?,
    };
    let percentage = normalize(raw_score, max_score)?;
    let is_late = match params.get("isLate") {
        None | Some(serde_json::Value::Null) => prior.is_late,
        Some(_) => optional_bool(params, "isLate")?,
    };

    let prior_at = DateTime::parse_from_rfc3339(&prior.recorded_at)
        .ok()
        .map(|dt| dt.with_timezone(&Utc));
    let recorded_at = match (parse_recorded_at(params)?, prior_at) {
        (Some(at), Some(prior_at)) if at <= prior_at => {
            return Err(HandlerErr::bad_params(
                "recordedAt must be later than the record being re-graded",
            ));
        }
        (Some(at), _) => at,
        // Timestamps are stored at millisecond precision; keep the replacement strictly later.
        (None, Some(prior_at)) => Utc::now().max(prior_at + chrono::Duration::milliseconds(1)),
        (None, None) => Utc::now(),
    };

    let replacement = ScoreRecord {
        id: uuid::Uuid::new_v4().to_string(),
        raw_score,
        max_score,
        is_late,
        recorded_at: timestamp(recorded_at),
        superseded_by: None,
        ..prior.clone()
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    store::insert_score_record(&tx, &replacement)
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    let marked = store::mark_superseded(&tx, &prior.id, &replacement.id)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    if !marked {
        return Err(HandlerErr::new(
            "already_superseded",
            "score record was already re-graded",
        ));
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    tracing::info!(
        superseded = %prior.id,
        replacement = %replacement.id,
        "score regraded"
    );
    Ok(json!({
        "scoreId": replacement.id,
        "supersededId": prior.id,
        "percentage": percentage,
        "recordedAt": replacement.recorded_at,
    }))
}

fn scores_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let key = key_from_params(params)?;
    let include_superseded = optional_bool(params, "includeSuperseded")?;
    let records = store::score_records_for(conn, &key, include_superseded)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({ "records": records }))
}

fn handle_scores_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| scores_record(conn, &req.params));
    reply(&req.id, result)
}

fn handle_scores_regrade(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| scores_regrade(conn, &req.params));
    reply(&req.id, result)
}

fn handle_scores_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| scores_list(conn, &req.params));
    reply(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scores.record" => Some(handle_scores_record(state, req)),
        "scores.regrade" => Some(handle_scores_regrade(state, req)),
        "scores.list" => Some(handle_scores_list(state, req)),
        _ => None,
    }
}
