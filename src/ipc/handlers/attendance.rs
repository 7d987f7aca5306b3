use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;

use crate::calc::AttendanceStatus;
use crate::ipc::helpers::{db_conn, reply, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store;

fn attendance_record(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let class_id = required_str(params, "classId")?;
    let term_id = required_str(params, "termId")?;
    let date_raw = required_str(params, "date")?;
    let date = NaiveDate::parse_from_str(&date_raw, "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params("date must be YYYY-MM-DD"))?;
    let status_raw = required_str(params, "status")?;
    let status = AttendanceStatus::parse(&status_raw).ok_or_else(|| {
        HandlerErr::bad_params("status must be one of: present, absent, late, excused")
    })?;

    let db_err = |e: rusqlite::Error| HandlerErr::new("db_query_failed", e.to_string());
    if !store::class_exists(conn, &class_id).map_err(db_err)? {
        return Err(HandlerErr::new("not_found", "class not found"));
    }
    if !store::term_exists(conn, &term_id).map_err(db_err)? {
        return Err(HandlerErr::new("not_found", "term not found"));
    }
    if !store::student_in_class(conn, &class_id, &student_id).map_err(db_err)? {
        return Err(HandlerErr::new("not_found", "student not found in class"));
    }

    let date = date.format("%Y-%m-%d").to_string();
    store::upsert_attendance(conn, &student_id, &class_id, &term_id, &date, status)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    let summary = store::attendance_summary(conn, &student_id, &class_id, &term_id)
        .map_err(db_err)?;

    Ok(json!({
        "studentId": student_id,
        "classId": class_id,
        "termId": term_id,
        "date": date,
        "status": status.as_str(),
        "summary": summary,
    }))
}

fn handle_attendance_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| attendance_record(conn, &req.params));
    reply(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.record" => Some(handle_attendance_record(state, req)),
        _ => None,
    }
}
