use serde_json::json;

use crate::calc::{letter_for, normalize, GradeScale};
use crate::ipc::helpers::{
    db_conn, grade_scale, reply, required_f64, required_str, with_context, HandlerErr,
};
use crate::ipc::types::{AppState, Request};

fn handle_calc_normalize(req: &Request) -> serde_json::Value {
    let result = (|| -> Result<serde_json::Value, HandlerErr> {
        let raw_score = required_f64(&req.params, "rawScore")?;
        let max_score = required_f64(&req.params, "maxScore")?;
        let percentage = normalize(raw_score, max_score)?;
        Ok(json!({ "percentage": percentage }))
    })();
    reply(&req.id, result)
}

/// Uses the workspace grade scale when one is open, the default scale otherwise.
fn handle_calc_letter_for(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = (|| -> Result<serde_json::Value, HandlerErr> {
        let percentage = required_f64(&req.params, "percentage")?;
        let scale = match state.db.as_ref() {
            Some(conn) => grade_scale(conn)?,
            None => GradeScale::default(),
        };
        let letter = letter_for(percentage, &scale)?;
        Ok(json!({ "percentage": percentage, "letter": letter }))
    })();
    reply(&req.id, result)
}

fn handle_calc_subject_average(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| {
        with_context(conn, &req.params, |ctx| {
            let student_id = required_str(&req.params, "studentId")?;
            let subject_id = required_str(&req.params, "subjectId")?;
            let avg = ctx.subject_average(&student_id, &subject_id)?;
            Ok(json!(avg))
        })
    });
    reply(&req.id, result)
}

fn handle_calc_student_averages(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| {
        with_context(conn, &req.params, |ctx| {
            let student_id = required_str(&req.params, "studentId")?;
            Ok(json!(ctx.student_averages(&student_id)?))
        })
    });
    reply(&req.id, result)
}

fn handle_calc_class_ranking(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| {
        with_context(conn, &req.params, |ctx| {
            let rankings = ctx.class_ranking()?;
            Ok(json!({
                "classId": ctx.class_id,
                "termId": ctx.term_id,
                "rankings": rankings,
            }))
        })
    });
    reply(&req.id, result)
}

fn handle_calc_subject_ranking(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| {
        with_context(conn, &req.params, |ctx| {
            let subject_id = required_str(&req.params, "subjectId")?;
            let rankings = ctx.subject_ranking(&subject_id)?;
            Ok(json!({
                "classId": ctx.class_id,
                "subjectId": subject_id,
                "termId": ctx.term_id,
                "rankings": rankings,
            }))
        })
    });
    reply(&req.id, result)
}

fn handle_calc_subject_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| {
        with_context(conn, &req.params, |ctx| {
            let subject_id = required_str(&req.params, "subjectId")?;
            Ok(json!(ctx.subject_stats(&subject_id)?))
        })
    });
    reply(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "calc.normalize" => Some(handle_calc_normalize(req)),
        "calc.letterFor" => Some(handle_calc_letter_for(state, req)),
        "calc.subjectAverage" => Some(handle_calc_subject_average(state, req)),
        "calc.studentAverages" => Some(handle_calc_student_averages(state, req)),
        "calc.classRanking" => Some(handle_calc_class_ranking(state, req)),
        "calc.subjectRanking" => Some(handle_calc_subject_ranking(state, req)),
        "calc.subjectStats" => Some(handle_calc_subject_stats(state, req)),
        _ => None,
    }
}
