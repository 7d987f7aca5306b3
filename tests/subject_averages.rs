mod common;

use common::{seed_roster, temp_dir, Sidecar};
use serde_json::json;

fn assert_percentage(value: &serde_json::Value, expected: f64) {
    let got = value["percentage"].as_f64().expect("percentage");
    assert!((got - expected).abs() < 1e-9, "expected {}, got {}", expected, got);
}

fn subject_params(roster: &common::Roster, student: usize, subject: usize) -> serde_json::Value {
    json!({
        "studentId": roster.students[student],
        "subjectId": roster.subjects[subject],
        "classId": roster.class_id,
        "termId": roster.term_id,
    })
}

#[test]
fn unweighted_assignments_average_to_flat_mean() {
    let workspace = temp_dir("reportcard-flat-mean");
    let mut sidecar = Sidecar::with_workspace(&workspace);
    let roster = seed_roster(&workspace, 1, &["MATH"]);

    let first = roster.record(&mut sidecar, 0, 0, "assignment", 80.0, 100.0);
    assert_percentage(&first, 80.0);
    let second = roster.record(&mut sidecar, 0, 0, "assignment", 18.0, 20.0);
    assert_percentage(&second, 90.0);

    let avg = sidecar.request_ok("calc.subjectAverage", subject_params(&roster, 0, 0));
    assert_eq!(avg["averagePercentage"].as_f64(), Some(85.0));
    assert_eq!(avg["letterGrade"].as_str(), Some("B"));
    assert_eq!(avg["contributingRecordCount"].as_u64(), Some(2));
}

#[test]
fn bonus_points_clamp_and_bad_scores_are_rejected() {
    let workspace = temp_dir("reportcard-score-ingest");
    let mut sidecar = Sidecar::with_workspace(&workspace);
    let roster = seed_roster(&workspace, 1, &["SCI"]);

    let bonus = roster.record(&mut sidecar, 0, 0, "quiz", 12.0, 10.0);
    assert_percentage(&bonus, 100.0);

    let mut params = subject_params(&roster, 0, 0);
    params["category"] = json!("quiz");
    params["rawScore"] = json!(5.0);
    params["maxScore"] = json!(0.0);
    assert_eq!(sidecar.request_err("scores.record", params.clone()), "invalid_score");

    params["rawScore"] = json!(-1.0);
    params["maxScore"] = json!(10.0);
    assert_eq!(sidecar.request_err("scores.record", params.clone()), "invalid_score");

    params["rawScore"] = json!(5.0);
    params["category"] = json!("homework");
    assert_eq!(sidecar.request_err("scores.record", params), "bad_params");

    let listed = sidecar.request_ok("scores.list", subject_params(&roster, 0, 0));
    assert_eq!(listed["records"].as_array().map(|a| a.len()), Some(1));
}

#[test]
fn no_records_is_insufficient_data_not_zero() {
    let workspace = temp_dir("reportcard-insufficient");
    let mut sidecar = Sidecar::with_workspace(&workspace);
    let roster = seed_roster(&workspace, 1, &["ART"]);

    let code = sidecar.request_err("calc.subjectAverage", subject_params(&roster, 0, 0));
    assert_eq!(code, "insufficient_data");
}

#[test]
fn regrade_supersedes_prior_record() {
    let workspace = temp_dir("reportcard-regrade");
    let mut sidecar = Sidecar::with_workspace(&workspace);
    let roster = seed_roster(&workspace, 1, &["HIST"]);

    let original = roster.record(&mut sidecar, 0, 0, "exam", 50.0, 100.0);
    let original_id = original["scoreId"].as_str().expect("scoreId").to_string();
    roster.record(&mut sidecar, 0, 0, "exam", 70.0, 100.0);

    let regraded = sidecar.request_ok(
        "scores.regrade",
        json!({ "scoreId": original_id, "rawScore": 90.0 }),
    );
    assert_eq!(regraded["supersededId"].as_str(), Some(original_id.as_str()));
    assert_percentage(&regraded, 90.0);

    let avg = sidecar.request_ok("calc.subjectAverage", subject_params(&roster, 0, 0));
    assert_eq!(avg["averagePercentage"].as_f64(), Some(80.0));
    assert_eq!(avg["contributingRecordCount"].as_u64(), Some(2));

    let code = sidecar.request_err(
        "scores.regrade",
        json!({ "scoreId": original_id, "rawScore": 95.0 }),
    );
    assert_eq!(code, "already_superseded");

    let mut list_params = subject_params(&roster, 0, 0);
    list_params["includeSuperseded"] = json!(true);
    let all = sidecar.request_ok("scores.list", list_params);
    let records = all["records"].as_array().expect("records");
    assert_eq!(records.len(), 3);
    let superseded = records
        .iter()
        .find(|r| r["id"].as_str() == Some(original_id.as_str()))
        .expect("original kept");
    assert_eq!(
        superseded["supersededBy"].as_str(),
        regraded["scoreId"].as_str()
    );
}

#[test]
fn category_weights_apply_and_subject_scope_overrides_class() {
    let workspace = temp_dir("reportcard-weights");
    let mut sidecar = Sidecar::with_workspace(&workspace);
    let roster = seed_roster(&workspace, 1, &["ENG"]);

    roster.record(&mut sidecar, 0, 0, "assignment", 80.0, 100.0);
    roster.record(&mut sidecar, 0, 0, "exam", 90.0, 100.0);

    let stored = sidecar.request_ok(
        "weights.set",
        json!({
            "scope": "class",
            "scopeId": roster.class_id,
            "weights": { "assignment": 0.4, "exam": 0.6 }
        }),
    );
    assert_eq!(stored["weights"]["exam"].as_f64(), Some(0.6));

    let avg = sidecar.request_ok("calc.subjectAverage", subject_params(&roster, 0, 0));
    assert_eq!(avg["averagePercentage"].as_f64(), Some(86.0));

    sidecar.request_ok(
        "weights.set",
        json!({
            "scope": "subject",
            "scopeId": roster.subjects[0],
            "weights": { "exam": 1.0 }
        }),
    );
    let avg = sidecar.request_ok("calc.subjectAverage", subject_params(&roster, 0, 0));
    assert_eq!(avg["averagePercentage"].as_f64(), Some(90.0));
    assert_eq!(avg["letterGrade"].as_str(), Some("A"));

    let code = sidecar.request_err(
        "weights.set",
        json!({
            "scope": "class",
            "scopeId": roster.class_id,
            "weights": { "quiz": 0.7, "exam": 0.5 }
        }),
    );
    assert_eq!(code, "invalid_weights");

    let kept = sidecar.request_ok(
        "weights.get",
        json!({ "scope": "class", "scopeId": roster.class_id }),
    );
    assert_eq!(kept["weights"]["assignment"].as_f64(), Some(0.4));
}
