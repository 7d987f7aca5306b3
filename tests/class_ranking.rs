mod common;

use common::{seed_roster, temp_dir, Sidecar};
use serde_json::json;

#[test]
fn tied_students_share_rank_and_next_rank_skips() {
    let workspace = temp_dir("reportcard-ranking");
    let mut sidecar = Sidecar::with_workspace(&workspace);
    // The fourth student has no records and stays out of the ranking.
    let roster = seed_roster(&workspace, 4, &["MATH"]);

    roster.record(&mut sidecar, 0, 0, "exam", 88.0, 100.0);
    roster.record(&mut sidecar, 1, 0, "exam", 92.5, 100.0);
    roster.record(&mut sidecar, 2, 0, "exam", 185.0, 200.0);

    let ranking = sidecar.request_ok("calc.classRanking", roster.class_params());
    let entries = ranking["rankings"].as_array().expect("rankings");
    let pairs: Vec<(&str, u64)> = entries
        .iter()
        .map(|e| {
            (
                e["studentId"].as_str().expect("studentId"),
                e["rank"].as_u64().expect("rank"),
            )
        })
        .collect();
    assert_eq!(
        pairs,
        vec![
            (roster.students[1].as_str(), 1),
            (roster.students[2].as_str(), 1),
            (roster.students[0].as_str(), 3),
        ]
    );
}

#[test]
fn subject_ranking_and_stats_cover_assessed_students() {
    let workspace = temp_dir("reportcard-subject-stats");
    let mut sidecar = Sidecar::with_workspace(&workspace);
    let roster = seed_roster(&workspace, 3, &["MATH", "SCI"]);

    roster.record(&mut sidecar, 0, 1, "quiz", 6.0, 10.0);
    roster.record(&mut sidecar, 1, 1, "quiz", 9.0, 10.0);

    let mut params = roster.class_params();
    params["subjectId"] = json!(roster.subjects[1]);

    let ranking = sidecar.request_ok("calc.subjectRanking", params.clone());
    let entries = ranking["rankings"].as_array().expect("rankings");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["studentId"].as_str(), Some(roster.students[1].as_str()));
    assert_eq!(entries[0]["rank"].as_u64(), Some(1));
    assert_eq!(entries[1]["rank"].as_u64(), Some(2));

    let stats = sidecar.request_ok("calc.subjectStats", params);
    assert_eq!(stats["assessedCount"].as_u64(), Some(2));
    assert_eq!(stats["classAverage"].as_f64(), Some(75.0));
    assert_eq!(stats["highest"].as_f64(), Some(90.0));
    assert_eq!(stats["lowest"].as_f64(), Some(60.0));

    let mut params = roster.student_params(0);
    params["subjectId"] = json!(roster.subjects[0]);
    assert_eq!(
        sidecar.request_err("calc.subjectAverage", params),
        "insufficient_data"
    );

    let averages = sidecar.request_ok("calc.studentAverages", roster.student_params(0));
    assert_eq!(
        averages["unassessedSubjects"],
        json!([roster.subjects[0].clone()])
    );
    assert_eq!(averages["overall"]["averagePercentage"].as_f64(), Some(60.0));
}

#[test]
fn unknown_class_or_term_is_not_found() {
    let workspace = temp_dir("reportcard-ranking-missing");
    let mut sidecar = Sidecar::with_workspace(&workspace);
    let roster = seed_roster(&workspace, 1, &["MATH"]);

    let code = sidecar.request_err(
        "calc.classRanking",
        json!({ "classId": roster.class_id, "termId": "no-such-term" }),
    );
    assert_eq!(code, "not_found");
    let code = sidecar.request_err("calc.classRanking", json!({ "termId": roster.term_id }));
    assert_eq!(code, "bad_params");
}
