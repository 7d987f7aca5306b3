//! Row access for the tables the engine reads and the report cards it owns.

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use std::collections::HashMap;

use crate::calc::{
    AttendanceStatus, AttendanceSummary, CategoryWeight, EnrolledSubject, ReportCard,
    ReportCardStatus, ScoreCategory, ScoreRecord, SubjectGrade, SubjectKey, WeightScope,
};

fn conversion_err(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

pub fn class_exists(conn: &Connection, class_id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}

pub fn term_exists(conn: &Connection, term_id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM terms WHERE id = ?", [term_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}

pub fn student_in_class(conn: &Connection, class_id: &str, student_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM students WHERE class_id = ? AND id = ?",
        (class_id, student_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
}

pub fn subject_in_class(conn: &Connection, class_id: &str, subject_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM subjects WHERE class_id = ? AND id = ?",
        (class_id, subject_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
}

pub fn class_student_ids(conn: &Connection, class_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM students WHERE class_id = ? ORDER BY sort_order, id",
    )?;
    let ids = stmt
        .query_map([class_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Enrolled subjects per student, each list in report order (subject sort order, then id).
pub fn class_enrollments(
    conn: &Connection,
    class_id: &str,
) -> rusqlite::Result<HashMap<String, Vec<EnrolledSubject>>> {
    let mut stmt = conn.prepare(
        "SELECT e.student_id, s.id, s.code, s.name
         FROM enrollments e
         JOIN subjects s ON s.id = e.subject_id AND s.class_id = e.class_id
         WHERE e.class_id = ?
         ORDER BY e.student_id, s.sort_order, s.id",
    )?;
    let rows = stmt.query_map([class_id], |r| {
        Ok((
            r.get::<_, String>(0)?,
            EnrolledSubject {
                id: r.get(1)?,
                code: r.get(2)?,
                name: r.get(3)?,
            },
        ))
    })?;
    let mut out: HashMap<String, Vec<EnrolledSubject>> = HashMap::new();
    for row in rows {
        let (student_id, subject) = row?;
        out.entry(student_id).or_default().push(subject);
    }
    Ok(out)
}

const SCORE_COLUMNS: &str = "id, student_id, subject_id, class_id, term_id, category, title,
     raw_score, max_score, recorded_at, is_late, superseded_by";

fn score_from_row(r: &Row<'_>) -> rusqlite::Result<ScoreRecord> {
    let category_raw: String = r.get(5)?;
    let category = ScoreCategory::parse(&category_raw)
        .ok_or_else(|| conversion_err(5, format!("unknown score category: {}", category_raw)))?;
    Ok(ScoreRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        subject_id: r.get(2)?,
        class_id: r.get(3)?,
        term_id: r.get(4)?,
        category,
        title: r.get(6)?,
        raw_score: r.get(7)?,
        max_score: r.get(8)?,
        recorded_at: r.get(9)?,
        is_late: r.get::<_, i64>(10)? != 0,
        superseded_by: r.get(11)?,
    })
}

pub fn score_records_for(
    conn: &Connection,
    key: &SubjectKey,
    include_superseded: bool,
) -> rusqlite::Result<Vec<ScoreRecord>> {
    let sql = format!(
        "SELECT {}
         FROM score_records
         WHERE student_id = ? AND subject_id = ? AND class_id = ? AND term_id = ?
           AND (? OR superseded_by IS NULL)
         ORDER BY recorded_at, id",
        SCORE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(
            (
                &key.student_id,
                &key.subject_id,
                &key.class_id,
                &key.term_id,
                include_superseded,
            ),
            score_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Current (non-superseded) records for every student in a class and term.
pub fn score_records_for_class_term(
    conn: &Connection,
    class_id: &str,
    term_id: &str,
) -> rusqlite::Result<Vec<ScoreRecord>> {
    let sql = format!(
        "SELECT {}
         FROM score_records
         WHERE class_id = ? AND term_id = ? AND superseded_by IS NULL
         ORDER BY student_id, subject_id, recorded_at, id",
        SCORE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map((class_id, term_id), score_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

pub fn score_record(conn: &Connection, score_id: &str) -> rusqlite::Result<Option<ScoreRecord>> {
    let sql = format!("SELECT {} FROM score_records WHERE id = ?", SCORE_COLUMNS);
    conn.query_row(&sql, [score_id], score_from_row).optional()
}

pub fn insert_score_record(conn: &Connection, record: &ScoreRecord) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO score_records(
            id, student_id, subject_id, class_id, term_id, category, title,
            raw_score, max_score, recorded_at, is_late, superseded_by
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &record.id,
            &record.student_id,
            &record.subject_id,
            &record.class_id,
            &record.term_id,
            record.category.as_str(),
            &record.title,
            record.raw_score,
            record.max_score,
            &record.recorded_at,
            record.is_late,
            &record.superseded_by,
        ),
    )?;
    Ok(())
}

/// Returns false when the record was already superseded by someone else.
pub fn mark_superseded(conn: &Connection, score_id: &str, superseded_by: &str) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE score_records SET superseded_by = ? WHERE id = ? AND superseded_by IS NULL",
        (superseded_by, score_id),
    )?;
    Ok(changed == 1)
}

fn weight_from_row(r: &Row<'_>) -> rusqlite::Result<CategoryWeight> {
    let scope_raw: String = r.get(0)?;
    let scope = WeightScope::parse(&scope_raw)
        .ok_or_else(|| conversion_err(0, format!("unknown weight scope: {}", scope_raw)))?;
    let category_raw: String = r.get(2)?;
    let category = ScoreCategory::parse(&category_raw)
        .ok_or_else(|| conversion_err(2, format!("unknown score category: {}", category_raw)))?;
    Ok(CategoryWeight {
        scope,
        scope_id: r.get(1)?,
        category,
        weight_fraction: r.get(3)?,
    })
}

/// Class-scoped weights for the class plus subject-scoped weights for its subjects.
pub fn category_weights_for_class(
    conn: &Connection,
    class_id: &str,
) -> rusqlite::Result<Vec<CategoryWeight>> {
    let mut stmt = conn.prepare(
        "SELECT scope, scope_id, category, weight_fraction
         FROM category_weights
         WHERE (scope = 'class' AND scope_id = ?1)
            OR (scope = 'subject' AND scope_id IN (SELECT id FROM subjects WHERE class_id = ?1))
         ORDER BY scope, scope_id, category",
    )?;
    let rows = stmt
        .query_map([class_id], weight_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn scope_weights(
    conn: &Connection,
    scope: WeightScope,
    scope_id: &str,
) -> rusqlite::Result<Vec<CategoryWeight>> {
    let mut stmt = conn.prepare(
        "SELECT scope, scope_id, category, weight_fraction
         FROM category_weights
         WHERE scope = ? AND scope_id = ?
         ORDER BY category",
    )?;
    let rows = stmt
        .query_map((scope.as_str(), scope_id), weight_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn replace_scope_weights(
    conn: &Connection,
    scope: WeightScope,
    scope_id: &str,
    weights: &[(ScoreCategory, f64)],
) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM category_weights WHERE scope = ? AND scope_id = ?",
        (scope.as_str(), scope_id),
    )?;
    for (category, fraction) in weights {
        conn.execute(
            "INSERT INTO category_weights(scope, scope_id, category, weight_fraction)
             VALUES(?, ?, ?, ?)",
            (scope.as_str(), scope_id, category.as_str(), fraction),
        )?;
    }
    Ok(())
}

pub fn upsert_attendance(
    conn: &Connection,
    student_id: &str,
    class_id: &str,
    term_id: &str,
    date: &str,
    status: AttendanceStatus,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO attendance_events(id, student_id, class_id, term_id, date, status)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, class_id, term_id, date) DO UPDATE SET status = excluded.status",
        (
            uuid::Uuid::new_v4().to_string(),
            student_id,
            class_id,
            term_id,
            date,
            status.as_str(),
        ),
    )?;
    Ok(())
}

pub fn attendance_summary(
    conn: &Connection,
    student_id: &str,
    class_id: &str,
    term_id: &str,
) -> rusqlite::Result<AttendanceSummary> {
    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*)
         FROM attendance_events
         WHERE student_id = ? AND class_id = ? AND term_id = ?
         GROUP BY status",
    )?;
    let rows = stmt
        .query_map((student_id, class_id, term_id), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut counts: Vec<(AttendanceStatus, i64)> = Vec::with_capacity(rows.len());
    for (status_raw, n) in rows {
        let status = AttendanceStatus::parse(&status_raw)
            .ok_or_else(|| conversion_err(0, format!("unknown attendance status: {}", status_raw)))?;
        counts.push((status, n));
    }
    Ok(AttendanceSummary::from_counts(&counts))
}

const CARD_COLUMNS: &str = "id, student_id, class_id, term_id, status, overall_average,
     overall_letter_grade, rank_in_class, class_size, attendance_present, attendance_absent,
     attendance_late, attendance_excused, attendance_rate, teacher_comments, principal_comments,
     issued_at, published_at, acknowledged_at, acknowledged_by, content_hash";

fn card_from_row(r: &Row<'_>) -> rusqlite::Result<(String, ReportCard)> {
    let status_raw: String = r.get(4)?;
    let status = ReportCardStatus::parse(&status_raw)
        .ok_or_else(|| conversion_err(4, format!("unknown report card status: {}", status_raw)))?;
    let card = ReportCard {
        student_id: r.get(1)?,
        class_id: r.get(2)?,
        term_id: r.get(3)?,
        status,
        subject_grades: Vec::new(),
        overall_average: r.get(5)?,
        overall_letter_grade: r.get(6)?,
        rank_in_class: r.get::<_, i64>(7)? as usize,
        class_size: r.get::<_, i64>(8)? as usize,
        attendance: AttendanceSummary {
            present: r.get(9)?,
            absent: r.get(10)?,
            late: r.get(11)?,
            excused: r.get(12)?,
            attendance_rate: r.get(13)?,
        },
        teacher_comments: r.get(14)?,
        principal_comments: r.get(15)?,
        issued_at: r.get(16)?,
        published_at: r.get(17)?,
        acknowledged_at: r.get(18)?,
        acknowledged_by: r.get(19)?,
        content_hash: r.get(20)?,
    };
    Ok((r.get(0)?, card))
}

fn card_subjects(conn: &Connection, report_card_id: &str) -> rusqlite::Result<Vec<SubjectGrade>> {
    let mut stmt = conn.prepare(
        "SELECT subject_id, subject_code, subject_name, average_percentage, letter_grade,
                contributing_record_count, late_record_count, subject_rank, class_average
         FROM report_card_subjects
         WHERE report_card_id = ?
         ORDER BY position",
    )?;
    let rows = stmt
        .query_map([report_card_id], |r| {
            Ok(SubjectGrade {
                subject_id: r.get(0)?,
                subject_code: r.get(1)?,
                subject_name: r.get(2)?,
                average_percentage: r.get(3)?,
                letter_grade: r.get(4)?,
                contributing_record_count: r.get::<_, i64>(5)? as usize,
                late_record_count: r.get::<_, i64>(6)? as usize,
                subject_rank: r.get::<_, Option<i64>>(7)?.map(|v| v as usize),
                class_average: r.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_report_card(
    conn: &Connection,
    student_id: &str,
    class_id: &str,
    term_id: &str,
) -> rusqlite::Result<Option<ReportCard>> {
    let sql = format!(
        "SELECT {} FROM report_cards WHERE student_id = ? AND class_id = ? AND term_id = ?",
        CARD_COLUMNS
    );
    let found = conn
        .query_row(&sql, (student_id, class_id, term_id), card_from_row)
        .optional()?;
    let Some((id, mut card)) = found else {
        return Ok(None);
    };
    card.subject_grades = card_subjects(conn, &id)?;
    Ok(Some(card))
}

pub fn list_report_cards(
    conn: &Connection,
    class_id: &str,
    term_id: &str,
) -> rusqlite::Result<Vec<ReportCard>> {
    let sql = format!(
        "SELECT {} FROM report_cards WHERE class_id = ? AND term_id = ? ORDER BY student_id",
        CARD_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((class_id, term_id), card_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(rows.len());
    for (id, mut card) in rows {
        card.subject_grades = card_subjects(conn, &id)?;
        out.push(card);
    }
    Ok(out)
}

/// Writes the whole card, replacing its subject snapshot rows. Callers wrap this in the
/// transaction that also read the prior state.
pub fn save_report_card(conn: &Connection, card: &ReportCard, updated_at: &str) -> rusqlite::Result<()> {
    let existing_id: Option<String> = conn
        .query_row(
            "SELECT id FROM report_cards WHERE student_id = ? AND class_id = ? AND term_id = ?",
            (&card.student_id, &card.class_id, &card.term_id),
            |r| r.get(0),
        )
        .optional()?;
    let id = existing_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    conn.execute(
        "INSERT INTO report_cards(
            id, student_id, class_id, term_id, status, overall_average, overall_letter_grade,
            rank_in_class, class_size, attendance_present, attendance_absent, attendance_late,
            attendance_excused, attendance_rate, teacher_comments, principal_comments,
            issued_at, published_at, acknowledged_at, acknowledged_by, content_hash, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            status = excluded.status,
            overall_average = excluded.overall_average,
            overall_letter_grade = excluded.overall_letter_grade,
            rank_in_class = excluded.rank_in_class,
            class_size = excluded.class_size,
            attendance_present = excluded.attendance_present,
            attendance_absent = excluded.attendance_absent,
            attendance_late = excluded.attendance_late,
            attendance_excused = excluded.attendance_excused,
            attendance_rate = excluded.attendance_rate,
            teacher_comments = excluded.teacher_comments,
            principal_comments = excluded.principal_comments,
            issued_at = excluded.issued_at,
            published_at = excluded.published_at,
            acknowledged_at = excluded.acknowledged_at,
            acknowledged_by = excluded.acknowledged_by,
            content_hash = excluded.content_hash,
            updated_at = excluded.updated_at",
        rusqlite::params![
            id,
            card.student_id,
            card.class_id,
            card.term_id,
            card.status.as_str(),
            card.overall_average,
            card.overall_letter_grade,
            card.rank_in_class as i64,
            card.class_size as i64,
            card.attendance.present,
            card.attendance.absent,
            card.attendance.late,
            card.attendance.excused,
            card.attendance.attendance_rate,
            card.teacher_comments,
            card.principal_comments,
            card.issued_at,
            card.published_at,
            card.acknowledged_at,
            card.acknowledged_by,
            card.content_hash,
            updated_at,
        ],
    )?;

    conn.execute(
        "DELETE FROM report_card_subjects WHERE report_card_id = ?",
        [&id],
    )?;
    for (position, g) in card.subject_grades.iter().enumerate() {
        conn.execute(
            "INSERT INTO report_card_subjects(
                report_card_id, position, subject_id, subject_code, subject_name,
                average_percentage, letter_grade, contributing_record_count, late_record_count,
                subject_rank, class_average
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &id,
                position as i64,
                &g.subject_id,
                &g.subject_code,
                &g.subject_name,
                g.average_percentage,
                &g.letter_grade,
                g.contributing_record_count as i64,
                g.late_record_count as i64,
                g.subject_rank.map(|v| v as i64),
                g.class_average,
            ),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn workspace_conn(name: &str) -> Connection {
        let dir = std::env::temp_dir().join(format!(
            "reportcardd-store-{}-{}",
            name,
            uuid::Uuid::new_v4()
        ));
        let conn = db::open_db(&dir).expect("open db");
        conn.execute("INSERT INTO classes(id, name) VALUES('c1', '7A')", [])
            .expect("class");
        conn.execute("INSERT INTO terms(id, name) VALUES('t1', 'Term 1')", [])
            .expect("term");
        conn.execute(
            "INSERT INTO students(id, class_id, last_name, first_name) VALUES('s1', 'c1', 'Doe', 'Ann')",
            [],
        )
        .expect("student");
        conn.execute(
            "INSERT INTO subjects(id, class_id, code, name) VALUES('m', 'c1', 'MATH', 'Mathematics')",
            [],
        )
        .expect("subject");
        conn
    }

    fn record(id: &str, raw: f64, at: &str) -> ScoreRecord {
        ScoreRecord {
            id: id.into(),
            student_id: "s1".into(),
            subject_id: "m".into(),
            class_id: "c1".into(),
            term_id: "t1".into(),
            category: ScoreCategory::Quiz,
            title: None,
            raw_score: raw,
            max_score: 10.0,
            recorded_at: at.into(),
            is_late: false,
            superseded_by: None,
        }
    }

    #[test]
    fn superseded_records_drop_out_of_current_reads() {
        let conn = workspace_conn("supersede");
        insert_score_record(&conn, &record("a", 4.0, "2025-01-10T09:00:00.000Z")).expect("a");
        insert_score_record(&conn, &record("b", 8.0, "2025-01-11T09:00:00.000Z")).expect("b");
        assert!(mark_superseded(&conn, "a", "b").expect("mark"));
        assert!(!mark_superseded(&conn, "a", "b").expect("mark again"));

        let key = SubjectKey {
            student_id: "s1".into(),
            subject_id: "m".into(),
            class_id: "c1".into(),
            term_id: "t1".into(),
        };
        let current = score_records_for(&conn, &key, false).expect("current");
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].id, "b");
        assert_eq!(score_records_for(&conn, &key, true).expect("all").len(), 2);
        assert_eq!(
            score_records_for_class_term(&conn, "c1", "t1")
                .expect("class")
                .len(),
            1
        );
    }

    #[test]
    fn attendance_upsert_replaces_the_day() {
        let conn = workspace_conn("attendance");
        upsert_attendance(&conn, "s1", "c1", "t1", "2025-01-06", AttendanceStatus::Absent)
            .expect("absent");
        upsert_attendance(&conn, "s1", "c1", "t1", "2025-01-06", AttendanceStatus::Excused)
            .expect("excused");
        upsert_attendance(&conn, "s1", "c1", "t1", "2025-01-07", AttendanceStatus::Late)
            .expect("late");
        let summary = attendance_summary(&conn, "s1", "c1", "t1").expect("summary");
        assert_eq!(summary.absent, 0);
        assert_eq!(summary.excused, 1);
        assert_eq!(summary.late, 1);
        assert_eq!(summary.attendance_rate, Some(50.0));
    }

    #[test]
    fn replacing_scope_weights_drops_old_categories() {
        let conn = workspace_conn("weights");
        replace_scope_weights(
            &conn,
            WeightScope::Class,
            "c1",
            &[(ScoreCategory::Exam, 0.5), (ScoreCategory::Quiz, 0.5)],
        )
        .expect("first");
        replace_scope_weights(&conn, WeightScope::Class, "c1", &[(ScoreCategory::Exam, 0.7)])
            .expect("second");
        let rows = scope_weights(&conn, WeightScope::Class, "c1").expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].category, ScoreCategory::Exam);
        assert_eq!(category_weights_for_class(&conn, "c1").expect("class").len(), 1);
    }
}
