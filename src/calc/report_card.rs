use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

use super::aggregate::SubjectAverage;
use super::error::{EngineError, EngineResult};
use super::grade_scale::GradeScale;
use super::normalize::round_2;
use super::rank::{overall_average, rank, OverallAverage, RankEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportCardStatus {
    Draft,
    Published,
    Acknowledged,
}

impl ReportCardStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Acknowledged => "acknowledged",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "published" => Some(Self::Published),
            "acknowledged" => Some(Self::Acknowledged),
            _ => None,
        }
    }
}

impl fmt::Display for ReportCardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrolledSubject {
    pub id: String,
    pub code: String,
    pub name: String,
}

/// Frozen copy of one subject line as it appeared when the card was compiled.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectGrade {
    pub subject_id: String,
    pub subject_code: String,
    pub subject_name: String,
    pub average_percentage: f64,
    pub letter_grade: String,
    pub contributing_record_count: usize,
    pub late_record_count: usize,
    pub subject_rank: Option<usize>,
    pub class_average: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Late => "late",
            Self::Excused => "excused",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Some(Self::Present),
            "absent" => Some(Self::Absent),
            "late" => Some(Self::Late),
            "excused" => Some(Self::Excused),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
    /// Share of recorded days the student attended (late counts as attended).
    pub attendance_rate: Option<f64>,
}

impl AttendanceSummary {
    pub fn from_counts(counts: &[(AttendanceStatus, i64)]) -> Self {
        let mut out = Self::default();
        for (status, n) in counts {
            match status {
                AttendanceStatus::Present => out.present += n,
                AttendanceStatus::Absent => out.absent += n,
                AttendanceStatus::Late => out.late += n,
                AttendanceStatus::Excused => out.excused += n,
            }
        }
        let total = out.present + out.absent + out.late + out.excused;
        if total > 0 {
            out.attendance_rate = Some(round_2(
                (out.present + out.late) as f64 / total as f64 * 100.0,
            ));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCard {
    pub student_id: String,
    pub class_id: String,
    pub term_id: String,
    pub status: ReportCardStatus,
    pub subject_grades: Vec<SubjectGrade>,
    pub overall_average: f64,
    pub overall_letter_grade: String,
    pub rank_in_class: usize,
    pub class_size: usize,
    pub attendance: AttendanceSummary,
    pub teacher_comments: Option<String>,
    pub principal_comments: Option<String>,
    pub issued_at: Option<String>,
    pub published_at: Option<String>,
    pub acknowledged_at: Option<String>,
    pub acknowledged_by: Option<String>,
    pub content_hash: String,
}

/// Per-subject class context shown beside each subject line.
#[derive(Debug, Clone, Default)]
pub struct SubjectStanding {
    pub rank: Option<usize>,
    pub class_average: Option<f64>,
}

/// Everything needed to compile one card, already loaded for a single class and term.
#[derive(Debug, Clone)]
pub struct CompileInputs<'a> {
    pub student_id: &'a str,
    pub class_id: &'a str,
    pub term_id: &'a str,
    /// In report order.
    pub enrolled: &'a [EnrolledSubject],
    pub subject_averages: &'a HashMap<String, SubjectAverage>,
    pub class_overall: &'a [OverallAverage],
    pub standings: &'a HashMap<String, SubjectStanding>,
    pub attendance: AttendanceSummary,
    pub scale: &'a GradeScale,
}

/// Builds a draft card; fails without writing anything if any enrolled subject is unassessed.
pub fn compile(inputs: CompileInputs<'_>) -> EngineResult<ReportCard> {
    if inputs.enrolled.is_empty() {
        return Err(EngineError::NotEnrolled {
            student_id: inputs.student_id.to_string(),
            class_id: inputs.class_id.to_string(),
        });
    }

    let missing: Vec<String> = inputs
        .enrolled
        .iter()
        .filter(|s| !inputs.subject_averages.contains_key(&s.id))
        .map(|s| s.id.clone())
        .collect();
    if !missing.is_empty() {
        return Err(EngineError::IncompleteTermData {
            student_id: inputs.student_id.to_string(),
            class_id: inputs.class_id.to_string(),
            term_id: inputs.term_id.to_string(),
            missing_subjects: missing,
        });
    }

    let mut subject_grades = Vec::with_capacity(inputs.enrolled.len());
    let mut percentages: Vec<f64> = Vec::with_capacity(inputs.enrolled.len());
    for subject in inputs.enrolled {
        let Some(avg) = inputs.subject_averages.get(&subject.id) else {
            continue;
        };
        let standing = inputs.standings.get(&subject.id).cloned().unwrap_or_default();
        subject_grades.push(SubjectGrade {
            subject_id: subject.id.clone(),
            subject_code: subject.code.clone(),
            subject_name: subject.name.clone(),
            average_percentage: avg.average_percentage,
            letter_grade: avg.letter_grade.clone(),
            contributing_record_count: avg.contributing_record_count,
            late_record_count: avg.late_record_count,
            subject_rank: standing.rank,
            class_average: standing.class_average,
        });
        percentages.push(avg.average_percentage);
    }

    let Some(overall) =
        overall_average(inputs.student_id, inputs.class_id, inputs.term_id, &percentages)
    else {
        return Err(EngineError::NotEnrolled {
            student_id: inputs.student_id.to_string(),
            class_id: inputs.class_id.to_string(),
        });
    };

    // The student's own overall replaces whatever the class snapshot holds for them, so the
    // rank always reflects exactly the subjects on this card.
    let mut class_overall: Vec<OverallAverage> = inputs
        .class_overall
        .iter()
        .filter(|o| o.student_id != inputs.student_id)
        .cloned()
        .collect();
    class_overall.push(overall.clone());
    let ranking = rank(&class_overall);
    let rank_in_class = rank_of(&ranking, inputs.student_id).unwrap_or(ranking.len());

    let overall_letter_grade = inputs
        .scale
        .letter_for(overall.average_percentage)
        .map_err(|e| e.for_student(inputs.student_id, None))?
        .to_string();

    let mut card = ReportCard {
        student_id: inputs.student_id.to_string(),
        class_id: inputs.class_id.to_string(),
        term_id: inputs.term_id.to_string(),
        status: ReportCardStatus::Draft,
        subject_grades,
        overall_average: overall.average_percentage,
        overall_letter_grade,
        rank_in_class,
        class_size: ranking.len(),
        attendance: inputs.attendance,
        teacher_comments: None,
        principal_comments: None,
        issued_at: None,
        published_at: None,
        acknowledged_at: None,
        acknowledged_by: None,
        content_hash: String::new(),
    };
    card.content_hash = content_hash(&card);
    Ok(card)
}

fn rank_of(ranking: &[RankEntry], student_id: &str) -> Option<usize> {
    ranking
        .iter()
        .find(|e| e.student_id == student_id)
        .map(|e| e.rank)
}

/// SHA-256 over the computed snapshot: subject lines, overall, rank and attendance.
/// Comments, status and timestamps are excluded so unchanged data hashes the same.
pub fn content_hash(card: &ReportCard) -> String {
    let mut hasher = Sha256::new();
    hasher.update(card.student_id.as_bytes());
    hasher.update([0]);
    hasher.update(card.class_id.as_bytes());
    hasher.update([0]);
    hasher.update(card.term_id.as_bytes());
    hasher.update([0]);
    for g in &card.subject_grades {
        hasher.update(
            format!(
                "{}|{:.2}|{}|{}|{}|{:?}|{:?}\n",
                g.subject_id,
                g.average_percentage,
                g.letter_grade,
                g.contributing_record_count,
                g.late_record_count,
                g.subject_rank,
                g.class_average.map(|v| format!("{:.2}", v)),
            )
            .as_bytes(),
        );
    }
    hasher.update(
        format!(
            "{:.2}|{}|{}|{}|{}|{}|{}|{}",
            card.overall_average,
            card.overall_letter_grade,
            card.rank_in_class,
            card.class_size,
            card.attendance.present,
            card.attendance.absent,
            card.attendance.late,
            card.attendance.excused,
        )
        .as_bytes(),
    );
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Freezes a freshly compiled draft as published.
///
/// Comments come from the stored card. `issued_at` stays at the first publish unless
/// `reissue` is set.
pub fn publish(
    prior: Option<&ReportCard>,
    fresh: ReportCard,
    now: DateTime<Utc>,
    reissue: bool,
) -> EngineResult<ReportCard> {
    if let Some(p) = prior {
        if p.status == ReportCardStatus::Acknowledged {
            return Err(transition_error(p, "publish"));
        }
    }
    let stamp = timestamp(now);
    let issued_at = match prior.and_then(|p| p.issued_at.clone()) {
        Some(first) if !reissue => first,
        _ => stamp.clone(),
    };
    Ok(ReportCard {
        status: ReportCardStatus::Published,
        teacher_comments: prior.and_then(|p| p.teacher_comments.clone()),
        principal_comments: prior.and_then(|p| p.principal_comments.clone()),
        issued_at: Some(issued_at),
        published_at: Some(stamp),
        acknowledged_at: None,
        acknowledged_by: None,
        ..fresh
    })
}

/// Marks a published card as received. Terminal: nothing moves an acknowledged card again.
pub fn acknowledge(
    card: &ReportCard,
    now: DateTime<Utc>,
    acknowledged_by: Option<&str>,
) -> EngineResult<ReportCard> {
    if card.status != ReportCardStatus::Published {
        return Err(transition_error(card, "acknowledge"));
    }
    Ok(ReportCard {
        status: ReportCardStatus::Acknowledged,
        acknowledged_at: Some(timestamp(now)),
        acknowledged_by: acknowledged_by.map(|s| s.to_string()),
        ..card.clone()
    })
}

pub fn set_comments(
    card: &ReportCard,
    teacher_comments: Option<Option<String>>,
    principal_comments: Option<Option<String>>,
) -> EngineResult<ReportCard> {
    if card.status == ReportCardStatus::Acknowledged {
        return Err(transition_error(card, "comment on"));
    }
    let mut next = card.clone();
    if let Some(t) = teacher_comments {
        next.teacher_comments = t;
    }
    if let Some(p) = principal_comments {
        next.principal_comments = p;
    }
    Ok(next)
}

fn transition_error(card: &ReportCard, action: &'static str) -> EngineError {
    EngineError::InvalidStateTransition {
        student_id: card.student_id.clone(),
        class_id: card.class_id.clone(),
        term_id: card.term_id.clone(),
        from: card.status,
        action,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn subject(id: &str) -> EnrolledSubject {
        EnrolledSubject {
            id: id.into(),
            code: id.to_ascii_uppercase(),
            name: format!("{} name", id),
        }
    }

    fn avg(student: &str, subject: &str, pct: f64) -> SubjectAverage {
        SubjectAverage {
            student_id: student.into(),
            subject_id: subject.into(),
            class_id: "7a".into(),
            term_id: "t1".into(),
            average_percentage: pct,
            letter_grade: GradeScale::default()
                .letter_for(pct)
                .expect("letter")
                .to_string(),
            contributing_record_count: 2,
            late_record_count: 0,
            categories: Vec::new(),
        }
    }

    fn overall(student: &str, pct: f64) -> OverallAverage {
        OverallAverage {
            student_id: student.into(),
            class_id: "7a".into(),
            term_id: "t1".into(),
            average_percentage: pct,
            subject_count: 2,
        }
    }

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, h, 0, 0).single().expect("time")
    }

    struct Fixture {
        enrolled: Vec<EnrolledSubject>,
        averages: HashMap<String, SubjectAverage>,
        class_overall: Vec<OverallAverage>,
        standings: HashMap<String, SubjectStanding>,
        scale: GradeScale,
    }

    impl Fixture {
        fn new() -> Self {
            let mut averages = HashMap::new();
            averages.insert("math".to_string(), avg("s1", "math", 90.0));
            averages.insert("art".to_string(), avg("s1", "art", 80.0));
            Self {
                enrolled: vec![subject("math"), subject("art")],
                averages,
                class_overall: vec![overall("s1", 85.0), overall("s2", 91.0), overall("s3", 85.0)],
                standings: HashMap::new(),
                scale: GradeScale::default(),
            }
        }

        fn inputs(&self) -> CompileInputs<'_> {
            CompileInputs {
                student_id: "s1",
                class_id: "7a",
                term_id: "t1",
                enrolled: &self.enrolled,
                subject_averages: &self.averages,
                class_overall: &self.class_overall,
                standings: &self.standings,
                attendance: AttendanceSummary::default(),
                scale: &self.scale,
            }
        }
    }

    #[test]
    fn compiles_draft_with_rank_and_ordered_subjects() {
        let f = Fixture::new();
        let card = compile(f.inputs()).expect("compile");
        assert_eq!(card.status, ReportCardStatus::Draft);
        assert_eq!(card.overall_average, 85.0);
        assert_eq!(card.overall_letter_grade, "B");
        assert_eq!(card.rank_in_class, 2);
        assert_eq!(card.class_size, 3);
        let order: Vec<&str> = card
            .subject_grades
            .iter()
            .map(|g| g.subject_id.as_str())
            .collect();
        assert_eq!(order, vec!["math", "art"]);
        assert_eq!(card.content_hash.len(), 64);
    }

    #[test]
    fn compile_is_deterministic() {
        let f = Fixture::new();
        let a = compile(f.inputs()).expect("compile");
        let b = compile(f.inputs()).expect("compile");
        assert_eq!(a, b);
    }

    #[test]
    fn missing_subject_is_named() {
        let mut f = Fixture::new();
        f.enrolled.push(subject("history"));
        match compile(f.inputs()) {
            Err(EngineError::IncompleteTermData {
                missing_subjects, ..
            }) => assert_eq!(missing_subjects, vec!["history".to_string()]),
            other => panic!("expected IncompleteTermData, got {:?}", other),
        }
    }

    #[test]
    fn no_enrolled_subjects_is_rejected() {
        let mut f = Fixture::new();
        f.enrolled.clear();
        assert!(matches!(
            compile(f.inputs()),
            Err(EngineError::NotEnrolled { .. })
        ));
    }

    #[test]
    fn student_absent_from_class_snapshot_is_still_ranked() {
        let mut f = Fixture::new();
        f.class_overall.retain(|o| o.student_id != "s1");
        let card = compile(f.inputs()).expect("compile");
        assert_eq!(card.rank_in_class, 2);
        assert_eq!(card.class_size, 3);
    }

    #[test]
    fn acknowledge_requires_published() {
        let f = Fixture::new();
        let draft = compile(f.inputs()).expect("compile");
        match acknowledge(&draft, at(9), Some("guardian-1")) {
            Err(EngineError::InvalidStateTransition { from, .. }) => {
                assert_eq!(from, ReportCardStatus::Draft)
            }
            other => panic!("expected InvalidStateTransition, got {:?}", other),
        }

        let published = publish(Some(&draft), draft.clone(), at(10), false).expect("publish");
        let acked = acknowledge(&published, at(11), Some("guardian-1")).expect("acknowledge");
        assert_eq!(acked.status, ReportCardStatus::Acknowledged);
        assert_eq!(acked.acknowledged_by.as_deref(), Some("guardian-1"));
        assert!(acknowledge(&acked, at(12), None).is_err());
        assert!(publish(Some(&acked), draft.clone(), at(12), true).is_err());
        assert!(set_comments(&acked, Some(Some("late note".into())), None).is_err());
    }

    #[test]
    fn republish_keeps_first_issue_date_unless_reissued() {
        let f = Fixture::new();
        let draft = compile(f.inputs()).expect("compile");
        let commented = set_comments(&draft, Some(Some("Steady work".into())), None).expect("comment");
        let first = publish(Some(&commented), draft.clone(), at(8), false).expect("publish");
        assert_eq!(first.teacher_comments.as_deref(), Some("Steady work"));
        let first_issue = first.issued_at.clone().expect("issued_at");

        let again = publish(Some(&first), draft.clone(), at(9), false).expect("republish");
        assert_eq!(again.issued_at.as_deref(), Some(first_issue.as_str()));
        assert_ne!(again.published_at, first.published_at);
        assert_eq!(again.teacher_comments.as_deref(), Some("Steady work"));

        let reissued = publish(Some(&again), draft, at(10), true).expect("reissue");
        assert_eq!(reissued.issued_at, reissued.published_at);
        assert_ne!(reissued.issued_at.as_deref(), Some(first_issue.as_str()));
    }

    #[test]
    fn attendance_rate_counts_late_as_attended() {
        let summary = AttendanceSummary::from_counts(&[
            (AttendanceStatus::Present, 15),
            (AttendanceStatus::Late, 2),
            (AttendanceStatus::Absent, 2),
            (AttendanceStatus::Excused, 1),
        ]);
        assert_eq!(summary.attendance_rate, Some(85.0));
        assert_eq!(AttendanceSummary::from_counts(&[]).attendance_rate, None);
    }

    #[test]
    fn content_hash_ignores_comments_and_status() {
        let f = Fixture::new();
        let draft = compile(f.inputs()).expect("compile");
        let commented = set_comments(&draft, None, Some(Some("Well done".into()))).expect("comment");
        assert_eq!(content_hash(&commented), draft.content_hash);

        let mut f2 = Fixture::new();
        f2.averages.insert("art".to_string(), avg("s1", "art", 70.0));
        let changed = compile(f2.inputs()).expect("compile");
        assert_ne!(changed.content_hash, draft.content_hash);
    }
}
