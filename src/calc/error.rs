use serde_json::json;
use thiserror::Error;

use super::report_card::ReportCardStatus;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid score {raw_score}/{max_score}: {reason}")]
    InvalidScore {
        raw_score: f64,
        max_score: f64,
        reason: &'static str,
    },

    #[error("no grade band covers {percentage}% (lowest bound is {lowest_bound})")]
    NoMatchingGrade {
        percentage: f64,
        lowest_bound: f64,
        student_id: Option<String>,
        subject_id: Option<String>,
    },

    #[error("invalid grade scale: {0}")]
    InvalidGradeScale(String),

    #[error("invalid category weights for {scope} {scope_id}: {reason}")]
    InvalidWeights {
        scope: String,
        scope_id: String,
        reason: String,
    },

    #[error("no score records for student {student_id} in subject {subject_id} (class {class_id}, term {term_id})")]
    InsufficientData {
        student_id: String,
        subject_id: String,
        class_id: String,
        term_id: String,
    },

    #[error("student {student_id} is missing averages for {} subject(s) in term {term_id}", missing_subjects.len())]
    IncompleteTermData {
        student_id: String,
        class_id: String,
        term_id: String,
        missing_subjects: Vec<String>,
    },

    #[error("student {student_id} is not enrolled in any subject of class {class_id}")]
    NotEnrolled {
        student_id: String,
        class_id: String,
    },

    #[error("cannot {action} a {from} report card (student {student_id}, class {class_id}, term {term_id})")]
    InvalidStateTransition {
        student_id: String,
        class_id: String,
        term_id: String,
        from: ReportCardStatus,
        action: &'static str,
    },

    #[error("{what} not found")]
    NotFound {
        what: &'static str,
        details: serde_json::Value,
    },

    #[error(transparent)]
    Database(#[from] rusqlite::Error),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidScore { .. } => "invalid_score",
            Self::NoMatchingGrade { .. } => "no_matching_grade",
            Self::InvalidGradeScale(_) => "invalid_grade_scale",
            Self::InvalidWeights { .. } => "invalid_weights",
            Self::InsufficientData { .. } => "insufficient_data",
            Self::IncompleteTermData { .. } => "incomplete_term_data",
            Self::NotEnrolled { .. } => "not_enrolled",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
            Self::NotFound { .. } => "not_found",
            Self::Database(_) => "db_query_failed",
        }
    }

    /// Names the student, and the subject when there is one, on a failed letter lookup.
    pub fn for_student(self, student: &str, subject: Option<&str>) -> Self {
        match self {
            Self::NoMatchingGrade {
                percentage,
                lowest_bound,
                ..
            } => Self::NoMatchingGrade {
                percentage,
                lowest_bound,
                student_id: Some(student.to_string()),
                subject_id: subject.map(|s| s.to_string()),
            },
            other => other,
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::InvalidScore {
                raw_score,
                max_score,
                ..
            } => Some(json!({ "rawScore": raw_score, "maxScore": max_score })),
            Self::NoMatchingGrade {
                percentage,
                lowest_bound,
                student_id,
                subject_id,
            } => {
                let mut out = json!({ "percentage": percentage, "lowestBound": lowest_bound });
                if let Some(id) = student_id {
                    out["studentId"] = json!(id);
                }
                if let Some(id) = subject_id {
                    out["subjectId"] = json!(id);
                }
                Some(out)
            }
            Self::InvalidWeights {
                scope, scope_id, ..
            } => Some(json!({ "scope": scope, "scopeId": scope_id })),
            Self::InsufficientData {
                student_id,
                subject_id,
                class_id,
                term_id,
            } => Some(json!({
                "studentId": student_id,
                "subjectId": subject_id,
                "classId": class_id,
                "termId": term_id,
            })),
            Self::IncompleteTermData {
                student_id,
                class_id,
                term_id,
                missing_subjects,
            } => Some(json!({
                "studentId": student_id,
                "classId": class_id,
                "termId": term_id,
                "missingSubjects": missing_subjects,
            })),
            Self::NotEnrolled {
                student_id,
                class_id,
            } => Some(json!({ "studentId": student_id, "classId": class_id })),
            Self::InvalidStateTransition {
                student_id,
                class_id,
                term_id,
                from,
                action,
            } => Some(json!({
                "studentId": student_id,
                "classId": class_id,
                "termId": term_id,
                "status": from.as_str(),
                "action": action,
            })),
            Self::NotFound { details, .. } => Some(details.clone()),
            Self::InvalidGradeScale(_) | Self::Database(_) => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
