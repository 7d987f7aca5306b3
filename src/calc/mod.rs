//! Score aggregation and report card compilation.
//!
//! The leaf modules are pure functions over in-memory records; `context` binds them to one
//! class and term in the workspace database.

mod aggregate;
mod context;
mod error;
mod grade_scale;
mod normalize;
mod rank;
mod report_card;

pub use aggregate::{
    validate_weights, CategoryWeight, ScoreCategory, ScoreRecord, SubjectKey, WeightScope,
};
pub use context::CalcContext;
pub use error::{EngineError, EngineResult};
pub use grade_scale::{letter_for, GradeBand, GradeScale};
pub use normalize::normalize;
pub use report_card::{
    timestamp, AttendanceStatus, AttendanceSummary, EnrolledSubject, ReportCard,
    ReportCardStatus, SubjectGrade,
};
