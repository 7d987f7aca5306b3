use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;

use super::aggregate::{
    aggregate, average, effective_weights, ScoreRecord, SubjectAverage, SubjectKey, UngradedAverage,
};
use super::error::{EngineError, EngineResult};
use super::grade_scale::GradeScale;
use super::normalize::{round_2, stable_mean};
use super::rank::{overall_average, rank, rank_by_percentage, OverallAverage, RankEntry};
use super::report_card::{
    self, timestamp, CompileInputs, EnrolledSubject, ReportCard, ReportCardStatus,
    SubjectStanding,
};
use crate::store;

/// One class and one explicitly chosen term. Every computation names its term; nothing
/// reads a "current term" from global state.
#[derive(Debug, Clone)]
pub struct CalcContext<'a> {
    pub conn: &'a Connection,
    pub class_id: &'a str,
    pub term_id: &'a str,
    pub scale: &'a GradeScale,
}

/// Ungraded subject averages for every enrolled student/subject pair with records this term.
/// Letters are assigned per student when a card or average is requested.
#[derive(Debug, Clone, Default)]
pub struct ClassTermSnapshot {
    pub student_ids: Vec<String>,
    pub enrollments: HashMap<String, Vec<EnrolledSubject>>,
    pub averages: HashMap<String, HashMap<String, UngradedAverage>>,
}

impl ClassTermSnapshot {
    fn student_averages(&self, student_id: &str) -> Vec<&UngradedAverage> {
        let Some(by_subject) = self.averages.get(student_id) else {
            return Vec::new();
        };
        self.enrollments
            .get(student_id)
            .map(|subjects| {
                subjects
                    .iter()
                    .filter_map(|s| by_subject.get(&s.id))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn overall_averages(&self, class_id: &str, term_id: &str) -> Vec<OverallAverage> {
        self.student_ids
            .iter()
            .filter_map(|id| {
                let percentages: Vec<f64> = self
                    .student_averages(id)
                    .iter()
                    .map(|a| a.average_percentage)
                    .collect();
                overall_average(id, class_id, term_id, &percentages)
            })
            .collect()
    }

    fn subject_percentages(&self, subject_id: &str) -> Vec<(&str, f64)> {
        self.student_ids
            .iter()
            .filter_map(|id| {
                self.averages
                    .get(id)
                    .and_then(|m| m.get(subject_id))
                    .map(|a| (id.as_str(), a.average_percentage))
            })
            .collect()
    }

    fn standings_for(&self, student_id: &str) -> HashMap<String, SubjectStanding> {
        let mut out = HashMap::new();
        for subject in self.enrollments.get(student_id).into_iter().flatten() {
            let percentages = self.subject_percentages(&subject.id);
            let values: Vec<f64> = percentages.iter().map(|(_, p)| *p).collect();
            let ranking = rank_by_percentage(percentages);
            out.insert(
                subject.id.clone(),
                SubjectStanding {
                    rank: ranking
                        .iter()
                        .find(|e| e.student_id == student_id)
                        .map(|e| e.rank),
                    class_average: stable_mean(&values).map(round_2),
                },
            );
        }
        out
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentTermAverages {
    pub student_id: String,
    pub subject_averages: Vec<SubjectAverage>,
    pub unassessed_subjects: Vec<String>,
    pub overall: Option<OverallAverage>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStats {
    pub subject_id: String,
    pub assessed_count: usize,
    pub class_average: Option<f64>,
    pub highest: Option<f64>,
    pub lowest: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileOutcome {
    pub card: ReportCard,
    /// False when a published or acknowledged card already exists and was left untouched.
    pub persisted: bool,
}

impl<'a> CalcContext<'a> {
    fn not_found(&self, what: &'static str, details: serde_json::Value) -> EngineError {
        EngineError::NotFound { what, details }
    }

    pub fn ensure_class_and_term(&self) -> EngineResult<()> {
        if !store::class_exists(self.conn, self.class_id)? {
            return Err(self.not_found("class", json!({ "classId": self.class_id })));
        }
        if !store::term_exists(self.conn, self.term_id)? {
            return Err(self.not_found("term", json!({ "termId": self.term_id })));
        }
        Ok(())
    }

    fn ensure_student(&self, student_id: &str) -> EngineResult<()> {
        self.ensure_class_and_term()?;
        if !store::student_in_class(self.conn, self.class_id, student_id)? {
            return Err(self.not_found(
                "student",
                json!({ "studentId": student_id, "classId": self.class_id }),
            ));
        }
        Ok(())
    }

    fn ensure_subject(&self, subject_id: &str) -> EngineResult<()> {
        self.ensure_class_and_term()?;
        if !store::subject_in_class(self.conn, self.class_id, subject_id)? {
            return Err(self.not_found(
                "subject",
                json!({ "subjectId": subject_id, "classId": self.class_id }),
            ));
        }
        Ok(())
    }

    fn key(&self, student_id: &str, subject_id: &str) -> SubjectKey {
        SubjectKey {
            student_id: student_id.to_string(),
            subject_id: subject_id.to_string(),
            class_id: self.class_id.to_string(),
            term_id: self.term_id.to_string(),
        }
    }

    /// Aggregates one student/subject pair; `InsufficientData` when nothing is recorded.
    pub fn subject_average(&self, student_id: &str, subject_id: &str) -> EngineResult<SubjectAverage> {
        self.ensure_student(student_id)?;
        self.ensure_subject(subject_id)?;
        let key = self.key(student_id, subject_id);
        let records = store::score_records_for(self.conn, &key, false)?;
        let weight_rows = store::category_weights_for_class(self.conn, self.class_id)?;
        let weights = effective_weights(subject_id, self.class_id, &weight_rows);
        aggregate(&key, &records, &weights, self.scale)
    }

    pub fn snapshot(&self) -> EngineResult<ClassTermSnapshot> {
        self.ensure_class_and_term()?;
        let student_ids = store::class_student_ids(self.conn, self.class_id)?;
        let enrollments = store::class_enrollments(self.conn, self.class_id)?;
        let weight_rows = store::category_weights_for_class(self.conn, self.class_id)?;

        let mut grouped: HashMap<(String, String), Vec<ScoreRecord>> = HashMap::new();
        for r in store::score_records_for_class_term(self.conn, self.class_id, self.term_id)? {
            grouped
                .entry((r.student_id.clone(), r.subject_id.clone()))
                .or_default()
                .push(r);
        }

        let mut averages: HashMap<String, HashMap<String, UngradedAverage>> = HashMap::new();
        for student_id in &student_ids {
            for subject in enrollments.get(student_id).into_iter().flatten() {
                let Some(records) = grouped.get(&(student_id.clone(), subject.id.clone())) else {
                    continue;
                };
                let key = self.key(student_id, &subject.id);
                let weights = effective_weights(&subject.id, self.class_id, &weight_rows);
                match average(&key, records, &weights) {
                    Ok(avg) => {
                        averages
                            .entry(student_id.clone())
                            .or_default()
                            .insert(subject.id.clone(), avg);
                    }
                    Err(EngineError::InsufficientData { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(ClassTermSnapshot {
            student_ids,
            enrollments,
            averages,
        })
    }

    pub fn student_averages(&self, student_id: &str) -> EngineResult<StudentTermAverages> {
        self.ensure_student(student_id)?;
        let snapshot = self.snapshot()?;
        let enrolled = snapshot
            .enrollments
            .get(student_id)
            .cloned()
            .unwrap_or_default();
        let by_subject = snapshot.averages.get(student_id);
        let mut subject_averages = Vec::new();
        let mut unassessed_subjects = Vec::new();
        for s in &enrolled {
            match by_subject.and_then(|m| m.get(&s.id)) {
                Some(avg) => subject_averages.push(avg.grade(self.scale)?),
                None => unassessed_subjects.push(s.id.clone()),
            }
        }
        let percentages: Vec<f64> = subject_averages
            .iter()
            .map(|a| a.average_percentage)
            .collect();
        let overall = overall_average(student_id, self.class_id, self.term_id, &percentages);
        Ok(StudentTermAverages {
            student_id: student_id.to_string(),
            subject_averages,
            unassessed_subjects,
            overall,
        })
    }

    pub fn class_ranking(&self) -> EngineResult<Vec<RankEntry>> {
        let snapshot = self.snapshot()?;
        Ok(rank(&snapshot.overall_averages(self.class_id, self.term_id)))
    }

    pub fn subject_ranking(&self, subject_id: &str) -> EngineResult<Vec<RankEntry>> {
        self.ensure_subject(subject_id)?;
        let snapshot = self.snapshot()?;
        Ok(rank_by_percentage(snapshot.subject_percentages(subject_id)))
    }

    pub fn subject_stats(&self, subject_id: &str) -> EngineResult<SubjectStats> {
        self.ensure_subject(subject_id)?;
        let snapshot = self.snapshot()?;
        let values: Vec<f64> = snapshot
            .subject_percentages(subject_id)
            .into_iter()
            .map(|(_, p)| p)
            .collect();
        Ok(SubjectStats {
            subject_id: subject_id.to_string(),
            assessed_count: values.len(),
            class_average: stable_mean(&values).map(round_2),
            highest: values.iter().copied().reduce(f64::max),
            lowest: values.iter().copied().reduce(f64::min),
        })
    }

    fn compile_from(&self, snapshot: &ClassTermSnapshot, student_id: &str) -> EngineResult<ReportCard> {
        let empty_enrolled = Vec::new();
        let enrolled = snapshot.enrollments.get(student_id).unwrap_or(&empty_enrolled);
        let mut subject_averages: HashMap<String, SubjectAverage> = HashMap::new();
        for (subject_id, ungraded) in snapshot.averages.get(student_id).into_iter().flatten() {
            subject_averages.insert(subject_id.clone(), ungraded.grade(self.scale)?);
        }
        let class_overall = snapshot.overall_averages(self.class_id, self.term_id);
        let standings = snapshot.standings_for(student_id);
        let attendance =
            store::attendance_summary(self.conn, student_id, self.class_id, self.term_id)?;
        report_card::compile(CompileInputs {
            student_id,
            class_id: self.class_id,
            term_id: self.term_id,
            enrolled,
            subject_averages: &subject_averages,
            class_overall: &class_overall,
            standings: &standings,
            attendance,
            scale: self.scale,
        })
    }

    /// Compiles a draft and stores it unless a published or acknowledged card already exists.
    pub fn compile(&self, student_id: &str, now: DateTime<Utc>) -> EngineResult<CompileOutcome> {
        self.ensure_student(student_id)?;
        let snapshot = self.snapshot()?;
        self.compile_with(&snapshot, student_id, now)
    }

    fn compile_with(
        &self,
        snapshot: &ClassTermSnapshot,
        student_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<CompileOutcome> {
        let mut card = self.compile_from(snapshot, student_id)?;

        let tx = self.conn.unchecked_transaction()?;
        let stored = store::load_report_card(&tx, student_id, self.class_id, self.term_id)?;
        if let Some(prior) = &stored {
            card.teacher_comments = prior.teacher_comments.clone();
            card.principal_comments = prior.principal_comments.clone();
        }
        let persisted = match stored.as_ref().map(|c| c.status) {
            None | Some(ReportCardStatus::Draft) => {
                store::save_report_card(&tx, &card, &timestamp(now))?;
                true
            }
            Some(_) => false,
        };
        tx.commit()?;

        tracing::debug!(
            student_id,
            class_id = self.class_id,
            term_id = self.term_id,
            persisted,
            "report_card_compiled"
        );
        Ok(CompileOutcome { card, persisted })
    }

    /// Recompiles from current data and freezes the result as published.
    pub fn publish(&self, student_id: &str, reissue: bool, now: DateTime<Utc>) -> EngineResult<ReportCard> {
        self.ensure_student(student_id)?;
        let snapshot = self.snapshot()?;
        self.publish_with(&snapshot, student_id, reissue, now)
    }

    fn publish_with(
        &self,
        snapshot: &ClassTermSnapshot,
        student_id: &str,
        reissue: bool,
        now: DateTime<Utc>,
    ) -> EngineResult<ReportCard> {
        let tx = self.conn.unchecked_transaction()?;
        let stored = store::load_report_card(&tx, student_id, self.class_id, self.term_id)?;
        let fresh = self.compile_from(snapshot, student_id)?;
        let published = report_card::publish(stored.as_ref(), fresh, now, reissue)?;
        store::save_report_card(&tx, &published, &timestamp(now))?;
        tx.commit()?;

        tracing::info!(
            student_id,
            class_id = self.class_id,
            term_id = self.term_id,
            reissue,
            content_hash = %published.content_hash,
            "report_card_published"
        );
        Ok(published)
    }

    pub fn acknowledge(
        &self,
        student_id: &str,
        acknowledged_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> EngineResult<ReportCard> {
        let tx = self.conn.unchecked_transaction()?;
        let stored = self.stored_card(&tx, student_id)?;
        let acked = report_card::acknowledge(&stored, now, acknowledged_by)?;
        store::save_report_card(&tx, &acked, &timestamp(now))?;
        tx.commit()?;

        tracing::info!(
            student_id,
            class_id = self.class_id,
            term_id = self.term_id,
            "report_card_acknowledged"
        );
        Ok(acked)
    }

    pub fn set_comments(
        &self,
        student_id: &str,
        teacher_comments: Option<Option<String>>,
        principal_comments: Option<Option<String>>,
        now: DateTime<Utc>,
    ) -> EngineResult<ReportCard> {
        let tx = self.conn.unchecked_transaction()?;
        let stored = self.stored_card(&tx, student_id)?;
        let updated = report_card::set_comments(&stored, teacher_comments, principal_comments)?;
        store::save_report_card(&tx, &updated, &timestamp(now))?;
        tx.commit()?;
        Ok(updated)
    }

    pub fn report_card(&self, student_id: &str) -> EngineResult<ReportCard> {
        self.stored_card(self.conn, student_id)
    }

    fn stored_card(&self, conn: &Connection, student_id: &str) -> EngineResult<ReportCard> {
        store::load_report_card(conn, student_id, self.class_id, self.term_id)?.ok_or_else(|| {
            self.not_found(
                "report card",
                json!({
                    "studentId": student_id,
                    "classId": self.class_id,
                    "termId": self.term_id,
                }),
            )
        })
    }

    /// Compiles every student in the class, each in its own transaction.
    pub fn compile_class(
        &self,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<(String, EngineResult<CompileOutcome>)>> {
        let snapshot = self.snapshot()?;
        Ok(snapshot
            .student_ids
            .iter()
            .map(|id| (id.clone(), self.compile_with(&snapshot, id, now)))
            .collect())
    }

    /// Publishes every student in the class; one student's failure never blocks the others.
    pub fn publish_class(
        &self,
        reissue: bool,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<(String, EngineResult<ReportCard>)>> {
        let snapshot = self.snapshot()?;
        Ok(snapshot
            .student_ids
            .iter()
            .map(|id| (id.clone(), self.publish_with(&snapshot, id, reissue, now)))
            .collect())
    }
}
