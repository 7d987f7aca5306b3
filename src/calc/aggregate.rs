use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::{EngineError, EngineResult};
use super::grade_scale::GradeScale;
use super::normalize::{normalize, round_2, stable_mean};

/// Weight sums may overshoot 1.0 by float noise from client-side arithmetic.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreCategory {
    Assignment,
    Quiz,
    Exam,
    Other,
}

impl ScoreCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assignment => "assignment",
            Self::Quiz => "quiz",
            Self::Exam => "exam",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "assignment" => Some(Self::Assignment),
            "quiz" => Some(Self::Quiz),
            "exam" => Some(Self::Exam),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRecord {
    pub id: String,
    pub student_id: String,
    pub subject_id: String,
    pub class_id: String,
    pub term_id: String,
    pub category: ScoreCategory,
    pub title: Option<String>,
    pub raw_score: f64,
    pub max_score: f64,
    pub recorded_at: String,
    pub is_late: bool,
    pub superseded_by: Option<String>,
}

impl ScoreRecord {
    pub fn is_superseded(&self) -> bool {
        self.superseded_by.is_some()
    }

    fn matches(&self, key: &SubjectKey) -> bool {
        self.student_id == key.student_id
            && self.subject_id == key.subject_id
            && self.class_id == key.class_id
            && self.term_id == key.term_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightScope {
    Subject,
    Class,
}

impl WeightScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Class => "class",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "subject" => Some(Self::Subject),
            "class" => Some(Self::Class),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryWeight {
    pub scope: WeightScope,
    pub scope_id: String,
    pub category: ScoreCategory,
    pub weight_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubjectKey {
    pub student_id: String,
    pub subject_id: String,
    pub class_id: String,
    pub term_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryBreakdown {
    pub category: ScoreCategory,
    pub mean_percentage: f64,
    pub record_count: usize,
    /// `None` when the flat mean was used and categories carried no weight of their own.
    pub effective_weight: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAverage {
    pub student_id: String,
    pub subject_id: String,
    pub class_id: String,
    pub term_id: String,
    pub average_percentage: f64,
    pub letter_grade: String,
    pub contributing_record_count: usize,
    pub late_record_count: usize,
    pub categories: Vec<CategoryBreakdown>,
}

/// Checks one scope's weight set before it is stored.
pub fn validate_weights(
    scope: WeightScope,
    scope_id: &str,
    weights: &[(ScoreCategory, f64)],
) -> EngineResult<()> {
    let invalid = |reason: String| EngineError::InvalidWeights {
        scope: scope.as_str().to_string(),
        scope_id: scope_id.to_string(),
        reason,
    };
    let mut seen = Vec::with_capacity(weights.len());
    let mut sum = 0.0_f64;
    for (category, fraction) in weights {
        if !fraction.is_finite() || !(0.0..=1.0).contains(fraction) {
            return Err(invalid(format!(
                "{} weight {} must be within 0..=1",
                category.as_str(),
                fraction
            )));
        }
        if seen.contains(category) {
            return Err(invalid(format!("{} listed twice", category.as_str())));
        }
        seen.push(*category);
        sum += fraction;
    }
    if sum > 1.0 + WEIGHT_SUM_TOLERANCE {
        return Err(invalid(format!("weights sum to {}, which exceeds 1.0", sum)));
    }
    Ok(())
}

/// Subject-scoped weights replace the class-scoped set entirely when any exist.
pub fn effective_weights<'a>(
    subject_id: &str,
    class_id: &str,
    rows: &'a [CategoryWeight],
) -> Vec<&'a CategoryWeight> {
    let subject: Vec<&CategoryWeight> = rows
        .iter()
        .filter(|w| w.scope == WeightScope::Subject && w.scope_id == subject_id)
        .collect();
    if !subject.is_empty() {
        return subject;
    }
    rows.iter()
        .filter(|w| w.scope == WeightScope::Class && w.scope_id == class_id)
        .collect()
}

/// A subject average before the grade scale is applied. Ranking only needs the number, so a
/// scale that cannot letter one student never blocks the rest of the class.
#[derive(Debug, Clone, PartialEq)]
pub struct UngradedAverage {
    pub key: SubjectKey,
    pub average_percentage: f64,
    pub contributing_record_count: usize,
    pub late_record_count: usize,
    pub categories: Vec<CategoryBreakdown>,
}

impl UngradedAverage {
    pub fn grade(&self, scale: &GradeScale) -> EngineResult<SubjectAverage> {
        let letter_grade = scale
            .letter_for(self.average_percentage)
            .map_err(|e| e.for_student(&self.key.student_id, Some(&self.key.subject_id)))?
            .to_string();
        Ok(SubjectAverage {
            student_id: self.key.student_id.clone(),
            subject_id: self.key.subject_id.clone(),
            class_id: self.key.class_id.clone(),
            term_id: self.key.term_id.clone(),
            average_percentage: self.average_percentage,
            letter_grade,
            contributing_record_count: self.contributing_record_count,
            late_record_count: self.late_record_count,
            categories: self.categories.clone(),
        })
    }
}

/// Combines one student's records for a subject and term into a single average.
///
/// Records that are superseded or belong to another key are ignored. With no weights the
/// result is the flat mean over every record; otherwise category means are combined using
/// the explicit fractions plus an equal split of the remainder across unweighted categories.
/// The weighted sum is divided by the total weight applied, so categories with no records
/// never drag the average toward zero.
pub fn average(
    key: &SubjectKey,
    records: &[ScoreRecord],
    weights: &[&CategoryWeight],
) -> EngineResult<UngradedAverage> {
    let mut by_category: BTreeMap<ScoreCategory, Vec<f64>> = BTreeMap::new();
    let mut all_percentages: Vec<f64> = Vec::new();
    let mut late_record_count = 0_usize;

    for r in records {
        if r.is_superseded() || !r.matches(key) {
            continue;
        }
        let percent = normalize(r.raw_score, r.max_score)?;
        if r.is_late {
            late_record_count += 1;
        }
        by_category.entry(r.category).or_default().push(percent);
        all_percentages.push(percent);
    }

    let Some(flat_mean) = stable_mean(&all_percentages) else {
        return Err(EngineError::InsufficientData {
            student_id: key.student_id.clone(),
            subject_id: key.subject_id.clone(),
            class_id: key.class_id.clone(),
            term_id: key.term_id.clone(),
        });
    };

    let category_means: BTreeMap<ScoreCategory, (f64, usize)> = by_category
        .iter()
        .filter_map(|(c, values)| stable_mean(values).map(|m| (*c, (m, values.len()))))
        .collect();

    let (raw_average, applied) = if weights.is_empty() {
        (flat_mean, None)
    } else {
        let configured: BTreeMap<ScoreCategory, f64> = weights
            .iter()
            .map(|w| (w.category, w.weight_fraction))
            .collect();
        let applied = category_weights(&category_means, &configured);
        (weighted_mean(&category_means, &applied), Some(applied))
    };

    let average_percentage = round_2(raw_average);

    let categories = category_means
        .iter()
        .map(|(c, (mean, count))| CategoryBreakdown {
            category: *c,
            mean_percentage: round_2(*mean),
            record_count: *count,
            effective_weight: applied
                .as_ref()
                .and_then(|a| a.get(c).copied())
                .map(round_weight),
        })
        .collect();

    tracing::debug!(
        student_id = %key.student_id,
        subject_id = %key.subject_id,
        term_id = %key.term_id,
        records = all_percentages.len(),
        weighted = applied.is_some(),
        average = average_percentage,
        "subject_aggregated"
    );

    Ok(UngradedAverage {
        key: key.clone(),
        average_percentage,
        contributing_record_count: all_percentages.len(),
        late_record_count,
        categories,
    })
}

/// [`average`] followed by the letter lookup on the rounded percentage. Weighted results are
/// renormalized over the weight actually applied, not summed against a fixed 1.0.
pub fn aggregate(
    key: &SubjectKey,
    records: &[ScoreRecord],
    weights: &[&CategoryWeight],
    scale: &GradeScale,
) -> EngineResult<SubjectAverage> {
    average(key, records, weights)?.grade(scale)
}

fn category_weights(
    present: &BTreeMap<ScoreCategory, (f64, usize)>,
    configured: &BTreeMap<ScoreCategory, f64>,
) -> BTreeMap<ScoreCategory, f64> {
    let explicit_sum: f64 = present.keys().filter_map(|c| configured.get(c)).sum();
    let unweighted = present
        .keys()
        .filter(|c| !configured.contains_key(c))
        .count();
    let share = if unweighted > 0 {
        (1.0 - explicit_sum).max(0.0) / unweighted as f64
    } else {
        0.0
    };
    present
        .keys()
        .map(|c| (*c, configured.get(c).copied().unwrap_or(share)))
        .collect()
}

fn weighted_mean(
    means: &BTreeMap<ScoreCategory, (f64, usize)>,
    applied: &BTreeMap<ScoreCategory, f64>,
) -> f64 {
    let mut sum = 0.0_f64;
    let mut denom = 0.0_f64;
    for (c, (mean, _)) in means {
        let w = applied.get(c).copied().unwrap_or(0.0);
        if w > 0.0 {
            sum += mean * w;
            denom += w;
        }
    }
    if denom > 0.0 {
        return sum / denom;
    }
    // Every present category carries zero weight: fall back to equal category means.
    let equal: Vec<f64> = means.values().map(|(m, _)| *m).collect();
    stable_mean(&equal).unwrap_or(0.0)
}

fn round_weight(w: f64) -> f64 {
    (w * 10_000.0).round() / 10_000.0
}
