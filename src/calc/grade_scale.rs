use serde::{Deserialize, Serialize};

use super::error::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub min_inclusive: f64,
    pub letter: String,
}

impl GradeBand {
    fn new(min_inclusive: f64, letter: &str) -> Self {
        Self {
            min_inclusive,
            letter: letter.to_string(),
        }
    }
}

/// Ordered letter-grade thresholds, highest bound first.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct GradeScale {
    bands: Vec<GradeBand>,
}

impl Default for GradeScale {
    fn default() -> Self {
        Self {
            bands: vec![
                GradeBand::new(90.0, "A"),
                GradeBand::new(80.0, "B"),
                GradeBand::new(70.0, "C"),
                GradeBand::new(60.0, "D"),
                GradeBand::new(0.0, "F"),
            ],
        }
    }
}

impl GradeScale {
    /// Validates and sorts bands descending by bound.
    ///
    /// A lowest bound above zero is allowed; percentages under it fail lookup with
    /// `NoMatchingGrade` instead of falling back to some grade.
    pub fn new(mut bands: Vec<GradeBand>) -> EngineResult<Self> {
        if bands.is_empty() {
            return Err(EngineError::InvalidGradeScale(
                "scale must have at least one band".into(),
            ));
        }
        for band in &mut bands {
            if !band.min_inclusive.is_finite() || !(0.0..=100.0).contains(&band.min_inclusive) {
                return Err(EngineError::InvalidGradeScale(format!(
                    "bound {} for '{}' must be within 0..=100",
                    band.min_inclusive, band.letter
                )));
            }
            band.letter = band.letter.trim().to_string();
            if band.letter.is_empty() {
                return Err(EngineError::InvalidGradeScale(
                    "letters must not be empty".into(),
                ));
            }
        }
        bands.sort_by(|a, b| b.min_inclusive.total_cmp(&a.min_inclusive));
        if let Some(w) = bands
            .windows(2)
            .find(|w| w[0].min_inclusive == w[1].min_inclusive)
        {
            return Err(EngineError::InvalidGradeScale(format!(
                "duplicate bound {}",
                w[0].min_inclusive
            )));
        }
        Ok(Self { bands })
    }

    pub fn bands(&self) -> &[GradeBand] {
        &self.bands
    }

    pub fn lowest_bound(&self) -> f64 {
        self.bands
            .last()
            .map(|b| b.min_inclusive)
            .unwrap_or(0.0)
    }

    pub fn letter_for(&self, percentage: f64) -> EngineResult<&str> {
        letter_for(percentage, self)
    }
}

pub fn letter_for(percentage: f64, scale: &GradeScale) -> EngineResult<&str> {
    scale
        .bands
        .iter()
        .find(|b| b.min_inclusive <= percentage)
        .map(|b| b.letter.as_str())
        .ok_or_else(|| EngineError::NoMatchingGrade {
            percentage,
            lowest_bound: scale.lowest_bound(),
            student_id: None,
            subject_id: None,
        })
}
