use rusqlite::Connection;
use serde_json::{json, Map, Value};

use crate::calc::{GradeBand, GradeScale};
use crate::db;

pub const GRADING_KEY: &str = "setup.grading";

/// Workspace grading policy, stored as JSON in the settings table and merged over defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradingConfig {
    pub grade_scale: GradeScale,
}

impl GradingConfig {
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let mut current = Self::default();
        if let Some(saved) = db::settings_get_json(conn, GRADING_KEY)? {
            if let Some(saved_obj) = saved.as_object() {
                // Malformed historical values must not block grading; keep the defaults.
                let mut candidate = current.clone();
                match candidate.apply_patch(saved_obj) {
                    Ok(()) => current = candidate,
                    Err((_, e)) => tracing::warn!(error = %e, "ignoring stored grading settings"),
                }
            }
        }
        Ok(current)
    }

    pub fn save(&self, conn: &Connection) -> anyhow::Result<()> {
        db::settings_set_json(conn, GRADING_KEY, &self.to_json())
    }

    /// Applies a partial update; errors carry the IPC error code alongside the message.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) -> Result<(), (&'static str, String)> {
        for (k, v) in patch {
            match k.as_str() {
                "gradeScale" => {
                    let bands: Vec<GradeBand> = serde_json::from_value(v.clone()).map_err(|e| {
                        (
                            "bad_params",
                            format!("gradeScale must be a list of {{minInclusive, letter}}: {}", e),
                        )
                    })?;
                    let scale = GradeScale::new(bands).map_err(|e| (e.code(), e.to_string()))?;
                    self.grade_scale = scale;
                }
                _ => return Err(("bad_params", format!("unknown grading field: {}", k))),
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Value {
        json!({ "gradeScale": self.grade_scale.bands() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_replaces_and_sorts_scale() {
        let mut cfg = GradingConfig::default();
        let patch = json!({
            "gradeScale": [
                { "minInclusive": 50, "letter": "Pass" },
                { "minInclusive": 0, "letter": "Fail" },
                { "minInclusive": 75, "letter": "Merit" }
            ]
        });
        cfg.apply_patch(patch.as_object().expect("object"))
            .expect("apply");
        let letters: Vec<&str> = cfg
            .grade_scale
            .bands()
            .iter()
            .map(|b| b.letter.as_str())
            .collect();
        assert_eq!(letters, vec!["Merit", "Pass", "Fail"]);
        assert_eq!(cfg.to_json()["gradeScale"][0]["minInclusive"], json!(75.0));
    }

    #[test]
    fn rejects_unknown_fields_and_bad_scales() {
        let mut cfg = GradingConfig::default();
        let unknown = json!({ "rounding": 2 });
        assert!(cfg.apply_patch(unknown.as_object().expect("object")).is_err());
        let bad = json!({ "gradeScale": [] });
        assert!(cfg.apply_patch(bad.as_object().expect("object")).is_err());
        assert_eq!(cfg, GradingConfig::default());
    }
}
