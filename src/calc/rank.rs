use serde::Serialize;

use super::normalize::{hundredths, round_2, stable_mean};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallAverage {
    pub student_id: String,
    pub class_id: String,
    pub term_id: String,
    pub average_percentage: f64,
    pub subject_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankEntry {
    pub student_id: String,
    pub rank: usize,
    pub average_percentage: f64,
}

/// Unweighted mean of a student's subject averages; `None` when nothing is assessed yet.
pub fn overall_average(
    student_id: &str,
    class_id: &str,
    term_id: &str,
    subject_percentages: &[f64],
) -> Option<OverallAverage> {
    let mean = stable_mean(subject_percentages)?;
    Some(OverallAverage {
        student_id: student_id.to_string(),
        class_id: class_id.to_string(),
        term_id: term_id.to_string(),
        average_percentage: round_2(mean),
        subject_count: subject_percentages.len(),
    })
}

pub fn rank(overall_averages: &[OverallAverage]) -> Vec<RankEntry> {
    rank_by_percentage(
        overall_averages
            .iter()
            .map(|o| (o.student_id.as_str(), o.average_percentage)),
    )
}

/// Standard competition ranking, best first.
///
/// Percentages are compared at two decimals. Equal values share the better rank and the next
/// distinct value takes its 1-based position, so `[95, 95, 90]` ranks `[1, 1, 3]`. Student id
/// ascending orders tied students but never changes their rank number.
pub fn rank_by_percentage<'a, I>(entries: I) -> Vec<RankEntry>
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    let mut sorted: Vec<(&str, f64, i64)> = entries
        .into_iter()
        .map(|(id, p)| (id, p, hundredths(p)))
        .collect();
    sorted.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(b.0)));

    let mut out: Vec<RankEntry> = Vec::with_capacity(sorted.len());
    let mut prev_key: Option<i64> = None;
    let mut current_rank = 0_usize;
    for (position, (id, pct, key)) in sorted.into_iter().enumerate() {
        if prev_key != Some(key) {
            current_rank = position + 1;
            prev_key = Some(key);
        }
        out.push(RankEntry {
            student_id: id.to_string(),
            rank: current_rank,
            average_percentage: pct,
        });
    }
    out
}
