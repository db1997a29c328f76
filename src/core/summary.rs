//! Cohort summaries across many recorded sessions.
//!
//! Each session contributes one [`TypingMetrics`] row per test type; this module
//! reduces those rows to 10th percentile, mean and 90th percentile per metric.

use crate::core::metrics::TypingMetrics;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// A named numeric column of [`TypingMetrics`].
type MetricColumn = (&'static str, fn(&TypingMetrics) -> Option<f64>);

/// Columns summarised for each test type.
pub const SUMMARY_COLUMNS: &[MetricColumn] = &[
    ("mean_khd_ms", |m: &TypingMetrics| m.mean_khd_ms),
    ("sd_khd_ms", |m: &TypingMetrics| m.sd_khd_ms),
    ("cv_khd", |m: &TypingMetrics| m.cv_khd),
    ("mean_iki_ms", |m: &TypingMetrics| m.mean_iki_ms),
    ("sd_iki_ms", |m: &TypingMetrics| m.sd_iki_ms),
    ("cv_iki", |m: &TypingMetrics| m.cv_iki),
    ("pause_count_200ms", |m: &TypingMetrics| Some(m.pause_count_200ms as f64)),
    ("pause_count_500ms", |m: &TypingMetrics| Some(m.pause_count_500ms as f64)),
    ("backspace_rate", |m: &TypingMetrics| Some(m.backspace_rate)),
    ("cpm", |m: &TypingMetrics| m.cpm),
    ("duration_sec", |m: &TypingMetrics| Some(m.duration_sec)),
    ("n_keydowns", |m: &TypingMetrics| Some(m.n_keydowns as f64)),
];

/// One session's metrics for one test type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRow {
    pub test_type: String,
    pub metrics: TypingMetrics,
}

/// Distribution of one metric within one test type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub test_type: String,
    pub metric: String,
    pub p10: f64,
    pub mean: f64,
    pub p90: f64,
    pub n: usize,
}

/// Summarise every column for every test type, in order of first appearance.
///
/// Missing values are skipped; a column with no values for a test type is omitted.
pub fn summarize(rows: &[MetricRow]) -> Vec<MetricSummary> {
    let mut test_types: Vec<&str> = Vec::new();
    for row in rows {
        if !test_types.contains(&row.test_type.as_str()) {
            test_types.push(&row.test_type);
        }
    }

    let mut summaries = Vec::new();
    for test_type in test_types {
        for (name, column) in SUMMARY_COLUMNS {
            let values: Vec<f64> = rows
                .iter()
                .filter(|r| r.test_type == test_type)
                .filter_map(|r| column(&r.metrics))
                .filter(|v| v.is_finite())
                .collect();
            if values.is_empty() {
                continue;
            }

            let n = values.len();
            let mean = values.iter().mean();
            let mut sorted = values;
            sorted.sort_by(f64::total_cmp);
            summaries.push(MetricSummary {
                test_type: test_type.to_string(),
                metric: name.to_string(),
                p10: linear_quantile(&sorted, 0.10),
                mean,
                p90: linear_quantile(&sorted, 0.90),
                n,
            });
        }
    }
    summaries
}

/// Quantile of ascending `sorted` by linear interpolation at rank `(n - 1) * tau`.
///
/// `sorted` must be non-empty.
fn linear_quantile(sorted: &[f64], tau: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * tau.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Pearson correlation over the pairs where both values are present.
///
/// Returns `None` with fewer than three complete pairs or a constant column.
pub fn pearson(xs: &[Option<f64>], ys: &[Option<f64>]) -> Option<f64> {
    let (x, y): (Vec<f64>, Vec<f64>) = xs
        .iter()
        .zip(ys)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .unzip();
    if x.len() < 3 {
        return None;
    }

    let sd_x = x.iter().std_dev();
    let sd_y = y.iter().std_dev();
    if sd_x == 0.0 || sd_y == 0.0 {
        return None;
    }
    let r = x.iter().covariance(y.iter()) / (sd_x * sd_y);
    r.is_finite().then_some(r)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(test_type: &str, cpm: Option<f64>, backspace_rate: f64) -> MetricRow {
        MetricRow {
            test_type: test_type.to_string(),
            metrics: TypingMetrics {
                cpm,
                backspace_rate,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_summarize_groups_by_test_type() {
        let rows = vec![
            row("free", Some(200.0), 0.1),
            row("timed", Some(150.0), 0.2),
            row("free", Some(220.0), 0.1),
            row("free", None, 0.1),
        ];

        let summaries = summarize(&rows);
        let free_cpm = summaries
            .iter()
            .find(|s| s.test_type == "free" && s.metric == "cpm")
            .unwrap();
        assert_eq!(free_cpm.n, 2);
        assert!((free_cpm.mean - 210.0).abs() < 1e-9);
        assert!(free_cpm.p10 <= free_cpm.mean && free_cpm.mean <= free_cpm.p90);

        let timed_rate = summaries
            .iter()
            .find(|s| s.test_type == "timed" && s.metric == "backspace_rate")
            .unwrap();
        assert_eq!(timed_rate.n, 1);
        assert!((timed_rate.p10 - 0.2).abs() < 1e-9);
        assert!((timed_rate.p90 - 0.2).abs() < 1e-9);

        assert!(!summaries
            .iter()
            .any(|s| s.metric == "mean_khd_ms"));
        assert_eq!(summaries[0].test_type, "free");
    }

    #[test]
    fn test_percentiles_interpolate_between_neighbours() {
        let rows = vec![row("free", Some(220.0), 0.0), row("free", Some(200.0), 0.0)];
        let cpm = summarize(&rows)
            .into_iter()
            .find(|s| s.metric == "cpm")
            .unwrap();
        assert!((cpm.p10 - 202.0).abs() < 1e-9);
        assert!((cpm.p90 - 218.0).abs() < 1e-9);

        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        assert!((linear_quantile(&sorted, 0.10) - 1.9).abs() < 1e-9);
        assert!((linear_quantile(&sorted, 0.90) - 9.1).abs() < 1e-9);
        assert_eq!(linear_quantile(&[4.0], 0.9), 4.0);
    }

    #[test]
    fn test_pearson() {
        let x = vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0), None];
        let y = vec![Some(2.0), Some(4.0), Some(6.0), Some(8.0), Some(1.0)];
        let r = pearson(&x, &y).unwrap();
        assert!((r - 1.0).abs() < 1e-9);

        let inverse = vec![Some(8.0), Some(6.0), Some(4.0), Some(2.0), None];
        assert!((pearson(&x, &inverse).unwrap() + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pearson_needs_three_pairs() {
        let x = vec![Some(1.0), Some(2.0), None];
        let y = vec![Some(1.0), Some(2.0), Some(3.0)];
        assert_eq!(pearson(&x, &y), None);

        let flat = vec![Some(1.0), Some(1.0), Some(1.0)];
        assert_eq!(pearson(&flat, &y), None);
    }
}
