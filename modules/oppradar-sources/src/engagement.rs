//! Engagement calibration: source-specific curves that coerce raw counters
//! onto the common 0-100 percentile scale.
//!
//! Counter semantics differ wildly between sources (a forum "like" is not an
//! issue reaction is not a launch vote), so each source gets a piecewise
//! linear curve over a weighted composite of its raw counters.

use std::collections::HashMap;

use oppradar_common::Engagement;

/// Weights applied to raw counters before the curve lookup.
#[derive(Debug, Clone, Copy)]
pub struct CounterWeights {
    pub upvotes: f64,
    pub comments: f64,
    pub views: f64,
}

/// Monotone piecewise-linear curve mapping a raw composite to a percentile.
/// Breakpoints must be sorted by raw value; values beyond the last breakpoint
/// saturate at its percentile.
#[derive(Debug, Clone)]
pub struct CalibrationTable {
    weights: CounterWeights,
    breakpoints: Vec<(f64, f64)>,
}

impl CalibrationTable {
    pub fn new(weights: CounterWeights, breakpoints: Vec<(f64, f64)>) -> Self {
        debug_assert!(
            breakpoints.windows(2).all(|w| w[0].0 < w[1].0 && w[0].1 <= w[1].1),
            "breakpoints must be sorted and monotone"
        );
        Self {
            weights,
            breakpoints,
        }
    }

    pub fn composite(&self, engagement: &Engagement) -> f64 {
        f64::from(engagement.upvotes) * self.weights.upvotes
            + f64::from(engagement.comments) * self.weights.comments
            + f64::from(engagement.views) * self.weights.views
    }

    /// Percentile on the common 0-100 scale.
    pub fn percentile(&self, engagement: &Engagement) -> f64 {
        let raw = self.composite(engagement);
        let Some(first) = self.breakpoints.first() else {
            return 0.0;
        };
        if raw <= first.0 {
            return first.1 * (raw / first.0.max(f64::MIN_POSITIVE)).min(1.0);
        }
        for pair in self.breakpoints.windows(2) {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            if raw <= x1 {
                let t = (raw - x0) / (x1 - x0);
                return y0 + t * (y1 - y0);
            }
        }
        self.breakpoints.last().map(|(_, y)| *y).unwrap_or(0.0)
    }
}

/// The per-source calibration registry, with curves for every built-in
/// adapter. Unknown sources get a conservative default.
pub struct Calibrations {
    tables: HashMap<String, CalibrationTable>,
    default: CalibrationTable,
}

impl Calibrations {
    pub fn builtin() -> Self {
        let mut tables = HashMap::new();

        // Forum: likes dominate, views are weak corroboration.
        tables.insert(
            "forum".to_string(),
            CalibrationTable::new(
                CounterWeights { upvotes: 1.0, comments: 2.0, views: 0.01 },
                vec![(1.0, 5.0), (10.0, 35.0), (50.0, 70.0), (250.0, 95.0), (1000.0, 100.0)],
            ),
        );

        // Issue tracker: comments signal real demand; no view counts exist.
        tables.insert(
            "issue_tracker".to_string(),
            CalibrationTable::new(
                CounterWeights { upvotes: 1.5, comments: 2.5, views: 0.0 },
                vec![(1.0, 10.0), (5.0, 40.0), (25.0, 75.0), (100.0, 95.0), (400.0, 100.0)],
            ),
        );

        // Launch feed: votes only, heavy-tailed.
        tables.insert(
            "launch_feed".to_string(),
            CalibrationTable::new(
                CounterWeights { upvotes: 1.0, comments: 1.5, views: 0.0 },
                vec![(5.0, 5.0), (50.0, 30.0), (200.0, 60.0), (1000.0, 90.0), (5000.0, 100.0)],
            ),
        );

        // Directory: traction proxies only (follower-ish views).
        tables.insert(
            "directory".to_string(),
            CalibrationTable::new(
                CounterWeights { upvotes: 0.0, comments: 0.0, views: 1.0 },
                vec![(10.0, 5.0), (100.0, 30.0), (1000.0, 65.0), (10000.0, 90.0), (100000.0, 100.0)],
            ),
        );

        Self {
            tables,
            default: CalibrationTable::new(
                CounterWeights { upvotes: 1.0, comments: 1.0, views: 0.01 },
                vec![(1.0, 5.0), (20.0, 40.0), (100.0, 75.0), (500.0, 100.0)],
            ),
        }
    }

    pub fn percentile(&self, source_id: &str, engagement: &Engagement) -> f64 {
        self.tables
            .get(source_id)
            .unwrap_or(&self.default)
            .percentile(engagement)
            .clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engagement(upvotes: u32, comments: u32, views: u32) -> Engagement {
        Engagement::new(upvotes, comments, views)
    }

    #[test]
    fn zero_engagement_is_zero_percentile() {
        let cal = Calibrations::builtin();
        assert_eq!(cal.percentile("forum", &engagement(0, 0, 0)), 0.0);
    }

    #[test]
    fn percentile_is_monotone_in_counters() {
        let cal = Calibrations::builtin();
        let low = cal.percentile("forum", &engagement(2, 1, 50));
        let mid = cal.percentile("forum", &engagement(20, 5, 500));
        let high = cal.percentile("forum", &engagement(200, 40, 5000));
        assert!(low < mid && mid < high, "{low} < {mid} < {high}");
    }

    #[test]
    fn percentile_saturates_at_100() {
        let cal = Calibrations::builtin();
        let p = cal.percentile("launch_feed", &engagement(1_000_000, 0, 0));
        assert_eq!(p, 100.0);
    }

    #[test]
    fn unknown_source_uses_default_curve() {
        let cal = Calibrations::builtin();
        let p = cal.percentile("somewhere_new", &engagement(20, 0, 0));
        assert!(p > 0.0 && p <= 100.0);
    }

    #[test]
    fn same_raw_counters_differ_by_source() {
        let cal = Calibrations::builtin();
        let e = engagement(30, 10, 0);
        let forum = cal.percentile("forum", &e);
        let issues = cal.percentile("issue_tracker", &e);
        assert_ne!(forum, issues, "curves should be source-specific");
    }

    #[test]
    fn interpolation_lands_between_breakpoints() {
        let table = CalibrationTable::new(
            CounterWeights { upvotes: 1.0, comments: 0.0, views: 0.0 },
            vec![(10.0, 10.0), (20.0, 30.0)],
        );
        let p = table.percentile(&engagement(15, 0, 0));
        assert!((p - 20.0).abs() < 1e-9, "midpoint should interpolate: {p}");
    }
}
