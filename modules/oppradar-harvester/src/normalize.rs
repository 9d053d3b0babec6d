//! Normalization stage: comparison text folding and engagement calibration.
//!
//! Folding feeds dedup and clustering only; the original casing stays on the
//! signal for display.

use std::sync::OnceLock;

use regex::Regex;

use oppradar_common::Signal;
use oppradar_sources::Calibrations;

fn punctuation() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s]").expect("static regex must compile"))
}

/// Trim, casefold, strip punctuation, and collapse whitespace.
pub fn fold_text(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let stripped = punctuation().replace_all(&lowered, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Apply normalization in place: folded comparison text plus the calibrated
/// engagement percentile.
pub fn normalize(signal: &mut Signal, calibrations: &Calibrations) {
    signal.content.folded = fold_text(&signal.content.combined());
    signal.engagement.percentile = calibrations.percentile(&signal.source_id, &signal.engagement);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use oppradar_common::{Engagement, SignalContent, SignalKind};

    #[test]
    fn fold_lowercases_and_collapses() {
        assert_eq!(
            fold_text("  CSV   Export\tTimes OUT!  "),
            "csv export times out"
        );
    }

    #[test]
    fn fold_strips_punctuation() {
        assert_eq!(fold_text("can't export; totally-broken..."), "can t export totally broken");
    }

    #[test]
    fn fold_empty_is_empty() {
        assert_eq!(fold_text("   "), "");
    }

    #[test]
    fn normalize_keeps_display_casing() {
        let mut signal = Signal::new(
            "forum",
            "t-1",
            Utc::now(),
            SignalContent::new("CSV Export Times Out", "It FAILS on big files"),
            Engagement::new(10, 3, 200),
            SignalKind::PainPoint,
        );
        normalize(&mut signal, &Calibrations::builtin());
        assert_eq!(signal.content.title, "CSV Export Times Out");
        assert!(signal.content.folded.starts_with("csv export times out"));
        assert!(signal.engagement.percentile > 0.0);
    }
}
