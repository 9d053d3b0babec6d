use std::collections::BTreeMap;

use oppradar_common::{GenerationMode, SignalKind};

/// Cumulative stats across a harvester run.
#[derive(Debug, Default)]
pub struct HarvestStats {
    pub ticks: u64,
    pub signals_fetched: u32,
    pub fetch_failures: u32,
    pub signals_persisted: u32,
    pub duplicates_linked: u32,
    pub low_quality: u32,
    pub dead_lettered: u32,
    pub clusters_open: usize,
    pub clusters_published: u32,
    pub candidates_primary: u32,
    pub candidates_fallback: u32,
    pub by_kind: BTreeMap<SignalKind, u32>,
}

impl HarvestStats {
    pub fn record_kind(&mut self, kind: SignalKind) {
        *self.by_kind.entry(kind).or_insert(0) += 1;
    }

    pub fn record_candidate(&mut self, mode: GenerationMode) {
        match mode {
            GenerationMode::Primary => self.candidates_primary += 1,
            GenerationMode::Fallback => self.candidates_fallback += 1,
        }
    }
}

impl std::fmt::Display for HarvestStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Harvest Run ===")?;
        writeln!(f, "Ticks:               {}", self.ticks)?;
        writeln!(f, "Signals fetched:     {}", self.signals_fetched)?;
        writeln!(f, "Fetch failures:      {}", self.fetch_failures)?;
        writeln!(f, "Signals persisted:   {}", self.signals_persisted)?;
        writeln!(f, "Duplicates linked:   {}", self.duplicates_linked)?;
        writeln!(f, "Low quality flagged: {}", self.low_quality)?;
        writeln!(f, "Dead-lettered:       {}", self.dead_lettered)?;
        writeln!(f, "Open clusters:       {}", self.clusters_open)?;
        writeln!(f, "Clusters published:  {}", self.clusters_published)?;
        writeln!(
            f,
            "Candidates:          {} primary, {} fallback",
            self.candidates_primary, self.candidates_fallback
        )?;
        writeln!(f, "\nBy kind:")?;
        for kind in SignalKind::ALL {
            writeln!(f, "  {}: {}", kind, self.by_kind.get(&kind).copied().unwrap_or(0))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_every_kind() {
        let mut stats = HarvestStats::default();
        stats.record_kind(SignalKind::PainPoint);
        stats.record_kind(SignalKind::PainPoint);
        stats.record_candidate(GenerationMode::Fallback);
        let rendered = stats.to_string();
        assert!(rendered.contains("pain_point: 2"));
        assert!(rendered.contains("trend: 0"));
        assert!(rendered.contains("0 primary, 1 fallback"));
    }
}
