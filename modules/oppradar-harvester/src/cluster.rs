//! Incremental signal clustering.
//!
//! A new signal joins the most similar open cluster when topic similarity
//! clears the join threshold, else it seeds a new cluster. Clustering is
//! independent of dedup: a healthy cluster holds many non-duplicate signals
//! about the same underlying problem. Single-writer: only the owning
//! component mutates cluster state; consumers receive digests by value.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use oppradar_common::{ClusterDigest, Signal, SignalCluster, SignalKind, TopicFingerprint};

/// Cap on a cluster fingerprint's shingle set as members are absorbed.
const FINGERPRINT_CAP: usize = 512;
/// Digest sample size.
const SAMPLE_TITLES: usize = 5;

#[derive(Debug, Clone)]
struct Member {
    signal_id: Uuid,
    title: String,
    kind: SignalKind,
    quality: f64,
    engagement_percentile: f64,
}

#[derive(Debug)]
struct OpenCluster {
    id: Uuid,
    fingerprint: TopicFingerprint,
    members: Vec<Member>,
    first_seen: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

impl OpenCluster {
    fn density(&self) -> f64 {
        let quality_sum: f64 = self.members.iter().map(|m| m.quality).sum();
        let engagement_sum: f64 = self.members.iter().map(|m| m.engagement_percentile).sum();
        density_score(self.members.len(), quality_sum, engagement_sum)
    }

    fn digest(&self) -> ClusterDigest {
        let mut by_kind: BTreeMap<SignalKind, u32> = BTreeMap::new();
        for member in &self.members {
            *by_kind.entry(member.kind).or_insert(0) += 1;
        }

        let mut ranked: Vec<&Member> = self.members.iter().collect();
        ranked.sort_by(|a, b| b.quality.total_cmp(&a.quality));

        let count = self.members.len().max(1) as f64;
        ClusterDigest {
            cluster_id: self.id,
            member_count: self.members.len(),
            density_score: self.density(),
            quality_mean: self.members.iter().map(|m| m.quality).sum::<f64>() / count,
            engagement_mean: self.members.iter().map(|m| m.engagement_percentile).sum::<f64>()
                / count,
            by_kind,
            sample_titles: ranked
                .iter()
                .take(SAMPLE_TITLES)
                .map(|m| m.title.clone())
                .collect(),
            top_terms: self.fingerprint.terms().to_vec(),
            first_seen: self.first_seen,
            last_updated: self.last_updated,
        }
    }

    fn snapshot(&self) -> SignalCluster {
        SignalCluster {
            cluster_id: self.id,
            member_signal_ids: self.members.iter().map(|m| m.signal_id).collect(),
            density_score: self.density(),
            topic_fingerprint: self.fingerprint.clone(),
            first_seen: self.first_seen,
            last_updated: self.last_updated,
        }
    }
}

/// Density in [0, 1), strictly increasing in member count, summed quality,
/// and summed engagement.
pub fn density_score(member_count: usize, quality_sum: f64, engagement_sum: f64) -> f64 {
    let x = 0.35 * member_count as f64 + 1.2 * quality_sum + engagement_sum / 250.0;
    1.0 - (-x / 4.0).exp()
}

/// Blocks re-synthesis of a stable cluster inside the cool-down window.
/// Matching is by cluster id first, then by topic fingerprint so a cluster
/// reassembled under a new id after a restart still cools down.
struct CooldownRegistry {
    window: Duration,
    match_threshold: f64,
    entries: Vec<(Uuid, TopicFingerprint, DateTime<Utc>)>,
}

impl CooldownRegistry {
    fn is_cooling(&self, cluster_id: Uuid, fingerprint: &TopicFingerprint, now: DateTime<Utc>) -> bool {
        self.entries.iter().any(|(id, fp, at)| {
            now - *at < self.window
                && (*id == cluster_id || fp.topic_similarity(fingerprint) >= self.match_threshold)
        })
    }

    fn record(&mut self, cluster_id: Uuid, fingerprint: TopicFingerprint, now: DateTime<Utc>) {
        self.entries.push((cluster_id, fingerprint, now));
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        self.entries.retain(|(_, _, at)| now - *at < self.window);
    }
}

pub struct Clusterer {
    join_threshold: f64,
    publish_threshold: f64,
    window: Duration,
    clusters: Vec<OpenCluster>,
    cooldown: CooldownRegistry,
}

impl Clusterer {
    pub fn new(
        join_threshold: f64,
        publish_threshold: f64,
        window_hours: i64,
        cooldown_hours: i64,
    ) -> Self {
        Self {
            join_threshold,
            publish_threshold,
            window: Duration::hours(window_hours),
            clusters: Vec::new(),
            cooldown: CooldownRegistry {
                window: Duration::hours(cooldown_hours),
                match_threshold: join_threshold,
                entries: Vec::new(),
            },
        }
    }

    pub fn open_cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// Read-only snapshots of current cluster state, by value.
    pub fn snapshots(&self) -> Vec<SignalCluster> {
        self.clusters.iter().map(OpenCluster::snapshot).collect()
    }

    /// Assign one signal to a cluster. Joins the most similar open cluster
    /// above the join threshold, else seeds a new one. Every signal lands in
    /// exactly one cluster.
    pub fn add(&mut self, signal: &Signal, fingerprint: &TopicFingerprint, now: DateTime<Utc>) {
        let quality = signal.quality.as_ref().map(|q| q.score).unwrap_or(0.0);
        let member = Member {
            signal_id: signal.id,
            title: signal.content.title.clone(),
            kind: signal.kind,
            quality,
            engagement_percentile: signal.engagement.percentile,
        };

        let mut best: Option<(usize, f64)> = None;
        for (idx, cluster) in self.clusters.iter().enumerate() {
            let sim = cluster.fingerprint.topic_similarity(fingerprint);
            if sim >= self.join_threshold && best.is_none_or(|(_, b)| sim > b) {
                best = Some((idx, sim));
            }
        }

        match best {
            Some((idx, sim)) => {
                let cluster = &mut self.clusters[idx];
                cluster.members.push(member);
                cluster.fingerprint.absorb(fingerprint, FINGERPRINT_CAP);
                cluster.last_updated = now;
                debug!(
                    cluster_id = %cluster.id,
                    similarity = sim,
                    members = cluster.members.len(),
                    "signal joined cluster"
                );
            }
            None => {
                self.clusters.push(OpenCluster {
                    id: Uuid::new_v4(),
                    fingerprint: fingerprint.clone(),
                    members: vec![member],
                    first_seen: now,
                    last_updated: now,
                });
            }
        }
    }

    /// Record that a cluster produced a candidate, starting its cool-down.
    /// Failed attempts never call this, so the cluster stays eligible and
    /// republishes on the next tick.
    pub fn record_candidate(&mut self, cluster_id: Uuid, now: DateTime<Utc>) {
        let fingerprint = self
            .clusters
            .iter()
            .find(|c| c.id == cluster_id)
            .map(|c| c.fingerprint.clone())
            .unwrap_or_default();
        self.cooldown.record(cluster_id, fingerprint, now);
    }

    /// Once-per-tick re-evaluation: evict clusters that slid out of the time
    /// window and return digests for clusters that are both dense enough to
    /// publish and outside their cool-down.
    pub fn re_evaluate(&mut self, now: DateTime<Utc>) -> Vec<ClusterDigest> {
        let window = self.window;
        let before = self.clusters.len();
        self.clusters.retain(|c| now - c.last_updated < window);
        let evicted = before - self.clusters.len();
        if evicted > 0 {
            info!(evicted, remaining = self.clusters.len(), "clusters slid out of window");
        }
        self.cooldown.prune(now);

        let mut published = Vec::new();
        for cluster in &self.clusters {
            let density = cluster.density();
            if density < self.publish_threshold {
                continue;
            }
            if self.cooldown.is_cooling(cluster.id, &cluster.fingerprint, now) {
                debug!(cluster_id = %cluster.id, "dense cluster still cooling down");
                continue;
            }
            published.push(cluster.digest());
        }

        published
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oppradar_common::{Engagement, QualityScore, SignalContent};

    fn signal_with(text: &str, quality: f64, percentile: f64) -> (Signal, TopicFingerprint) {
        let mut s = Signal::new(
            "forum",
            Uuid::new_v4().to_string(),
            Utc::now(),
            SignalContent::new(text, ""),
            Engagement::new(0, 0, 0),
            SignalKind::PainPoint,
        );
        s.content.folded = text.to_lowercase();
        s.engagement.percentile = percentile;
        s.quality = Some(QualityScore {
            score: quality,
            reasons: vec![],
            policy_version: 1,
        });
        let fp = TopicFingerprint::from_folded(&s.content.folded);
        (s, fp)
    }

    const TOPIC_A: &str = "csv export times out on large datasets over ten thousand rows";
    const TOPIC_B: &str = "mobile app drains battery overnight while idle in background";

    #[test]
    fn similar_signals_share_a_cluster() {
        let mut clusterer = Clusterer::new(0.7, 0.75, 72, 72);
        let now = Utc::now();
        let (s1, fp1) = signal_with(TOPIC_A, 0.7, 50.0);
        let (s2, fp2) = signal_with(TOPIC_A, 0.8, 60.0);
        clusterer.add(&s1, &fp1, now);
        clusterer.add(&s2, &fp2, now);
        assert_eq!(clusterer.open_cluster_count(), 1);
        assert_eq!(clusterer.snapshots()[0].member_signal_ids.len(), 2);
    }

    #[test]
    fn dissimilar_signals_seed_separate_clusters() {
        let mut clusterer = Clusterer::new(0.7, 0.75, 72, 72);
        let now = Utc::now();
        let (s1, fp1) = signal_with(TOPIC_A, 0.7, 50.0);
        let (s2, fp2) = signal_with(TOPIC_B, 0.7, 50.0);
        clusterer.add(&s1, &fp1, now);
        clusterer.add(&s2, &fp2, now);
        assert_eq!(clusterer.open_cluster_count(), 2);
    }

    #[test]
    fn density_is_monotone_in_each_term() {
        let base = density_score(4, 2.8, 200.0);
        assert!(density_score(5, 2.8, 200.0) > base, "more members");
        assert!(density_score(4, 3.5, 200.0) > base, "more quality");
        assert!(density_score(4, 2.8, 300.0) > base, "more engagement");
    }

    #[test]
    fn density_grows_as_members_arrive() {
        let mut clusterer = Clusterer::new(0.7, 0.99, 72, 72);
        let now = Utc::now();
        let mut last_density = 0.0;
        for _ in 0..5 {
            let (s, fp) = signal_with(TOPIC_A, 0.7, 50.0);
            clusterer.add(&s, &fp, now);
            let density = clusterer.snapshots()[0].density_score;
            assert!(density > last_density, "{density} should exceed {last_density}");
            last_density = density;
        }
    }

    #[test]
    fn dense_cluster_cools_down_after_producing_a_candidate() {
        let mut clusterer = Clusterer::new(0.7, 0.75, 72, 72);
        let now = Utc::now();
        for _ in 0..6 {
            let (s, fp) = signal_with(TOPIC_A, 0.8, 60.0);
            clusterer.add(&s, &fp, now);
        }

        let published = clusterer.re_evaluate(now);
        assert_eq!(published.len(), 1);
        assert!(published[0].density_score >= 0.75);
        clusterer.record_candidate(published[0].cluster_id, now);

        // Every re-evaluation inside the cool-down window: nothing.
        let again = clusterer.re_evaluate(now + Duration::hours(1));
        assert!(again.is_empty(), "cool-down must block re-publish");
        let again = clusterer.re_evaluate(now + Duration::hours(48));
        assert!(again.is_empty());
    }

    #[test]
    fn failed_attempt_leaves_cluster_eligible_next_tick() {
        let mut clusterer = Clusterer::new(0.7, 0.75, 72, 72);
        let now = Utc::now();
        for _ in 0..6 {
            let (s, fp) = signal_with(TOPIC_A, 0.8, 60.0);
            clusterer.add(&s, &fp, now);
        }

        // Published, but the synthesis attempt failed: no candidate recorded.
        assert_eq!(clusterer.re_evaluate(now).len(), 1);

        // Next tick the cluster republishes for a fresh attempt.
        let next_tick = now + Duration::minutes(5);
        assert_eq!(clusterer.re_evaluate(next_tick).len(), 1);
    }

    #[test]
    fn cooldown_matches_reassembled_cluster_by_fingerprint() {
        // Cool-down (168h) outlives the clustering window (72h), so a stable
        // topic that slides out and reassembles under a new cluster id must
        // still be recognized by its fingerprint.
        let mut clusterer = Clusterer::new(0.7, 0.75, 72, 168);
        let now = Utc::now();
        for _ in 0..6 {
            let (s, fp) = signal_with(TOPIC_A, 0.8, 60.0);
            clusterer.add(&s, &fp, now);
        }
        let published = clusterer.re_evaluate(now);
        assert_eq!(published.len(), 1);
        clusterer.record_candidate(published[0].cluster_id, now);

        // Hour 80: the cluster slid out of the window. Rebuild the same
        // topic: fresh cluster id, same vocabulary.
        let rebuilt_at = now + Duration::hours(80);
        assert_eq!(clusterer.re_evaluate(rebuilt_at).len(), 0);
        assert_eq!(clusterer.open_cluster_count(), 0);
        for _ in 0..6 {
            let (s, fp) = signal_with(TOPIC_A, 0.8, 60.0);
            clusterer.add(&s, &fp, rebuilt_at);
        }
        assert_eq!(
            clusterer.re_evaluate(rebuilt_at).len(),
            0,
            "fingerprint match must block the reassembled cluster"
        );

        // Hour 170: the cool-down has expired; the topic may publish again.
        let much_later = now + Duration::hours(170);
        for _ in 0..6 {
            let (s, fp) = signal_with(TOPIC_A, 0.8, 60.0);
            clusterer.add(&s, &fp, much_later);
        }
        assert_eq!(clusterer.re_evaluate(much_later).len(), 1);
    }

    #[test]
    fn sparse_clusters_are_retained_but_not_published() {
        let mut clusterer = Clusterer::new(0.7, 0.75, 72, 72);
        let now = Utc::now();
        let (s, fp) = signal_with(TOPIC_A, 0.3, 5.0);
        clusterer.add(&s, &fp, now);

        assert!(clusterer.re_evaluate(now).is_empty());
        assert_eq!(clusterer.open_cluster_count(), 1, "retained below threshold");
    }

    #[test]
    fn stale_clusters_slide_out_of_window() {
        let mut clusterer = Clusterer::new(0.7, 0.75, 72, 72);
        let now = Utc::now();
        let (s, fp) = signal_with(TOPIC_A, 0.7, 50.0);
        clusterer.add(&s, &fp, now);
        assert_eq!(clusterer.open_cluster_count(), 1);

        clusterer.re_evaluate(now + Duration::hours(80));
        assert_eq!(clusterer.open_cluster_count(), 0);
    }

    #[test]
    fn digest_aggregates_members() {
        let mut clusterer = Clusterer::new(0.7, 0.5, 72, 72);
        let now = Utc::now();
        for quality in [0.9, 0.6, 0.8] {
            let (s, fp) = signal_with(TOPIC_A, quality, 45.0);
            clusterer.add(&s, &fp, now);
        }
        let digests = clusterer.re_evaluate(now);
        assert_eq!(digests.len(), 1);
        let digest = &digests[0];
        assert_eq!(digest.member_count, 3);
        assert!((digest.quality_mean - 0.7666).abs() < 0.01);
        assert!((digest.engagement_mean - 45.0).abs() < 1e-9);
        assert_eq!(digest.by_kind.get(&SignalKind::PainPoint), Some(&3));
        assert!(!digest.top_terms.is_empty());
        // Highest-quality title leads the sample.
        assert_eq!(digest.sample_titles.len(), 3);
    }
}
