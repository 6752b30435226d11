//! Merge policies for segment management.
//!
//! A policy looks at the segments not already being merged and proposes
//! groups to combine. Sizes are measured in live documents.

use serde::{Deserialize, Serialize};

/// What a policy knows about one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeSegmentInfo {
    pub id: String,
    pub doc_count: u32,
    pub deleted_count: u32,
    /// Position in the manifest; lower is older.
    pub position: usize,
}

impl MergeSegmentInfo {
    pub fn live_docs(&self) -> u32 {
        self.doc_count - self.deleted_count
    }

    pub fn deletion_ratio(&self) -> f64 {
        if self.doc_count == 0 {
            0.0
        } else {
            self.deleted_count as f64 / self.doc_count as f64
        }
    }
}

/// Why a merge was proposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeReason {
    /// Too many similar-sized segments in one tier.
    Tier,
    /// A segment carries many deleted documents.
    Deletions,
    /// Small segments absorbed by the Fibonacci heuristic.
    Small,
    /// Everything into one segment.
    Optimize,
}

/// A proposed merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeCandidate {
    /// Segment ids, in manifest order.
    pub segments: Vec<String>,
    pub reason: MergeReason,
}

/// Trait for defining merge policies.
pub trait MergePolicy: Send + Sync + std::fmt::Debug {
    /// Select non-overlapping groups of segments to merge.
    fn select_merges(&self, segments: &[MergeSegmentInfo]) -> Vec<MergeCandidate>;

    /// Name of the policy, for logging.
    fn name(&self) -> &'static str;
}

fn candidate(mut group: Vec<&MergeSegmentInfo>, reason: MergeReason) -> MergeCandidate {
    group.sort_by_key(|s| s.position);
    MergeCandidate {
        segments: group.iter().map(|s| s.id.clone()).collect(),
        reason,
    }
}

/// Never merges.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMergePolicy;

impl MergePolicy for NoMergePolicy {
    fn select_merges(&self, _segments: &[MergeSegmentInfo]) -> Vec<MergeCandidate> {
        Vec::new()
    }

    fn name(&self) -> &'static str {
        "no_merge"
    }
}

/// Configuration of [`TieredMergePolicy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TieredMergeConfig {
    /// A tier holding this many segments triggers a merge.
    pub segments_per_tier: usize,
    /// Maximum number of segments combined at once.
    pub segments_per_merge: usize,
    /// Size factor between neighbouring tiers.
    pub size_ratio: f64,
    /// Segments smaller than this all count as tier 0.
    pub floor_docs: u32,
    /// Segments with a larger deletion ratio are rewritten on their own.
    pub deletion_threshold: f64,
}

impl Default for TieredMergeConfig {
    fn default() -> Self {
        TieredMergeConfig {
            segments_per_tier: 4,
            segments_per_merge: 4,
            size_ratio: 3.0,
            floor_docs: 100,
            deletion_threshold: 0.3,
        }
    }
}

/// Groups segments into logarithmic size tiers and merges within a tier,
/// so that several small segments are combined before any of them is merged
/// with a much larger one.
///
/// Among full tiers the lowest tier wins; within a tier the oldest segments
/// are merged first.
#[derive(Debug, Clone, Default)]
pub struct TieredMergePolicy {
    config: TieredMergeConfig,
}

impl TieredMergePolicy {
    pub fn new(config: TieredMergeConfig) -> Self {
        TieredMergePolicy { config }
    }

    /// Tier of a segment with `live_docs` documents.
    pub fn tier(&self, live_docs: u32) -> u32 {
        let floor = self.config.floor_docs.max(1) as f64;
        let ratio = self.config.size_ratio.max(1.0 + f64::EPSILON);
        let size = (live_docs as f64).max(floor);
        ((size / floor).ln() / ratio.ln()).floor() as u32
    }
}

impl MergePolicy for TieredMergePolicy {
    fn select_merges(&self, segments: &[MergeSegmentInfo]) -> Vec<MergeCandidate> {
        let mut candidates = Vec::new();
        let per_merge = self.config.segments_per_merge.max(2);
        let per_tier = self.config.segments_per_tier.max(2);

        let mut tiers: std::collections::BTreeMap<u32, Vec<&MergeSegmentInfo>> =
            std::collections::BTreeMap::new();
        for segment in segments {
            tiers
                .entry(self.tier(segment.live_docs()))
                .or_default()
                .push(segment);
        }

        let mut used: Vec<&str> = Vec::new();
        for members in tiers.values_mut() {
            members.sort_by_key(|s| s.position);
            while members.len() >= per_tier {
                let group: Vec<&MergeSegmentInfo> = members.drain(..per_merge.min(members.len())).collect();
                used.extend(group.iter().map(|s| s.id.as_str()));
                candidates.push(candidate(group, MergeReason::Tier));
            }
        }

        let mut heavy: Vec<&MergeSegmentInfo> = segments
            .iter()
            .filter(|s| s.deletion_ratio() > self.config.deletion_threshold)
            .filter(|s| !used.contains(&s.id.as_str()))
            .collect();
        heavy.sort_by_key(|s| s.position);
        for segment in heavy {
            candidates.push(candidate(vec![segment], MergeReason::Deletions));
        }

        candidates
    }

    fn name(&self) -> &'static str {
        "tiered"
    }
}

fn fib(n: u32) -> u64 {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    a
}

/// Sorts segments by size and absorbs them while the running document total
/// stays below `fib(i + 5)`. Segments without live documents are always
/// dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeSmallPolicy;

impl MergePolicy for MergeSmallPolicy {
    fn select_merges(&self, segments: &[MergeSegmentInfo]) -> Vec<MergeCandidate> {
        let mut sorted: Vec<&MergeSegmentInfo> = segments.iter().collect();
        sorted.sort_by_key(|s| (s.doc_count, s.position));

        let mut group = Vec::new();
        let mut total_docs = 0u64;
        for (i, segment) in sorted.into_iter().enumerate() {
            if segment.doc_count == 0 {
                continue;
            }
            total_docs += segment.doc_count as u64;
            if total_docs < fib(i as u32 + 5) {
                group.push(segment);
            }
        }

        let worth_merging = group.len() > 1 || group.iter().any(|s| s.deleted_count > 0);
        if worth_merging {
            vec![candidate(group, MergeReason::Small)]
        } else {
            Vec::new()
        }
    }

    fn name(&self) -> &'static str {
        "merge_small"
    }
}

/// Merges every segment into one whenever there is more than one (or the
/// single segment has deletions).
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimizePolicy;

impl MergePolicy for OptimizePolicy {
    fn select_merges(&self, segments: &[MergeSegmentInfo]) -> Vec<MergeCandidate> {
        let needs_merge = segments.len() > 1 || segments.iter().any(|s| s.deleted_count > 0);
        if needs_merge {
            vec![candidate(segments.iter().collect(), MergeReason::Optimize)]
        } else {
            Vec::new()
        }
    }

    fn name(&self) -> &'static str {
        "optimize"
    }
}

/// Serializable choice of merge policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MergePolicyConfig {
    NoMerge,
    Tiered(TieredMergeConfig),
    MergeSmall,
    Optimize,
}

impl Default for MergePolicyConfig {
    fn default() -> Self {
        MergePolicyConfig::Tiered(TieredMergeConfig::default())
    }
}

impl MergePolicyConfig {
    pub fn build(&self) -> Box<dyn MergePolicy> {
        match self {
            MergePolicyConfig::NoMerge => Box::new(NoMergePolicy),
            MergePolicyConfig::Tiered(config) => Box::new(TieredMergePolicy::new(config.clone())),
            MergePolicyConfig::MergeSmall => Box::new(MergeSmallPolicy),
            MergePolicyConfig::Optimize => Box::new(OptimizePolicy),
        }
    }
}
