//! BM25F scoring.
//!
//! `score = boost * idf * tf * (k1 + 1) / (tf + k1 * (1 - b + b * len / avg_len))`
//! with `idf = ln(N / (df + 1)) + 1`, where `N` is the number of live
//! documents. `b` and the boost can be set per field.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Configuration for BM25F scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Term frequency saturation.
    pub k1: f32,
    /// Length normalization, used for fields without an entry in `field_b`.
    pub b: f32,
    /// Per-field length normalization.
    pub field_b: AHashMap<String, f32>,
    /// Per-field weight multiplied into every score from that field.
    pub field_boosts: AHashMap<String, f32>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            k1: 1.2,
            b: 0.75,
            field_b: AHashMap::new(),
            field_boosts: AHashMap::new(),
        }
    }
}

impl ScoringConfig {
    pub fn with_field_boost(mut self, field: impl Into<String>, boost: f32) -> Self {
        self.field_boosts.insert(field.into(), boost);
        self
    }

    pub fn with_field_b(mut self, field: impl Into<String>, b: f32) -> Self {
        self.field_b.insert(field.into(), b);
        self
    }

    pub fn b_for(&self, field: &str) -> f32 {
        self.field_b.get(field).copied().unwrap_or(self.b)
    }

    pub fn boost_for(&self, field: &str) -> f32 {
        self.field_boosts.get(field).copied().unwrap_or(1.0)
    }
}

/// Inverse document frequency of a term found in `doc_freq` of
/// `doc_count` documents. Always positive while `doc_count > 0`.
pub fn idf(doc_count: u64, doc_freq: u64) -> f32 {
    if doc_count == 0 {
        return 0.0;
    }
    // Deleted documents may still be counted in doc_freq.
    let df = doc_freq.min(doc_count) as f64;
    ((doc_count as f64 / (df + 1.0)).ln() + 1.0) as f32
}

/// The per-query part of a BM25F score for one field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Weight {
    /// boost * field boost * idf
    weight: f32,
    k1: f32,
    b: f32,
    avg_length: f32,
}

impl Bm25Weight {
    pub fn new(config: &ScoringConfig, field: &str, idf: f32, boost: f32, avg_length: f32) -> Self {
        Bm25Weight {
            weight: boost * config.boost_for(field) * idf,
            k1: config.k1,
            b: config.b_for(field),
            avg_length: if avg_length > 0.0 { avg_length } else { 1.0 },
        }
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    /// Score of a document where the term occurs `tf` times in a field of
    /// `length` tokens.
    pub fn score(&self, tf: u32, length: u32) -> f32 {
        if tf == 0 {
            return 0.0;
        }
        let tf = tf as f32;
        let norm = 1.0 - self.b + self.b * (length as f32 / self.avg_length);
        self.weight * tf * (self.k1 + 1.0) / (tf + self.k1 * norm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idf_is_positive_and_decreasing() {
        assert!(idf(10, 1) > idf(10, 5));
        assert!(idf(10, 10) > 0.0);
        assert!(idf(1, 3) > 0.0);
        assert_eq!(idf(0, 0), 0.0);
        assert!((idf(9, 2) - (3.0f32.ln() + 1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_score_saturates_and_normalizes() {
        let config = ScoringConfig::default();
        let weight = Bm25Weight::new(&config, "body", 2.0, 1.0, 10.0);

        assert_eq!(weight.score(0, 10), 0.0);
        assert!(weight.score(2, 10) > weight.score(1, 10));
        assert!(weight.score(100, 10) < 2.0 * (config.k1 + 1.0));
        assert!(weight.score(1, 5) > weight.score(1, 20));

        // tf = 1 at average length scores exactly the weight.
        assert!((weight.score(1, 10) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_field_settings() {
        let config = ScoringConfig::default()
            .with_field_boost("title", 3.0)
            .with_field_b("title", 0.0);

        let title = Bm25Weight::new(&config, "title", 1.0, 1.0, 4.0);
        assert_eq!(title.weight(), 3.0);
        assert_eq!(title.score(1, 1), title.score(1, 100));

        let body = Bm25Weight::new(&config, "body", 1.0, 2.0, 4.0);
        assert_eq!(body.weight(), 2.0);
    }

    #[test]
    fn test_config_serde_keeps_field_maps() {
        let config = ScoringConfig::default()
            .with_field_boost("title", 2.5)
            .with_field_b("body", 0.3);

        let json = serde_json::to_string(&config).unwrap();
        let restored: ScoringConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, config);
        assert_eq!(restored.boost_for("title"), 2.5);
        assert_eq!(restored.b_for("body"), 0.3);
        assert_eq!(restored.b_for("title"), 0.75);
    }
}
