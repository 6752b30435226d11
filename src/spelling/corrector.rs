//! Spelling correction against the terms of one indexed field.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{LexisError, Result};
use crate::index::IndexReader;
use crate::spelling::levenshtein::bounded_distance;
use crate::spelling::ngram::NgramIndex;

/// Configuration for the spelling corrector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectorConfig {
    /// Length of the grams used to find candidates.
    pub gram_size: usize,
    /// Largest edit distance a suggestion may have.
    pub max_distance: usize,
    /// How many candidates, best n-gram overlap first, get an exact distance.
    pub candidate_pool: usize,
    /// Terms found in fewer documents are never suggested.
    pub min_frequency: u64,
}

impl Default for CorrectorConfig {
    fn default() -> Self {
        CorrectorConfig {
            gram_size: 3,
            max_distance: 2,
            candidate_pool: 200,
            min_frequency: 1,
        }
    }
}

/// A suggested correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub term: String,
    pub distance: usize,
    /// Number of documents containing the term.
    pub frequency: u64,
}

/// Spelling corrector over a fixed term list.
#[derive(Debug)]
pub struct Corrector {
    config: CorrectorConfig,
    terms: Vec<(String, u64)>,
    grams: NgramIndex,
}

impl Corrector {
    /// Build a corrector from `(term, frequency)` pairs.
    pub fn new<I>(terms: I, config: CorrectorConfig) -> Result<Self>
    where
        I: IntoIterator<Item = (String, u64)>,
    {
        let terms: Vec<(String, u64)> = terms
            .into_iter()
            .filter(|(_, freq)| *freq >= config.min_frequency)
            .collect();
        let grams = NgramIndex::build(terms.iter().map(|(t, _)| t.as_str()), config.gram_size)?;
        Ok(Corrector {
            config,
            terms,
            grams,
        })
    }

    /// Build a corrector from the lexicon of an indexed field.
    pub fn build(reader: &IndexReader, field: &str, config: CorrectorConfig) -> Result<Self> {
        match reader.schema().field(field) {
            Some(def) if def.is_indexed() => {}
            Some(_) => return Err(LexisError::query_type(format!("field '{field}' is not indexed"))),
            None => return Err(LexisError::query_type(format!("unknown field '{field}'"))),
        }
        let corrector = Self::new(
            reader.lexicon(field).map(|entry| (entry.text, entry.doc_freq)),
            config,
        )?;
        debug!(
            "built corrector for '{field}' with {} terms and {} grams",
            corrector.terms.len(),
            corrector.grams.len()
        );
        Ok(corrector)
    }

    pub fn config(&self) -> &CorrectorConfig {
        &self.config
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    /// Up to `limit` terms within the maximum distance of `word`, nearest
    /// first, then most frequent, then alphabetical. `word` itself is
    /// never suggested.
    pub fn correct(&self, word: &str, limit: usize) -> Result<Vec<Suggestion>> {
        if limit == 0 || word.is_empty() {
            return Ok(Vec::new());
        }
        let overlaps = self.grams.overlaps(word)?;

        let mut candidates: Vec<(u32, u32)> = overlaps.into_iter().collect();
        candidates.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        candidates.truncate(self.config.candidate_pool);

        let mut suggestions: Vec<Suggestion> = candidates
            .into_iter()
            .filter_map(|(ordinal, _)| {
                let (term, frequency) = &self.terms[ordinal as usize];
                if term == word {
                    return None;
                }
                bounded_distance(word, term, self.config.max_distance).map(|distance| Suggestion {
                    term: term.clone(),
                    distance,
                    frequency: *frequency,
                })
            })
            .collect();

        suggestions.sort_by(|a, b| {
            a.distance
                .cmp(&b.distance)
                .then(b.frequency.cmp(&a.frequency))
                .then_with(|| a.term.cmp(&b.term))
        });
        suggestions.truncate(limit);
        Ok(suggestions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corrector(terms: &[(&str, u64)]) -> Corrector {
        Corrector::new(
            terms.iter().map(|(t, f)| (t.to_string(), *f)),
            CorrectorConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_corrects_whoosj() {
        let corrector = corrector(&[("whoosh", 3), ("swoosh", 1), ("woosh", 1), ("apple", 9)]);

        let suggestions = corrector.correct("whoosj", 5).unwrap();
        assert_eq!(suggestions[0].term, "whoosh");
        assert_eq!(suggestions[0].distance, 1);
        assert!(suggestions.iter().all(|s| s.distance <= 2));
        assert!(suggestions.iter().all(|s| s.term != "apple"));
    }

    #[test]
    fn test_orders_by_distance_then_frequency() {
        let corrector = corrector(&[("cart", 1), ("card", 5), ("care", 5), ("cat", 2)]);

        let terms: Vec<String> = corrector.correct("carx", 10).unwrap().into_iter().map(|s| s.term).collect();
        assert_eq!(terms, vec!["card", "care", "cart", "cat"]);

        assert_eq!(corrector.correct("carx", 1).unwrap().len(), 1);
        assert!(corrector.correct("carx", 0).unwrap().is_empty());
    }

    #[test]
    fn test_skips_the_word_and_rare_terms() {
        let config = CorrectorConfig {
            min_frequency: 2,
            ..CorrectorConfig::default()
        };
        let corrector = Corrector::new(
            vec![("hello".to_string(), 5), ("hallo".to_string(), 1), ("hullo".to_string(), 2)],
            config,
        )
        .unwrap();

        let terms: Vec<String> = corrector.correct("hello", 5).unwrap().into_iter().map(|s| s.term).collect();
        assert_eq!(terms, vec!["hullo"]);
        assert_eq!(corrector.term_count(), 2);
    }
}
