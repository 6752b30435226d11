//! Text analysis seam.
//!
//! Tokenization, stemming and stop-word removal belong to the caller's
//! analysis pipeline. Lexis only consumes its output: an ordered sequence of
//! [`Token`]s per field value. Two small analyzers are bundled so that plain
//! text and keyword fields work without an external pipeline.

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// A single analyzed token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// The indexed text of the token.
    pub text: String,
    /// Position of the token within its field.
    pub position: u32,
    /// Byte offset of the token start in the original text.
    pub start_offset: usize,
    /// Byte offset one past the token end in the original text.
    pub end_offset: usize,
}

impl Token {
    /// Create a token without offset information.
    pub fn new<S: Into<String>>(text: S, position: u32) -> Self {
        Token {
            text: text.into(),
            position,
            start_offset: 0,
            end_offset: 0,
        }
    }

    /// Create a token with byte offsets.
    pub fn with_offsets<S: Into<String>>(
        text: S,
        position: u32,
        start_offset: usize,
        end_offset: usize,
    ) -> Self {
        Token {
            text: text.into(),
            position,
            start_offset,
            end_offset,
        }
    }
}

/// Turns a field value into tokens.
pub trait Analyzer: Send + Sync + std::fmt::Debug {
    /// Analyze `text` into an ordered token sequence.
    fn analyze(&self, text: &str) -> Vec<Token>;

    /// Name of this analyzer, for diagnostics.
    fn name(&self) -> &'static str;
}

/// Splits on Unicode word boundaries and lowercases each word.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleAnalyzer;

impl Analyzer for SimpleAnalyzer {
    fn analyze(&self, text: &str) -> Vec<Token> {
        text.unicode_word_indices()
            .enumerate()
            .map(|(position, (offset, word))| {
                Token::with_offsets(
                    word.to_lowercase(),
                    position as u32,
                    offset,
                    offset + word.len(),
                )
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "simple"
    }
}

/// Emits the entire value as a single token.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordAnalyzer;

impl Analyzer for KeywordAnalyzer {
    fn analyze(&self, text: &str) -> Vec<Token> {
        if text.is_empty() {
            return Vec::new();
        }
        vec![Token::with_offsets(text, 0, 0, text.len())]
    }

    fn name(&self) -> &'static str {
        "keyword"
    }
}

/// The bundled analyzer a schema field uses for plain text values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AnalyzerKind {
    /// [`SimpleAnalyzer`].
    #[default]
    Simple,
    /// [`KeywordAnalyzer`].
    Keyword,
}

impl AnalyzerKind {
    /// The analyzer implementation for this kind.
    pub fn analyzer(self) -> &'static dyn Analyzer {
        match self {
            AnalyzerKind::Simple => &SimpleAnalyzer,
            AnalyzerKind::Keyword => &KeywordAnalyzer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_analyzer() {
        let tokens = SimpleAnalyzer.analyze("The Quick, brown fox!");

        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["the", "quick", "brown", "fox"]);
        assert_eq!(tokens[1].position, 1);
        assert_eq!(tokens[1].start_offset, 4);
        assert_eq!(tokens[1].end_offset, 9);
    }

    #[test]
    fn test_keyword_analyzer() {
        let tokens = KeywordAnalyzer.analyze("Doc-42");
        assert_eq!(tokens, vec![Token::with_offsets("Doc-42", 0, 0, 6)]);
        assert!(KeywordAnalyzer.analyze("").is_empty());
    }

    #[test]
    fn test_analyzer_kind() {
        assert_eq!(AnalyzerKind::default().analyzer().name(), "simple");
        assert_eq!(AnalyzerKind::Keyword.analyzer().name(), "keyword");
    }
}
