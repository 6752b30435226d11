//! Documents and field values.
//!
//! A [`Document`] is an ordered list of (field name, value) pairs. Text
//! values are analyzed with the field's bundled analyzer unless the caller
//! supplies pre-analyzed tokens. Stored values come back from a segment as a
//! [`StoredDocument`].

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::analysis::Token;

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    U64(u64),
    I64(i64),
    F64(f64),
    Bytes(Vec<u8>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Text(_) => "text",
            FieldValue::U64(_) => "u64",
            FieldValue::I64(_) => "i64",
            FieldValue::F64(_) => "f64",
            FieldValue::Bytes(_) => "bytes",
        }
    }

    /// The term a numeric value is indexed under, or `None` for text and bytes.
    ///
    /// Numbers are written as fixed-width hex of an order-preserving bit
    /// pattern, so byte order of the terms equals numeric order.
    pub fn sortable_term(&self) -> Option<String> {
        let bits = match *self {
            FieldValue::U64(v) => v,
            FieldValue::I64(v) => (v as u64) ^ (1 << 63),
            FieldValue::F64(v) => {
                let bits = v.to_bits();
                if bits >> 63 == 1 { !bits } else { bits | (1 << 63) }
            }
            FieldValue::Text(_) | FieldValue::Bytes(_) => return None,
        };
        Some(format!("{bits:016x}"))
    }

    /// Total order used when sorting results by a stored value.
    ///
    /// Values of different kinds order by kind; floats use `total_cmp`.
    pub fn sort_cmp(&self, other: &FieldValue) -> Ordering {
        match (self, other) {
            (FieldValue::Text(a), FieldValue::Text(b)) => a.cmp(b),
            (FieldValue::U64(a), FieldValue::U64(b)) => a.cmp(b),
            (FieldValue::I64(a), FieldValue::I64(b)) => a.cmp(b),
            (FieldValue::F64(a), FieldValue::F64(b)) => a.total_cmp(b),
            (FieldValue::Bytes(a), FieldValue::Bytes(b)) => a.cmp(b),
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            FieldValue::Text(_) => 0,
            FieldValue::U64(_) => 1,
            FieldValue::I64(_) => 2,
            FieldValue::F64(_) => 3,
            FieldValue::Bytes(_) => 4,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::U64(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::I64(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::F64(value)
    }
}

/// One value in a document, optionally with caller-analyzed tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentField {
    pub name: String,
    pub value: FieldValue,
    /// Tokens produced by an external analysis pipeline. When present they
    /// are indexed verbatim instead of analyzing `value`.
    pub tokens: Option<Vec<Token>>,
}

/// A document to be indexed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: Vec<DocumentField>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value; repeated names make the field multi-valued.
    pub fn add<S: Into<String>, V: Into<FieldValue>>(mut self, name: S, value: V) -> Self {
        self.fields.push(DocumentField {
            name: name.into(),
            value: value.into(),
            tokens: None,
        });
        self
    }

    /// Add a text value together with tokens from an external analyzer.
    pub fn add_tokens<S: Into<String>>(mut self, name: S, text: S, tokens: Vec<Token>) -> Self {
        self.fields.push(DocumentField {
            name: name.into(),
            value: FieldValue::Text(text.into()),
            tokens: Some(tokens),
        });
        self
    }

    /// Add a bytes value.
    pub fn add_bytes<S: Into<String>>(self, name: S, value: Vec<u8>) -> Self {
        self.add(name, FieldValue::Bytes(value))
    }

    pub fn fields(&self) -> &[DocumentField] {
        &self.fields
    }

    /// First value of the named field.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// The stored values of one document as read back from a segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    fields: Vec<(String, FieldValue)>,
}

impl StoredDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, name: String, value: FieldValue) {
        self.fields.push((name, value));
    }

    /// First stored value of the named field.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// All stored values of the named field.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FieldValue> + 'a {
        self.fields
            .iter()
            .filter(move |(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Convenience accessor for a stored text value.
    pub fn get_text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_text)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_builder() {
        let doc = Document::new()
            .add("id", "a1")
            .add("body", "hello world")
            .add("year", 2024u64);

        assert_eq!(doc.len(), 3);
        assert_eq!(doc.get("id"), Some(&FieldValue::Text("a1".into())));
        assert_eq!(doc.get("year").and_then(FieldValue::as_u64), Some(2024));
        assert!(doc.get("missing").is_none());
    }

    #[test]
    fn test_sortable_terms_preserve_order() {
        let ints = [-1000i64, -1, 0, 1, 999];
        let terms: Vec<String> = ints
            .iter()
            .map(|&v| FieldValue::I64(v).sortable_term().unwrap())
            .collect();
        let mut sorted = terms.clone();
        sorted.sort();
        assert_eq!(terms, sorted);

        let floats = [-2.5f64, -0.0, 0.0, 1.5, 1e10];
        let terms: Vec<String> = floats
            .iter()
            .map(|&v| FieldValue::F64(v).sortable_term().unwrap())
            .collect();
        let mut sorted = terms.clone();
        sorted.sort();
        assert_eq!(terms, sorted);

        assert_eq!(
            FieldValue::U64(255).sortable_term().unwrap(),
            "00000000000000ff"
        );
        assert!(FieldValue::Text("x".into()).sortable_term().is_none());
    }

    #[test]
    fn test_stored_document_accessors() {
        let mut stored = StoredDocument::new();
        stored.push("tag".into(), "a".into());
        stored.push("tag".into(), "b".into());
        stored.push("n".into(), 3u64.into());

        assert_eq!(stored.get_text("tag"), Some("a"));
        assert_eq!(stored.get_all("tag").count(), 2);
        assert_eq!(stored.get("n"), Some(&FieldValue::U64(3)));

        let bytes = bincode::serialize(&stored).unwrap();
        let restored: StoredDocument = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored, stored);
    }

    #[test]
    fn test_sort_cmp() {
        assert_eq!(
            FieldValue::F64(1.0).sort_cmp(&FieldValue::F64(2.0)),
            Ordering::Less
        );
        assert_eq!(
            FieldValue::Text("b".into()).sort_cmp(&FieldValue::Text("a".into())),
            Ordering::Greater
        );
    }
}
