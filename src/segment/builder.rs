//! Building a segment from buffered documents.
//!
//! Documents are analyzed and validated against the schema when they are
//! added to the writer ([`AnalyzedDocument::analyze`]); a flush then feeds
//! them to a [`SegmentBuilder`], which inverts them in memory and writes the
//! segment files.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;

use crate::analysis::{Analyzer, KeywordAnalyzer, Token};
use crate::codec::check_block_size;
use crate::document::{Document, FieldValue, StoredDocument};
use crate::error::{LexisError, Result};
use crate::schema::{FieldType, Schema};
use crate::segment::lengths::FieldLengthsWriter;
use crate::segment::stored::StoredFieldsWriter;
use crate::segment::{SegmentFileWriter, SegmentMeta};
use crate::storage::Storage;

/// Occurrences of one term in one field of one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TermOccurrence {
    pub freq: u32,
    pub positions: Vec<u32>,
}

/// One indexed field of an analyzed document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyzedField {
    pub has_positions: bool,
    /// Number of term occurrences, the sum of the term frequencies. Used
    /// for length normalization.
    pub length: u32,
    pub terms: BTreeMap<String, TermOccurrence>,
    next_position: u32,
}

/// A document validated against the schema and reduced to terms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyzedDocument {
    pub fields: BTreeMap<String, AnalyzedField>,
    pub stored: StoredDocument,
    /// Term of the schema's unique field, if the document has one.
    pub unique_key: Option<String>,
}

impl AnalyzedDocument {
    /// Validate `doc` against `schema` and analyze its indexed fields.
    ///
    /// Fails with `SchemaMismatch` without side effects if any field is
    /// undeclared or holds the wrong kind of value.
    pub fn analyze(schema: &Schema, doc: &Document) -> Result<Self> {
        let mut analyzed = AnalyzedDocument::default();
        let unique_field = schema.unique_field().map(|f| f.name().to_string());

        for field_value in doc.fields() {
            let def = schema.require_field(&field_value.name)?;
            let value = &field_value.value;

            let expected = match def.field_type() {
                FieldType::Text | FieldType::Keyword => matches!(value, FieldValue::Text(_)),
                FieldType::U64 => matches!(value, FieldValue::U64(_)),
                FieldType::I64 => matches!(value, FieldValue::I64(_)),
                FieldType::F64 => matches!(value, FieldValue::F64(_)),
                FieldType::Bytes => matches!(value, FieldValue::Bytes(_)),
            };
            if !expected {
                return Err(LexisError::schema(format!(
                    "field '{}' is {:?} but got a {} value",
                    def.name(),
                    def.field_type(),
                    value.kind()
                )));
            }
            if field_value.tokens.is_some() && def.field_type() != FieldType::Text {
                return Err(LexisError::schema(format!(
                    "pre-analyzed tokens given for non-text field '{}'",
                    def.name()
                )));
            }

            if def.is_stored() {
                analyzed.stored.push(def.name().to_string(), value.clone());
            }
            if !def.is_indexed() {
                continue;
            }

            let tokens: Vec<Token> = match (def.field_type(), value) {
                (FieldType::Text, FieldValue::Text(text)) => match &field_value.tokens {
                    Some(tokens) => tokens.clone(),
                    None => def.analyzer().analyzer().analyze(text),
                },
                (FieldType::Keyword, FieldValue::Text(text)) => KeywordAnalyzer.analyze(text),
                _ => value
                    .sortable_term()
                    .map(|term| vec![Token::new(term, 0)])
                    .unwrap_or_default(),
            };

            if unique_field.as_deref() == Some(def.name()) {
                if analyzed.unique_key.is_some() {
                    return Err(LexisError::schema(format!(
                        "unique field '{}' given more than once",
                        def.name()
                    )));
                }
                analyzed.unique_key = tokens.first().map(|t| t.text.clone());
            }

            let field = analyzed
                .fields
                .entry(def.name().to_string())
                .or_insert_with(|| AnalyzedField {
                    has_positions: def.has_positions(),
                    ..AnalyzedField::default()
                });
            field.add_tokens(tokens);
        }

        Ok(analyzed)
    }

    /// Whether the document contains `field:text`.
    pub fn has_term(&self, field: &str, text: &str) -> bool {
        self.fields
            .get(field)
            .is_some_and(|f| f.terms.contains_key(text))
    }
}

impl AnalyzedField {
    fn add_tokens(&mut self, tokens: Vec<Token>) {
        let base = self.next_position;
        for token in tokens {
            if token.text.is_empty() {
                continue;
            }
            let position = base.saturating_add(token.position);
            self.next_position = self.next_position.max(position.saturating_add(1));

            let occurrence = self.terms.entry(token.text).or_default();
            occurrence.freq += 1;
            if self.has_positions {
                occurrence.positions.push(position);
            }
        }

        if self.has_positions {
            for occurrence in self.terms.values_mut() {
                occurrence.positions.sort_unstable();
                occurrence.positions.dedup();
                occurrence.freq = occurrence.positions.len() as u32;
            }
        }
        self.length = self.terms.values().map(|o| o.freq).sum();
    }
}

/// In-memory inverter for one new segment.
#[derive(Debug)]
pub struct SegmentBuilder {
    schema: Arc<Schema>,
    block_size: usize,
    doc_count: u32,
    /// field -> term -> (doc id, occurrence)
    inverted: BTreeMap<String, BTreeMap<String, Vec<(u32, TermOccurrence)>>>,
    stored: StoredFieldsWriter,
    lengths: FieldLengthsWriter,
}

impl SegmentBuilder {
    pub fn new(schema: Arc<Schema>, block_size: usize) -> Result<Self> {
        check_block_size(block_size)?;
        Ok(SegmentBuilder {
            schema,
            block_size,
            doc_count: 0,
            inverted: BTreeMap::new(),
            stored: StoredFieldsWriter::new(),
            lengths: FieldLengthsWriter::new(),
        })
    }

    /// Add a document; returns its segment-local id.
    pub fn add(&mut self, doc: &AnalyzedDocument) -> Result<u32> {
        let doc_id = self.doc_count;

        self.stored.add(&doc.stored)?;
        for (name, field) in &doc.fields {
            self.lengths.set(name, doc_id, field.length);
            let terms = self.inverted.entry(name.clone()).or_default();
            for (text, occurrence) in &field.terms {
                terms
                    .entry(text.clone())
                    .or_default()
                    .push((doc_id, occurrence.clone()));
            }
        }

        self.doc_count += 1;
        Ok(doc_id)
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    pub fn is_empty(&self) -> bool {
        self.doc_count == 0
    }

    /// Write the segment files under `id`.
    pub fn finish(self, storage: &dyn Storage, id: &str) -> Result<SegmentMeta> {
        let mut files = SegmentFileWriter::new(storage, id, self.block_size)?;

        for (field, terms) in &self.inverted {
            let has_positions = self
                .schema
                .field(field)
                .is_some_and(|def| def.has_positions());
            files.start_field(field, has_positions)?;

            for (text, postings) in terms {
                let mut writer = files.posting_writer()?;
                let mut total_freq = 0u64;
                for (doc_id, occurrence) in postings {
                    writer.add(*doc_id, occurrence.freq, &occurrence.positions)?;
                    total_freq += occurrence.freq as u64;
                }
                files.add_term(text, writer, total_freq)?;
            }
        }

        let meta = files.finish(self.stored, self.lengths, self.doc_count)?;
        debug!(
            "built segment {} with {} docs and {} fields",
            meta.id,
            meta.doc_count,
            self.inverted.len()
        );
        Ok(meta)
    }
}
