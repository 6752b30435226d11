//! Query trees and their evaluation.
//!
//! A [`Query`] is the already-shaped tree a query parser hands to the
//! search layer: literal terms, no syntax. [`Query::matcher`] binds it to
//! one reader snapshot and produces the [`Matcher`] tree that walks the
//! matching documents.

pub mod collector;
pub mod matcher;
pub mod scorer;

use std::ops::Bound;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::document::FieldValue;
use crate::error::{LexisError, Result};
use crate::index::IndexReader;
use crate::schema::{FieldDefinition, Schema};
use crate::segment::SegmentReader;

use matcher::{EveryMatcher, Matcher, PhraseMatcher, RangeMatcher, TermMatcher};
use scorer::{Bm25Weight, ScoringConfig, idf};

/// Upper bound appended to a prefix to cover every term that starts with it.
const PREFIX_END: char = '\u{10FFFF}';

/// A query tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Query {
    /// Documents containing the exact term.
    Term {
        field: String,
        text: String,
        boost: f32,
    },
    /// Documents matched by every clause.
    And(Vec<Query>),
    /// Documents matched by any clause.
    Or(Vec<Query>),
    /// Documents matched by `positive` but not by `excluded`.
    Not {
        positive: Box<Query>,
        excluded: Box<Query>,
    },
    /// Documents matched by `required`; `optional` only contributes score.
    AndMaybe {
        required: Box<Query>,
        optional: Box<Query>,
    },
    /// Terms at consecutive positions, allowing `slop` extra moves.
    Phrase {
        field: String,
        terms: Vec<String>,
        slop: u32,
        boost: f32,
    },
    /// Documents containing any term of `field` between the bounds.
    Range {
        field: String,
        lower: Bound<String>,
        upper: Bound<String>,
        boost: f32,
    },
    /// Every live document.
    Every { boost: f32 },
}

impl Query {
    pub fn term(field: impl Into<String>, text: impl Into<String>) -> Self {
        Query::Term {
            field: field.into(),
            text: text.into(),
            boost: 1.0,
        }
    }

    /// Term query for a typed value; numbers use their indexed sortable form.
    pub fn value<V: Into<FieldValue>>(field: impl Into<String>, value: V) -> Self {
        Query::term(field, term_text(&value.into()))
    }

    pub fn and(clauses: Vec<Query>) -> Self {
        Query::And(clauses)
    }

    pub fn or(clauses: Vec<Query>) -> Self {
        Query::Or(clauses)
    }

    pub fn not(positive: Query, excluded: Query) -> Self {
        Query::Not {
            positive: Box::new(positive),
            excluded: Box::new(excluded),
        }
    }

    pub fn and_maybe(required: Query, optional: Query) -> Self {
        Query::AndMaybe {
            required: Box::new(required),
            optional: Box::new(optional),
        }
    }

    /// Exact phrase.
    pub fn phrase<S: Into<String>>(field: impl Into<String>, terms: Vec<S>) -> Self {
        Query::sloppy_phrase(field, terms, 0)
    }

    pub fn sloppy_phrase<S: Into<String>>(field: impl Into<String>, terms: Vec<S>, slop: u32) -> Self {
        Query::Phrase {
            field: field.into(),
            terms: terms.into_iter().map(Into::into).collect(),
            slop,
            boost: 1.0,
        }
    }

    pub fn range(field: impl Into<String>, lower: Bound<String>, upper: Bound<String>) -> Self {
        Query::Range {
            field: field.into(),
            lower,
            upper,
            boost: 1.0,
        }
    }

    /// Terms in `[low, high)`.
    pub fn term_range(field: impl Into<String>, low: impl Into<String>, high: impl Into<String>) -> Self {
        Query::range(field, Bound::Included(low.into()), Bound::Excluded(high.into()))
    }

    /// Range over numeric values, compared by value.
    pub fn numeric_range<V: Into<FieldValue>>(
        field: impl Into<String>,
        lower: Bound<V>,
        upper: Bound<V>,
    ) -> Self {
        let convert = |bound: Bound<V>| match bound {
            Bound::Included(v) => Bound::Included(term_text(&v.into())),
            Bound::Excluded(v) => Bound::Excluded(term_text(&v.into())),
            Bound::Unbounded => Bound::Unbounded,
        };
        Query::range(field, convert(lower), convert(upper))
    }

    /// Terms starting with `prefix`.
    pub fn prefix(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let mut end = prefix.clone();
        end.push(PREFIX_END);
        Query::range(field, Bound::Included(prefix), Bound::Excluded(end))
    }

    pub fn every() -> Self {
        Query::Every { boost: 1.0 }
    }

    /// Multiply the boost of every leaf by `factor`.
    pub fn with_boost(mut self, factor: f32) -> Self {
        self.scale_boost(factor);
        self
    }

    fn scale_boost(&mut self, factor: f32) {
        match self {
            Query::Term { boost, .. }
            | Query::Phrase { boost, .. }
            | Query::Range { boost, .. }
            | Query::Every { boost } => *boost *= factor,
            Query::And(clauses) | Query::Or(clauses) => {
                clauses.iter_mut().for_each(|c| c.scale_boost(factor))
            }
            Query::Not { positive, .. } => positive.scale_boost(factor),
            Query::AndMaybe { required, optional } => {
                required.scale_boost(factor);
                optional.scale_boost(factor);
            }
        }
    }

    /// Check the query against a schema.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        match self {
            Query::Term { field, .. } | Query::Range { field, .. } => {
                indexed_field(schema, field).map(|_| ())
            }
            Query::Phrase { field, terms, .. } => {
                let def = indexed_field(schema, field)?;
                if terms.is_empty() {
                    return Err(LexisError::query_type(format!("empty phrase on field '{field}'")));
                }
                if !def.has_positions() {
                    return Err(LexisError::query_type(format!(
                        "phrase query on field '{field}' which does not record positions"
                    )));
                }
                Ok(())
            }
            Query::And(clauses) | Query::Or(clauses) => {
                clauses.iter().try_for_each(|c| c.validate(schema))
            }
            Query::Not { positive, excluded } => {
                positive.validate(schema)?;
                excluded.validate(schema)
            }
            Query::AndMaybe { required, optional } => {
                required.validate(schema)?;
                optional.validate(schema)
            }
            Query::Every { .. } => Ok(()),
        }
    }

    /// Bind the query to a reader snapshot.
    pub fn matcher(&self, reader: &IndexReader, scoring: &ScoringConfig) -> Result<Matcher> {
        self.validate(reader.schema())?;
        self.build(reader, scoring)
    }

    fn build(&self, reader: &IndexReader, scoring: &ScoringConfig) -> Result<Matcher> {
        match self {
            Query::Term { field, text, boost } => term_matcher(reader, scoring, field, text, *boost),
            Query::And(clauses) => Matcher::and(build_all(clauses, reader, scoring)?),
            Query::Or(clauses) => Ok(Matcher::or(build_all(clauses, reader, scoring)?)),
            Query::Not { positive, excluded } => Matcher::not(
                positive.build(reader, scoring)?,
                excluded.build(reader, scoring)?,
            ),
            Query::AndMaybe { required, optional } => Matcher::and_maybe(
                required.build(reader, scoring)?,
                optional.build(reader, scoring)?,
            ),
            Query::Phrase {
                field,
                terms,
                slop,
                boost,
            } => phrase_matcher(reader, scoring, field, terms, *slop, *boost),
            Query::Range {
                field,
                lower,
                upper,
                boost,
            } => range_matcher(reader, scoring, field, lower, upper, *boost),
            Query::Every { boost } => {
                let children = segments_with_bases(reader)
                    .map(|(segment, base)| Matcher::Every(EveryMatcher::new(segment.clone(), base, *boost)))
                    .collect();
                Ok(Matcher::or(children))
            }
        }
    }
}

fn term_text(value: &FieldValue) -> String {
    value
        .sortable_term()
        .or_else(|| value.as_text().map(str::to_string))
        .unwrap_or_default()
}

fn indexed_field<'a>(schema: &'a Schema, field: &str) -> Result<&'a FieldDefinition> {
    match schema.field(field) {
        Some(def) if def.is_indexed() => Ok(def),
        Some(_) => Err(LexisError::query_type(format!("field '{field}' is not indexed"))),
        None => Err(LexisError::query_type(format!("unknown field '{field}'"))),
    }
}

fn build_all(clauses: &[Query], reader: &IndexReader, scoring: &ScoringConfig) -> Result<Vec<Matcher>> {
    clauses.iter().map(|c| c.build(reader, scoring)).collect()
}

fn segments_with_bases(
    reader: &IndexReader,
) -> impl Iterator<Item = (&SegmentReader, u64)> {
    reader
        .segments()
        .iter()
        .zip(reader.snapshot().doc_bases().iter().copied())
}

fn term_weight(reader: &IndexReader, scoring: &ScoringConfig, field: &str, text: &str, boost: f32) -> Bm25Weight {
    let idf = idf(reader.doc_count(), reader.doc_frequency(field, text));
    Bm25Weight::new(scoring, field, idf, boost, reader.avg_field_length(field))
}

fn term_matcher(
    reader: &IndexReader,
    scoring: &ScoringConfig,
    field: &str,
    text: &str,
    boost: f32,
) -> Result<Matcher> {
    let weight = term_weight(reader, scoring, field, text, boost);
    let field_name: Arc<str> = Arc::from(field);

    let mut children = Vec::new();
    for (segment, base) in segments_with_bases(reader) {
        if let Some(postings) = segment.postings(field, text)? {
            let matcher = TermMatcher::new(segment.clone(), Arc::clone(&field_name), base, postings, weight)?;
            children.push(Matcher::Term(matcher));
        }
    }
    Ok(Matcher::or(children))
}

fn phrase_matcher(
    reader: &IndexReader,
    scoring: &ScoringConfig,
    field: &str,
    terms: &[String],
    slop: u32,
    boost: f32,
) -> Result<Matcher> {
    let total_idf: f32 = terms
        .iter()
        .map(|text| idf(reader.doc_count(), reader.doc_frequency(field, text)))
        .sum();
    let weight = Bm25Weight::new(scoring, field, total_idf, boost, reader.avg_field_length(field));
    let field_name: Arc<str> = Arc::from(field);

    let mut children = Vec::new();
    'segments: for (segment, base) in segments_with_bases(reader) {
        let mut term_matchers = Vec::with_capacity(terms.len());
        for text in terms {
            let Some(postings) = segment.postings(field, text)? else {
                continue 'segments;
            };
            if !postings.has_positions() {
                return Err(LexisError::query_type(format!(
                    "segment {} has no positions for field '{field}'",
                    segment.id()
                )));
            }
            term_matchers.push(TermMatcher::new(
                segment.clone(),
                Arc::clone(&field_name),
                base,
                postings,
                weight,
            )?);
        }
        let phrase = PhraseMatcher::new(term_matchers, slop, segment.clone(), Arc::clone(&field_name), weight)?;
        children.push(Matcher::Phrase(phrase));
    }
    Ok(Matcher::or(children))
}

fn range_matcher(
    reader: &IndexReader,
    scoring: &ScoringConfig,
    field: &str,
    lower: &Bound<String>,
    upper: &Bound<String>,
    boost: f32,
) -> Result<Matcher> {
    let lower = lower.as_ref().map(String::as_str);
    let upper = upper.as_ref().map(String::as_str);

    let field_name: Arc<str> = Arc::from(field);

    let mut children = Vec::new();
    for (segment, base) in segments_with_bases(reader) {
        let terms = segment
            .terms_in_range(field, lower, upper)
            .map(|info| (info, term_weight(reader, scoring, field, &info.text, boost)));
        let matcher = RangeMatcher::new(segment.clone(), Arc::clone(&field_name), base, terms)?;
        children.push(Matcher::Range(matcher));
    }
    Ok(Matcher::or(children))
}
