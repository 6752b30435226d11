//! Schema declarations.
//!
//! The schema tells the indexer, per field, whether it is indexed, stored,
//! records positions, and whether it is the unique key used by
//! `update_document`. These flags are the only inputs that change how a
//! field is indexed.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::analysis::AnalyzerKind;
use crate::error::{LexisError, Result};

/// The kind of value a field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// Analyzed text.
    Text,
    /// Text indexed verbatim as one term.
    Keyword,
    /// Unsigned integer, indexed as a sortable term.
    U64,
    /// Signed integer, indexed as a sortable term.
    I64,
    /// Float, indexed as a sortable term.
    F64,
    /// Opaque bytes; stored only.
    Bytes,
}

impl FieldType {
    /// Whether values of this type produce exactly one term.
    pub fn is_single_term(self) -> bool {
        !matches!(self, FieldType::Text)
    }
}

/// Declaration of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    name: String,
    field_type: FieldType,
    indexed: bool,
    stored: bool,
    positions: bool,
    unique: bool,
    analyzer: AnalyzerKind,
}

impl FieldDefinition {
    fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        FieldDefinition {
            name: name.into(),
            field_type,
            indexed: field_type != FieldType::Bytes,
            stored: false,
            positions: false,
            unique: false,
            analyzer: AnalyzerKind::Keyword,
        }
    }

    /// An analyzed text field that records positions.
    pub fn text(name: impl Into<String>) -> Self {
        FieldDefinition {
            positions: true,
            analyzer: AnalyzerKind::Simple,
            ..Self::new(name, FieldType::Text)
        }
    }

    /// A keyword field: the whole value is one term.
    pub fn keyword(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Keyword)
    }

    /// An unsigned integer field.
    pub fn u64(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::U64)
    }

    /// A signed integer field.
    pub fn i64(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::I64)
    }

    /// A float field.
    pub fn f64(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::F64)
    }

    /// A stored-only bytes field.
    pub fn bytes(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Bytes).stored()
    }

    /// Keep the original value in the stored-fields file.
    pub fn stored(mut self) -> Self {
        self.stored = true;
        self
    }

    /// Do not index the field; it can only be stored.
    pub fn not_indexed(mut self) -> Self {
        self.indexed = false;
        self.positions = false;
        self
    }

    /// Do not record term positions (phrase queries become unavailable).
    pub fn without_positions(mut self) -> Self {
        self.positions = false;
        self
    }

    /// Mark the field as the unique document key.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Use a different bundled analyzer for text values.
    pub fn with_analyzer(mut self, analyzer: AnalyzerKind) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    pub fn is_stored(&self) -> bool {
        self.stored
    }

    pub fn has_positions(&self) -> bool {
        self.positions
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn analyzer(&self) -> AnalyzerKind {
        self.analyzer
    }
}

/// The set of declared fields of an index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<FieldDefinition>,
    #[serde(skip)]
    by_name: AHashMap<String, usize>,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Schema {
    /// Start building a schema.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Look up a field definition.
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.by_name.get(name).map(|&idx| &self.fields[idx])
    }

    /// Look up a field, failing with `SchemaMismatch` if it is not declared.
    pub fn require_field(&self, name: &str) -> Result<&FieldDefinition> {
        self.field(name)
            .ok_or_else(|| LexisError::schema(format!("field '{name}' is not declared")))
    }

    /// All fields in declaration order.
    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    /// The unique key field, if any.
    pub fn unique_field(&self) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.unique)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Rebuild the name lookup after deserialization and validate the fields.
    pub(crate) fn reindex(mut self) -> Result<Self> {
        self.by_name.clear();
        for (idx, field) in self.fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(LexisError::schema("field name cannot be empty"));
            }
            if self.by_name.insert(field.name.clone(), idx).is_some() {
                return Err(LexisError::schema(format!(
                    "field '{}' declared twice",
                    field.name
                )));
            }
            if field.positions && field.field_type != FieldType::Text {
                return Err(LexisError::schema(format!(
                    "field '{}': positions are only recorded for text fields",
                    field.name
                )));
            }
            if field.indexed && field.field_type == FieldType::Bytes {
                return Err(LexisError::schema(format!(
                    "field '{}': bytes fields cannot be indexed",
                    field.name
                )));
            }
            if field.unique && !(field.indexed && field.field_type.is_single_term()) {
                return Err(LexisError::schema(format!(
                    "field '{}': a unique field must be an indexed keyword or numeric field",
                    field.name
                )));
            }
        }

        if self.fields.iter().filter(|f| f.unique).count() > 1 {
            return Err(LexisError::schema("at most one field may be unique"));
        }

        Ok(self)
    }
}

/// Builder for [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    fields: Vec<FieldDefinition>,
}

impl SchemaBuilder {
    /// Add a field.
    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    /// Validate and build the schema.
    pub fn build(self) -> Result<Schema> {
        Schema {
            fields: self.fields,
            by_name: AHashMap::new(),
        }
        .reindex()
    }
}
