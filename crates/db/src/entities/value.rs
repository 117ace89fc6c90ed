//! The closed sum of field types and the typed values they store.
//!
//! Field types are a closed set; each arm carries its own options. These
//! are represented as discriminated unions rather than string-typed maps,
//! so every component downstream of the field registry matches
//! exhaustively instead of string-comparing a `kind` tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the eight field types a `FieldDef` can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Boolean,
    Numeric,
    Select,
    Tags,
    User,
    Datetime,
    Image,
}

/// The kind of string field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringKind {
    Line,
    Text,
    Markdown,
    Json,
    Toml,
    Yaml,
}

/// The kind of numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericKind {
    Int,
    Float,
    Decimal,
}

/// Per-type options carried by a `FieldDef`. Exactly one variant is valid
/// for a given `FieldType`; `validate_def` enforces the pairing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_kind: Option<StringKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_kind: Option<NumericKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_maps: Option<std::collections::BTreeMap<String, std::collections::BTreeMap<String, String>>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_width: Option<u32>,
}

/// A value that has already been parsed and validated against its
/// `FieldDef`. Stored inside `Note.fields` and `Condition.value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypedValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Arbitrary-precision decimal, kept as its canonical string form
    /// rather than a lossy float to preserve the source value exactly.
    Decimal(String),
    Str(String),
    Tags(Vec<String>),
    DateTime(DateTime<Utc>),
}

impl TypedValue {
    /// Canonical string form, used by the round-trip property in §8: a raw
    /// map parsed, re-serialized to its canonical string, and re-parsed
    /// must yield the same typed map.
    #[must_use]
    pub fn canonical_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Decimal(d) => d.clone(),
            Self::Str(s) => s.clone(),
            Self::Tags(tags) => tags.join(","),
            Self::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}
