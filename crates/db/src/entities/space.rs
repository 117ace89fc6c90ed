//! Space: the tenant document, its schema, its saved filters.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value::{FieldOptions, FieldType, TypedValue};

/// The reserved filter name every space must carry.
pub const ALL_FILTER_NAME: &str = "all";

/// The reserved admin username, never a space member.
pub const ADMIN_USERNAME: &str = "admin";

/// One typed column of a space's schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    #[serde(default)]
    pub options: FieldOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<TypedValue>,
}

/// One of the system field references usable in a condition/sort/column
/// list, plus the escape hatch into a space-defined field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FieldRef {
    Number,
    Author,
    CreatedAt,
    EditedAt,
    ActivityAt,
    Field { name: String },
}

impl FieldRef {
    /// Parse a dotted field path such as `note.fields.priority`.
    #[must_use]
    pub fn parse(path: &str) -> Option<Self> {
        match path {
            "note.number" => Some(Self::Number),
            "note.author" => Some(Self::Author),
            "note.created_at" => Some(Self::CreatedAt),
            "note.edited_at" => Some(Self::EditedAt),
            "note.activity_at" => Some(Self::ActivityAt),
            other => other
                .strip_prefix("note.fields.")
                .filter(|name| !name.is_empty())
                .map(|name| Self::Field {
                    name: name.to_string(),
                }),
        }
    }

    /// The stored document path this reference maps to.
    #[must_use]
    pub fn storage_path(&self) -> String {
        match self {
            Self::Number => "number".to_string(),
            Self::Author => "author".to_string(),
            Self::CreatedAt => "created_at".to_string(),
            Self::EditedAt => "edited_at".to_string(),
            Self::ActivityAt => "activity_at".to_string(),
            Self::Field { name } => format!("fields.{name}"),
        }
    }
}

/// Comparison/membership operator usable in a `Condition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    StartsWith,
    EndsWith,
    In,
    Nin,
    All,
}

impl Operator {
    /// Parse an operator token as it appears in the adhoc query grammar.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            "contains" => Some(Self::Contains),
            "startswith" => Some(Self::StartsWith),
            "endswith" => Some(Self::EndsWith),
            "in" => Some(Self::In),
            "nin" => Some(Self::Nin),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    /// Whether this operator expects an array-valued RHS (`|`-separated in
    /// the adhoc grammar).
    #[must_use]
    pub const fn is_array_operator(self) -> bool {
        matches!(self, Self::In | Self::Nin | Self::All)
    }

    /// The operators allowed for each field type (§4.2).
    #[must_use]
    pub fn allowed_for(field_type: FieldType) -> &'static [Self] {
        match field_type {
            FieldType::String => &[Self::Eq, Self::Ne, Self::Contains, Self::StartsWith, Self::EndsWith],
            FieldType::Boolean | FieldType::User => &[Self::Eq, Self::Ne],
            FieldType::Numeric | FieldType::Datetime => {
                &[Self::Eq, Self::Ne, Self::Gt, Self::Gte, Self::Lt, Self::Lte]
            }
            FieldType::Select => &[Self::Eq, Self::Ne, Self::In, Self::Nin],
            FieldType::Tags => &[Self::Eq, Self::Ne, Self::In, Self::Nin, Self::All],
            FieldType::Image => &[],
        }
    }
}

/// One condition of a filter or adhoc query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field_ref: FieldRef,
    pub op: Operator,
    pub value: TypedValue,
}

/// A sort key: ascending unless `descending` is set (a leading `-` in the
/// textual grammar).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortSpec {
    pub field_ref: FieldRef,
    pub descending: bool,
}

/// A named, saved conjunction of conditions plus sort and default columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterDef {
    pub name: String,
    #[serde(default)]
    pub default_columns: Vec<FieldRef>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub sort: Vec<SortSpec>,
}

impl FilterDef {
    /// Build the immutable `"all"` filter every space is created with.
    #[must_use]
    pub fn all_filter() -> Self {
        Self {
            name: ALL_FILTER_NAME.to_string(),
            default_columns: Vec::new(),
            conditions: Vec::new(),
            sort: Vec::new(),
        }
    }
}

/// Per-space Telegram settings: which channel (if any) receives activity
/// notifications, and which channel (if any) mirrors notes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessengerSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror_channel: Option<String>,
}

/// A tenant: a named container of notes with its own schema, members,
/// filters, templates, and messenger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Space {
    #[serde(rename = "_id")]
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub members: BTreeSet<String>,
    pub fields: Vec<FieldDef>,
    pub filters: Vec<FilterDef>,
    #[serde(default)]
    pub hidden_fields_on_create: Vec<String>,
    #[serde(default)]
    pub editable_fields_on_comment: Vec<String>,
    #[serde(default)]
    pub templates: std::collections::BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<MessengerSettings>,
    pub created_at: DateTime<Utc>,
}

impl Space {
    /// Look up a field definition by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether `username` may read/write within this space (member or admin).
    #[must_use]
    pub fn is_reader(&self, username: &str) -> bool {
        username == ADMIN_USERNAME || self.members.contains(username)
    }
}
