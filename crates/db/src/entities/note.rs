//! Note: the per-space document the rest of the system revolves around.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value::TypedValue;

/// A note. Natural key is `(space_slug, number)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub space_slug: String,
    pub number: i64,
    pub author: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commented_at: Option<DateTime<Utc>>,
    pub activity_at: DateTime<Utc>,
    pub fields: BTreeMap<String, TypedValue>,
}
