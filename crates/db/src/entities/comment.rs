//! Comment: threaded replies on a note.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A comment. Natural key is `(space_slug, note_number, number)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub space_slug: String,
    pub note_number: i64,
    pub number: i64,
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_number: Option<i64>,
}
