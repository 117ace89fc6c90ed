//! Durable messenger task queue and mirror state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of durable outbound work a `MessengerTask` represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessengerTaskType {
    ActivityNoteCreated,
    ActivityNoteUpdated,
    ActivityCommentCreated,
    MirrorCreate,
    MirrorUpdate,
}

impl MessengerTaskType {
    /// The template key this task kind renders, for the `activity_*`
    /// kinds. Mirror tasks always render `telegram:mirror`.
    #[must_use]
    pub const fn template_key(self) -> &'static str {
        match self {
            Self::ActivityNoteCreated => "telegram:activity_note_created",
            Self::ActivityNoteUpdated => "telegram:activity_note_updated",
            Self::ActivityCommentCreated => "telegram:activity_comment_created",
            Self::MirrorCreate | Self::MirrorUpdate => "telegram:mirror",
        }
    }
}

/// Terminal/non-terminal status of a `MessengerTask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessengerTaskStatus {
    Pending,
    Completed,
    Failed,
}

/// One durable unit of outbound work, processed FIFO by a single worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessengerTask {
    pub space_slug: String,
    pub number: i64,
    pub task_type: MessengerTaskType,
    pub channel_id: String,
    pub note_number: i64,
    /// Opaque payload (comment, field change map, …) interpreted by the
    /// template renderer, not by the queue itself.
    pub payload: bson::Document,
    pub status: MessengerTaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Whether a mirror message is a plain text message or a photo with
/// caption, set by the leading `{# photo: F #}` directive on the
/// `telegram:mirror` template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    Text,
    Photo,
}

/// Durable binding between a note and the external message that mirrors
/// it, used for idempotent edits. Unique on `(space_slug, note_number)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessengerMirror {
    pub space_slug: String,
    pub note_number: i64,
    pub channel_id: String,
    pub message_id: String,
    pub message_format: MessageFormat,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}
