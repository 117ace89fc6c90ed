//! Pending and bound attachments, and the metadata extracted from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Image-specific metadata captured at upload time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageMeta {
    pub width: u32,
    pub height: u32,
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exif_created_at: Option<DateTime<Utc>>,
}

/// Metadata captured for an uploaded blob. Empty for unsupported mime
/// types; `error` is set (without failing the upload) if a supported image
/// mime type fails to decode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttachmentMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exif: Option<std::collections::BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An uploaded blob not yet bound to a note. Short-lived: consumed by note
/// create/update (promotion) or deleted once superseded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAttachment {
    pub number: i64,
    pub author: String,
    pub filename: String,
    pub size: u64,
    pub mime_type: String,
    pub meta: AttachmentMeta,
    pub created_at: DateTime<Utc>,
}

/// An attachment bound to a space, and optionally to a specific note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub space_slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_number: Option<i64>,
    pub number: i64,
    pub author: String,
    pub filename: String,
    pub size: u64,
    pub mime_type: String,
    pub meta: AttachmentMeta,
    pub created_at: DateTime<Utc>,
}
