//! Counter: the single atomic increment-and-return primitive every other
//! sequential number in the system is built on.

use serde::{Deserialize, Serialize};

/// The scope a counter is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    Note,
    Comment,
    PendingAttachment,
    Attachment,
    MessengerTask,
}

/// A counter row. Unique on `(space_slug, kind, note_number)`; `note_number`
/// is `None` for space-scoped counters (note numbers themselves, and the
/// global pending-attachment counter) and `Some` for counters scoped to a
/// specific note (per-note comment and attachment numbering).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
    pub space_slug: String,
    pub kind: CounterKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_number: Option<i64>,
    pub seq: i64,
}

/// The `space_slug` used for the single global pending-attachment counter,
/// which is not scoped to any one space.
pub const GLOBAL_SCOPE: &str = "__global__";
