//! User and Session: the identity boundary's own storage shape.
//!
//! The identity boundary itself (password verification, session issuance)
//! is an abstract external collaborator; these are the documents its
//! default local implementation persists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user account. `"admin"` is reserved and carries elevated capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// A session, looked up by its opaque bearer token. TTL-indexed at 30 days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "_id")]
    pub auth_token: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
}
