//! Thin wrapper over the document store connection.
//!
//! `DocumentStore` owns the `mongodb::Database` handle and exposes typed
//! collection accessors plus the one non-generic primitive every other
//! component relies on for ordering: atomic find-one-and-update upsert,
//! used exclusively by the Counter service.

use mongodb::{Client, Collection, Database, options::ClientOptions};
use spacenote_common::{AppError, AppResult};

use crate::entities::{
    Attachment, Comment, Counter, MessengerMirror, MessengerTask, Note, PendingAttachment,
    Session, Space, User,
};

/// Collection names, centralized so a rename only happens in one place.
pub mod collections {
    pub const USERS: &str = "users";
    pub const SESSIONS: &str = "sessions";
    pub const SPACES: &str = "spaces";
    pub const NOTES: &str = "notes";
    pub const COMMENTS: &str = "comments";
    pub const COUNTERS: &str = "counters";
    pub const PENDING_ATTACHMENTS: &str = "pending_attachments";
    pub const ATTACHMENTS: &str = "attachments";
    pub const TELEGRAM_TASKS: &str = "telegram_tasks";
    pub const TELEGRAM_MIRRORS: &str = "telegram_mirrors";
}

/// Connection to the document store plus typed collection handles.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    database: Database,
}

impl DocumentStore {
    /// Connect to the document store at `database_url`.
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let mut options = ClientOptions::parse(database_url)
            .await
            .map_err(|e| AppError::Internal(format!("invalid database url: {e}")))?;
        options.app_name = Some("spacenote".to_string());
        let client = Client::with_options(options)
            .map_err(|e| AppError::Internal(format!("failed to create client: {e}")))?;
        let database = client.default_database().ok_or_else(|| {
            AppError::Internal("database url does not name a default database".to_string())
        })?;
        Ok(Self { database })
    }

    /// The raw database handle, for callers that need collections this
    /// wrapper doesn't enumerate (index setup, health checks).
    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.database
    }

    pub fn users(&self) -> Collection<User> {
        self.database.collection(collections::USERS)
    }

    pub fn sessions(&self) -> Collection<Session> {
        self.database.collection(collections::SESSIONS)
    }

    pub fn spaces(&self) -> Collection<Space> {
        self.database.collection(collections::SPACES)
    }

    pub fn notes(&self) -> Collection<Note> {
        self.database.collection(collections::NOTES)
    }

    pub fn comments(&self) -> Collection<Comment> {
        self.database.collection(collections::COMMENTS)
    }

    pub fn counters(&self) -> Collection<Counter> {
        self.database.collection(collections::COUNTERS)
    }

    pub fn pending_attachments(&self) -> Collection<PendingAttachment> {
        self.database.collection(collections::PENDING_ATTACHMENTS)
    }

    pub fn attachments(&self) -> Collection<Attachment> {
        self.database.collection(collections::ATTACHMENTS)
    }

    pub fn messenger_tasks(&self) -> Collection<MessengerTask> {
        self.database.collection(collections::TELEGRAM_TASKS)
    }

    pub fn messenger_mirrors(&self) -> Collection<MessengerMirror> {
        self.database.collection(collections::TELEGRAM_MIRRORS)
    }

    /// Ping the admin database to verify connectivity.
    pub async fn health_check(&self) -> AppResult<()> {
        self.database
            .run_command(bson::doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|e| AppError::Internal(format!("database health check failed: {e}")))
    }
}
