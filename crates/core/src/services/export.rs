//! Export/Import (C13): a self-describing snapshot of a space's
//! configuration and, optionally, its data.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spacenote_common::{AppError, AppResult};
use spacenote_db::DocumentStore;
use spacenote_db::entities::{
    ADMIN_USERNAME, Attachment, Comment, CounterKind, FieldDef, FilterDef, MessengerSettings, Note, Space, TypedValue,
};

use super::attachment::AttachmentService;
use super::comment::CommentService;
use super::counter::CounterService;
use super::identity::IdentityService;
use super::note::NoteService;
use super::space::SpaceService;

/// Current export schema version, bumped whenever [`ExportData`]'s shape
/// changes in a way old imports can't read.
pub const EXPORT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportData {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub space: SpaceExport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<Vec<NoteExport>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<Vec<CommentExport>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<AttachmentExport>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceExport {
    pub slug: String,
    pub title: String,
    pub description: String,
    pub members: BTreeSet<String>,
    pub fields: Vec<FieldDef>,
    pub filters: Vec<FilterDef>,
    pub hidden_fields_on_create: Vec<String>,
    pub editable_fields_on_comment: Vec<String>,
    pub templates: BTreeMap<String, String>,
    pub telegram: Option<MessengerSettings>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteExport {
    pub number: i64,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub fields: BTreeMap<String, TypedValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentExport {
    pub note_number: i64,
    pub number: i64,
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub parent_number: Option<i64>,
}

/// Attachment metadata only; blob bytes are never part of an export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentExport {
    pub note_number: Option<i64>,
    pub number: i64,
    pub author: String,
    pub filename: String,
    pub size: u64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExportService {
    #[allow(dead_code)]
    store: DocumentStore,
    spaces: SpaceService,
    notes: NoteService,
    comments: CommentService,
    attachments: AttachmentService,
    counters: CounterService,
    identity: IdentityService,
}

impl ExportService {
    #[must_use]
    pub const fn new(
        store: DocumentStore,
        spaces: SpaceService,
        notes: NoteService,
        comments: CommentService,
        attachments: AttachmentService,
        counters: CounterService,
        identity: IdentityService,
    ) -> Self {
        Self { store, spaces, notes, comments, attachments, counters, identity }
    }

    pub async fn export_space(&self, space_slug: &str, include_data: bool) -> AppResult<ExportData> {
        let space = self.spaces.get(space_slug).await?;
        let space_export = SpaceExport {
            slug: space.slug.clone(),
            title: space.title.clone(),
            description: space.description.clone(),
            members: space.members.clone(),
            fields: space.fields.clone(),
            filters: space.filters.clone(),
            hidden_fields_on_create: space.hidden_fields_on_create.clone(),
            editable_fields_on_comment: space.editable_fields_on_comment.clone(),
            templates: space.templates.clone(),
            telegram: space.telegram.clone(),
            created_at: space.created_at,
        };

        let (notes, comments, attachments) = if include_data {
            let notes = self
                .notes
                .list_all(&space)
                .await?
                .into_iter()
                .map(|n| NoteExport {
                    number: n.note.number,
                    author: n.note.author,
                    created_at: n.note.created_at,
                    edited_at: n.note.edited_at,
                    fields: n.note.fields,
                })
                .collect();
            let comments = self
                .comments
                .list_all_for_space(space_slug)
                .await?
                .into_iter()
                .map(|c| CommentExport {
                    note_number: c.note_number,
                    number: c.number,
                    author: c.author,
                    content: c.content,
                    created_at: c.created_at,
                    edited_at: c.edited_at,
                    parent_number: c.parent_number,
                })
                .collect();
            let attachments = self
                .attachments
                .list_all(space_slug)
                .await?
                .into_iter()
                .map(|a| AttachmentExport {
                    note_number: a.note_number,
                    number: a.number,
                    author: a.author,
                    filename: a.filename,
                    size: a.size,
                    mime_type: a.mime_type,
                    created_at: a.created_at,
                })
                .collect();
            (Some(notes), Some(comments), Some(attachments))
        } else {
            (None, None, None)
        };

        Ok(ExportData {
            version: EXPORT_VERSION,
            exported_at: Utc::now(),
            space: space_export,
            notes,
            comments,
            attachments,
        })
    }

    /// Import a space from export data. Rejects an existing slug, creates
    /// any referenced user that doesn't already exist with a random
    /// password, bulk-inserts notes/comments/attachment metadata, and
    /// sets every per-scope counter to at least the maximum observed
    /// number so subsequent creates never collide with imported data.
    pub async fn import_space(&self, data: ExportData) -> AppResult<Space> {
        if self.spaces.exists(&data.space.slug).await {
            return Err(AppError::ValidationFailure(format!(
                "space '{}' already exists",
                data.space.slug
            )));
        }

        for username in Self::collect_usernames(&data) {
            if username == ADMIN_USERNAME {
                continue;
            }
            if self.identity.get_user(&username).await?.is_none() {
                self.identity.create_user_with_random_password(&username).await?;
            }
        }

        let slug = data.space.slug.clone();
        let space = Space {
            slug: slug.clone(),
            title: data.space.title,
            description: data.space.description,
            members: data.space.members,
            fields: data.space.fields,
            filters: data.space.filters,
            hidden_fields_on_create: data.space.hidden_fields_on_create,
            editable_fields_on_comment: data.space.editable_fields_on_comment,
            templates: data.space.templates,
            telegram: data.space.telegram,
            created_at: data.space.created_at,
        };
        let space = self.spaces.import(space).await?;

        if let Some(notes) = &data.notes {
            if !notes.is_empty() {
                let built: Vec<Note> = notes
                    .iter()
                    .map(|n| Note {
                        space_slug: slug.clone(),
                        number: n.number,
                        author: n.author.clone(),
                        created_at: n.created_at,
                        edited_at: n.edited_at,
                        commented_at: None,
                        activity_at: n.edited_at.unwrap_or(n.created_at),
                        fields: n.fields.clone(),
                    })
                    .collect();
                self.notes.import_many(&built).await?;
                let max_number = notes.iter().map(|n| n.number).max().unwrap_or(0);
                self.counters.ensure_at_least(&slug, CounterKind::Note, None, max_number).await?;
            }
        }

        if let Some(comments) = &data.comments {
            if !comments.is_empty() {
                let built: Vec<Comment> = comments
                    .iter()
                    .map(|c| Comment {
                        space_slug: slug.clone(),
                        note_number: c.note_number,
                        number: c.number,
                        author: c.author.clone(),
                        content: c.content.clone(),
                        created_at: c.created_at,
                        edited_at: c.edited_at,
                        parent_number: c.parent_number,
                    })
                    .collect();
                self.comments.import_many(&built).await?;
                let mut max_per_note: BTreeMap<i64, i64> = BTreeMap::new();
                for c in comments {
                    let entry = max_per_note.entry(c.note_number).or_insert(0);
                    *entry = (*entry).max(c.number);
                }
                for (note_number, max_number) in max_per_note {
                    self.counters
                        .ensure_at_least(&slug, CounterKind::Comment, Some(note_number), max_number)
                        .await?;
                }
            }
        }

        if let Some(attachments) = &data.attachments {
            if !attachments.is_empty() {
                let built: Vec<Attachment> = attachments
                    .iter()
                    .map(|a| Attachment {
                        space_slug: slug.clone(),
                        note_number: a.note_number,
                        number: a.number,
                        author: a.author.clone(),
                        filename: a.filename.clone(),
                        size: a.size,
                        mime_type: a.mime_type.clone(),
                        meta: super::attachment::empty_meta(),
                        created_at: a.created_at,
                    })
                    .collect();
                self.attachments.import_many(&built).await?;
                let mut max_per_note: BTreeMap<Option<i64>, i64> = BTreeMap::new();
                for a in attachments {
                    let entry = max_per_note.entry(a.note_number).or_insert(0);
                    *entry = (*entry).max(a.number);
                }
                for (note_number, max_number) in max_per_note {
                    self.counters
                        .ensure_at_least(&slug, CounterKind::Attachment, note_number, max_number)
                        .await?;
                }
            }
        }

        Ok(space)
    }

    fn collect_usernames(data: &ExportData) -> BTreeSet<String> {
        let mut usernames: BTreeSet<String> = data.space.members.clone();
        if let Some(notes) = &data.notes {
            usernames.extend(notes.iter().map(|n| n.author.clone()));
        }
        if let Some(comments) = &data.comments {
            usernames.extend(comments.iter().map(|c| c.author.clone()));
        }
        if let Some(attachments) = &data.attachments {
            usernames.extend(attachments.iter().map(|a| a.author.clone()));
        }
        usernames
    }
}
