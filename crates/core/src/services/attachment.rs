//! Attachment Pipeline (C7): pending uploads, direct space/note
//! attachments, and pending→bound promotion.

use bson::{Bson, doc};
use chrono::Utc;
use futures::TryStreamExt;
use spacenote_common::{AppError, AppResult, BlobStore};
use spacenote_db::DocumentStore;
use spacenote_db::entities::{Attachment, AttachmentMeta, CounterKind, PendingAttachment};

use super::counter::CounterService;
use super::image;

#[derive(Debug, Clone)]
pub struct AttachmentService {
    store: DocumentStore,
    blobs: BlobStore,
    counters: CounterService,
}

impl AttachmentService {
    #[must_use]
    pub const fn new(store: DocumentStore, blobs: BlobStore, counters: CounterService) -> Self {
        Self { store, blobs, counters }
    }

    /// Upload a file to pending storage, extracting metadata synchronously
    /// (metadata extraction of a single already-in-memory image is cheap
    /// enough not to need its own background task, unlike rendition
    /// generation).
    pub async fn create_pending(
        &self,
        author: &str,
        filename: &str,
        content: &[u8],
        mime_type: &str,
    ) -> AppResult<PendingAttachment> {
        let number = self.counters.next_pending_attachment().await?;
        let path = self.blobs.pending_path(number)?;
        self.blobs.write(&path, content).await?;

        let meta = image::extract_metadata(content, mime_type);
        let pending = PendingAttachment {
            number,
            author: author.to_string(),
            filename: filename.to_string(),
            size: content.len() as u64,
            mime_type: mime_type.to_string(),
            meta,
            created_at: Utc::now(),
        };
        self.store
            .pending_attachments()
            .insert_one(&pending)
            .await
            .map_err(|e| AppError::Internal(format!("failed to create pending attachment: {e}")))?;
        Ok(pending)
    }

    pub async fn get_pending(&self, number: i64) -> AppResult<PendingAttachment> {
        self.store
            .pending_attachments()
            .find_one(doc! { "number": number })
            .await
            .map_err(|e| AppError::Internal(format!("pending attachment lookup failed: {e}")))?
            .ok_or_else(|| AppError::NotFound(format!("pending attachment {number} not found")))
    }

    /// Create an attachment directly, bypassing the pending stage
    /// (space-level if `note_number` is `None`).
    pub async fn create_direct(
        &self,
        space_slug: &str,
        note_number: Option<i64>,
        author: &str,
        filename: &str,
        content: &[u8],
        mime_type: &str,
    ) -> AppResult<Attachment> {
        let number = self
            .counters
            .next(space_slug, CounterKind::Attachment, note_number)
            .await?;

        let path = match note_number {
            Some(note_number) => self.blobs.note_attachment_path(space_slug, note_number, number)?,
            None => self.blobs.space_attachment_path(space_slug, number)?,
        };
        self.blobs.write(&path, content).await?;
        let meta = image::extract_metadata(content, mime_type);

        let attachment = Attachment {
            space_slug: space_slug.to_string(),
            note_number,
            number,
            author: author.to_string(),
            filename: filename.to_string(),
            size: content.len() as u64,
            mime_type: mime_type.to_string(),
            meta,
            created_at: Utc::now(),
        };
        self.store
            .attachments()
            .insert_one(&attachment)
            .await
            .map_err(|e| AppError::Internal(format!("failed to create attachment: {e}")))?;
        Ok(attachment)
    }

    pub async fn get(&self, space_slug: &str, note_number: Option<i64>, number: i64) -> AppResult<Attachment> {
        self.store
            .attachments()
            .find_one(doc! { "space_slug": space_slug, "note_number": note_number, "number": number })
            .await
            .map_err(|e| AppError::Internal(format!("attachment lookup failed: {e}")))?
            .ok_or_else(|| {
                AppError::NotFound(format!("attachment not found: {space_slug}/{note_number:?}/{number}"))
            })
    }

    pub async fn list_for_note(&self, space_slug: &str, note_number: i64) -> AppResult<Vec<Attachment>> {
        self.list(doc! { "space_slug": space_slug, "note_number": note_number }).await
    }

    pub async fn list_for_space(&self, space_slug: &str) -> AppResult<Vec<Attachment>> {
        self.list(doc! { "space_slug": space_slug, "note_number": Bson::Null }).await
    }

    pub async fn list_all(&self, space_slug: &str) -> AppResult<Vec<Attachment>> {
        self.list(doc! { "space_slug": space_slug }).await
    }

    async fn list(&self, query: bson::Document) -> AppResult<Vec<Attachment>> {
        let mut cursor = self
            .store
            .attachments()
            .find(query)
            .await
            .map_err(|e| AppError::Internal(format!("attachment list failed: {e}")))?;
        let mut items = Vec::new();
        while let Some(attachment) = cursor
            .try_next()
            .await
            .map_err(|e| AppError::Internal(format!("failed to read attachment: {e}")))?
        {
            items.push(attachment);
        }
        Ok(items)
    }

    /// Promote a pending attachment to a note-bound attachment, allocating
    /// its attachment number and moving the blob. The pending record is
    /// deleted once the move succeeds.
    pub async fn finalize_pending(
        &self,
        pending_number: i64,
        space_slug: &str,
        note_number: i64,
    ) -> AppResult<Attachment> {
        let pending = self.get_pending(pending_number).await?;
        let attachment_number = self
            .counters
            .next(space_slug, CounterKind::Attachment, Some(note_number))
            .await?;

        let from = self.blobs.pending_path(pending_number)?;
        let to = self
            .blobs
            .note_attachment_path(space_slug, note_number, attachment_number)?;
        self.blobs.rename(&from, &to).await?;

        let attachment = Attachment {
            space_slug: space_slug.to_string(),
            note_number: Some(note_number),
            number: attachment_number,
            author: pending.author,
            filename: pending.filename,
            size: pending.size,
            mime_type: pending.mime_type,
            meta: pending.meta,
            created_at: Utc::now(),
        };
        self.store
            .attachments()
            .insert_one(&attachment)
            .await
            .map_err(|e| AppError::Internal(format!("failed to finalize attachment: {e}")))?;
        self.store
            .pending_attachments()
            .delete_one(doc! { "number": pending_number })
            .await
            .map_err(|e| AppError::Internal(format!("failed to delete pending attachment: {e}")))?;

        Ok(attachment)
    }

    pub async fn import_many(&self, attachments: &[Attachment]) -> AppResult<u64> {
        if attachments.is_empty() {
            return Ok(0);
        }
        self.store
            .attachments()
            .insert_many(attachments)
            .await
            .map_err(|e| AppError::Internal(format!("failed to import attachments: {e}")))?;
        Ok(attachments.len() as u64)
    }

    /// Delete every attachment record and blob belonging to a space
    /// (cascade on space deletion).
    pub async fn delete_by_space(&self, space_slug: &str) -> AppResult<u64> {
        let result = self
            .store
            .attachments()
            .delete_many(doc! { "space_slug": space_slug })
            .await
            .map_err(|e| AppError::Internal(format!("failed to delete attachments: {e}")))?;
        self.blobs.delete_space_tree(space_slug).await?;
        Ok(result.deleted_count)
    }

    #[must_use]
    pub const fn blobs(&self) -> &BlobStore {
        &self.blobs
    }
}

/// Metadata placeholder reused by import when original blob bytes aren't
/// shipped with the export (metadata-only import, §4.9).
#[must_use]
pub fn empty_meta() -> AttachmentMeta {
    AttachmentMeta::default()
}
