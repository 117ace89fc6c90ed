//! Comment Store (C6): threaded replies on a note.

use bson::doc;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::options::FindOptions;
use spacenote_common::{AppError, AppResult};
use spacenote_db::DocumentStore;
use spacenote_db::entities::Comment;

use super::pagination::{Page, clamp_limit, clamp_offset};

#[derive(Debug, Clone)]
pub struct CommentService {
    store: DocumentStore,
}

impl CommentService {
    #[must_use]
    pub const fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    pub async fn get(&self, space_slug: &str, note_number: i64, number: i64) -> AppResult<Comment> {
        self.store
            .comments()
            .find_one(doc! { "space_slug": space_slug, "note_number": note_number, "number": number })
            .await
            .map_err(|e| AppError::Internal(format!("comment lookup failed: {e}")))?
            .ok_or_else(|| {
                AppError::NotFound(format!("comment not found: {space_slug}#{note_number}/{number}"))
            })
    }

    pub async fn list(
        &self,
        space_slug: &str,
        note_number: i64,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> AppResult<Page<Comment>> {
        let query = doc! { "space_slug": space_slug, "note_number": note_number };
        let limit = clamp_limit(limit);
        let offset = clamp_offset(offset);

        let total = self
            .store
            .comments()
            .count_documents(query.clone())
            .await
            .map_err(|e| AppError::Internal(format!("comment count failed: {e}")))?;

        let options = FindOptions::builder()
            .sort(doc! { "number": 1 })
            .skip(offset as u64)
            .limit(limit)
            .build();
        let mut cursor = self
            .store
            .comments()
            .find(query)
            .with_options(options)
            .await
            .map_err(|e| AppError::Internal(format!("comment list failed: {e}")))?;

        let mut items = Vec::new();
        while let Some(comment) = cursor
            .try_next()
            .await
            .map_err(|e| AppError::Internal(format!("failed to read comment: {e}")))?
        {
            items.push(comment);
        }
        Ok(Page { items, total, limit, offset })
    }

    /// Every comment in a space, unpaginated and ordered by note then
    /// number (used by export).
    pub async fn list_all_for_space(&self, space_slug: &str) -> AppResult<Vec<Comment>> {
        let options = FindOptions::builder().sort(doc! { "note_number": 1, "number": 1 }).build();
        let mut cursor = self
            .store
            .comments()
            .find(doc! { "space_slug": space_slug })
            .with_options(options)
            .await
            .map_err(|e| AppError::Internal(format!("comment list failed: {e}")))?;
        let mut items = Vec::new();
        while let Some(comment) = cursor
            .try_next()
            .await
            .map_err(|e| AppError::Internal(format!("failed to read comment: {e}")))?
        {
            items.push(comment);
        }
        Ok(items)
    }

    pub async fn list_all(&self, space_slug: &str, note_number: i64) -> AppResult<Vec<Comment>> {
        let options = FindOptions::builder().sort(doc! { "number": 1 }).build();
        let mut cursor = self
            .store
            .comments()
            .find(doc! { "space_slug": space_slug, "note_number": note_number })
            .with_options(options)
            .await
            .map_err(|e| AppError::Internal(format!("comment list failed: {e}")))?;
        let mut items = Vec::new();
        while let Some(comment) = cursor
            .try_next()
            .await
            .map_err(|e| AppError::Internal(format!("failed to read comment: {e}")))?
        {
            items.push(comment);
        }
        Ok(items)
    }

    /// Create a comment, validating `parent_number` (if given) resolves to
    /// an existing comment on the same note.
    pub async fn create(
        &self,
        space_slug: &str,
        note_number: i64,
        author: &str,
        content: &str,
        parent_number: Option<i64>,
        number: i64,
    ) -> AppResult<Comment> {
        if let Some(parent) = parent_number {
            self.get(space_slug, note_number, parent).await?;
        }

        let comment = Comment {
            space_slug: space_slug.to_string(),
            note_number,
            number,
            author: author.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
            edited_at: None,
            parent_number,
        };
        self.store
            .comments()
            .insert_one(&comment)
            .await
            .map_err(|e| AppError::Internal(format!("failed to create comment: {e}")))?;
        Ok(comment)
    }

    /// Update content. `editable_fields_on_comment` membership is not
    /// relevant here: comment content is always editable by its author;
    /// that list instead governs which *note* fields a comment may alter
    /// (driven by the facade, not this store).
    pub async fn update(
        &self,
        space_slug: &str,
        note_number: i64,
        number: i64,
        content: &str,
    ) -> AppResult<Comment> {
        self.get(space_slug, note_number, number).await?;
        self.store
            .comments()
            .update_one(
                doc! { "space_slug": space_slug, "note_number": note_number, "number": number },
                doc! { "$set": { "content": content, "edited_at": Utc::now() } },
            )
            .await
            .map_err(|e| AppError::Internal(format!("failed to update comment: {e}")))?;
        self.get(space_slug, note_number, number).await
    }

    /// Delete a comment. Any replies referencing it as `parent_number` are
    /// left in place and become orphaned top-level references rather than
    /// being cascaded, matching the reference implementation.
    pub async fn delete(&self, space_slug: &str, note_number: i64, number: i64) -> AppResult<()> {
        self.get(space_slug, note_number, number).await?;
        self.store
            .comments()
            .delete_one(doc! { "space_slug": space_slug, "note_number": note_number, "number": number })
            .await
            .map_err(|e| AppError::Internal(format!("failed to delete comment: {e}")))?;
        Ok(())
    }

    pub async fn delete_by_note(&self, space_slug: &str, note_number: i64) -> AppResult<u64> {
        let result = self
            .store
            .comments()
            .delete_many(doc! { "space_slug": space_slug, "note_number": note_number })
            .await
            .map_err(|e| AppError::Internal(format!("failed to delete comments: {e}")))?;
        Ok(result.deleted_count)
    }

    pub async fn delete_by_space(&self, space_slug: &str) -> AppResult<u64> {
        let result = self
            .store
            .comments()
            .delete_many(doc! { "space_slug": space_slug })
            .await
            .map_err(|e| AppError::Internal(format!("failed to delete comments: {e}")))?;
        Ok(result.deleted_count)
    }

    /// Whether `username` has authored any comment in any space (user
    /// deletion guard, §9 Open Questions).
    pub async fn has_authored_any(&self, username: &str) -> AppResult<bool> {
        let count = self
            .store
            .comments()
            .count_documents(doc! { "author": username })
            .await
            .map_err(|e| AppError::Internal(format!("comment authorship check failed: {e}")))?;
        Ok(count > 0)
    }

    pub async fn import_many(&self, comments: &[Comment]) -> AppResult<u64> {
        if comments.is_empty() {
            return Ok(0);
        }
        self.store
            .comments()
            .insert_many(comments)
            .await
            .map_err(|e| AppError::Internal(format!("failed to import comments: {e}")))?;
        Ok(comments.len() as u64)
    }
}
