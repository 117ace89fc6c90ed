//! Counters (C3): the single atomic increment-and-return primitive every
//! other sequential number in the system is built on.

use bson::doc;
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};
use spacenote_common::{AppError, AppResult};
use spacenote_db::DocumentStore;
use spacenote_db::entities::{CounterKind, GLOBAL_SCOPE};

/// Atomic per-(scope, kind) sequence generator.
#[derive(Debug, Clone)]
pub struct CounterService {
    store: DocumentStore,
}

impl CounterService {
    #[must_use]
    pub const fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    /// Allocate and return the next number for `(space_slug, kind, note_number)`.
    /// Atomic and totally ordered per key.
    pub async fn next(
        &self,
        space_slug: &str,
        kind: CounterKind,
        note_number: Option<i64>,
    ) -> AppResult<i64> {
        let kind_str = bson::to_bson(&kind)
            .map_err(|e| AppError::Internal(format!("failed to encode counter kind: {e}")))?;
        let filter = doc! {
            "space_slug": space_slug,
            "kind": kind_str,
            "note_number": note_number,
        };
        let update = doc! { "$inc": { "seq": 1_i64 } };
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        let counter = self
            .store
            .counters()
            .find_one_and_update(filter, update)
            .with_options(options)
            .await
            .map_err(|e| AppError::Internal(format!("counter increment failed: {e}")))?
            .ok_or_else(|| AppError::Internal("counter upsert returned no document".to_string()))?;

        Ok(counter.seq)
    }

    /// Allocate the next global pending-attachment number.
    pub async fn next_pending_attachment(&self) -> AppResult<i64> {
        self.next(GLOBAL_SCOPE, CounterKind::PendingAttachment, None)
            .await
    }

    /// Delete every counter row scoped to `space_slug` (cascade on space
    /// deletion). Global-scope counters (e.g. pending attachments) are
    /// untouched, since they never carry a `space_slug` of their own.
    pub async fn delete_by_space(&self, space_slug: &str) -> AppResult<u64> {
        let result = self
            .store
            .counters()
            .delete_many(doc! { "space_slug": space_slug })
            .await
            .map_err(|e| AppError::Internal(format!("failed to delete counters: {e}")))?;
        Ok(result.deleted_count)
    }

    /// Set a per-scope counter to at least `value`, used by import (§4.9)
    /// to make counters reflect the maximum observed number without
    /// regressing an existing counter.
    pub async fn ensure_at_least(
        &self,
        space_slug: &str,
        kind: CounterKind,
        note_number: Option<i64>,
        value: i64,
    ) -> AppResult<()> {
        let kind_str = bson::to_bson(&kind)
            .map_err(|e| AppError::Internal(format!("failed to encode counter kind: {e}")))?;
        let filter = doc! {
            "space_slug": space_slug,
            "kind": kind_str,
            "note_number": note_number,
        };
        let update = doc! { "$max": { "seq": value } };
        let options = FindOneAndUpdateOptions::builder().upsert(true).build();
        self.store
            .counters()
            .find_one_and_update(filter, update)
            .with_options(options)
            .await
            .map_err(|e| AppError::Internal(format!("counter ensure_at_least failed: {e}")))?;
        Ok(())
    }
}
