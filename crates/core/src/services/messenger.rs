//! Messenger task queue & mirror state (C10, C11): the durable store
//! side of the outbound messenger integration. The provider call and
//! poll loop live in the queue crate, which drives this service.

use bson::doc;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::options::FindOptions;
use spacenote_common::{AppError, AppResult};
use spacenote_db::DocumentStore;
use spacenote_db::entities::{
    CounterKind, MessageFormat, MessengerMirror, MessengerTask, MessengerTaskStatus, MessengerTaskType,
};

use super::counter::CounterService;
use super::pagination::{Page, clamp_limit, clamp_offset};

#[derive(Debug, Clone)]
pub struct MessengerService {
    store: DocumentStore,
    counters: CounterService,
}

impl MessengerService {
    #[must_use]
    pub const fn new(store: DocumentStore, counters: CounterService) -> Self {
        Self { store, counters }
    }

    /// Allocate a task number and insert a pending task. Callers decide
    /// whether the space's telegram settings designate a channel for the
    /// given role before calling this.
    pub async fn enqueue(
        &self,
        space_slug: &str,
        task_type: MessengerTaskType,
        channel_id: &str,
        note_number: i64,
        payload: bson::Document,
    ) -> AppResult<MessengerTask> {
        let number = self
            .counters
            .next(space_slug, CounterKind::MessengerTask, None)
            .await?;
        let task = MessengerTask {
            space_slug: space_slug.to_string(),
            number,
            task_type,
            channel_id: channel_id.to_string(),
            note_number,
            payload,
            status: MessengerTaskStatus::Pending,
            created_at: Utc::now(),
            attempted_at: None,
            retries: 0,
            error: None,
        };
        self.store
            .messenger_tasks()
            .insert_one(&task)
            .await
            .map_err(|e| AppError::Internal(format!("failed to create messenger task: {e}")))?;
        Ok(task)
    }

    pub async fn get_task(&self, space_slug: &str, number: i64) -> AppResult<MessengerTask> {
        self.store
            .messenger_tasks()
            .find_one(doc! { "space_slug": space_slug, "number": number })
            .await
            .map_err(|e| AppError::Internal(format!("messenger task lookup failed: {e}")))?
            .ok_or_else(|| AppError::NotFound(format!("messenger task not found: {space_slug}#{number}")))
    }

    pub async fn list_tasks(
        &self,
        space_slug: Option<&str>,
        task_type: Option<MessengerTaskType>,
        status: Option<MessengerTaskStatus>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> AppResult<Page<MessengerTask>> {
        let mut query = bson::Document::new();
        if let Some(space_slug) = space_slug {
            query.insert("space_slug", space_slug);
        }
        if let Some(task_type) = task_type {
            query.insert(
                "task_type",
                bson::to_bson(&task_type)
                    .map_err(|e| AppError::Internal(format!("failed to encode task type: {e}")))?,
            );
        }
        if let Some(status) = status {
            query.insert(
                "status",
                bson::to_bson(&status).map_err(|e| AppError::Internal(format!("failed to encode status: {e}")))?,
            );
        }

        let limit = clamp_limit(limit);
        let offset = clamp_offset(offset);
        let total = self
            .store
            .messenger_tasks()
            .count_documents(query.clone())
            .await
            .map_err(|e| AppError::Internal(format!("messenger task count failed: {e}")))?;

        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .skip(offset as u64)
            .limit(limit)
            .build();
        let mut cursor = self
            .store
            .messenger_tasks()
            .find(query)
            .with_options(options)
            .await
            .map_err(|e| AppError::Internal(format!("messenger task list failed: {e}")))?;
        let mut items = Vec::new();
        while let Some(task) = cursor
            .try_next()
            .await
            .map_err(|e| AppError::Internal(format!("failed to read messenger task: {e}")))?
        {
            items.push(task);
        }
        Ok(Page { items, total, limit, offset })
    }

    /// The oldest pending task across all spaces, the single worker's
    /// unit of work per poll.
    pub async fn fetch_pending_task(&self) -> AppResult<Option<MessengerTask>> {
        let options = FindOptions::builder().sort(doc! { "created_at": 1 }).build();
        self.store
            .messenger_tasks()
            .find_one(doc! { "status": "pending" })
            .with_options(options)
            .await
            .map_err(|e| AppError::Internal(format!("failed to fetch pending messenger task: {e}")))
    }

    pub async fn mark_attempted(&self, task: &MessengerTask) -> AppResult<()> {
        self.update_task(task, doc! { "$set": { "attempted_at": Utc::now() } })
            .await
    }

    pub async fn mark_completed(&self, task: &MessengerTask) -> AppResult<()> {
        self.update_task(task, doc! { "$set": { "status": "completed" } }).await
    }

    pub async fn mark_failed(&self, task: &MessengerTask, error: &str) -> AppResult<()> {
        self.update_task(task, doc! { "$set": { "status": "failed", "error": error } })
            .await
    }

    /// Leave the task pending and increment its retry count (a non-rate-limit
    /// provider error that hasn't yet reached the retry ceiling).
    pub async fn retry_later(&self, task: &MessengerTask, error: &str) -> AppResult<()> {
        self.update_task(task, doc! { "$set": { "status": "pending", "error": error }, "$inc": { "retries": 1 } })
            .await
    }

    async fn update_task(&self, task: &MessengerTask, update: bson::Document) -> AppResult<()> {
        self.store
            .messenger_tasks()
            .update_one(doc! { "space_slug": &task.space_slug, "number": task.number }, update)
            .await
            .map_err(|e| AppError::Internal(format!("failed to update messenger task: {e}")))?;
        Ok(())
    }

    pub async fn get_mirror(&self, space_slug: &str, note_number: i64) -> AppResult<Option<MessengerMirror>> {
        self.store
            .messenger_mirrors()
            .find_one(doc! { "space_slug": space_slug, "note_number": note_number })
            .await
            .map_err(|e| AppError::Internal(format!("mirror lookup failed: {e}")))
    }

    /// Insert a fresh mirror row after a successful `mirror_create` send.
    pub async fn create_mirror(
        &self,
        space_slug: &str,
        note_number: i64,
        channel_id: &str,
        message_id: &str,
        message_format: MessageFormat,
    ) -> AppResult<()> {
        let mirror = MessengerMirror {
            space_slug: space_slug.to_string(),
            note_number,
            channel_id: channel_id.to_string(),
            message_id: message_id.to_string(),
            message_format,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.store
            .messenger_mirrors()
            .insert_one(&mirror)
            .await
            .map_err(|e| AppError::Internal(format!("failed to create mirror: {e}")))?;
        Ok(())
    }

    /// Bump `updated_at` on an existing mirror after a successful
    /// `mirror_update` edit, including the idempotent "content unchanged"
    /// case (§8 example 5).
    pub async fn touch_mirror(&self, space_slug: &str, note_number: i64) -> AppResult<()> {
        self.store
            .messenger_mirrors()
            .update_one(
                doc! { "space_slug": space_slug, "note_number": note_number },
                doc! { "$set": { "updated_at": Utc::now() } },
            )
            .await
            .map_err(|e| AppError::Internal(format!("failed to touch mirror: {e}")))?;
        Ok(())
    }

    /// Delete a stale mirror row (provider reports the message is gone),
    /// so the next pass falls through to `mirror_create`.
    pub async fn delete_mirror(&self, space_slug: &str, note_number: i64) -> AppResult<()> {
        self.store
            .messenger_mirrors()
            .delete_one(doc! { "space_slug": space_slug, "note_number": note_number })
            .await
            .map_err(|e| AppError::Internal(format!("failed to delete mirror: {e}")))?;
        Ok(())
    }

    pub async fn delete_by_space(&self, space_slug: &str) -> AppResult<()> {
        self.store
            .messenger_tasks()
            .delete_many(doc! { "space_slug": space_slug })
            .await
            .map_err(|e| AppError::Internal(format!("failed to delete messenger tasks: {e}")))?;
        self.store
            .messenger_mirrors()
            .delete_many(doc! { "space_slug": space_slug })
            .await
            .map_err(|e| AppError::Internal(format!("failed to delete mirrors: {e}")))?;
        Ok(())
    }
}
