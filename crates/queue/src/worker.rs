//! Single-process messenger worker: polls for pending tasks, renders
//! them, sends them through a [`MessengerProvider`], and drives mirror
//! state (§4.7).

use std::path::PathBuf;
use std::time::Duration;

use spacenote_common::{AppError, AppResult, BlobStore};
use spacenote_core::services::{MessengerService, SpaceService, template};
use spacenote_db::entities::{MessageFormat, MessengerTask, MessengerTaskType, Space};
use tracing::{debug, error, info, warn};

use crate::provider::{MessengerProvider, ProviderError};
use crate::retry::{self, RetryDecision};

/// Sleep interval when the task queue is empty.
const EMPTY_POLL_INTERVAL: Duration = Duration::from_secs(3);
/// Sleep after every send attempt, to stay under provider rate limits.
const POST_SEND_INTERVAL: Duration = Duration::from_secs(1);

pub struct MessengerWorker<P: MessengerProvider> {
    messenger: MessengerService,
    spaces: SpaceService,
    blobs: BlobStore,
    provider: P,
}

impl<P: MessengerProvider> MessengerWorker<P> {
    #[must_use]
    pub const fn new(messenger: MessengerService, spaces: SpaceService, blobs: BlobStore, provider: P) -> Self {
        Self { messenger, spaces, blobs, provider }
    }

    /// Run forever. Intended to be spawned as its own task and never
    /// awaited to completion; only started when a messenger bot
    /// credential is configured.
    pub async fn run(&self) {
        info!("messenger_worker_started");
        loop {
            match self.messenger.fetch_pending_task().await {
                Ok(Some(task)) => {
                    if let Err(e) = self.process_task(&task).await {
                        error!(space_slug = %task.space_slug, number = task.number, error = %e, "messenger_worker_unhandled_error");
                        let _ = self.messenger.mark_failed(&task, &format!("worker error: {e}")).await;
                    }
                    tokio::time::sleep(POST_SEND_INTERVAL).await;
                }
                Ok(None) => tokio::time::sleep(EMPTY_POLL_INTERVAL).await,
                Err(e) => {
                    error!(error = %e, "messenger_worker_fetch_error");
                    tokio::time::sleep(EMPTY_POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn process_task(&self, task: &MessengerTask) -> AppResult<()> {
        self.messenger.mark_attempted(task).await?;
        let space = self.spaces.get(&task.space_slug).await?;

        let result = match task.task_type {
            MessengerTaskType::MirrorCreate => self.send_mirror_create(&space, task).await,
            MessengerTaskType::MirrorUpdate => self.send_mirror_update(&space, task).await,
            MessengerTaskType::ActivityNoteCreated
            | MessengerTaskType::ActivityNoteUpdated
            | MessengerTaskType::ActivityCommentCreated => self.send_activity(&space, task).await,
        };

        match result {
            Ok(()) => {
                self.messenger.mark_completed(task).await?;
                debug!(space_slug = %task.space_slug, number = task.number, "messenger_task_completed");
                Ok(())
            }
            Err(TaskOutcome::RateLimited { retry_after }) => {
                warn!(space_slug = %task.space_slug, number = task.number, retry_after, "messenger_rate_limit");
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                Ok(())
            }
            Err(TaskOutcome::Error(message)) => match retry::decide(task.retries, None) {
                RetryDecision::GiveUp => {
                    self.messenger.mark_failed(task, &message).await?;
                    error!(space_slug = %task.space_slug, number = task.number, error = %message, "messenger_task_failed");
                    Ok(())
                }
                RetryDecision::RetryLater | RetryDecision::SleepAndRetry { .. } => {
                    self.messenger.retry_later(task, &message).await?;
                    warn!(space_slug = %task.space_slug, number = task.number, retries = task.retries + 1, error = %message, "messenger_task_retry");
                    Ok(())
                }
            },
        }
    }

    async fn send_activity(&self, space: &Space, task: &MessengerTask) -> Result<(), TaskOutcome> {
        let template_key = task.task_type.template_key();
        let payload = bson_document_to_object(&task.payload);
        let Some(text) = template::render_telegram(space, template_key, &payload) else {
            return Err(TaskOutcome::Error(format!("no template found for {template_key}")));
        };
        self.provider
            .send_text(&task.channel_id, &text)
            .await
            .map(|_| ())
            .map_err(TaskOutcome::from)
    }

    async fn send_mirror_create(&self, space: &Space, task: &MessengerTask) -> Result<(), TaskOutcome> {
        let template_str = space
            .templates
            .get("telegram:mirror")
            .ok_or_else(|| TaskOutcome::Error("no telegram:mirror template configured".to_string()))?;
        let (photo_field, body) = template::parse_photo_directive(template_str);
        let payload = bson_document_to_object(&task.payload);
        let Some(caption) = template::render_telegram_str(&body, &payload) else {
            return Err(TaskOutcome::Error("failed to render mirror template".to_string()));
        };

        let (message_id, format) = if let Some(field) = &photo_field {
            let path = self
                .photo_rendition_path(&space.slug, task.note_number, &task.payload, field)
                .await
                .map_err(|e| TaskOutcome::Error(e.to_string()))?;
            let message_id = self
                .provider
                .send_photo(&task.channel_id, &path, &caption)
                .await
                .map_err(TaskOutcome::from)?;
            (message_id, MessageFormat::Photo)
        } else {
            let message_id = self
                .provider
                .send_text(&task.channel_id, &caption)
                .await
                .map_err(TaskOutcome::from)?;
            (message_id, MessageFormat::Text)
        };

        self.messenger
            .create_mirror(&space.slug, task.note_number, &task.channel_id, &message_id, format)
            .await
            .map_err(TaskOutcome::from)
    }

    async fn send_mirror_update(&self, space: &Space, task: &MessengerTask) -> Result<(), TaskOutcome> {
        let Some(mirror) = self.messenger.get_mirror(&space.slug, task.note_number).await.map_err(TaskOutcome::from)? else {
            return self.send_mirror_create(space, task).await;
        };

        let template_str = space
            .templates
            .get("telegram:mirror")
            .ok_or_else(|| TaskOutcome::Error("no telegram:mirror template configured".to_string()))?;
        let (photo_field, body) = template::parse_photo_directive(template_str);
        let payload = bson_document_to_object(&task.payload);
        let Some(caption) = template::render_telegram_str(&body, &payload) else {
            return Err(TaskOutcome::Error("failed to render mirror template".to_string()));
        };

        let edit_result = match mirror.message_format {
            MessageFormat::Text => self.provider.edit_text(&mirror.channel_id, &mirror.message_id, &caption).await,
            MessageFormat::Photo => match &photo_field {
                Some(field) => match self.photo_rendition_path(&space.slug, task.note_number, &task.payload, field).await {
                    Ok(path) => self.provider.edit_photo(&mirror.channel_id, &mirror.message_id, &path, &caption).await,
                    Err(e) => Err(ProviderError::Generic(e.to_string())),
                },
                None => Err(ProviderError::Generic(
                    "mirror is a photo but template has no photo directive".to_string(),
                )),
            },
        };

        match edit_result {
            Ok(()) => self.messenger.touch_mirror(&space.slug, task.note_number).await.map_err(TaskOutcome::from),
            Err(ProviderError::MessageGone) => {
                self.messenger
                    .delete_mirror(&space.slug, task.note_number)
                    .await
                    .map_err(TaskOutcome::from)?;
                self.send_mirror_create(space, task).await
            }
            Err(e) => Err(TaskOutcome::from(e)),
        }
    }

    /// Resolve the WebP rendition path for a mirror's photo field by
    /// reading the bound attachment number straight out of the task's
    /// payload (`note.fields.<field>`), failing rather than falling back
    /// to text when the rendition hasn't been generated yet.
    async fn photo_rendition_path(
        &self,
        space_slug: &str,
        note_number: i64,
        payload: &bson::Document,
        field_name: &str,
    ) -> AppResult<PathBuf> {
        let attachment_number = payload
            .get_document("note")
            .ok()
            .and_then(|note| note.get_document("fields").ok())
            .and_then(|fields| fields.get(field_name))
            .and_then(bson::Bson::as_i64)
            .ok_or_else(|| AppError::ImageProcessing(format!("field '{field_name}' has no bound attachment")))?;

        let path = self.blobs.rendition_path(space_slug, note_number, attachment_number)?;
        if !self.blobs.exists(&path).await {
            return Err(AppError::ImageProcessing(format!(
                "rendition not ready for field '{field_name}' (attachment {attachment_number})"
            )));
        }
        Ok(path)
    }
}

/// What a single send attempt resolved to, distinct from `ProviderError`
/// so non-provider failures (missing template, missing rendition) share
/// the same retry path.
enum TaskOutcome {
    RateLimited { retry_after: u64 },
    Error(String),
}

impl From<ProviderError> for TaskOutcome {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::RateLimited { retry_after } => Self::RateLimited { retry_after },
            ProviderError::MessageGone => Self::Error("message to edit not found".to_string()),
            ProviderError::Generic(msg) => Self::Error(msg),
        }
    }
}

impl From<AppError> for TaskOutcome {
    fn from(err: AppError) -> Self {
        Self::Error(err.to_string())
    }
}

fn bson_document_to_object(doc: &bson::Document) -> liquid::Object {
    let mut object = liquid::Object::new();
    for (key, value) in doc {
        object.insert(key.clone().into(), bson_to_liquid(value));
    }
    object
}

fn bson_to_liquid(value: &bson::Bson) -> liquid::model::Value {
    use liquid::model::Value as LiquidValue;
    match value {
        bson::Bson::Null => LiquidValue::Nil,
        bson::Bson::Boolean(b) => LiquidValue::scalar(*b),
        bson::Bson::Int32(i) => LiquidValue::scalar(i64::from(*i)),
        bson::Bson::Int64(i) => LiquidValue::scalar(*i),
        bson::Bson::Double(f) => LiquidValue::scalar(*f),
        bson::Bson::String(s) => LiquidValue::scalar(s.clone()),
        bson::Bson::DateTime(dt) => LiquidValue::scalar(dt.to_chrono().to_rfc3339()),
        bson::Bson::Array(items) => LiquidValue::Array(items.iter().map(bson_to_liquid).collect()),
        bson::Bson::Document(doc) => LiquidValue::Object(bson_document_to_object(doc)),
        other => LiquidValue::scalar(other.to_string()),
    }
}
