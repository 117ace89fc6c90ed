//! One-shot index setup, run at startup.
//!
//! This replaces a versioned migration runner: the document store has no
//! schema to migrate, only indexes to ensure exist. `ensure_indexes` is
//! idempotent and safe to call on every boot.

use bson::doc;
use mongodb::IndexModel;
use mongodb::options::IndexOptions;
use spacenote_common::{AppError, AppResult};

use crate::store::{DocumentStore, collections};

/// Create every unique/compound index required by §6 of the data model.
pub async fn ensure_indexes(store: &DocumentStore) -> AppResult<()> {
    let db = store.database();

    create(db, collections::USERS, doc! { "_id": 1 }, true).await?;
    create(db, collections::SPACES, doc! { "_id": 1 }, true).await?;

    // Session lookup/uniqueness is covered by the default `_id` index:
    // `Session::auth_token` is `#[serde(rename = "_id")]`, so there is no
    // separate `auth_token` field to index.
    create_ttl(db, collections::SESSIONS, "created_at", 30 * 24 * 60 * 60).await?;

    create(
        db,
        collections::NOTES,
        doc! { "space_slug": 1, "number": 1 },
        true,
    )
    .await?;

    create(
        db,
        collections::COMMENTS,
        doc! { "space_slug": 1, "note_number": 1, "number": 1 },
        true,
    )
    .await?;

    create(
        db,
        collections::ATTACHMENTS,
        doc! { "space_slug": 1, "note_number": 1, "number": 1 },
        true,
    )
    .await?;

    create(
        db,
        collections::COUNTERS,
        doc! { "space_slug": 1, "kind": 1, "note_number": 1 },
        true,
    )
    .await?;

    create(
        db,
        collections::TELEGRAM_TASKS,
        doc! { "space_slug": 1, "number": 1 },
        true,
    )
    .await?;
    create(
        db,
        collections::TELEGRAM_TASKS,
        doc! { "status": 1, "created_at": 1 },
        false,
    )
    .await?;

    create(
        db,
        collections::TELEGRAM_MIRRORS,
        doc! { "space_slug": 1, "note_number": 1 },
        true,
    )
    .await?;

    Ok(())
}

async fn create(
    db: &mongodb::Database,
    collection: &str,
    keys: bson::Document,
    unique: bool,
) -> AppResult<()> {
    let model = IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(unique).build())
        .build();
    db.collection::<bson::Document>(collection)
        .create_index(model)
        .await
        .map_err(|e| AppError::Internal(format!("failed to create index on {collection}: {e}")))?;
    Ok(())
}

async fn create_ttl(
    db: &mongodb::Database,
    collection: &str,
    field: &str,
    seconds: u32,
) -> AppResult<()> {
    let model = IndexModel::builder()
        .keys(doc! { field: 1 })
        .options(
            IndexOptions::builder()
                .expire_after(Some(std::time::Duration::from_secs(seconds.into())))
                .build(),
        )
        .build();
    db.collection::<bson::Document>(collection)
        .create_index(model)
        .await
        .map_err(|e| AppError::Internal(format!("failed to create ttl index on {collection}: {e}")))?;
    Ok(())
}
