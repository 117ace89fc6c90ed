//! Note Store (C5): create/read/update/list/delete for the per-space
//! document the rest of the system revolves around.

use std::collections::BTreeMap;

use bson::doc;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::options::FindOptions;
use spacenote_common::{AppError, AppResult};
use spacenote_db::DocumentStore;
use spacenote_db::entities::{CounterKind, FieldType, Note, PendingAttachment, Space, TypedValue};

use super::field::{self, ParseContext};
use super::filter;
use super::pagination::{Page, clamp_limit, clamp_offset};
use super::template;

/// A note plus its rendered title, the shape every read path returns.
#[derive(Debug, Clone)]
pub struct NoteWithTitle {
    pub note: Note,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct NoteService {
    store: DocumentStore,
}

impl NoteService {
    #[must_use]
    pub const fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    fn attach_title(&self, space: &Space, note: Note) -> NoteWithTitle {
        let title = template::render_note_title(space, &note);
        NoteWithTitle { note, title }
    }

    pub async fn get(&self, space: &Space, number: i64) -> AppResult<NoteWithTitle> {
        let note = self
            .store
            .notes()
            .find_one(doc! { "space_slug": &space.slug, "number": number })
            .await
            .map_err(|e| AppError::Internal(format!("note lookup failed: {e}")))?
            .ok_or_else(|| {
                AppError::NotFound(format!("note not found: {}#{number}", space.slug))
            })?;
        Ok(self.attach_title(space, note))
    }

    /// Paginated, filtered list. `filter_name` selects a saved filter;
    /// `adhoc_query` (if present) is ANDed in alongside it via the space
    /// scope, per the filter engine's compile step.
    pub async fn list(
        &self,
        space: &Space,
        current_user: &str,
        filter_name: &str,
        adhoc_query: Option<&str>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> AppResult<Page<NoteWithTitle>> {
        let saved = space
            .filters
            .iter()
            .find(|f| f.name == filter_name)
            .ok_or_else(|| AppError::NotFound(format!("filter '{filter_name}' not found")))?;

        let mut conditions = saved.conditions.clone();
        if let Some(query) = adhoc_query {
            conditions.extend(filter::parse_adhoc_query(query, space)?);
        }

        let mongo_query = filter::compile(&conditions, &space.slug, current_user)?;
        let mut sort_doc = bson::Document::new();
        for (path, direction) in filter::compile_sort(&saved.sort) {
            sort_doc.insert(path, direction);
        }

        let limit = clamp_limit(limit);
        let offset = clamp_offset(offset);

        let total = self
            .store
            .notes()
            .count_documents(mongo_query.clone())
            .await
            .map_err(|e| AppError::Internal(format!("note count failed: {e}")))?;

        let options = FindOptions::builder()
            .sort(sort_doc)
            .skip(offset as u64)
            .limit(limit)
            .build();
        let mut cursor = self
            .store
            .notes()
            .find(mongo_query)
            .with_options(options)
            .await
            .map_err(|e| AppError::Internal(format!("note list failed: {e}")))?;

        let mut items = Vec::new();
        while let Some(note) = cursor
            .try_next()
            .await
            .map_err(|e| AppError::Internal(format!("failed to read note: {e}")))?
        {
            items.push(self.attach_title(space, note));
        }

        Ok(Page { items, total, limit, offset })
    }

    /// All notes in a space, unpaginated, ordered by number (used by export).
    pub async fn list_all(&self, space: &Space) -> AppResult<Vec<NoteWithTitle>> {
        let options = FindOptions::builder().sort(doc! { "number": 1 }).build();
        let mut cursor = self
            .store
            .notes()
            .find(doc! { "space_slug": &space.slug })
            .with_options(options)
            .await
            .map_err(|e| AppError::Internal(format!("note list failed: {e}")))?;

        let mut items = Vec::new();
        while let Some(note) = cursor
            .try_next()
            .await
            .map_err(|e| AppError::Internal(format!("failed to read note: {e}")))?
        {
            items.push(self.attach_title(space, note));
        }
        Ok(items)
    }

    /// Parse `raw_fields` against `space`'s schema. `partial` (update) skips
    /// required-ness and default resolution for any field not present in
    /// `raw_fields` rather than erroring or substituting a default.
    pub fn parse_fields(
        &self,
        space: &Space,
        raw_fields: &BTreeMap<String, String>,
        current_user: &str,
        pending_attachments: &BTreeMap<i64, PendingAttachment>,
        partial: bool,
    ) -> AppResult<BTreeMap<String, TypedValue>> {
        let ctx = ParseContext {
            current_user: Some(current_user.to_string()),
            raw: raw_fields.clone(),
            pending_attachments: pending_attachments.clone(),
        };

        let mut parsed = BTreeMap::new();
        for def in &space.fields {
            let raw = raw_fields.get(&def.name).map(String::as_str);
            if partial && raw.is_none() {
                continue;
            }
            let value = field::parse(def, space, raw, &ctx)?;
            parsed.insert(def.name.clone(), value);
        }
        Ok(parsed)
    }

    /// Which image-field numbers in `parsed_fields` still need rendition
    /// processing after field parsing (§4.7/§4.8 wiring with the
    /// attachment/image services, left to the facade to drive).
    #[must_use]
    pub fn image_field_numbers(
        space: &Space,
        parsed_fields: &BTreeMap<String, TypedValue>,
    ) -> Vec<(String, i64)> {
        space
            .fields
            .iter()
            .filter(|f| f.field_type == FieldType::Image)
            .filter_map(|f| match parsed_fields.get(&f.name) {
                Some(TypedValue::Int(number)) => Some((f.name.clone(), *number)),
                _ => None,
            })
            .collect()
    }

    /// Create a note. The caller resolves image fields via the attachment
    /// pipeline and passes the already-finalized `fields` map (the pending
    /// attachment number replaced by whatever the image service decided to
    /// store there).
    pub async fn create(
        &self,
        space: &Space,
        author: &str,
        number: i64,
        fields: BTreeMap<String, TypedValue>,
    ) -> AppResult<NoteWithTitle> {
        let now = Utc::now();
        let note = Note {
            space_slug: space.slug.clone(),
            number,
            author: author.to_string(),
            created_at: now,
            edited_at: None,
            commented_at: None,
            activity_at: now,
            fields,
        };
        self.store
            .notes()
            .insert_one(&note)
            .await
            .map_err(|e| AppError::Internal(format!("failed to create note: {e}")))?;
        Ok(self.attach_title(space, note))
    }

    /// Partial field update. Only keys present in `fields` are written.
    pub async fn update_fields(
        &self,
        space: &Space,
        number: i64,
        fields: BTreeMap<String, TypedValue>,
    ) -> AppResult<NoteWithTitle> {
        let now = Utc::now();
        let mut set_doc = doc! { "edited_at": now, "activity_at": now };
        for (name, value) in &fields {
            let bson_value = bson::to_bson(value)
                .map_err(|e| AppError::Internal(format!("failed to encode field '{name}': {e}")))?;
            set_doc.insert(format!("fields.{name}"), bson_value);
        }

        self.store
            .notes()
            .update_one(doc! { "space_slug": &space.slug, "number": number }, doc! { "$set": set_doc })
            .await
            .map_err(|e| AppError::Internal(format!("failed to update note: {e}")))?;

        self.get(space, number).await
    }

    /// Bump `activity_at` (and, if `commented` is set, `commented_at`) to
    /// now. Called whenever a comment is created, edited, or deleted.
    pub async fn bump_activity(&self, space_slug: &str, number: i64, commented: bool) -> AppResult<()> {
        let now = Utc::now();
        let mut set_doc = doc! { "activity_at": now };
        if commented {
            set_doc.insert("commented_at", now);
        }
        self.store
            .notes()
            .update_one(doc! { "space_slug": space_slug, "number": number }, doc! { "$set": set_doc })
            .await
            .map_err(|e| AppError::Internal(format!("failed to bump note activity: {e}")))?;
        Ok(())
    }

    /// Delete every note belonging to a space (cascade on space deletion).
    pub async fn delete_by_space(&self, space_slug: &str) -> AppResult<u64> {
        let result = self
            .store
            .notes()
            .delete_many(doc! { "space_slug": space_slug })
            .await
            .map_err(|e| AppError::Internal(format!("failed to delete notes: {e}")))?;
        Ok(result.deleted_count)
    }

    /// Whether `username` has authored any note in any space (user
    /// deletion guard, §9 Open Questions).
    pub async fn has_authored_any(&self, username: &str) -> AppResult<bool> {
        let count = self
            .store
            .notes()
            .count_documents(doc! { "author": username })
            .await
            .map_err(|e| AppError::Internal(format!("note authorship check failed: {e}")))?;
        Ok(count > 0)
    }

    /// Bulk insert pre-built notes (import, §4.9).
    pub async fn import_many(&self, notes: &[Note]) -> AppResult<u64> {
        if notes.is_empty() {
            return Ok(0);
        }
        self.store
            .notes()
            .insert_many(notes)
            .await
            .map_err(|e| AppError::Internal(format!("failed to import notes: {e}")))?;
        Ok(notes.len() as u64)
    }
}

/// The counter kind notes are allocated from, re-exported for callers that
/// drive `CounterService::next` directly when creating a note.
pub const NOTE_COUNTER_KIND: CounterKind = CounterKind::Note;
