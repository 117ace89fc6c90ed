//! Space Store (C2): space CRUD, its in-memory cache, and the schema/filter
//! invariants that every other service leans on.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bson::doc;
use chrono::Utc;
use spacenote_common::{AppError, AppResult};
use spacenote_db::DocumentStore;
use spacenote_db::entities::{
    ADMIN_USERNAME, FieldDef, FilterDef, MessengerSettings, Space,
};
use tokio::sync::RwLock;

use super::field;
use super::filter;
use super::template;

/// Space CRUD plus an in-memory read cache, refreshed on every mutation.
#[derive(Debug, Clone)]
pub struct SpaceService {
    store: DocumentStore,
    cache: Arc<RwLock<HashMap<String, Space>>>,
}

impl SpaceService {
    #[must_use]
    pub fn new(store: DocumentStore) -> Self {
        Self {
            store,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Load every space from the store into the cache. Call once at startup.
    pub async fn load_cache(&self) -> AppResult<()> {
        use futures::TryStreamExt;
        let mut cursor = self
            .store
            .spaces()
            .find(doc! {})
            .await
            .map_err(|e| AppError::Internal(format!("failed to list spaces: {e}")))?;
        let mut loaded = HashMap::new();
        while let Some(space) = cursor
            .try_next()
            .await
            .map_err(|e| AppError::Internal(format!("failed to read space: {e}")))?
        {
            loaded.insert(space.slug.clone(), space);
        }
        *self.cache.write().await = loaded;
        Ok(())
    }

    /// Fetch a space by slug, preferring the cache.
    pub async fn get(&self, slug: &str) -> AppResult<Space> {
        if let Some(space) = self.cache.read().await.get(slug) {
            return Ok(space.clone());
        }
        self.refresh(slug).await
    }

    pub async fn exists(&self, slug: &str) -> bool {
        self.cache.read().await.contains_key(slug)
    }

    /// All spaces, cache order unspecified (callers typically sort by title).
    pub async fn list_all(&self) -> Vec<Space> {
        self.cache.read().await.values().cloned().collect()
    }

    /// Spaces `username` (or `admin`) may read.
    pub async fn list_for_user(&self, username: &str) -> Vec<Space> {
        if username == ADMIN_USERNAME {
            return self.list_all().await;
        }
        self.cache
            .read()
            .await
            .values()
            .filter(|s| s.members.contains(username))
            .cloned()
            .collect()
    }

    async fn refresh(&self, slug: &str) -> AppResult<Space> {
        let space = self
            .store
            .spaces()
            .find_one(doc! { "_id": slug })
            .await
            .map_err(|e| AppError::Internal(format!("space lookup failed: {e}")))?
            .ok_or_else(|| AppError::NotFound(format!("space '{slug}' does not exist")))?;
        self.cache
            .write()
            .await
            .insert(slug.to_string(), space.clone());
        Ok(space)
    }

    fn validate_members(members: &[String]) -> AppResult<()> {
        for username in members {
            if username == ADMIN_USERNAME {
                return Err(AppError::ValidationFailure(
                    "admin cannot be a member of a space".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Create a space with the immutable `"all"` filter already present.
    pub async fn create(
        &self,
        slug: &str,
        title: &str,
        description: &str,
        members: Vec<String>,
    ) -> AppResult<Space> {
        if self.exists(slug).await {
            return Err(AppError::ValidationFailure(format!(
                "space '{slug}' already exists"
            )));
        }
        Self::validate_members(&members)?;

        let space = Space {
            slug: slug.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            members: members.into_iter().collect(),
            fields: Vec::new(),
            filters: vec![FilterDef::all_filter()],
            hidden_fields_on_create: Vec::new(),
            editable_fields_on_comment: Vec::new(),
            templates: BTreeMap::new(),
            telegram: None,
            created_at: Utc::now(),
        };

        self.store
            .spaces()
            .insert_one(&space)
            .await
            .map_err(|e| AppError::Internal(format!("failed to create space: {e}")))?;
        self.cache
            .write()
            .await
            .insert(space.slug.clone(), space.clone());
        Ok(space)
    }

    /// Insert an already-fully-formed `Space` verbatim (export/import,
    /// §4.9), rejecting an existing slug rather than merging into it.
    pub async fn import(&self, space: Space) -> AppResult<Space> {
        if self.exists(&space.slug).await {
            return Err(AppError::ValidationFailure(format!(
                "space '{}' already exists",
                space.slug
            )));
        }
        self.store
            .spaces()
            .insert_one(&space)
            .await
            .map_err(|e| AppError::Internal(format!("failed to import space: {e}")))?;
        self.cache
            .write()
            .await
            .insert(space.slug.clone(), space.clone());
        Ok(space)
    }

    async fn save(&self, space: &Space) -> AppResult<Space> {
        self.store
            .spaces()
            .replace_one(doc! { "_id": &space.slug }, space)
            .await
            .map_err(|e| AppError::Internal(format!("failed to save space: {e}")))?;
        self.cache
            .write()
            .await
            .insert(space.slug.clone(), space.clone());
        Ok(space.clone())
    }

    pub async fn update_title(&self, slug: &str, title: &str) -> AppResult<Space> {
        let mut space = self.get(slug).await?;
        space.title = title.to_string();
        self.save(&space).await
    }

    pub async fn update_description(&self, slug: &str, description: &str) -> AppResult<Space> {
        let mut space = self.get(slug).await?;
        space.description = description.to_string();
        self.save(&space).await
    }

    pub async fn update_members(&self, slug: &str, members: Vec<String>) -> AppResult<Space> {
        let mut space = self.get(slug).await?;
        Self::validate_members(&members)?;
        space.members = members.into_iter().collect();
        self.save(&space).await
    }

    /// Append a field definition; rejects a duplicate name or an invalid
    /// shape (§4.1 validation rules).
    pub async fn add_field(&self, slug: &str, new_field: FieldDef) -> AppResult<Space> {
        let mut space = self.get(slug).await?;
        if space.field(&new_field.name).is_some() {
            return Err(AppError::ValidationFailure(format!(
                "field '{}' already exists in space '{slug}'",
                new_field.name
            )));
        }
        field::validate_def(&new_field, &space)?;
        space.fields.push(new_field);
        self.save(&space).await
    }

    /// Remove a field and scrub it from every list that references it by
    /// name (hidden-on-create, editable-on-comment).
    pub async fn remove_field(&self, slug: &str, name: &str) -> AppResult<Space> {
        let mut space = self.get(slug).await?;
        let before = space.fields.len();
        space.fields.retain(|f| f.name != name);
        if space.fields.len() == before {
            return Err(AppError::NotFound(format!(
                "field '{name}' does not exist in space '{slug}'"
            )));
        }
        space.hidden_fields_on_create.retain(|f| f != name);
        space.editable_fields_on_comment.retain(|f| f != name);
        self.save(&space).await
    }

    pub async fn set_hidden_fields_on_create(
        &self,
        slug: &str,
        names: Vec<String>,
    ) -> AppResult<Space> {
        let mut space = self.get(slug).await?;
        for name in &names {
            if space.field(name).is_none() {
                return Err(AppError::ValidationFailure(format!(
                    "'{name}' is not a field of space '{slug}'"
                )));
            }
        }
        space.hidden_fields_on_create = names;
        self.save(&space).await
    }

    pub async fn set_editable_fields_on_comment(
        &self,
        slug: &str,
        names: Vec<String>,
    ) -> AppResult<Space> {
        let mut space = self.get(slug).await?;
        for name in &names {
            if space.field(name).is_none() {
                return Err(AppError::ValidationFailure(format!(
                    "'{name}' is not a field of space '{slug}'"
                )));
            }
        }
        space.editable_fields_on_comment = names;
        self.save(&space).await
    }

    /// Add or replace a saved filter by name. The `"all"` filter cannot be
    /// redefined.
    pub async fn put_filter(&self, slug: &str, new_filter: FilterDef) -> AppResult<Space> {
        let mut space = self.get(slug).await?;
        if new_filter.name == spacenote_db::entities::ALL_FILTER_NAME {
            return Err(AppError::ValidationFailure(
                "the 'all' filter is built in and cannot be redefined".to_string(),
            ));
        }
        filter::validate_filter_def(&new_filter, &space)?;
        space.filters.retain(|f| f.name != new_filter.name);
        space.filters.push(new_filter);
        self.save(&space).await
    }

    pub async fn remove_filter(&self, slug: &str, name: &str) -> AppResult<Space> {
        if name == spacenote_db::entities::ALL_FILTER_NAME {
            return Err(AppError::ValidationFailure(
                "the 'all' filter cannot be removed".to_string(),
            ));
        }
        let mut space = self.get(slug).await?;
        let before = space.filters.len();
        space.filters.retain(|f| f.name != name);
        if space.filters.len() == before {
            return Err(AppError::NotFound(format!("filter '{name}' does not exist")));
        }
        self.save(&space).await
    }

    pub async fn set_template(&self, slug: &str, key: &str, content: &str) -> AppResult<Space> {
        let mut space = self.get(slug).await?;
        template::validate_key(&space, key, content)?;
        if content.trim().is_empty() {
            space.templates.remove(key);
        } else {
            space.templates.insert(key.to_string(), content.to_string());
        }
        self.save(&space).await
    }

    pub async fn set_messenger_settings(
        &self,
        slug: &str,
        settings: Option<MessengerSettings>,
    ) -> AppResult<Space> {
        let mut space = self.get(slug).await?;
        space.telegram = settings;
        self.save(&space).await
    }

    /// Delete a space and everything that belongs to it. Callers (the
    /// facade) are responsible for first cascading notes/comments/counters/
    /// attachments via their own stores; this removes the space document
    /// itself and evicts the cache entry.
    pub async fn delete(&self, slug: &str) -> AppResult<()> {
        if !self.exists(slug).await {
            return Err(AppError::NotFound(format!("space '{slug}' does not exist")));
        }
        self.store
            .spaces()
            .delete_one(doc! { "_id": slug })
            .await
            .map_err(|e| AppError::Internal(format!("failed to delete space: {e}")))?;
        self.cache.write().await.remove(slug);
        Ok(())
    }
}
