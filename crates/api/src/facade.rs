//! Facade (C14): the single authorize-then-dispatch surface every outer
//! transport drives. Every method performs exactly one access check from
//! the Access Guard before delegating to the core services it needs; none
//! of the services below ever call each other or the facade back.

use std::collections::BTreeMap;

use bson::doc;
use spacenote_common::{AppError, AppResult};
use spacenote_core::Core;
use spacenote_core::services::export::ExportData;
use spacenote_core::services::image;
use spacenote_core::services::note::NoteWithTitle;
use spacenote_core::services::pagination::Page;
use spacenote_db::entities::{
    Attachment, Comment, CounterKind, FieldDef, FilterDef, MessengerSettings, MessengerTask,
    MessengerTaskStatus, MessengerTaskType, Note, PendingAttachment, Space, TypedValue, User,
};

#[derive(Clone)]
pub struct Facade {
    core: Core,
    site_url: String,
}

impl Facade {
    #[must_use]
    pub fn new(core: Core, site_url: String) -> Self {
        Self { core, site_url }
    }

    fn note_url(&self, space_slug: &str, number: i64) -> String {
        format!("{}/{space_slug}/notes/{number}", self.site_url.trim_end_matches('/'))
    }

    // ---------------------------------------------------------------
    // Auth
    // ---------------------------------------------------------------

    /// `verify_password` + `create_session`; no prior access check, this
    /// operation establishes identity rather than assuming it.
    pub async fn login(&self, username: &str, password: &str) -> AppResult<String> {
        if !self.core.identity.verify_password(username, password).await? {
            return Err(AppError::AuthenticationFailure(
                "invalid username or password".to_string(),
            ));
        }
        self.core.identity.create_session(username).await
    }

    pub async fn logout(&self, token: &str) -> AppResult<()> {
        self.core.access.ensure_authenticated(token).await?;
        self.core.identity.invalidate(token).await
    }

    // ---------------------------------------------------------------
    // Users
    // ---------------------------------------------------------------

    pub async fn create_user(&self, token: &str, username: &str, password: &str) -> AppResult<User> {
        self.core.access.ensure_admin(token).await?;
        self.core.identity.create_user(username, password).await
    }

    /// Forbidden for the admin account and for anyone who has authored a
    /// note or comment anywhere in the system (§9 Open Questions).
    pub async fn delete_user(&self, token: &str, username: &str) -> AppResult<()> {
        self.core.access.ensure_admin(token).await?;
        if self.core.notes.has_authored_any(username).await?
            || self.core.comments.has_authored_any(username).await?
        {
            return Err(AppError::ValidationFailure(format!(
                "user '{username}' has authored notes or comments and cannot be deleted"
            )));
        }
        self.core.identity.delete_user(username).await
    }

    // ---------------------------------------------------------------
    // Spaces
    // ---------------------------------------------------------------

    pub async fn create_space(
        &self,
        token: &str,
        slug: &str,
        title: &str,
        description: &str,
        members: Vec<String>,
    ) -> AppResult<Space> {
        self.core.access.ensure_admin(token).await?;
        self.core.spaces.create(slug, title, description, members).await
    }

    /// Cascade: messenger tasks/mirrors, then attachments (blobs and
    /// derived image renditions included), then comments, then notes,
    /// then counters, then the space document itself.
    pub async fn delete_space(&self, token: &str, slug: &str) -> AppResult<()> {
        self.core.access.ensure_admin(token).await?;
        self.core.messenger.delete_by_space(slug).await?;
        self.core.attachments.delete_by_space(slug).await?;
        self.core.comments.delete_by_space(slug).await?;
        self.core.notes.delete_by_space(slug).await?;
        self.core.counters.delete_by_space(slug).await?;
        self.core.spaces.delete(slug).await
    }

    pub async fn get_space(&self, token: &str, slug: &str) -> AppResult<Space> {
        self.core.access.ensure_space_reader(token, slug).await?;
        self.core.spaces.get(slug).await
    }

    pub async fn list_spaces_for_user(&self, token: &str) -> AppResult<Vec<Space>> {
        let user = self.core.access.ensure_authenticated(token).await?;
        Ok(self.core.spaces.list_for_user(&user.username).await)
    }

    pub async fn update_members(&self, token: &str, slug: &str, members: Vec<String>) -> AppResult<Space> {
        self.core.access.ensure_admin(token).await?;
        self.core.spaces.update_members(slug, members).await
    }

    pub async fn add_field(&self, token: &str, slug: &str, field: FieldDef) -> AppResult<Space> {
        self.core.access.ensure_admin(token).await?;
        self.core.spaces.add_field(slug, field).await
    }

    pub async fn remove_field(&self, token: &str, slug: &str, name: &str) -> AppResult<Space> {
        self.core.access.ensure_admin(token).await?;
        self.core.spaces.remove_field(slug, name).await
    }

    pub async fn set_hidden_fields_on_create(
        &self,
        token: &str,
        slug: &str,
        names: Vec<String>,
    ) -> AppResult<Space> {
        self.core.access.ensure_admin(token).await?;
        self.core.spaces.set_hidden_fields_on_create(slug, names).await
    }

    pub async fn set_editable_fields_on_comment(
        &self,
        token: &str,
        slug: &str,
        names: Vec<String>,
    ) -> AppResult<Space> {
        self.core.access.ensure_admin(token).await?;
        self.core.spaces.set_editable_fields_on_comment(slug, names).await
    }

    pub async fn put_filter(&self, token: &str, slug: &str, filter: FilterDef) -> AppResult<Space> {
        self.core.access.ensure_admin(token).await?;
        self.core.spaces.put_filter(slug, filter).await
    }

    pub async fn remove_filter(&self, token: &str, slug: &str, name: &str) -> AppResult<Space> {
        self.core.access.ensure_admin(token).await?;
        self.core.spaces.remove_filter(slug, name).await
    }

    pub async fn set_template(&self, token: &str, slug: &str, key: &str, content: &str) -> AppResult<Space> {
        self.core.access.ensure_admin(token).await?;
        self.core.spaces.set_template(slug, key, content).await
    }

    pub async fn set_messenger_settings(
        &self,
        token: &str,
        slug: &str,
        settings: Option<MessengerSettings>,
    ) -> AppResult<Space> {
        self.core.access.ensure_admin(token).await?;
        self.core.spaces.set_messenger_settings(slug, settings).await
    }

    // ---------------------------------------------------------------
    // Notes
    // ---------------------------------------------------------------

    pub async fn create_note(
        &self,
        token: &str,
        space_slug: &str,
        raw_fields: BTreeMap<String, String>,
    ) -> AppResult<NoteWithTitle> {
        let user = self.core.access.ensure_space_member(token, space_slug).await?;
        let space = self.core.spaces.get(space_slug).await?;

        let pending = self.collect_pending_attachments(&space, &raw_fields).await;
        let mut parsed = self
            .core
            .notes
            .parse_fields(&space, &raw_fields, &user.username, &pending, false)?;

        let number = self.core.counters.next(space_slug, CounterKind::Note, None).await?;
        for (field_name, pending_number) in
            spacenote_core::services::note::NoteService::image_field_numbers(&space, &parsed)
        {
            let attachment = self.finalize_image_field(&space, number, pending_number, &field_name).await?;
            parsed.insert(field_name, TypedValue::Int(attachment.number));
        }

        let created = self.core.notes.create(&space, &user.username, number, parsed).await?;
        self.enqueue_note_event(
            &space,
            &created.note,
            MessengerTaskType::ActivityNoteCreated,
            MessengerTaskType::MirrorCreate,
            None,
            None,
        )
        .await?;
        Ok(created)
    }

    pub async fn get_note(&self, token: &str, space_slug: &str, number: i64) -> AppResult<NoteWithTitle> {
        self.core.access.ensure_space_reader(token, space_slug).await?;
        let space = self.core.spaces.get(space_slug).await?;
        self.core.notes.get(&space, number).await
    }

    pub async fn list_notes(
        &self,
        token: &str,
        space_slug: &str,
        filter_name: &str,
        adhoc_query: Option<&str>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> AppResult<Page<NoteWithTitle>> {
        let user = self.core.access.ensure_space_reader(token, space_slug).await?;
        let space = self.core.spaces.get(space_slug).await?;
        self.core
            .notes
            .list(&space, &user.username, filter_name, adhoc_query, limit, offset)
            .await
    }

    pub async fn update_note_fields(
        &self,
        token: &str,
        space_slug: &str,
        number: i64,
        raw_fields: BTreeMap<String, String>,
    ) -> AppResult<NoteWithTitle> {
        let user = self.core.access.ensure_space_member(token, space_slug).await?;
        let space = self.core.spaces.get(space_slug).await?;

        let before = self.core.notes.get(&space, number).await?;
        let pending = self.collect_pending_attachments(&space, &raw_fields).await;
        let mut parsed = self
            .core
            .notes
            .parse_fields(&space, &raw_fields, &user.username, &pending, true)?;

        for (field_name, pending_number) in
            spacenote_core::services::note::NoteService::image_field_numbers(&space, &parsed)
        {
            let attachment = self.finalize_image_field(&space, number, pending_number, &field_name).await?;
            parsed.insert(field_name, TypedValue::Int(attachment.number));
        }

        let changes = build_change_map(&before.note.fields, &parsed);
        let updated = self.core.notes.update_fields(&space, number, parsed).await?;
        self.enqueue_note_event(
            &space,
            &updated.note,
            MessengerTaskType::ActivityNoteUpdated,
            MessengerTaskType::MirrorUpdate,
            Some(changes),
            Some(user.username.clone()),
        )
        .await?;
        Ok(updated)
    }

    /// Fetch any pending attachment referenced by an IMAGE field's raw
    /// value, best-effort — a bad or unrelated number is left out of the
    /// context and surfaces as a parse error from the field it belongs to,
    /// not here.
    async fn collect_pending_attachments(
        &self,
        space: &Space,
        raw_fields: &BTreeMap<String, String>,
    ) -> BTreeMap<i64, PendingAttachment> {
        let mut pending = BTreeMap::new();
        for field in space.fields.iter().filter(|f| f.field_type == spacenote_db::entities::FieldType::Image) {
            let Some(raw) = raw_fields.get(&field.name) else { continue };
            let Ok(number) = raw.parse::<i64>() else { continue };
            if let Ok(attachment) = self.core.attachments.get_pending(number).await {
                pending.insert(number, attachment);
            }
        }
        pending
    }

    /// Finalize a pending attachment bound to an IMAGE field and schedule
    /// its WebP rendition in the background; a rendition failure is
    /// logged by the background task, never surfaced to the caller.
    async fn finalize_image_field(
        &self,
        space: &Space,
        note_number: i64,
        pending_number: i64,
        field_name: &str,
    ) -> AppResult<Attachment> {
        let attachment = self
            .core
            .attachments
            .finalize_pending(pending_number, &space.slug, note_number)
            .await?;

        let max_width = space.field(field_name).and_then(|f| f.options.max_width);
        let blobs = self.core.blobs.clone();
        let slug = space.slug.clone();
        let attachment_number = attachment.number;
        tokio::spawn(async move {
            if let Err(e) = image::generate_rendition(&blobs, &slug, note_number, attachment_number, max_width).await
            {
                tracing::error!(space_slug = %slug, note_number, attachment_number, error = %e, "rendition_generation_failed");
            }
        });

        Ok(attachment)
    }

    /// Enqueue the activity/mirror task pair for a note event, if the
    /// space's telegram settings designate a channel for each role.
    async fn enqueue_note_event(
        &self,
        space: &Space,
        note: &Note,
        activity_kind: MessengerTaskType,
        mirror_kind: MessengerTaskType,
        changes: Option<bson::Document>,
        edited_by: Option<String>,
    ) -> AppResult<()> {
        let Some(telegram) = &space.telegram else { return Ok(()) };

        if let Some(channel) = &telegram.activity_channel {
            let payload = self.note_task_payload(note, None, changes.clone(), edited_by.clone())?;
            self.core
                .messenger
                .enqueue(&space.slug, activity_kind, channel, note.number, payload)
                .await?;
        }
        if let Some(channel) = &telegram.mirror_channel {
            let payload = self.note_task_payload(note, None, changes, edited_by)?;
            self.core
                .messenger
                .enqueue(&space.slug, mirror_kind, channel, note.number, payload)
                .await?;
        }
        Ok(())
    }

    /// Build the `{note, comment?, changes?, url, edited_by?}` payload
    /// document a messenger task carries (§4.6), stored as bson and
    /// converted to a Liquid context by the worker at send time.
    fn note_task_payload(
        &self,
        note: &Note,
        comment: Option<&Comment>,
        changes: Option<bson::Document>,
        edited_by: Option<String>,
    ) -> AppResult<bson::Document> {
        let mut payload = doc! {
            "note": bson::to_document(note).map_err(|e| AppError::Internal(format!("failed to encode note: {e}")))?,
            "url": self.note_url(&note.space_slug, note.number),
        };
        if let Some(comment) = comment {
            payload.insert(
                "comment",
                bson::to_document(comment)
                    .map_err(|e| AppError::Internal(format!("failed to encode comment: {e}")))?,
            );
        }
        if let Some(changes) = changes {
            payload.insert("changes", changes);
        }
        if let Some(edited_by) = edited_by {
            payload.insert("edited_by", edited_by);
        }
        Ok(payload)
    }

    // ---------------------------------------------------------------
    // Comments
    // ---------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn create_comment(
        &self,
        token: &str,
        space_slug: &str,
        note_number: i64,
        content: &str,
        parent_number: Option<i64>,
        raw_fields: Option<BTreeMap<String, String>>,
    ) -> AppResult<Comment> {
        let user = self.core.access.ensure_space_member(token, space_slug).await?;
        let space = self.core.spaces.get(space_slug).await?;

        let changes = match raw_fields {
            Some(raw_fields) => {
                for key in raw_fields.keys() {
                    if !space.editable_fields_on_comment.contains(key) {
                        return Err(AppError::ValidationFailure(format!(
                            "field '{key}' is not editable from a comment"
                        )));
                    }
                }
                let before = self.core.notes.get(&space, note_number).await?;
                let pending = self.collect_pending_attachments(&space, &raw_fields).await;
                let parsed = self
                    .core
                    .notes
                    .parse_fields(&space, &raw_fields, &user.username, &pending, true)?;
                let changes = build_change_map(&before.note.fields, &parsed);
                self.core.notes.update_fields(&space, note_number, parsed).await?;
                Some(changes)
            }
            None => None,
        };

        let number = self
            .core
            .counters
            .next(space_slug, CounterKind::Comment, Some(note_number))
            .await?;
        let comment = self
            .core
            .comments
            .create(space_slug, note_number, &user.username, content, parent_number, number)
            .await?;
        self.core.notes.bump_activity(space_slug, note_number, true).await?;

        if let Some(channel) = space.telegram.as_ref().and_then(|t| t.activity_channel.clone()) {
            let note = self.core.notes.get(&space, note_number).await?;
            let payload = self.note_task_payload(&note.note, Some(&comment), changes, None)?;
            self.core
                .messenger
                .enqueue(space_slug, MessengerTaskType::ActivityCommentCreated, &channel, note_number, payload)
                .await?;
        }

        Ok(comment)
    }

    pub async fn update_comment(
        &self,
        token: &str,
        space_slug: &str,
        note_number: i64,
        number: i64,
        content: &str,
    ) -> AppResult<Comment> {
        self.core
            .access
            .ensure_comment_author(token, space_slug, note_number, number)
            .await?;
        let updated = self.core.comments.update(space_slug, note_number, number, content).await?;
        self.core.notes.bump_activity(space_slug, note_number, false).await?;
        Ok(updated)
    }

    pub async fn delete_comment(
        &self,
        token: &str,
        space_slug: &str,
        note_number: i64,
        number: i64,
    ) -> AppResult<()> {
        self.core
            .access
            .ensure_comment_author(token, space_slug, note_number, number)
            .await?;
        self.core.comments.delete(space_slug, note_number, number).await
    }

    pub async fn list_comments(
        &self,
        token: &str,
        space_slug: &str,
        note_number: i64,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> AppResult<Page<Comment>> {
        self.core.access.ensure_space_reader(token, space_slug).await?;
        self.core.comments.list(space_slug, note_number, limit, offset).await
    }

    // ---------------------------------------------------------------
    // Attachments
    // ---------------------------------------------------------------

    pub async fn upload_pending_attachment(
        &self,
        token: &str,
        filename: &str,
        content: &[u8],
        mime_type: &str,
    ) -> AppResult<PendingAttachment> {
        let user = self.core.access.ensure_authenticated(token).await?;
        self.core
            .attachments
            .create_pending(&user.username, filename, content, mime_type)
            .await
    }

    pub async fn upload_direct_attachment(
        &self,
        token: &str,
        space_slug: &str,
        note_number: Option<i64>,
        filename: &str,
        content: &[u8],
        mime_type: &str,
    ) -> AppResult<Attachment> {
        let user = self.core.access.ensure_space_member(token, space_slug).await?;
        self.core
            .attachments
            .create_direct(space_slug, note_number, &user.username, filename, content, mime_type)
            .await
    }

    pub async fn download_pending_attachment(&self, token: &str, number: i64) -> AppResult<(PendingAttachment, Vec<u8>)> {
        let (_user, pending) = self.core.access.ensure_pending_attachment_owner(token, number).await?;
        let path = self.core.blobs.pending_path(number)?;
        let bytes = self.core.blobs.read(&path).await?;
        Ok((pending, bytes))
    }

    pub async fn download_attachment(
        &self,
        token: &str,
        space_slug: &str,
        note_number: Option<i64>,
        number: i64,
    ) -> AppResult<(Attachment, Vec<u8>)> {
        self.core.access.ensure_space_reader(token, space_slug).await?;
        let attachment = self.core.attachments.get(space_slug, note_number, number).await?;
        let path = match note_number {
            Some(note_number) => self.core.blobs.note_attachment_path(space_slug, note_number, number)?,
            None => self.core.blobs.space_attachment_path(space_slug, number)?,
        };
        let bytes = self.core.blobs.read(&path).await?;
        Ok((attachment, bytes))
    }

    /// On-demand WebP rendition of any image-mime attachment. The first
    /// request for a given `(note, attachment)` pair generates and caches
    /// the rendition at the same path the background job would have
    /// written to; later requests (on-demand or mirrored) read it back.
    pub async fn request_rendition(
        &self,
        token: &str,
        space_slug: &str,
        note_number: i64,
        attachment_number: i64,
        max_width: Option<u32>,
    ) -> AppResult<Vec<u8>> {
        self.core.access.ensure_space_reader(token, space_slug).await?;
        let attachment = self
            .core
            .attachments
            .get(space_slug, Some(note_number), attachment_number)
            .await?;
        if !image::is_supported_image(&attachment.mime_type) {
            return Err(AppError::ValidationFailure(format!(
                "attachment mime type '{}' does not support image rendition",
                attachment.mime_type
            )));
        }

        let path = self.core.blobs.rendition_path(space_slug, note_number, attachment_number)?;
        if !self.core.blobs.exists(&path).await {
            image::generate_rendition(&self.core.blobs, space_slug, note_number, attachment_number, max_width)
                .await?;
        }
        self.core.blobs.read(&path).await
    }

    // ---------------------------------------------------------------
    // Messenger task inspection (operator visibility into C10)
    // ---------------------------------------------------------------

    pub async fn list_messenger_tasks(
        &self,
        token: &str,
        space_slug: Option<&str>,
        task_type: Option<MessengerTaskType>,
        status: Option<MessengerTaskStatus>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> AppResult<Page<MessengerTask>> {
        self.core.access.ensure_admin(token).await?;
        self.core
            .messenger
            .list_tasks(space_slug, task_type, status, limit, offset)
            .await
    }

    // ---------------------------------------------------------------
    // Export / Import
    // ---------------------------------------------------------------

    pub async fn export_space(&self, token: &str, space_slug: &str, include_data: bool) -> AppResult<ExportData> {
        self.core.access.ensure_admin(token).await?;
        self.core.export.export_space(space_slug, include_data).await
    }

    pub async fn import_space(&self, token: &str, data: ExportData) -> AppResult<Space> {
        self.core.access.ensure_admin(token).await?;
        self.core.export.import_space(data).await
    }
}

/// Old→new map for the fields a partial update actually touched, used as
/// the `changes` key of a messenger task payload.
fn build_change_map(
    before: &BTreeMap<String, TypedValue>,
    updates: &BTreeMap<String, TypedValue>,
) -> bson::Document {
    let mut changes = bson::Document::new();
    for (name, new_value) in updates {
        let old_value = before.get(name).unwrap_or(&TypedValue::Null);
        let mut entry = bson::Document::new();
        if let Ok(old) = bson::to_bson(old_value) {
            entry.insert("old", old);
        }
        if let Ok(new) = bson::to_bson(new_value) {
            entry.insert("new", new);
        }
        changes.insert(name.clone(), entry);
    }
    changes
}
