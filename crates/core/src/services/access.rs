//! Access Guard (C12): the six capability checks every facade operation
//! begins with. No partial authorization — a failure aborts the whole call.

use bson::doc;
use spacenote_common::{AppError, AppResult};
use spacenote_db::DocumentStore;
use spacenote_db::entities::{ADMIN_USERNAME, Comment, PendingAttachment, Space, User};

use super::identity::IdentityService;

/// The six guard functions of §4.8.
#[derive(Debug, Clone)]
pub struct AccessService {
    store: DocumentStore,
    identity: IdentityService,
}

impl AccessService {
    #[must_use]
    pub const fn new(store: DocumentStore, identity: IdentityService) -> Self {
        Self { store, identity }
    }

    async fn user_for_token(&self, token: &str) -> AppResult<User> {
        let username = self
            .identity
            .lookup_session(token)
            .await?
            .ok_or_else(|| AppError::AuthenticationFailure("invalid or expired session".to_string()))?;
        self.identity
            .get_user(&username)
            .await?
            .ok_or_else(|| AppError::AuthenticationFailure("session refers to an unknown user".to_string()))
    }

    async fn space_for_slug(&self, space_slug: &str) -> AppResult<Space> {
        self.store
            .spaces()
            .find_one(doc! { "_id": space_slug })
            .await
            .map_err(|e| AppError::Internal(format!("space lookup failed: {e}")))?
            .ok_or_else(|| AppError::NotFound(format!("space '{space_slug}' does not exist")))
    }

    /// `ensure_authenticated(token) -> User`.
    pub async fn ensure_authenticated(&self, token: &str) -> AppResult<User> {
        self.user_for_token(token).await
    }

    /// `ensure_admin(token) -> User`.
    pub async fn ensure_admin(&self, token: &str) -> AppResult<User> {
        let user = self.user_for_token(token).await?;
        check_admin(&user)?;
        Ok(user)
    }

    /// `ensure_space_member(token, space_slug) -> User`.
    pub async fn ensure_space_member(&self, token: &str, space_slug: &str) -> AppResult<User> {
        let user = self.user_for_token(token).await?;
        let space = self.space_for_slug(space_slug).await?;
        check_space_member(&user, &space)?;
        Ok(user)
    }

    /// `ensure_space_reader(token, space_slug) -> User` (admin OR member).
    pub async fn ensure_space_reader(&self, token: &str, space_slug: &str) -> AppResult<User> {
        let user = self.user_for_token(token).await?;
        let space = self.space_for_slug(space_slug).await?;
        check_space_reader(&user, &space)?;
        Ok(user)
    }

    /// `ensure_comment_author(token, space_slug, note_number, comment_number) -> (User, Comment)`.
    pub async fn ensure_comment_author(
        &self,
        token: &str,
        space_slug: &str,
        note_number: i64,
        comment_number: i64,
    ) -> AppResult<(User, Comment)> {
        let user = self.user_for_token(token).await?;
        let comment = self
            .store
            .comments()
            .find_one(doc! {
                "space_slug": space_slug,
                "note_number": note_number,
                "number": comment_number,
            })
            .await
            .map_err(|e| AppError::Internal(format!("comment lookup failed: {e}")))?
            .ok_or_else(|| AppError::NotFound("comment does not exist".to_string()))?;

        check_comment_author(&user, &comment)?;
        Ok((user, comment))
    }

    /// `ensure_pending_attachment_owner(token, number) -> (User, PendingAttachment)`.
    pub async fn ensure_pending_attachment_owner(
        &self,
        token: &str,
        number: i64,
    ) -> AppResult<(User, PendingAttachment)> {
        let user = self.user_for_token(token).await?;
        let pending = self
            .store
            .pending_attachments()
            .find_one(doc! { "number": number })
            .await
            .map_err(|e| AppError::Internal(format!("pending attachment lookup failed: {e}")))?
            .ok_or_else(|| AppError::NotFound("pending attachment does not exist".to_string()))?;

        check_pending_attachment_owner(&user, &pending)?;
        Ok((user, pending))
    }
}

/// Pure predicate behind `ensure_admin`, split out from the session lookup
/// so it can be unit tested without a document store.
fn check_admin(user: &User) -> AppResult<()> {
    if user.username != ADMIN_USERNAME {
        return Err(AppError::AccessDenied(
            "this operation requires the admin account".to_string(),
        ));
    }
    Ok(())
}

/// Pure predicate behind `ensure_space_member`.
fn check_space_member(user: &User, space: &Space) -> AppResult<()> {
    if !space.members.contains(&user.username) {
        return Err(AppError::AccessDenied(format!(
            "'{}' is not a member of space '{}'",
            user.username, space.slug
        )));
    }
    Ok(())
}

/// Pure predicate behind `ensure_space_reader` (admin OR member).
fn check_space_reader(user: &User, space: &Space) -> AppResult<()> {
    if !space.is_reader(&user.username) {
        return Err(AppError::AccessDenied(format!(
            "'{}' cannot read space '{}'",
            user.username, space.slug
        )));
    }
    Ok(())
}

/// Pure predicate behind `ensure_comment_author` (author OR admin).
fn check_comment_author(user: &User, comment: &Comment) -> AppResult<()> {
    if comment.author != user.username && user.username != ADMIN_USERNAME {
        return Err(AppError::AccessDenied(
            "only the comment's author or admin may perform this operation".to_string(),
        ));
    }
    Ok(())
}

/// Pure predicate behind `ensure_pending_attachment_owner`.
fn check_pending_attachment_owner(user: &User, pending: &PendingAttachment) -> AppResult<()> {
    if pending.author != user.username {
        return Err(AppError::AccessDenied(
            "only the uploader may access this pending attachment".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(username: &str) -> User {
        User {
            username: username.to_string(),
            password_hash: String::new(),
            created_at: Utc::now(),
        }
    }

    fn space(members: &[&str]) -> Space {
        Space {
            slug: "s".to_string(),
            title: "S".to_string(),
            description: String::new(),
            members: members.iter().map(|m| (*m).to_string()).collect(),
            fields: Vec::new(),
            filters: Vec::new(),
            hidden_fields_on_create: Vec::new(),
            editable_fields_on_comment: Vec::new(),
            templates: Default::default(),
            telegram: None,
            created_at: Utc::now(),
        }
    }

    fn comment(author: &str) -> Comment {
        Comment {
            space_slug: "s".to_string(),
            note_number: 1,
            number: 1,
            author: author.to_string(),
            content: "hi".to_string(),
            created_at: Utc::now(),
            edited_at: None,
            parent_number: None,
        }
    }

    fn pending_attachment(author: &str) -> PendingAttachment {
        PendingAttachment {
            number: 1,
            author: author.to_string(),
            filename: "f.png".to_string(),
            mime_type: "image/png".to_string(),
            size: 0,
            meta: Default::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn check_admin_accepts_admin_and_rejects_everyone_else() {
        assert!(check_admin(&user(ADMIN_USERNAME)).is_ok());
        assert!(check_admin(&user("alice")).is_err());
    }

    #[test]
    fn check_space_member_accepts_members_and_rejects_non_members() {
        let space = space(&["alice", "bob"]);
        assert!(check_space_member(&user("alice"), &space).is_ok());
        assert!(check_space_member(&user("carol"), &space).is_err());
    }

    #[test]
    fn check_space_reader_admits_admin_even_when_not_a_member() {
        let space = space(&["alice"]);
        assert!(check_space_reader(&user(ADMIN_USERNAME), &space).is_ok());
        assert!(check_space_reader(&user("alice"), &space).is_ok());
        assert!(check_space_reader(&user("carol"), &space).is_err());
    }

    #[test]
    fn check_comment_author_admits_author_or_admin_only() {
        let comment = comment("alice");
        assert!(check_comment_author(&user("alice"), &comment).is_ok());
        assert!(check_comment_author(&user(ADMIN_USERNAME), &comment).is_ok());
        assert!(check_comment_author(&user("bob"), &comment).is_err());
    }

    #[test]
    fn check_pending_attachment_owner_admits_uploader_only() {
        let pending = pending_attachment("alice");
        assert!(check_pending_attachment_owner(&user("alice"), &pending).is_ok());
        assert!(check_pending_attachment_owner(&user("bob"), &pending).is_err());
        assert!(check_pending_attachment_owner(&user(ADMIN_USERNAME), &pending).is_err());
    }
}
