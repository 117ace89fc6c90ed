//! Default implementation of the identity boundary (§6, §10.5).
//!
//! The identity boundary itself — `verify_password`, `create_session`,
//! `lookup_session`, `invalidate` — is treated as an abstract external
//! collaborator by the rest of this system. This module is that
//! collaborator's default, runnable implementation: argon2 password
//! hashing and opaque random session tokens stored in the `sessions`
//! collection.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng};
use argon2::Argon2;
use bson::doc;
use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use spacenote_common::{AppError, AppResult, IdGenerator};
use spacenote_db::DocumentStore;
use spacenote_db::entities::{ADMIN_USERNAME, Session, User};

/// Password hashing, session issuance/lookup/invalidation.
#[derive(Debug, Clone)]
pub struct IdentityService {
    store: DocumentStore,
    id_gen: IdGenerator,
}

impl IdentityService {
    #[must_use]
    pub fn new(store: DocumentStore) -> Self {
        Self {
            store,
            id_gen: IdGenerator::new(),
        }
    }

    fn hash_password(password: &str) -> AppResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
    }

    /// Create a user account with a freshly hashed password.
    pub async fn create_user(&self, username: &str, password: &str) -> AppResult<User> {
        let user = User {
            username: username.to_string(),
            password_hash: Self::hash_password(password)?,
            created_at: Utc::now(),
        };
        self.store
            .users()
            .insert_one(&user)
            .await
            .map_err(|e| AppError::Internal(format!("failed to create user: {e}")))?;
        Ok(user)
    }

    /// Create a user with a random password, used by import (§4.9) for
    /// referenced users that don't yet exist.
    pub async fn create_user_with_random_password(&self, username: &str) -> AppResult<User> {
        let password: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        self.create_user(username, &password).await
    }

    /// `verify_password(username, password) -> bool`.
    pub async fn verify_password(&self, username: &str, password: &str) -> AppResult<bool> {
        let Some(user) = self
            .store
            .users()
            .find_one(doc! { "_id": username })
            .await
            .map_err(|e| AppError::Internal(format!("user lookup failed: {e}")))?
        else {
            return Ok(false);
        };
        let parsed = PasswordHash::new(&user.password_hash)
            .map_err(|e| AppError::Internal(format!("stored password hash is invalid: {e}")))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    /// `create_session(username) -> token`.
    pub async fn create_session(&self, username: &str) -> AppResult<String> {
        let token = self.id_gen.generate_token();
        let session = Session {
            auth_token: token.clone(),
            username: username.to_string(),
            created_at: Utc::now(),
        };
        self.store
            .sessions()
            .insert_one(&session)
            .await
            .map_err(|e| AppError::Internal(format!("failed to create session: {e}")))?;
        Ok(token)
    }

    /// `lookup_session(token) -> username?`.
    pub async fn lookup_session(&self, token: &str) -> AppResult<Option<String>> {
        let session = self
            .store
            .sessions()
            .find_one(doc! { "_id": token })
            .await
            .map_err(|e| AppError::Internal(format!("session lookup failed: {e}")))?;
        Ok(session.map(|s| s.username))
    }

    /// `invalidate(token)`.
    pub async fn invalidate(&self, token: &str) -> AppResult<()> {
        self.store
            .sessions()
            .delete_one(doc! { "_id": token })
            .await
            .map_err(|e| AppError::Internal(format!("failed to invalidate session: {e}")))?;
        Ok(())
    }

    /// Fetch a user record by username.
    pub async fn get_user(&self, username: &str) -> AppResult<Option<User>> {
        self.store
            .users()
            .find_one(doc! { "_id": username })
            .await
            .map_err(|e| AppError::Internal(format!("user lookup failed: {e}")))
    }

    /// Delete a user account. Forbidden for `"admin"`; forbidden (per the
    /// reference implementation's resolution of an open question in the
    /// distilled source) for any user who has authored a note or comment —
    /// callers are expected to check authorship via the Note/Comment
    /// stores before calling this.
    pub async fn delete_user(&self, username: &str) -> AppResult<()> {
        if username == ADMIN_USERNAME {
            return Err(AppError::ValidationFailure(
                "the admin account cannot be deleted".to_string(),
            ));
        }
        self.store
            .users()
            .delete_one(doc! { "_id": username })
            .await
            .map_err(|e| AppError::Internal(format!("failed to delete user: {e}")))?;
        Ok(())
    }
}
