//! Account management: registration, the two login paths, preferences
//!
//! A user has two independent credentials. The password is stored as an
//! Argon2id hash; the token is a long-lived random secret that can be read
//! back for export and rotated without touching the password. Either one is
//! enough to log in, but only a password login counts as an access.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::crypto;
use crate::error::{AppError, AppResult};
use crate::models::{NewUser, Prefs, UserProfile, UserRecord};
use crate::storage::Storage;

/// Longest accepted user id, in bytes
pub const MAX_USER_ID_LEN: usize = 128;

/// Which credential a login matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential {
    Password,
    Token,
}

pub struct AccountManager {
    storage: Arc<dyn Storage>,
}

impl AccountManager {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Register a new user with a fresh token
    pub async fn create(&self, user_id: &str, password: &str) -> AppResult<UserProfile> {
        validate_user_id(user_id)?;
        if password.is_empty() {
            return Err(AppError::InvalidInput("Missing Input".to_string()));
        }

        let password_hash = hash_blocking(password.to_string()).await?;
        let user = NewUser {
            id: user_id.to_string(),
            password_hash,
            token: crypto::generate_secret(),
            created_at: chrono::Utc::now().timestamp(),
        };

        self.storage.create_user(&user).await?;
        info!(%user_id, "registered user");

        self.profile(user_id).await
    }

    /// Check a candidate against the password hash. Unknown users never match,
    /// but are still checked against a dummy hash of the same cost.
    pub async fn verify_password(&self, user_id: &str, candidate: &str) -> AppResult<bool> {
        let password_hash = self
            .storage
            .get_user(user_id)
            .await?
            .map(|user| user.password_hash);

        verify_blocking(candidate.to_string(), password_hash).await
    }

    /// Check a candidate against the token. Unknown users never match.
    pub async fn verify_token(&self, user_id: &str, candidate: &str) -> AppResult<bool> {
        let Some(user) = self.storage.get_user(user_id).await? else {
            return Ok(false);
        };

        Ok(crypto::secrets_match(candidate, &user.token))
    }

    /// Record a human login. Failures are logged and swallowed.
    pub async fn touch_access(&self, user_id: &str) {
        let now = chrono::Utc::now().timestamp();
        match self.storage.touch_user(user_id, now).await {
            Ok(true) => {}
            Ok(false) => warn!(%user_id, "touch access on unknown user"),
            Err(e) => warn!(%user_id, error = %e, "failed to update last access"),
        }
    }

    /// Authenticate with a secret that may be either the password or the token
    pub async fn login(&self, user_id: &str, secret: &str) -> AppResult<Credential> {
        if user_id.is_empty() || secret.is_empty() {
            return Err(AppError::InvalidInput("Missing Input".to_string()));
        }

        // Both checks always run, whichever matches
        let password_ok = self.verify_password(user_id, secret).await?;
        let token_ok = self.verify_token(user_id, secret).await?;

        if password_ok {
            self.touch_access(user_id).await;
            debug!(%user_id, "password login");
            Ok(Credential::Password)
        } else if token_ok {
            debug!(%user_id, "token login");
            Ok(Credential::Token)
        } else {
            Err(AppError::WrongCredentials)
        }
    }

    /// Upsert a preference. Unrecognized names are stored as well.
    pub async fn set_pref(&self, user_id: &str, key: &str, value: &str) -> AppResult<()> {
        if key.is_empty() {
            return Err(AppError::InvalidInput("preference name is empty".to_string()));
        }

        if !self.storage.set_pref(user_id, key, value).await? {
            return Err(AppError::Unauthenticated);
        }
        Ok(())
    }

    pub async fn get_prefs(&self, user_id: &str) -> AppResult<Prefs> {
        Ok(self.user(user_id).await?.prefs)
    }

    /// Expose the current token; callers must already be authenticated
    pub async fn read_token(&self, user_id: &str) -> AppResult<String> {
        Ok(self.user(user_id).await?.token)
    }

    /// Issue a new token. The password keeps working.
    pub async fn rotate_token(&self, user_id: &str) -> AppResult<String> {
        let token = crypto::generate_secret();
        if !self.storage.set_token(user_id, &token).await? {
            return Err(AppError::Unauthenticated);
        }

        info!(%user_id, "rotated token");
        Ok(token)
    }

    /// Replace the password. The token keeps working.
    pub async fn change_password(&self, user_id: &str, new_password: &str) -> AppResult<()> {
        if new_password.is_empty() {
            return Err(AppError::InvalidInput("Missing Input".to_string()));
        }

        let password_hash = hash_blocking(new_password.to_string()).await?;
        if !self.storage.set_password_hash(user_id, &password_hash).await? {
            return Err(AppError::Unauthenticated);
        }

        info!(%user_id, "changed password");
        Ok(())
    }

    pub async fn profile(&self, user_id: &str) -> AppResult<UserProfile> {
        Ok(self.user(user_id).await?.profile())
    }

    pub async fn list_users(&self) -> AppResult<Vec<String>> {
        Ok(self.storage.list_users().await?)
    }

    /// Load a user that is expected to exist (it owns the current session)
    async fn user(&self, user_id: &str) -> AppResult<UserRecord> {
        self.storage
            .get_user(user_id)
            .await?
            .ok_or(AppError::Unauthenticated)
    }
}

pub fn validate_user_id(user_id: &str) -> AppResult<()> {
    if user_id.is_empty() {
        return Err(AppError::InvalidInput("Missing Input".to_string()));
    }
    if user_id.len() > MAX_USER_ID_LEN || user_id.chars().any(char::is_control) {
        return Err(AppError::InvalidInput(format!(
            "user id must be at most {MAX_USER_ID_LEN} bytes without control characters"
        )));
    }
    Ok(())
}

// Argon2 runs on the blocking pool
async fn hash_blocking(password: String) -> AppResult<String> {
    tokio::task::spawn_blocking(move || crypto::hash_password(&password))
        .await
        .map_err(|e| AppError::Internal(format!("hashing task failed: {e}")))?
        .map_err(|e| AppError::Internal(e.to_string()))
}

async fn verify_blocking(candidate: String, password_hash: Option<String>) -> AppResult<bool> {
    let verified = tokio::task::spawn_blocking(move || match password_hash {
        Some(hash) => crypto::verify_password(&candidate, &hash),
        None => crypto::verify_dummy(&candidate),
    })
    .await
    .map_err(|e| AppError::Internal(format!("verification task failed: {e}")))?;

    verified.map_err(AppError::StoreUnavailable)
}
