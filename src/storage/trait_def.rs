use crate::buckets::BucketKeys;
use crate::models::{LogEntry, NewUser, SiteSnapshot, UserRecord};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("user '{0}' already exists")]
    Conflict(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A visit ready to be committed: the log entry plus its canonical bucket keys
#[derive(Debug, Clone)]
pub struct VisitRecord {
    pub entry: LogEntry,
    pub keys: BucketKeys,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables, etc.)
    async fn init(&self) -> Result<()>;

    /// Release pooled resources on shutdown
    async fn close(&self) {}

    /// Create a user; fails with `Conflict` when the id is taken
    async fn create_user(&self, user: &NewUser) -> StorageResult<()>;

    /// Get a user with credentials and preferences
    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>>;

    /// List every user id, sorted
    async fn list_users(&self) -> Result<Vec<String>>;

    /// Set last access time. Returns false if the user does not exist.
    async fn touch_user(&self, user_id: &str, at: i64) -> Result<bool>;

    /// Upsert a preference. Returns false if the user does not exist.
    async fn set_pref(&self, user_id: &str, key: &str, value: &str) -> Result<bool>;

    /// Replace the token, leaving the password untouched
    async fn set_token(&self, user_id: &str, token: &str) -> Result<bool>;

    /// Replace the password hash, leaving the token untouched
    async fn set_password_hash(&self, user_id: &str, password_hash: &str) -> Result<bool>;

    /// Create an empty site if missing; returns its current count
    async fn ensure_site(&self, user_id: &str, site_id: &str) -> Result<i64>;

    /// Atomically bump count and all four buckets and append the log entry.
    /// Creates the site if missing. Returns the new count.
    async fn record_visit(&self, user_id: &str, site_id: &str, visit: &VisitRecord)
        -> Result<i64>;

    /// Read one site's count, log and stored buckets
    async fn get_site(&self, user_id: &str, site_id: &str) -> Result<Option<SiteSnapshot>>;

    /// List (site id, count) for every site of a user
    async fn list_sites(&self, user_id: &str) -> Result<Vec<(String, i64)>>;
}
