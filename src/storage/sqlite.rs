use crate::buckets::Resolution;
use crate::models::{LogEntry, NewUser, Prefs, SiteSnapshot, TimedVisits, UserRecord};
use crate::storage::{Storage, StorageError, StorageResult, VisitRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// SQLite-backed storage.
///
/// Visits are serialized by one process-wide writer lock rather than a lock
/// per site. SQLite admits a single writer per database file, so a per-site
/// lock would only move the queueing into `SQLITE_BUSY` retries. Isolation
/// between sites comes from each visit being one transaction.
pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
    /// Held for the whole visit transaction
    visit_writer: Mutex<()>,
}

#[derive(FromRow)]
struct UserRow {
    user_id: String,
    password_hash: String,
    token: String,
    created_at: i64,
    last_access: Option<i64>,
}

#[derive(FromRow)]
struct LogRow {
    timestamp: i64,
    referrer: Option<String>,
    user_agent: Option<String>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid SQLite url '{database_url}'"))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool: Arc::new(pool),
            visit_writer: Mutex::new(()),
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY NOT NULL,
                password_hash TEXT NOT NULL,
                token TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                last_access INTEGER
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_prefs (
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (user_id, name)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sites (
                user_id TEXT NOT NULL,
                site_id TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, site_id)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        // One row per (site, resolution, bucket key)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS site_visits (
                user_id TEXT NOT NULL,
                site_id TEXT NOT NULL,
                resolution TEXT NOT NULL,
                bucket TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, site_id, resolution, bucket)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS site_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                site_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                referrer TEXT,
                user_agent TEXT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_site_log_site ON site_log(user_id, site_id, id)")
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    async fn create_user(&self, user: &NewUser) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (user_id, password_hash, token, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id) DO NOTHING
            "#,
        )
        .bind(&user.id)
        .bind(&user.password_hash)
        .bind(&user.token)
        .bind(user.created_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict(user.id.clone()));
        }

        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT user_id, password_hash, token, created_at, last_access
            FROM users
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let prefs: Prefs = sqlx::query_as::<_, (String, String)>(
            "SELECT name, value FROM user_prefs WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_all(self.pool.as_ref())
        .await?
        .into_iter()
        .collect();

        Ok(Some(UserRecord {
            id: row.user_id,
            password_hash: row.password_hash,
            token: row.token,
            prefs,
            created_at: row.created_at,
            last_access: row.last_access,
        }))
    }

    async fn list_users(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>("SELECT user_id FROM users ORDER BY user_id")
            .fetch_all(self.pool.as_ref())
            .await?;

        Ok(ids)
    }

    async fn touch_user(&self, user_id: &str, at: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET last_access = ? WHERE user_id = ?")
            .bind(at)
            .bind(user_id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_pref(&self, user_id: &str, key: &str, value: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_prefs (user_id, name, value)
            SELECT ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM users WHERE user_id = ?)
            ON CONFLICT (user_id, name) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(user_id)
        .bind(key)
        .bind(value)
        .bind(user_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_token(&self, user_id: &str, token: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET token = ? WHERE user_id = ?")
            .bind(token)
            .bind(user_id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_password_hash(&self, user_id: &str, password_hash: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE user_id = ?")
            .bind(password_hash)
            .bind(user_id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn ensure_site(&self, user_id: &str, site_id: &str) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO sites (user_id, site_id, count, created_at)
            VALUES (?, ?, 0, ?)
            ON CONFLICT (user_id, site_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(site_id)
        .bind(now)
        .execute(self.pool.as_ref())
        .await?;

        let count = sqlx::query_scalar::<_, i64>(
            "SELECT count FROM sites WHERE user_id = ? AND site_id = ?",
        )
        .bind(user_id)
        .bind(site_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }

    async fn record_visit(
        &self,
        user_id: &str,
        site_id: &str,
        visit: &VisitRecord,
    ) -> Result<i64> {
        let _writer = self.visit_writer.lock().await;

        // Dropping the transaction before commit rolls everything back
        let mut tx = self.pool.begin().await?;

        let count = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO sites (user_id, site_id, count, created_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT (user_id, site_id) DO UPDATE SET count = count + 1
            RETURNING count
            "#,
        )
        .bind(user_id)
        .bind(site_id)
        .bind(visit.entry.timestamp)
        .fetch_one(&mut *tx)
        .await?;

        for resolution in Resolution::ALL {
            sqlx::query(
                r#"
                INSERT INTO site_visits (user_id, site_id, resolution, bucket, count)
                VALUES (?, ?, ?, ?, 1)
                ON CONFLICT (user_id, site_id, resolution, bucket)
                DO UPDATE SET count = count + 1
                "#,
            )
            .bind(user_id)
            .bind(site_id)
            .bind(resolution.as_str())
            .bind(visit.keys.key(resolution))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO site_log (user_id, site_id, timestamp, referrer, user_agent)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(site_id)
        .bind(visit.entry.timestamp)
        .bind(visit.entry.referrer.as_deref())
        .bind(visit.entry.user_agent.as_deref())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(count)
    }

    async fn get_site(&self, user_id: &str, site_id: &str) -> Result<Option<SiteSnapshot>> {
        // Read inside one transaction so count, buckets and log agree
        let mut tx = self.pool.begin().await?;

        let count = sqlx::query_scalar::<_, i64>(
            "SELECT count FROM sites WHERE user_id = ? AND site_id = ?",
        )
        .bind(user_id)
        .bind(site_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(count) = count else {
            return Ok(None);
        };

        let buckets = sqlx::query_as::<_, (String, String, i64)>(
            r#"
            SELECT resolution, bucket, count
            FROM site_visits
            WHERE user_id = ? AND site_id = ?
            "#,
        )
        .bind(user_id)
        .bind(site_id)
        .fetch_all(&mut *tx)
        .await?;

        let log = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT timestamp, referrer, user_agent
            FROM site_log
            WHERE user_id = ? AND site_id = ?
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .bind(site_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut visits = TimedVisits::default();
        for (resolution, bucket, bucket_count) in buckets {
            match Resolution::parse(&resolution) {
                Some(resolution) => {
                    visits.bucket_mut(resolution).insert(bucket, bucket_count);
                }
                None => {
                    tracing::warn!(%user_id, %site_id, %resolution, "skipping unknown bucket resolution");
                }
            }
        }

        let log = log
            .into_iter()
            .map(|row| LogEntry {
                timestamp: row.timestamp,
                referrer: row.referrer,
                user_agent: row.user_agent,
            })
            .collect();

        Ok(Some(SiteSnapshot { count, log, visits }))
    }

    async fn list_sites(&self, user_id: &str) -> Result<Vec<(String, i64)>> {
        let sites = sqlx::query_as::<_, (String, i64)>(
            "SELECT site_id, count FROM sites WHERE user_id = ? ORDER BY site_id",
        )
        .bind(user_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(sites)
    }
}
