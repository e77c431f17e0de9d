//! Short-lived login sessions
//!
//! Sessions are kept in memory only and expire after a period of inactivity.
//! A session id is unrelated to the account token: destroying a session
//! leaves the token valid, and rotating the token leaves sessions alone.

use moka::future::Cache;
use std::time::Duration;
use tracing::debug;

use crate::crypto;
use crate::error::{AppError, AppResult};

/// Opaque session identifier handed to the client
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(pub String);

impl SessionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
struct SessionEntry {
    user_id: String,
}

pub struct SessionManager {
    sessions: Cache<String, SessionEntry>,
}

impl SessionManager {
    pub fn new(max_entries: u64, idle_ttl: Duration) -> Self {
        let sessions = Cache::builder()
            .max_capacity(max_entries)
            .time_to_idle(idle_ttl)
            .build();

        Self { sessions }
    }

    /// Start a session for an authenticated user
    pub async fn create_session(&self, user_id: &str) -> SessionToken {
        let token = crypto::generate_secret();
        self.sessions
            .insert(
                token.clone(),
                SessionEntry {
                    user_id: user_id.to_string(),
                },
            )
            .await;

        debug!(%user_id, "session created");
        SessionToken(token)
    }

    /// Map a session id back to its user
    pub async fn resolve(&self, token: &str) -> AppResult<String> {
        if token.is_empty() {
            return Err(AppError::Unauthenticated);
        }

        self.sessions
            .get(token)
            .await
            .map(|entry| entry.user_id)
            .ok_or(AppError::Unauthenticated)
    }

    /// End a session; unknown ids are ignored
    pub async fn destroy(&self, token: &str) {
        self.sessions.invalidate(token).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(1_000, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_create_and_resolve() {
        let sessions = manager();
        let token = sessions.create_session("alice").await;

        assert_eq!(sessions.resolve(token.as_str()).await.unwrap(), "alice");
    }

    #[tokio::test]
    async fn test_each_login_gets_a_distinct_session() {
        let sessions = manager();
        let a = sessions.create_session("alice").await;
        let b = sessions.create_session("alice").await;
        assert_ne!(a, b);

        sessions.destroy(a.as_str()).await;
        assert!(sessions.resolve(a.as_str()).await.is_err());
        assert_eq!(sessions.resolve(b.as_str()).await.unwrap(), "alice");
    }

    #[tokio::test]
    async fn test_destroyed_or_unknown_sessions_are_unauthenticated() {
        let sessions = manager();
        let token = sessions.create_session("alice").await;
        sessions.destroy(token.as_str()).await;

        assert!(matches!(
            sessions.resolve(token.as_str()).await,
            Err(AppError::Unauthenticated)
        ));
        assert!(matches!(sessions.resolve("bogus").await, Err(AppError::Unauthenticated)));
        assert!(matches!(sessions.resolve("").await, Err(AppError::Unauthenticated)));

        // Destroying twice is harmless
        sessions.destroy(token.as_str()).await;
    }

    #[tokio::test]
    async fn test_idle_sessions_expire() {
        let sessions = SessionManager::new(1_000, Duration::from_millis(50));
        let token = sessions.create_session("alice").await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(sessions.resolve(token.as_str()).await.is_err());
    }
}
