use axum::{
    extract::{Form, Query, RawQuery, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_cookies::Cookies;

use crate::accounts::AccountManager;
use crate::auth::{clear_session_cookie, session_token, set_session_cookie, AuthUser};
use crate::buckets::UtcOffset;
use crate::config::SessionConfig;
use crate::error::{AppError, AppResult};
use crate::models::{
    CredentialsForm, Dump, PingResponse, UserProfile, Visit, PREF_RANGE, PREF_SITE,
};
use crate::sessions::SessionManager;
use crate::storage::Storage;
use crate::tracker::Tracker;

/// Longest header value copied into a log entry
const MAX_LOGGED_HEADER_CHARS: usize = 512;

pub struct AppState {
    pub tracker: Tracker,
    pub accounts: AccountManager,
    pub sessions: SessionManager,
    pub cookie_secure: bool,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>, session: &SessionConfig) -> Self {
        Self {
            tracker: Tracker::new(Arc::clone(&storage)),
            accounts: AccountManager::new(storage),
            sessions: SessionManager::new(
                session.max_entries,
                Duration::from_secs(session.ttl_secs),
            ),
            cookie_secure: session.cookie_secure,
        }
    }

    async fn start_session(&self, cookies: &Cookies, user_id: &str) {
        let session = self.sessions.create_session(user_id).await;
        set_session_cookie(cookies, session.as_str(), self.cookie_secure);
    }
}

#[derive(Debug, Deserialize)]
pub struct PingQuery {
    pub site: Option<String>,
    pub utcoffset: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OffsetQuery {
    pub utcoffset: Option<String>,
}

/// Log in with the password or the token
pub async fn login(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Form(form): Form<CredentialsForm>,
) -> AppResult<Json<UserProfile>> {
    state.accounts.login(&form.user, &form.password).await?;
    state.start_session(&cookies, &form.user).await;

    Ok(Json(state.accounts.profile(&form.user).await?))
}

/// Create an account and log straight into it
pub async fn register(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Form(form): Form<CredentialsForm>,
) -> AppResult<Json<UserProfile>> {
    let profile = state.accounts.create(&form.user, &form.password).await?;
    state.start_session(&cookies, &form.user).await;

    Ok(Json(profile))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    headers: HeaderMap,
) -> Redirect {
    if let Some(session) = session_token(&headers, Some(&cookies)) {
        state.sessions.destroy(&session).await;
    }
    clear_session_cookie(&cookies);

    Redirect::temporary("/app")
}

/// Profile of the logged-in user
pub async fn user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> AppResult<Json<UserProfile>> {
    Ok(Json(state.accounts.profile(&auth.user_id).await?))
}

/// Store the raw query string as the `range` preference
pub async fn set_pref_range(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    RawQuery(raw): RawQuery,
) -> AppResult<StatusCode> {
    let value = raw.unwrap_or_default();
    state.accounts.set_pref(&auth.user_id, PREF_RANGE, &value).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Store the raw query string as the `site` preference
pub async fn set_pref_site(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    RawQuery(raw): RawQuery,
) -> AppResult<StatusCode> {
    let value = raw.unwrap_or_default();
    state.accounts.set_pref(&auth.user_id, PREF_SITE, &value).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Record a visit, then return the site's counters, log and the user's sites
pub async fn ping(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    headers: HeaderMap,
    Query(params): Query<PingQuery>,
) -> AppResult<Json<PingResponse>> {
    let site_id = params
        .site
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::InvalidInput("no site id given".to_string()))?;
    let offset = UtcOffset::parse_optional(params.utcoffset.as_deref())?;

    let site = state.tracker.new_site(&auth.user_id, &site_id).await?;
    site.record_visit(&visit_from_headers(&headers)).await?;

    let visits = site.get_visits(offset).await?;
    let logs = site.get_logs().await?;
    let site_links = state.tracker.get_site_links(&auth.user_id).await?;

    Ok(Json(PingResponse {
        visits,
        logs,
        site_links,
    }))
}

/// Export everything stored for the logged-in user
pub async fn dump(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(params): Query<OffsetQuery>,
) -> AppResult<Json<Dump>> {
    let offset = UtcOffset::parse_optional(params.utcoffset.as_deref())?;
    let dump = state
        .tracker
        .dump(&state.accounts, &auth.user_id, offset)
        .await?;

    Ok(Json(dump))
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: String,
    }

    Json(HealthResponse {
        status: "OK".to_string(),
    })
}

fn visit_from_headers(headers: &HeaderMap) -> Visit {
    Visit {
        referrer: header_text(headers, header::REFERER),
        user_agent: header_text(headers, header::USER_AGENT),
        ..Visit::now()
    }
}

fn header_text(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.chars().take(MAX_LOGGED_HEADER_CHARS).collect())
}
