//! Session transport: cookie or bearer header in, authenticated user out

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use std::sync::Arc;
use tower_cookies::{
    cookie::{time::Duration, SameSite},
    Cookie, Cookies,
};

use crate::api::handlers::AppState;
use crate::error::AppError;

pub const SESSION_COOKIE: &str = "siteping_session";

/// The user owning the request's session
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let session = session_token(&parts.headers, parts.extensions.get::<Cookies>())
            .ok_or(AppError::Unauthenticated)?;
        let user_id = state.sessions.resolve(&session).await?;

        Ok(Self { user_id })
    }
}

/// Session id from `Authorization: Bearer`, falling back to the cookie
pub fn session_token(headers: &HeaderMap, cookies: Option<&Cookies>) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    cookies
        .and_then(|c| c.get(SESSION_COOKIE))
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

pub fn set_session_cookie(cookies: &Cookies, session: &str, secure: bool) {
    let cookie = Cookie::build((SESSION_COOKIE, session.to_string()))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build();
    cookies.add(cookie);
}

pub fn clear_session_cookie(cookies: &Cookies) {
    let cookie = Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .max_age(Duration::ZERO)
        .build();
    cookies.add(cookie);
}
