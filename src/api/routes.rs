use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_cookies::CookieManagerLayer;
use tower_http::trace::TraceLayer;

use crate::config::SessionConfig;
use crate::storage::Storage;

use super::handlers::{
    dump, health_check, login, logout, ping, register, set_pref_range, set_pref_site, user,
    AppState,
};

pub fn create_api_router(storage: Arc<dyn Storage>, session: &SessionConfig) -> Router {
    let state = Arc::new(AppState::new(storage, session));

    let api_routes = Router::new()
        .route("/login", post(login))
        .route("/register", post(register))
        .route("/logout", get(logout).post(logout))
        .route("/user", get(user))
        .route("/prefs/range", post(set_pref_range))
        .route("/prefs/site", post(set_pref_site))
        .route("/ping", get(ping))
        .route("/dump", get(dump))
        .with_state(state);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes)
        .layer(CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
}
