//! End-to-end tests for the HTTP API
//!
//! Requests are driven straight into the router with `tower::ServiceExt`,
//! using the in-memory backend.

use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use chrono::{DateTime, Duration};
use serde_json::Value;
use siteping::api::create_api_router;
use siteping::config::SessionConfig;
use siteping::storage::{MemoryStorage, Storage};
use std::sync::Arc;
use tower::ServiceExt;

/// Helper to create a router over fresh storage
fn create_test_app() -> Router {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    create_api_router(storage, &SessionConfig::default())
}

fn form_request(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_with_cookie(uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::COOKIE, cookie)
        .header(header::REFERER, "https://blog.example.com/post")
        .header(header::USER_AGENT, "integration-test")
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// `name=value` pair from the response's Set-Cookie header
fn session_cookie(response: &Response<Body>) -> String {
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("session cookie is set")
        .to_str()
        .unwrap();
    set_cookie.split(';').next().unwrap().trim().to_string()
}

/// Register a user and return their session cookie
async fn register(app: &Router, user: &str, password: &str) -> String {
    let response = app
        .clone()
        .oneshot(form_request(
            "/api/register",
            &format!("user={user}&password={password}"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    session_cookie(&response)
}

#[tokio::test]
async fn test_health_check() {
    let app = create_test_app();

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "OK");
}

#[tokio::test]
async fn test_register_then_ping_and_dump() {
    let app = create_test_app();
    let cookie = register(&app, "alice", "hunter2").await;

    let response = app
        .clone()
        .oneshot(get_with_cookie("/api/ping?site=blog", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let ping = body_json(response).await;
    assert_eq!(ping["visits"]["all"]["all"], 1);
    assert_eq!(ping["logs"].as_array().unwrap().len(), 1);
    assert_eq!(ping["logs"][0]["referrer"], "https://blog.example.com/post");
    assert_eq!(ping["logs"][0]["user_agent"], "integration-test");
    assert_eq!(ping["site_links"]["blog"], 1);

    let response = app
        .clone()
        .oneshot(get_with_cookie("/api/ping?site=blog&utcoffset=120", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let ping = body_json(response).await;
    assert_eq!(ping["visits"]["all"]["all"], 2);
    assert_eq!(ping["site_links"]["blog"], 2);

    // Day buckets are the logged instants seen from UTC+02:00
    let mut expected_days = serde_json::Map::new();
    for entry in ping["logs"].as_array().unwrap() {
        let instant = DateTime::from_timestamp(entry["timestamp"].as_i64().unwrap(), 0).unwrap();
        let local = instant + Duration::minutes(120);
        let day = local.format("%Y-%m-%d").to_string();
        let count = expected_days.get(&day).and_then(Value::as_i64).unwrap_or(0);
        expected_days.insert(day, Value::from(count + 1));
    }
    assert_eq!(ping["visits"]["day"], Value::Object(expected_days));

    let response = app
        .clone()
        .oneshot(get_with_cookie("/api/dump", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let dump = body_json(response).await;
    assert_eq!(dump["user"]["id"], "alice");
    assert!(!dump["user"]["token"].as_str().unwrap().is_empty());
    assert_eq!(dump["sites"]["blog"]["count"], 2);
    assert_eq!(dump["sites"]["blog"]["logs"].as_array().unwrap().len(), 2);
    let days = dump["sites"]["blog"]["visits"]["day"].as_object().unwrap();
    let day_total: i64 = days.values().map(|v| v.as_i64().unwrap()).sum();
    assert_eq!(day_total, 2);
}

/// The single day key of a `visits` object
fn only_day_key(visits: &Value) -> String {
    let days = visits["day"].as_object().unwrap();
    assert_eq!(days.len(), 1);
    days.keys().next().unwrap().clone()
}

#[tokio::test]
async fn test_offset_shifts_day_keys() {
    let app = create_test_app();
    let cookie = register(&app, "alice", "hunter2").await;

    let ping = body_json(
        app.clone()
            .oneshot(get_with_cookie("/api/ping?site=edge&utcoffset=840", &cookie))
            .await
            .unwrap(),
    )
    .await;
    let timestamp = ping["logs"][0]["timestamp"].as_i64().unwrap();
    let instant = DateTime::from_timestamp(timestamp, 0).unwrap();

    let east = only_day_key(&ping["visits"]);
    assert_eq!(
        east,
        (instant + Duration::minutes(840)).format("%Y-%m-%d").to_string()
    );

    let dump = body_json(
        app.oneshot(get_with_cookie("/api/dump?utcoffset=-720", &cookie))
            .await
            .unwrap(),
    )
    .await;
    let west = only_day_key(&dump["sites"]["edge"]["visits"]);
    assert_eq!(
        west,
        (instant - Duration::minutes(720)).format("%Y-%m-%d").to_string()
    );

    // 26 hours apart, so never the same calendar day
    assert_ne!(east, west);
}

#[tokio::test]
async fn test_login_with_missing_field_is_rejected() {
    let app = create_test_app();
    register(&app, "alice", "hunter2").await;

    let response = app
        .oneshot(form_request("/api/login", "user=alice"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Missing Input");
}

#[tokio::test]
async fn test_login_with_wrong_password_is_rejected() {
    let app = create_test_app();
    register(&app, "alice", "hunter2").await;

    let response = app
        .oneshot(form_request("/api/login", "user=alice&password=nope"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["error"],
        "Wrong username or password"
    );
}

#[tokio::test]
async fn test_login_accepts_password_and_token() {
    let app = create_test_app();
    let cookie = register(&app, "alice", "hunter2").await;

    let response = app
        .clone()
        .oneshot(form_request("/api/login", "user=alice&password=hunter2"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let profile = body_json(response).await;
    assert_eq!(profile["id"], "alice");
    assert!(profile["last_access"].is_i64(), "password login touches access");

    let dump = body_json(
        app.clone()
            .oneshot(get_with_cookie("/api/dump", &cookie))
            .await
            .unwrap(),
    )
    .await;
    let token = dump["user"]["token"].as_str().unwrap().to_string();

    let response = app
        .oneshot(form_request(
            "/api/login",
            &format!("user=alice&password={token}"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    session_cookie(&response);
}

#[tokio::test]
async fn test_requests_without_session_are_unauthorized() {
    let app = create_test_app();

    for uri in ["/api/ping?site=blog", "/api/dump", "/api/user"] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
    }

    let response = app
        .oneshot(get_with_cookie("/api/dump", "siteping_session=forged"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_bad_offset_is_rejected() {
    let app = create_test_app();
    let cookie = register(&app, "alice", "hunter2").await;

    for uri in [
        "/api/ping?site=blog&utcoffset=abc",
        "/api/ping?site=blog&utcoffset=900",
        "/api/dump?utcoffset=-721",
    ] {
        let response = app
            .clone()
            .oneshot(get_with_cookie(uri, &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
    }

    // A rejected ping records nothing
    let dump = body_json(
        app.oneshot(get_with_cookie("/api/dump", &cookie))
            .await
            .unwrap(),
    )
    .await;
    assert!(dump["sites"].as_object().unwrap().is_empty());
}

#[tokio::test]
async fn test_ping_without_site_is_rejected() {
    let app = create_test_app();
    let cookie = register(&app, "alice", "hunter2").await;

    let response = app
        .oneshot(get_with_cookie("/api/ping", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_duplicate_registration_is_rejected() {
    let app = create_test_app();
    register(&app, "alice", "hunter2").await;

    let response = app
        .clone()
        .oneshot(form_request("/api/register", "user=alice&password=other"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().get(header::SET_COOKIE).is_none());

    // The original password still works
    let response = app
        .oneshot(form_request("/api/login", "user=alice&password=hunter2"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_logout_ends_session() {
    let app = create_test_app();
    let cookie = register(&app, "alice", "hunter2").await;

    let response = app
        .clone()
        .oneshot(get_with_cookie("/api/logout", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/app");

    let response = app
        .oneshot(get_with_cookie("/api/user", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_bearer_session_is_accepted() {
    let app = create_test_app();
    let cookie = register(&app, "alice", "hunter2").await;
    let session = cookie.split_once('=').unwrap().1.to_string();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/user")
                .header(header::AUTHORIZATION, format!("Bearer {session}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["id"], "alice");
}

#[tokio::test]
async fn test_prefs_store_raw_query() {
    let app = create_test_app();
    let cookie = register(&app, "alice", "hunter2").await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/prefs/range?from=2024-01-01&to=2024-02-01")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/prefs/site?blog")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let profile = body_json(
        app.oneshot(get_with_cookie("/api/user", &cookie))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(profile["prefs"]["range"], "from=2024-01-01&to=2024-02-01");
    assert_eq!(profile["prefs"]["site"], "blog");
}

#[tokio::test]
async fn test_users_do_not_see_each_others_sites() {
    let app = create_test_app();
    let alice = register(&app, "alice", "pw-a").await;
    let bob = register(&app, "bob", "pw-b").await;

    app.clone()
        .oneshot(get_with_cookie("/api/ping?site=blog", &alice))
        .await
        .unwrap();
    let ping = body_json(
        app.oneshot(get_with_cookie("/api/ping?site=shop", &bob))
            .await
            .unwrap(),
    )
    .await;

    let links = ping["site_links"].as_object().unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links["shop"], 1);
}
