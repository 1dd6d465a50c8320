//! Session lifecycle through the HTTP surface: fixation, hijack, expiry,
//! logout and replay auditing.

mod common;

use axum::http::{header, StatusCode};
use request_shield::observability::security_log::read_entries;
use serde_json::json;

use common::*;

fn seccion(cookie: &str) -> axum::http::Request<axum::body::Body> {
    with_cookie(html(get("/seccion")), cookie)
}

#[tokio::test]
async fn test_login_grants_access() {
    let app = TestApp::new();
    let cookie = app.login().await;

    let response = app.send(seccion(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains(ADMIN_EMAIL));

    let events = app.events();
    assert!(events.contains(&"session_replay_token_issued".to_string()));
}

#[tokio::test]
async fn test_login_success_is_logged_once_with_trace_id() {
    let app = TestApp::new();
    app.login().await;

    let entries: Vec<_> = read_entries(&app.log_path)
        .unwrap()
        .into_iter()
        .filter(|e| e.event == "login_success")
        .collect();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].trace_id.is_some());
    assert_eq!(entries[0].context["ip"], CLIENT_IP);
}

#[tokio::test]
async fn test_login_rotates_session_id() {
    let app = TestApp::new();
    let (before, token) = app.csrf(None).await;

    let body = format!("email=admin%40example.com&password={}&csrf_token={}", ADMIN_PASSWORD, token);
    let response = app
        .send(with_cookie(html(post_form("/login", &body)), &before))
        .await;
    let after = session_cookie(&response).unwrap();
    assert_ne!(before, after);

    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));

    // The pre-login id no longer resolves to anything.
    let response = app.send(seccion(&before)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn test_failed_login_keeps_session_and_sets_flash() {
    let app = TestApp::new();
    let (cookie, token) = app.csrf(None).await;

    let body = format!("email=admin%40example.com&password=nope&csrf_token={}", token);
    let response = app
        .send(with_cookie(html(post_form("/login", &body)), &cookie))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/login");
    assert!(session_cookie(&response).is_none());

    let page = body_text(app.send(with_cookie(html(get("/login")), &cookie)).await).await;
    assert!(page.contains("Credenciales inválidas. Intentos restantes: 4."));
}

#[tokio::test]
async fn test_ip_change_is_treated_as_hijack() {
    let app = TestApp::new();
    let cookie = app.login().await;

    let response = app
        .send(with_header(seccion(&cookie), "x-forwarded-for", "203.0.113.9"))
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/login");
    assert!(app.events().contains(&"session_hijack_detected".to_string()));

    // Auth was stripped, so the first client is out too.
    assert_eq!(app.send(seccion(&cookie)).await.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn test_user_agent_change_is_treated_as_hijack() {
    let app = TestApp::new();
    let cookie = app.login().await;

    let response = app
        .send(with_header(seccion(&cookie), "user-agent", "curl/8.0"))
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(app.events().contains(&"session_hijack_detected".to_string()));
}

#[tokio::test]
async fn test_inactivity_expiry() {
    let app = TestApp::new();
    let cookie = app.login().await;

    app.clock.advance(1_000);
    assert_eq!(app.send(seccion(&cookie)).await.status(), StatusCode::OK);

    // Activity refreshed above, so another 1000s is still inside the window.
    app.clock.advance(1_000);
    assert_eq!(app.send(seccion(&cookie)).await.status(), StatusCode::OK);

    app.clock.advance(1_801);
    let response = app.send(seccion(&cookie)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(app.events().contains(&"session_expired_ttl".to_string()));
}

#[tokio::test]
async fn test_absolute_lifetime_expiry() {
    let app = TestApp::with_config(|c| c.session.max_lifetime_secs = 100);
    let cookie = app.login().await;

    app.clock.advance(60);
    assert_eq!(app.send(seccion(&cookie)).await.status(), StatusCode::OK);

    app.clock.advance(60);
    let response = app.send(seccion(&cookie)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let events = app.events();
    assert!(events.contains(&"session_expired_lifetime".to_string()));
    assert!(!events.contains(&"session_expired_ttl".to_string()));
}

#[tokio::test]
async fn test_logout_expires_cookie() {
    let app = TestApp::new();
    let cookie = app.login().await;
    let (cookie, token) = app.csrf(Some(&cookie)).await;

    let response = app
        .send(with_cookie(html(post_form("/logout", &format!("csrf_token={}", token))), &cookie))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/login");
    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.starts_with("shield_session=;"));
    assert!(set_cookie.contains("Max-Age=0"));

    assert_eq!(app.send(seccion(&cookie)).await.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn test_logout_requires_csrf() {
    let app = TestApp::new();
    let cookie = app.login().await;

    let response = app
        .send(with_cookie(post_form("/logout", "csrf_token=forged"), &cookie))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.send(seccion(&cookie)).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_replay_header_is_audited_softly() {
    let app = TestApp::new();
    let cookie = app.login().await;

    let response = app.send(with_cookie(get("/api/csrf-token"), &cookie)).await;
    let tokens = body_json(response).await;
    let csrf = tokens["csrf_token"].as_str().unwrap().to_string();
    let replay = tokens["replay_token"].as_str().unwrap().to_string();
    assert_eq!(replay.len(), 64);

    let body = json!({ "heroA": "thor" }).to_string();
    let request = |replay_header: &str| {
        with_header(
            with_header(
                with_cookie(post_json("/api/rag/heroes", &body), &cookie),
                "x-csrf-token",
                &csrf,
            ),
            "x-session-replay",
            replay_header,
        )
    };

    assert_eq!(app.send(request("bogus")).await.status(), StatusCode::OK);
    assert_eq!(app.send(request(&replay)).await.status(), StatusCode::OK);

    let events = app.events();
    assert!(events.contains(&"session_replay_mismatch_soft".to_string()));
    assert!(events.contains(&"session_replay_valid_soft".to_string()));
    assert!(!events.contains(&"session_replay_suspected".to_string()));
}

#[tokio::test]
async fn test_anonymous_has_no_replay_token() {
    let app = TestApp::new();
    let body = body_json(app.send(get("/api/csrf-token")).await).await;
    assert!(body["replay_token"].is_null());
    assert_eq!(body["csrf_token"].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn test_audit_log_redacts_secrets() {
    let app = TestApp::new();
    app.login().await;

    let raw = std::fs::read_to_string(&app.log_path).unwrap();
    assert!(!raw.contains(ADMIN_PASSWORD));
}
