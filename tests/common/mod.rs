//! Shared helpers for driving the full pipeline in-process.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use request_shield::observability::security_log::read_entries;
use request_shield::security::clock::ManualClock;
use request_shield::{HttpServer, ShieldConfig};

pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const ADMIN_PASSWORD: &str = "marvel2025";
pub const CLIENT_IP: &str = "10.0.0.1";
pub const USER_AGENT: &str = "test-agent/1.0";
pub const START: u64 = 1_700_000_000;

/// Argon2 hash with small parameters so tests stay fast.
pub fn admin_hash() -> String {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| {
        let params = Params::new(1024, 1, 1, None).unwrap();
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let salt = SaltString::generate(&mut OsRng);
        argon2
            .hash_password(ADMIN_PASSWORD.as_bytes(), &salt)
            .unwrap()
            .to_string()
    })
    .clone()
}

pub struct TestApp {
    pub router: Router,
    pub clock: Arc<ManualClock>,
    pub log_path: PathBuf,
    _dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(customize: impl FnOnce(&mut ShieldConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("security.log");

        let mut config = ShieldConfig::default();
        config.listener.trust_forwarded_for = true;
        config.auth.password_hash = admin_hash();
        config.observability.security_log_path = log_path.to_string_lossy().into_owned();
        customize(&mut config);

        let clock = Arc::new(ManualClock::new(START));
        let server = HttpServer::with_clock(config, clock.clone()).unwrap();

        Self {
            router: server.router(),
            clock,
            log_path,
            _dir: dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Event names written to the security log so far.
    pub fn events(&self) -> Vec<String> {
        read_entries(&self.log_path)
            .unwrap_or_default()
            .into_iter()
            .map(|e| e.event)
            .collect()
    }

    /// Fetch a CSRF token, starting a session when `cookie` is `None`.
    pub async fn csrf(&self, cookie: Option<&str>) -> (String, String) {
        let mut req = get("/api/csrf-token");
        if let Some(cookie) = cookie {
            req = with_cookie(req, cookie);
        }
        let response = self.send(req).await;
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = session_cookie(&response)
            .or_else(|| cookie.map(str::to_string))
            .expect("session cookie");
        let body = body_json(response).await;
        (cookie, body["csrf_token"].as_str().unwrap().to_string())
    }

    /// Log in through the browser flow; returns the post-login cookie.
    pub async fn login(&self) -> String {
        let (cookie, token) = self.csrf(None).await;
        let body = format!(
            "email={}&password={}&csrf_token={}",
            ADMIN_EMAIL.replace('@', "%40"),
            ADMIN_PASSWORD,
            token
        );
        let response = self.send(with_cookie(html(post_form("/login", &body)), &cookie)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER, "login should redirect");
        session_cookie(&response).expect("login issues a new session cookie")
    }
}

pub fn builder(method: &str, path: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(path)
        .header(header::USER_AGENT, USER_AGENT)
        .header("x-forwarded-for", CLIENT_IP)
}

pub fn get(path: &str) -> Request<Body> {
    builder("GET", path).body(Body::empty()).unwrap()
}

pub fn post_json(path: &str, body: &str) -> Request<Body> {
    builder("POST", path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn post_form(path: &str, body: &str) -> Request<Body> {
    builder("POST", path)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Mark a request as a browser navigation.
pub fn html(mut req: Request<Body>) -> Request<Body> {
    req.headers_mut()
        .insert(header::ACCEPT, "text/html,application/xhtml+xml".parse().unwrap());
    req
}

pub fn with_cookie(mut req: Request<Body>, cookie: &str) -> Request<Body> {
    req.headers_mut().insert(header::COOKIE, cookie.parse().unwrap());
    req
}

pub fn with_header(mut req: Request<Body>, name: &'static str, value: &str) -> Request<Body> {
    req.headers_mut().insert(name, value.parse().unwrap());
    req
}

/// `name=value` of the session cookie set by the response, if any.
pub fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("shield_session=") && !v.contains("Max-Age=0"))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}
