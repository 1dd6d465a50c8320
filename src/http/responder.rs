//! Content negotiation for every short-circuit response.
//!
//! The audience is decided once per request by the context middleware:
//! `/api/` paths and clients that do not accept `text/html` get JSON, browser
//! navigations get HTML pages or redirects.

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Json, Redirect, Response};
use serde_json::json;

use crate::observability::metrics;

pub const CSRF_MESSAGE: &str =
    "Token CSRF inválido o ausente. Por favor, recarga la página para restaurar la sesión de seguridad.";

/// Why a pipeline stage stopped the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    RateLimited { reset_at: u64, retry_after: u64 },
    FirewallBlocked { message: &'static str },
    CsrfInvalid { redirect_to: String },
    Unauthenticated { login_path: String },
}

impl Rejection {
    pub fn stage(&self) -> &'static str {
        match self {
            Rejection::RateLimited { .. } => "rate_limit",
            Rejection::FirewallBlocked { .. } => "firewall",
            Rejection::CsrfInvalid { .. } => "csrf",
            Rejection::Unauthenticated { .. } => "auth",
        }
    }
}

/// Negotiated response style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Responder {
    Json,
    Html,
}

impl Responder {
    pub fn negotiate(path: &str, headers: &HeaderMap) -> Self {
        if path.starts_with("/api/") {
            return Responder::Json;
        }
        let wants_html = headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.to_ascii_lowercase().contains("text/html"));
        if wants_html {
            Responder::Html
        } else {
            Responder::Json
        }
    }

    pub fn is_json(&self) -> bool {
        matches!(self, Responder::Json)
    }

    /// Render a rejection for this audience.
    pub fn reject(&self, rejection: Rejection) -> Response {
        metrics::record_rejection(rejection.stage());

        match (self, rejection) {
            (Responder::Json, Rejection::RateLimited { reset_at, retry_after }) => with_retry_after(
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({
                        "error": "rate_limited",
                        "message": "Too many requests, try again later.",
                        "reset_at": reset_at,
                    })),
                )
                    .into_response(),
                retry_after,
            ),
            (Responder::Html, Rejection::RateLimited { retry_after, .. }) => with_retry_after(
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    Html(page("429", "Demasiadas peticiones, intenta de nuevo en unos segundos.")),
                )
                    .into_response(),
                retry_after,
            ),
            (Responder::Json, Rejection::FirewallBlocked { message }) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "estado": "error", "mensaje": message })),
            )
                .into_response(),
            (Responder::Html, Rejection::FirewallBlocked { .. }) => {
                (StatusCode::BAD_REQUEST, Html(page("400", "Petición inválida."))).into_response()
            }
            (Responder::Json, Rejection::CsrfInvalid { .. }) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "estado": "error", "mensaje": CSRF_MESSAGE })),
            )
                .into_response(),
            (Responder::Html, Rejection::CsrfInvalid { redirect_to }) => Redirect::to(&redirect_to).into_response(),
            (Responder::Json, Rejection::Unauthenticated { login_path }) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "error": "unauthenticated",
                    "message": "Authentication required.",
                    "login_path": login_path,
                })),
            )
                .into_response(),
            (Responder::Html, Rejection::Unauthenticated { login_path }) => {
                (StatusCode::FOUND, [(header::LOCATION, login_path)]).into_response()
            }
        }
    }
}

fn with_retry_after(mut response: Response, retry_after: u64) -> Response {
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

fn page(code: &str, message: &str) -> String {
    format!(
        "<!doctype html><html><body><h1>{}</h1><p>{}</p></body></html>",
        code, message
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_negotiation() {
        assert_eq!(Responder::negotiate("/api/x", &accept("text/html")), Responder::Json);
        assert_eq!(Responder::negotiate("/seccion", &accept("text/html,application/xhtml+xml")), Responder::Html);
        assert_eq!(Responder::negotiate("/seccion", &accept("application/json")), Responder::Json);
        assert_eq!(Responder::negotiate("/seccion", &HeaderMap::new()), Responder::Json);
    }

    #[test]
    fn test_rate_limited_shapes() {
        let json = Responder::Json.reject(Rejection::RateLimited { reset_at: 100, retry_after: 7 });
        assert_eq!(json.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(json.headers()[header::RETRY_AFTER], "7");

        let html = Responder::Html.reject(Rejection::RateLimited { reset_at: 100, retry_after: 7 });
        assert_eq!(html.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(html.headers()[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/html"));
    }

    #[test]
    fn test_csrf_html_redirects_back() {
        let response = Responder::Html.reject(Rejection::CsrfInvalid { redirect_to: "/login".to_string() });
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/login");
    }

    #[test]
    fn test_unauthenticated_shapes() {
        let html = Responder::Html.reject(Rejection::Unauthenticated { login_path: "/login".to_string() });
        assert_eq!(html.status(), StatusCode::FOUND);
        let json = Responder::Json.reject(Rejection::Unauthenticated { login_path: "/login".to_string() });
        assert_eq!(json.status(), StatusCode::UNAUTHORIZED);
    }
}
