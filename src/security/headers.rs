//! CSP nonce issuance and hardening response headers.
//!
//! # Responsibilities
//! - Issue one random nonce per request for inline `<script>` blocks
//! - Apply the full security header set exactly once per response
//! - Build the session cookie with `HttpOnly`, `SameSite` and `Secure` flags (`cookie`)
//!
//! # Design Decisions
//! - `style-src` keeps `'unsafe-inline'`: the third-party CSS CDN cannot take nonces
//! - Without a nonce, `script-src` falls back to `'unsafe-inline'`

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use axum::response::Response;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cookie::Cookie;
use rand::RngCore;

use crate::config::SameSite;

/// Per-request CSP nonce, also placed in request extensions for handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CspNonce(String);

impl CspNonce {
    /// Base64 of 16 bytes from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(STANDARD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Marker stored in response extensions once headers are applied.
#[derive(Debug, Clone, Copy)]
struct HeadersApplied;

pub struct SecurityHeaders;

impl SecurityHeaders {
    /// Apply the header set. A second call on the same response is a no-op.
    pub fn apply(response: &mut Response, nonce: Option<&str>, is_https: bool) {
        if response.extensions().get::<HeadersApplied>().is_some() {
            return;
        }
        Self::write(response.headers_mut(), nonce, is_https);
        response.extensions_mut().insert(HeadersApplied);
    }

    fn write(headers: &mut HeaderMap, nonce: Option<&str>, is_https: bool) {
        let fixed: [(HeaderName, &'static str); 9] = [
            (header::X_FRAME_OPTIONS, "SAMEORIGIN"),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
            (header::REFERRER_POLICY, "no-referrer-when-downgrade"),
            (HeaderName::from_static("permissions-policy"), "geolocation=(), microphone=(), camera=()"),
            (HeaderName::from_static("x-download-options"), "noopen"),
            (HeaderName::from_static("x-permitted-cross-domain-policies"), "none"),
            (HeaderName::from_static("cross-origin-opener-policy"), "same-origin"),
            (HeaderName::from_static("cross-origin-resource-policy"), "same-origin"),
            (HeaderName::from_static("cross-origin-embedder-policy"), "unsafe-none"),
        ];
        for (name, value) in fixed {
            headers.insert(name, HeaderValue::from_static(value));
        }

        if is_https {
            headers.insert(
                header::STRICT_TRANSPORT_SECURITY,
                HeaderValue::from_static("max-age=63072000; includeSubDomains"),
            );
        }

        match HeaderValue::from_str(&content_security_policy(nonce)) {
            Ok(value) => {
                headers.insert(header::CONTENT_SECURITY_POLICY, value);
            }
            Err(e) => {
                tracing::error!(error = %e, "Invalid CSP nonce, using fallback policy");
                if let Ok(value) = HeaderValue::from_str(&content_security_policy(None)) {
                    headers.insert(header::CONTENT_SECURITY_POLICY, value);
                }
            }
        }
    }
}

/// Build the `Content-Security-Policy` value.
pub fn content_security_policy(nonce: Option<&str>) -> String {
    let script_src = match nonce.filter(|n| !n.is_empty()) {
        Some(nonce) => format!(
            "script-src 'self' 'nonce-{}' https://cdn.tailwindcss.com https://cdn.jsdelivr.net",
            nonce
        ),
        None => "script-src 'self' 'unsafe-inline' https://cdn.tailwindcss.com https://cdn.jsdelivr.net".to_string(),
    };

    [
        "default-src 'self'".to_string(),
        "img-src 'self' data: blob: https:".to_string(),
        "media-src 'self' data: blob: https:".to_string(),
        "style-src 'self' 'unsafe-inline' https://fonts.googleapis.com https://cdn.tailwindcss.com".to_string(),
        "font-src 'self' https://fonts.gstatic.com data:".to_string(),
        script_src,
        "connect-src 'self' https:".to_string(),
        "frame-src 'self' https://www.youtube.com https://www.youtube-nocookie.com".to_string(),
        "frame-ancestors 'self'".to_string(),
    ]
    .join("; ")
}

/// Session cookie carrying the id.
pub fn session_cookie(name: &str, value: &str, same_site: SameSite, secure: bool) -> Cookie<'static> {
    Cookie::build((name.to_string(), value.to_string()))
        .path("/")
        .http_only(true)
        .same_site(cookie_same_site(same_site))
        .secure(secure)
        .build()
}

/// Removal cookie for the session: empty value, `Max-Age=0`, expiry in the past.
pub fn expired_session_cookie(name: &str, same_site: SameSite, secure: bool) -> Cookie<'static> {
    let mut cookie = session_cookie(name, "", same_site, secure);
    cookie.make_removal();
    cookie
}

fn cookie_same_site(same_site: SameSite) -> cookie::SameSite {
    match same_site {
        SameSite::Lax => cookie::SameSite::Lax,
        SameSite::Strict => cookie::SameSite::Strict,
    }
}
