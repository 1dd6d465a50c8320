//! Outermost stage: CSP nonce and security headers.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::http::middleware::context::is_https;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::security::headers::{CspNonce, SecurityHeaders};
use crate::security::SecurityServices;

pub async fn security_headers(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let services: Arc<SecurityServices> = state.current();
    let headers_config = services.config.headers.clone();
    let https = is_https(&services.config.listener, req.headers());

    let nonce = headers_config.csp_nonce.then(CspNonce::generate);
    if let Some(nonce) = &nonce {
        req.extensions_mut().insert(nonce.clone());
    }
    req.extensions_mut().insert(services);

    let mut response = next.run(req).await;
    metrics::record_request(response.status().as_u16());

    if headers_config.enabled {
        SecurityHeaders::apply(&mut response, nonce.as_ref().map(CspNonce::as_str), https);
    }
    response
}
