//! Session integrity gates: replay audit, admin gate, CSRF gate.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use serde_json::json;

use crate::http::middleware::services;
use crate::http::responder::{Rejection, Responder, CSRF_MESSAGE};
use crate::http::server::AppState;
use crate::observability::events;
use crate::security::context::RequestContext;
use crate::security::session::SessionHandle;
use crate::security::SecurityServices;

pub const X_CSRF_TOKEN: &str = "x-csrf-token";

pub async fn security_guard(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let services = services(&state, &req);
    let (Some(ctx), Some(handle)) = (
        req.extensions().get::<RequestContext>().cloned(),
        req.extensions().get::<SessionHandle>().cloned(),
    ) else {
        return next.run(req).await;
    };
    let responder = req.extensions().get::<Responder>().copied().unwrap_or(Responder::Json);

    audit_replay(&services, &handle, &ctx);

    if let Some(rejection) = admin_gate(&services, &handle, &ctx, responder) {
        return responder.reject(rejection);
    }

    let csrf_scope = ctx.is_mutating() && services.config.csrf.protected_paths.iter().any(|p| *p == ctx.path);
    if !csrf_scope {
        return next.run(req).await;
    }

    let Some((req, candidate)) = extract_csrf_token(req, services.firewall.max_body_bytes()).await else {
        return reject_csrf(&services, &handle, &ctx, responder, None);
    };

    let valid = {
        let session = handle.lock();
        services.csrf.validate_token(&session, candidate.as_deref())
    };
    if !valid {
        return reject_csrf(&services, &handle, &ctx, responder, candidate.as_deref());
    }

    next.run(req).await
}

fn audit_replay(services: &SecurityServices, handle: &SessionHandle, ctx: &RequestContext) {
    let session = handle.lock();
    services.replay.detect_replay_attack(&session, ctx);
}

fn admin_gate(
    services: &SecurityServices,
    handle: &SessionHandle,
    ctx: &RequestContext,
    responder: Responder,
) -> Option<Rejection> {
    let auth_config = &services.config.auth;
    if !auth_config.enabled || !auth_config.protected_paths.iter().any(|p| *p == ctx.path) {
        return None;
    }

    let mut session = handle.lock();
    if services.auth.is_authenticated(&mut session, ctx) {
        return None;
    }

    // An expired or hijacked session loses its replay snapshot with its auth.
    if session.data().auth.is_none() {
        session.data_mut().replay = None;
    }
    if !responder.is_json() && ctx.method == axum::http::Method::GET {
        session.data_mut().intended_path = Some(ctx.uri.clone());
    }
    drop(session);

    services.logger.log_event(
        events::AUTH_REQUIRED,
        ctx.trace_id(),
        json!({ "ip": ctx.client_ip, "path": ctx.path }),
    );
    Some(Rejection::Unauthenticated {
        login_path: auth_config.login_path.clone(),
    })
}

fn reject_csrf(
    services: &SecurityServices,
    handle: &SessionHandle,
    ctx: &RequestContext,
    responder: Responder,
    candidate: Option<&str>,
) -> Response {
    let token_state = if candidate.is_some_and(|t| !t.trim().is_empty()) {
        "present"
    } else {
        "missing"
    };
    services.logger.log_event(
        events::CSRF_FAILED,
        ctx.trace_id(),
        json!({ "ip": ctx.client_ip, "path": ctx.path, "token_state": token_state }),
    );

    let redirect_to = if responder.is_json() {
        ctx.path.clone()
    } else {
        handle.lock().data_mut().flash_error = Some(CSRF_MESSAGE.to_string());
        redirect_target(ctx)
    };
    responder.reject(Rejection::CsrfInvalid { redirect_to })
}

/// Path of the originating page; never leaves this origin.
fn redirect_target(ctx: &RequestContext) -> String {
    ctx.referer
        .as_deref()
        .and_then(|r| url::Url::parse(r).ok())
        .map(|u| u.path().to_string())
        .filter(|p| p.starts_with('/') && !p.starts_with("//"))
        .unwrap_or_else(|| ctx.path.clone())
}

/// Token from `X-CSRF-Token`, or from the `csrf_token` / `_token` form field.
///
/// A form body is buffered and put back so the handler can still read it.
/// `None` when the body cannot be read.
async fn extract_csrf_token(req: Request, limit: usize) -> Option<(Request, Option<String>)> {
    if let Some(token) = header_token(req.headers()) {
        return Some((req, Some(token)));
    }

    let is_form = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("application/x-www-form-urlencoded"));
    if !is_form {
        return Some((req, None));
    }

    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, limit).await.ok()?;
    let token = url::form_urlencoded::parse(&bytes)
        .find(|(key, _)| key == "csrf_token" || key == "_token")
        .map(|(_, value)| value.into_owned());

    Some((Request::from_parts(parts, Body::from(bytes)), token))
}

fn header_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(X_CSRF_TOKEN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
