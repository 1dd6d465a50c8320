//! Buffers the body and runs the [`ApiFirewall`](crate::security::firewall::ApiFirewall).

use axum::{
    body::Body,
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::http::middleware::services;
use crate::http::responder::{Rejection, Responder};
use crate::http::server::AppState;
use crate::security::context::RequestContext;
use crate::security::firewall::{FirewallViolation, Payload};

pub async fn api_firewall(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let services = services(&state, &req);
    let Some(ctx) = req.extensions().get::<RequestContext>().cloned() else {
        return next.run(req).await;
    };
    if !services.firewall.applies_to(&ctx.path) {
        return next.run(req).await;
    }

    let responder = req.extensions().get::<Responder>().copied().unwrap_or(Responder::Json);
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let content_length = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let limit = services.firewall.max_body_bytes();
    let block = |violation: FirewallViolation| {
        tracing::warn!(trace_id = ?ctx.trace_id, path = %ctx.path, reason = violation.reason(), "Firewall blocked request");
        responder.reject(Rejection::FirewallBlocked {
            message: violation.message(),
        })
    };

    if content_length.is_some_and(|len| len > limit as u64) {
        let violation = FirewallViolation::BodyTooLarge;
        services.firewall.report(&ctx, &violation, content_type.as_deref());
        return block(violation);
    }

    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(_) => {
            let violation = FirewallViolation::BodyTooLarge;
            services.firewall.report(&ctx, &violation, content_type.as_deref());
            return block(violation);
        }
    };

    let payload = Payload {
        content_type: content_type.as_deref(),
        content_length,
        body: &bytes,
    };
    if let Err(violation) = services.firewall.check(&ctx, payload) {
        return block(violation);
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}
