//! Fixed-window limiting for protected routes.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use serde_json::json;

use crate::http::middleware::services;
use crate::http::responder::{Rejection, Responder};
use crate::http::server::AppState;
use crate::observability::events;
use crate::security::context::RequestContext;

pub async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let services = services(&state, &req);
    let Some(ctx) = req.extensions().get::<RequestContext>() else {
        return next.run(req).await;
    };
    if !services.rate_limiter.policy().protects(&ctx.method, &ctx.path) {
        return next.run(req).await;
    }

    let decision = services.rate_limiter.hit(&ctx.client_ip, &ctx.path);
    if !decision.is_limited {
        return next.run(req).await;
    }

    services.logger.log_event(
        events::RATE_LIMIT,
        ctx.trace_id(),
        json!({
            "ip": ctx.client_ip,
            "path": ctx.path,
            "status": 429,
            "max": decision.max,
            "remaining": decision.remaining,
            "reset_at": decision.reset_at,
        }),
    );

    let responder = req.extensions().get::<Responder>().copied().unwrap_or(Responder::Json);
    let retry_after = decision.reset_at.saturating_sub(services.clock.now()).max(1);
    responder.reject(Rejection::RateLimited {
        reset_at: decision.reset_at,
        retry_after,
    })
}
