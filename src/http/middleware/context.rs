//! Builds the per-request [`RequestContext`] and [`Responder`].

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::config::ListenerConfig;
use crate::http::middleware::services;
use crate::http::responder::Responder;
use crate::http::server::AppState;
use crate::security::context::{clean_user_agent, RequestContext};

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_SESSION_REPLAY: &str = "x-session-replay";

pub async fn request_context(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let services = services(&state, &req);
    let listener = &services.config.listener;

    let path = req.uri().path().to_string();
    let uri = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.clone());
    let headers = req.headers();

    let ctx = RequestContext {
        method: req.method().clone(),
        uri,
        client_ip: client_ip(listener, headers, req.extensions().get::<ConnectInfo<SocketAddr>>()),
        user_agent: clean_user_agent(header_str(headers, header::USER_AGENT.as_str()).unwrap_or_default()),
        is_https: is_https(listener, headers),
        trace_id: header_str(headers, X_REQUEST_ID).map(str::to_string),
        replay_header: header_str(headers, X_SESSION_REPLAY).map(str::to_string),
        referer: header_str(headers, header::REFERER.as_str()).map(str::to_string),
        path,
    };
    let responder = Responder::negotiate(&ctx.path, headers);

    tracing::debug!(
        trace_id = ?ctx.trace_id,
        method = %ctx.method,
        path = %ctx.path,
        client_ip = %ctx.client_ip,
        "Request context built"
    );

    req.extensions_mut().insert(ctx);
    req.extensions_mut().insert(responder);
    next.run(req).await
}

/// Peer address, or the first `X-Forwarded-For` hop when the proxy is trusted.
pub fn client_ip(listener: &ListenerConfig, headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> String {
    if listener.trust_forwarded_for {
        let forwarded = header_str(headers, "x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }
    peer.map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn is_https(listener: &ListenerConfig, headers: &HeaderMap) -> bool {
    if listener.force_https {
        return true;
    }
    listener.trust_forwarded_proto
        && header_str(headers, "x-forwarded-proto").is_some_and(|p| p.eq_ignore_ascii_case("https"))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
