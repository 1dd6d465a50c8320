//! Minimal application endpoints that sit behind the security pipeline.

use std::sync::Arc;

use axum::{
    body::Bytes,
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Json, Redirect, Response},
    Extension,
};
use serde::Deserialize;
use serde_json::json;

use crate::http::responder::Responder;
use crate::security::context::RequestContext;
use crate::security::headers::CspNonce;
use crate::security::session::SessionHandle;
use crate::security::SecurityServices;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn not_found(Extension(responder): Extension<Responder>) -> Response {
    match responder {
        Responder::Json => (
            StatusCode::NOT_FOUND,
            Json(json!({ "estado": "error", "mensaje": "Recurso no encontrado" })),
        )
            .into_response(),
        Responder::Html => (StatusCode::NOT_FOUND, Html(simple_page("404", "Página no encontrada.", None))).into_response(),
    }
}

/// Login page with the CSRF token and any flash error.
pub async fn login_form(
    Extension(services): Extension<Arc<SecurityServices>>,
    Extension(session): Extension<SessionHandle>,
    Extension(ctx): Extension<RequestContext>,
    nonce: Option<Extension<CspNonce>>,
) -> Response {
    let (token, flash) = {
        let mut session = session.lock();
        if services.auth.is_authenticated(&mut session, &ctx) {
            return Redirect::to(&services.config.auth.home_path).into_response();
        }
        let token = services.csrf.generate_token(&mut session);
        (token, session.data_mut().flash_error.take())
    };

    let nonce_attr = nonce_attr(nonce.as_ref().map(|Extension(n)| n));
    let flash = flash
        .map(|message| format!("<p class=\"error\">{}</p>", escape_html(&message)))
        .unwrap_or_default();

    Html(format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>Acceso</title>\
         <script{nonce_attr}>document.documentElement.dataset.ready = \"1\";</script></head>\
         <body><h1>Acceso</h1>{flash}\
         <form method=\"post\" action=\"{action}\">\
         <input type=\"hidden\" name=\"csrf_token\" value=\"{token}\">\
         <input type=\"email\" name=\"email\" required>\
         <input type=\"password\" name=\"password\" required>\
         <button type=\"submit\">Entrar</button></form></body></html>",
        action = escape_html(&services.config.auth.login_path),
    ))
    .into_response()
}

#[derive(Debug, Default, Deserialize)]
struct LoginForm {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

impl LoginForm {
    fn parse(headers: &HeaderMap, body: &[u8]) -> Self {
        let is_json = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("application/json"));
        if is_json {
            return serde_json::from_slice(body).unwrap_or_default();
        }

        let mut form = Self::default();
        for (key, value) in url::form_urlencoded::parse(body) {
            match key.as_ref() {
                "email" => form.email = value.into_owned(),
                "password" => form.password = value.into_owned(),
                _ => {}
            }
        }
        form
    }
}

/// Lockout check, credential check on the blocking pool, then session binding.
pub async fn login(
    Extension(services): Extension<Arc<SecurityServices>>,
    Extension(session): Extension<SessionHandle>,
    Extension(ctx): Extension<RequestContext>,
    Extension(responder): Extension<Responder>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let form = LoginForm::parse(&headers, &body);
    let identity = form.email.trim().to_lowercase();
    let login_path = services.config.auth.login_path.clone();

    if services
        .ip_blocker
        .is_blocked(&identity, &ctx.client_ip, &ctx.path, ctx.trace_id())
    {
        let minutes = services.ip_blocker.block_minutes_remaining(&identity, &ctx.client_ip);
        let message = format!("Demasiados intentos fallidos. Intenta de nuevo en {} minutos.", minutes);
        return login_failure(responder, &session, StatusCode::TOO_MANY_REQUESTS, message, &login_path);
    }

    let verified = {
        let services = services.clone();
        let identity = identity.clone();
        let password = form.password.clone();
        tokio::task::spawn_blocking(move || services.auth.verify_credentials(&identity, &password))
            .await
            .unwrap_or(false)
    };

    if !verified {
        services.ip_blocker.register_failed_attempt(&identity, &ctx.client_ip);
        let remaining = services.ip_blocker.remaining_attempts(&identity, &ctx.client_ip);
        let message = format!("Credenciales inválidas. Intentos restantes: {}.", remaining);
        return login_failure(responder, &session, StatusCode::UNAUTHORIZED, message, &login_path);
    }

    services
        .ip_blocker
        .register_successful_login(&identity, &ctx.client_ip, ctx.trace_id());

    let target = {
        let mut session = session.lock();
        services.auth.establish_session(&mut session, &ctx);
        services.csrf.regenerate_token(&mut session);
        services.replay.init_replay_token(&mut session, &ctx);
        session.data_mut().flash_error = None;
        session
            .data_mut()
            .intended_path
            .take()
            .unwrap_or_else(|| services.config.auth.home_path.clone())
    };

    match responder {
        Responder::Json => Json(json!({ "estado": "ok", "redirect": target })).into_response(),
        Responder::Html => Redirect::to(&target).into_response(),
    }
}

fn login_failure(
    responder: Responder,
    session: &SessionHandle,
    status: StatusCode,
    message: String,
    login_path: &str,
) -> Response {
    match responder {
        Responder::Json => (status, Json(json!({ "estado": "error", "mensaje": message }))).into_response(),
        Responder::Html => {
            session.lock().data_mut().flash_error = Some(message);
            Redirect::to(login_path).into_response()
        }
    }
}

pub async fn logout(
    Extension(services): Extension<Arc<SecurityServices>>,
    Extension(session): Extension<SessionHandle>,
    Extension(responder): Extension<Responder>,
) -> Response {
    services.auth.logout(&mut session.lock());
    match responder {
        Responder::Json => Json(json!({ "estado": "ok" })).into_response(),
        Responder::Html => Redirect::to(&services.config.auth.login_path).into_response(),
    }
}

/// Admin landing page. Reachable only through the admin gate.
pub async fn seccion(
    Extension(session): Extension<SessionHandle>,
    Extension(responder): Extension<Responder>,
    nonce: Option<Extension<CspNonce>>,
) -> Response {
    let auth = session.lock().data().auth.clone();
    let Some(auth) = auth else {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthenticated" }))).into_response();
    };

    match responder {
        Responder::Json => Json(json!({ "user_id": auth.user_id, "role": auth.role })).into_response(),
        Responder::Html => Html(simple_page(
            "Panel",
            &format!("Sesión activa: {} ({})", auth.email, auth.role),
            nonce.as_ref().map(|Extension(n)| n),
        ))
        .into_response(),
    }
}

/// Current CSRF token (and replay token once logged in) for script clients.
pub async fn csrf_token(
    Extension(services): Extension<Arc<SecurityServices>>,
    Extension(session): Extension<SessionHandle>,
) -> Json<serde_json::Value> {
    let mut session = session.lock();
    let token = services.csrf.generate_token(&mut session);
    let replay = services.replay.token(&session);
    Json(json!({ "csrf_token": token, "replay_token": replay }))
}

/// Stand-in for the hero comparison endpoint; the body has already passed the firewall.
pub async fn rag_heroes(body: Bytes) -> Json<serde_json::Value> {
    Json(json!({ "estado": "ok", "received_bytes": body.len() }))
}

fn nonce_attr(nonce: Option<&CspNonce>) -> String {
    nonce
        .map(|n| format!(" nonce=\"{}\"", n.as_str()))
        .unwrap_or_default()
}

fn simple_page(title: &str, message: &str, nonce: Option<&CspNonce>) -> String {
    format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>{title}</title>\
         <script{nonce}>document.documentElement.dataset.ready = \"1\";</script></head>\
         <body><h1>{title}</h1><p>{message}</p></body></html>",
        title = escape_html(title),
        message = escape_html(message),
        nonce = nonce_attr(nonce),
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
