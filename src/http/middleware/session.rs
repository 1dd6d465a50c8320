//! Loads the session for the request and persists it afterwards.
//!
//! The per-id lock is held until the response is built, so two requests on one
//! session never interleave their read-modify-write. Unknown ids from the
//! client are never adopted; a fresh id is issued instead.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;

use crate::http::middleware::services;
use crate::http::server::AppState;
use crate::security::context::RequestContext;
use crate::security::headers::{expired_session_cookie, session_cookie};
use crate::security::session::{Session, SessionData, SessionHandle};

pub async fn session(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let services = services(&state, &req);
    let config = services.config.session.clone();
    let secure = req
        .extensions()
        .get::<RequestContext>()
        .is_some_and(|ctx| ctx.is_https);

    let jar = CookieJar::from_headers(req.headers());
    let mut held = None;
    let mut session = Session::new();
    if let Some(id) = session_id(&jar, &config.cookie_name) {
        let guard = services.session_locks.acquire(&id).await;
        match services.sessions.load(&id) {
            Some(data) => {
                session = Session::resume(id.clone(), data);
                held = Some((id, guard));
            }
            None => {
                drop(guard);
                services.session_locks.release(&id);
            }
        }
    }

    let handle = SessionHandle::new(session);
    req.extensions_mut().insert(handle.clone());

    let response = next.run(req).await;

    let session = handle.snapshot();
    for retired in session.retired_ids() {
        services.sessions.delete(retired);
    }

    let persist = !session.is_destroyed() && (!session.is_new() || session.data() != &SessionData::default());
    if persist {
        services
            .sessions
            .save(session.id(), session.data().clone(), services.clock.now());
    }

    let cookie = if session.is_destroyed() {
        Some(expired_session_cookie(&config.cookie_name, config.same_site, secure))
    } else if persist && session.cookie_changed() {
        Some(session_cookie(&config.cookie_name, session.id(), config.same_site, secure))
    } else {
        None
    };
    let response = match cookie {
        Some(cookie) => (jar.add(cookie), response).into_response(),
        None => response,
    };

    if let Some((id, guard)) = held {
        drop(guard);
        services.session_locks.release(&id);
    }
    response
}

/// Non-empty value of the session cookie, if the client sent one.
pub fn session_id(jar: &CookieJar, name: &str) -> Option<String> {
    jar.get(name)
        .map(|cookie| cookie.value().trim().to_string())
        .filter(|value| !value.is_empty())
}
