//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the demo handlers
//! - Wire the security pipeline in order (see `middleware`)
//! - Wire infrastructure layers (request id, tracing, timeout)
//! - Swap services on config reload without dropping stores or sessions
//! - Purge idle sessions in the background

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ShieldConfig;
use crate::http::handlers;
use crate::http::middleware::{context, firewall, guard, headers, rate_limit, session};
use crate::security::clock::{Clock, SystemClock};
use crate::security::{BuildError, SecurityServices};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Application state injected into every middleware.
#[derive(Clone)]
pub struct AppState {
    services: Arc<ArcSwap<SecurityServices>>,
}

impl AppState {
    pub fn new(services: SecurityServices) -> Self {
        Self {
            services: Arc::new(ArcSwap::from_pointee(services)),
        }
    }

    /// Services for the current configuration.
    pub fn current(&self) -> Arc<SecurityServices> {
        self.services.load_full()
    }

    /// Rebuild services for `config`; the running set stays on failure.
    pub fn reload(&self, config: ShieldConfig) -> Result<(), BuildError> {
        let next = self.current().reload(config)?;
        self.services.store(Arc::new(next));
        Ok(())
    }
}

/// HTTP server for the request shield.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ShieldConfig) -> Result<Self, BuildError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Same as [`HttpServer::new`] with an explicit time source.
    pub fn with_clock(config: ShieldConfig, clock: Arc<dyn Clock>) -> Result<Self, BuildError> {
        let request_timeout = Duration::from_secs(config.timeouts.request_secs);
        let state = AppState::new(SecurityServices::build(config, clock)?);
        let router = Self::build_router(state.clone(), request_timeout);
        Ok(Self { router, state })
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Layers added later wrap the ones before them, so the list reads from
    /// the innermost stage outwards. The timeout sits inside the headers stage
    /// so a 408 still carries the full header set.
    fn build_router(state: AppState, request_timeout: Duration) -> Router {
        Router::new()
            .route("/health", get(handlers::health))
            .route("/login", get(handlers::login_form).post(handlers::login))
            .route("/logout", post(handlers::logout))
            .route("/seccion", get(handlers::seccion))
            .route("/api/csrf-token", get(handlers::csrf_token))
            .route("/api/rag/heroes", post(handlers::rag_heroes))
            .fallback(handlers::not_found)
            .layer(from_fn_with_state(state.clone(), guard::security_guard))
            .layer(from_fn_with_state(state.clone(), session::session))
            .layer(from_fn_with_state(state.clone(), rate_limit::rate_limit))
            .layer(from_fn_with_state(state.clone(), firewall::api_firewall))
            .layer(from_fn_with_state(state.clone(), context::request_context))
            .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout))
            .layer(from_fn_with_state(state.clone(), headers::security_headers))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .with_state(state)
    }

    /// The router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Run the server until `shutdown` fires, applying config updates as they arrive.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<ShieldConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let reload_state = self.state.clone();
        let reloader = tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                match reload_state.reload(config) {
                    Ok(()) => tracing::info!("Security policy reloaded"),
                    Err(e) => tracing::error!(error = %e, "Failed to apply new config, keeping current policy"),
                }
            }
        });

        let purge_state = self.state.clone();
        let purger = tokio::spawn(async move {
            let mut interval = tokio::time::interval(PURGE_INTERVAL);
            loop {
                interval.tick().await;
                let services = purge_state.current();
                let purged = services.purge_idle_sessions();
                let counters = services.purge_expired_counters();
                if purged > 0 || counters > 0 {
                    tracing::debug!(purged, counters, "Purged idle sessions and expired counters");
                }
            }
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await;

        reloader.abort();
        purger.abort();
        tracing::info!("HTTP server stopped");
        result
    }
}
