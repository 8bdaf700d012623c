//! Axum HTTP server for the action gateway.
//!
//! Two routes: `POST /api/agent` feeds the dispatcher, `GET /api/health`
//! answers liveness probes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::cors::{AllowHeaders, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::channels::web::types::*;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::error::{ChannelError, GatewayError};
use crate::payment::PAYMENT_HEADER;

/// Fixed-window rate limiter.
///
/// Not per-caller: it bounds total load on the costly upstreams.
pub struct RateLimiter {
    /// Requests remaining in the current window.
    remaining: AtomicU64,
    /// Epoch second when the current window started.
    window_start: AtomicU64,
    max_requests: u64,
    window_secs: u64,
}

impl RateLimiter {
    pub fn new(max_requests: u64, window_secs: u64) -> Self {
        Self {
            remaining: AtomicU64::new(max_requests),
            window_start: AtomicU64::new(epoch_secs()),
            max_requests,
            window_secs,
        }
    }

    /// Try to consume one request. Returns `true` if allowed.
    pub fn check(&self) -> bool {
        self.check_at(epoch_secs())
    }

    fn check_at(&self, now: u64) -> bool {
        let window = self.window_start.load(Ordering::Relaxed);
        if now.saturating_sub(window) >= self.window_secs {
            self.window_start.store(now, Ordering::Relaxed);
            self.remaining
                .store(self.max_requests.saturating_sub(1), Ordering::Relaxed);
            return self.max_requests > 0;
        }

        loop {
            let current = self.remaining.load(Ordering::Relaxed);
            if current == 0 {
                return false;
            }
            if self
                .remaining
                .compare_exchange_weak(current, current - 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Shared state for all gateway handlers.
pub struct GatewayState {
    pub dispatcher: Dispatcher,
    /// `None` when rate limiting is disabled.
    pub rate_limiter: Option<RateLimiter>,
    /// Shutdown signal sender.
    pub shutdown_tx: tokio::sync::RwLock<Option<oneshot::Sender<()>>>,
}

impl GatewayState {
    pub fn new(dispatcher: Dispatcher, rate_limit_per_minute: u64) -> Self {
        Self {
            dispatcher,
            rate_limiter: (rate_limit_per_minute > 0)
                .then(|| RateLimiter::new(rate_limit_per_minute, 60)),
            shutdown_tx: tokio::sync::RwLock::new(None),
        }
    }

    /// Ask a running server to stop accepting connections.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(());
        }
    }
}

/// Build the router. `port` is the bound port, used for the localhost origins.
pub fn router(state: Arc<GatewayState>, port: u16, allowed_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{port}"),
        format!("http://localhost:{port}"),
    ]
    .into_iter()
    .chain(allowed_origins.iter().cloned())
    .filter_map(|origin| origin.parse().ok())
    .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            HeaderName::from_static(PAYMENT_HEADER),
        ]));

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/agent", post(agent_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB max request body
        .with_state(state)
}

/// Start the gateway HTTP server.
///
/// Returns the actual bound `SocketAddr` (useful when binding to port 0).
pub async fn start_server(
    addr: SocketAddr,
    state: Arc<GatewayState>,
    allowed_origins: &[String],
) -> Result<SocketAddr, ChannelError> {
    let listener =
        tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "gateway".to_string(),
                reason: format!("Failed to bind to {}: {}", addr, e),
            })?;
    let bound_addr = listener
        .local_addr()
        .map_err(|e| ChannelError::StartupFailed {
            name: "gateway".to_string(),
            reason: format!("Failed to get local addr: {}", e),
        })?;

    let app = router(state.clone(), bound_addr.port(), allowed_origins);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    *state.shutdown_tx.write().await = Some(shutdown_tx);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Gateway shutting down");
            })
            .await
        {
            tracing::error!("Gateway server error: {}", e);
        }
    });

    tracing::info!(addr = %bound_addr, "Gateway listening");
    Ok(bound_addr)
}

// --- Health ---

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        channel: "gateway",
    })
}

// --- Agent ---

async fn agent_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Result<Json<AgentRequestBody>, JsonRejection>,
) -> Response {
    if let Some(limiter) = &state.rate_limiter
        && !limiter.check()
    {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse::rate_limited()),
        )
            .into_response();
    }

    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            let err = GatewayError::invalid_input("body", rejection.body_text());
            return error_response(&err);
        }
    };
    let payment_proof = headers
        .get(PAYMENT_HEADER)
        .and_then(|value| value.to_str().ok());

    match state.dispatcher.dispatch(&body, payment_proof).await {
        Ok(DispatchOutcome::Completed(result)) => {
            (StatusCode::OK, Json(AgentSuccessResponse::new(result))).into_response()
        }
        Ok(DispatchOutcome::PaymentRequired(payment_details)) => (
            StatusCode::PAYMENT_REQUIRED,
            Json(PaymentRequiredResponse { payment_details }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

fn error_response(err: &GatewayError) -> Response {
    let status = status_for(err);
    if let GatewayError::DeploymentFailed { raw_output, .. } = err {
        tracing::error!(
            status = status.as_u16(),
            raw_output = %raw_output,
            "Action failed: {}",
            err
        );
    } else if status.is_server_error() {
        tracing::error!(status = status.as_u16(), "Action failed: {}", err);
    } else {
        tracing::warn!(status = status.as_u16(), "Action rejected: {}", err);
    }
    (status, Json(ErrorResponse::from(err))).into_response()
}

/// HTTP status for each failure kind.
pub fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::PolicyViolation { .. } => StatusCode::FORBIDDEN,
        GatewayError::PaymentInvalid(_) => StatusCode::PAYMENT_REQUIRED,
        GatewayError::InvalidAction(_) | GatewayError::InvalidInput { .. } => {
            StatusCode::BAD_REQUEST
        }
        GatewayError::UpstreamTimeout { .. }
        | GatewayError::Upstream(_)
        | GatewayError::DeploymentFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
