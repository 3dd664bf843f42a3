//! Public ingress gateway.
//!
//! Every `/webhook` request is checked (allow-list, bearer, rate limit,
//! connection cap) and then relayed to the local processing endpoint.

pub mod forwarder;
pub mod routes;
pub mod security;

use crate::config::Config;
use crate::constants::HEALTH_PROBE_TIMEOUT_SECS;
use crate::dispatch::probe;
use crate::error::{HookError, Result};
use crate::rate_limiter::RateLimiter;
use crate::stats::RequestStats;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use hyper::Server;
use chrono::Utc;
use serde_json::json;
use std::future::Future;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use forwarder::{strip_hop_by_hop, Forwarder};
pub use routes::{classify, RouteTag};
pub use security::{fingerprint, AccessGuard};

pub struct TunnelState {
    config: Arc<Config>,
    limiter: Arc<RateLimiter>,
    stats: Arc<RequestStats>,
    guard: AccessGuard,
    forwarder: Forwarder,
    slots: Semaphore,
}

impl TunnelState {
    pub fn new(config: Arc<Config>, limiter: Arc<RateLimiter>, stats: Arc<RequestStats>) -> Result<Self> {
        let guard = AccessGuard::new(&config.security, &config.tunnel.auth_token);
        let forwarder = Forwarder::new(&config.tunnel.local_target(), config.tunnel.timeout())?;
        let slots = Semaphore::new(config.tunnel.max_connections);
        Ok(Self { config, limiter, stats, guard, forwarder, slots })
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn stats(&self) -> &Arc<RequestStats> {
        &self.stats
    }

    async fn relay(
        &self,
        client: SocketAddr,
        method: Method,
        uri: Uri,
        mut headers: HeaderMap,
        body: Bytes,
    ) -> Result<Response> {
        self.guard.check(client.ip(), &headers)?;
        if !self.limiter.admit(&client.ip().to_string(), Instant::now()) {
            return Err(HookError::RateLimited);
        }
        let _permit = self.slots.try_acquire().map_err(|_| HookError::Overloaded)?;
        let _in_flight = self.stats.track_connection();

        let tag = classify(uri.path()).unwrap_or(RouteTag::Generic);
        tag.apply_request_headers(&mut headers, Utc::now().timestamp());

        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let started = Instant::now();
        let mut response = self.forwarder.forward(method, path_and_query, headers, body).await?;
        crate::metrics::record_forward_duration(started.elapsed().as_secs_f64());

        tag.apply_response_headers(response.headers_mut());
        Ok(response)
    }
}

fn outcome_label(result: &Result<Response>) -> &'static str {
    match result {
        Ok(_) => "forwarded",
        Err(HookError::Auth) => "unauthorized",
        Err(HookError::RateLimited) => "rate_limited",
        Err(HookError::Overloaded) => "overloaded",
        Err(HookError::UpstreamTimeout) => "timeout",
        Err(HookError::UpstreamUnreachable) => "unreachable",
        Err(_) => "error",
    }
}

async fn relay(
    State(state): State<Arc<TunnelState>>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let path = uri.path().to_string();
    let result = state.relay(client, method.clone(), uri, headers, body).await;
    crate::metrics::record_gateway_request(outcome_label(&result));

    match result {
        Ok(response) => {
            state.stats.record_success();
            info!(
                %client,
                %method,
                %path,
                status = response.status().as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "relayed"
            );
            response
        }
        Err(e) => {
            state.stats.record_error();
            warn!(%client, %method, %path, error = %e, "relay rejected");
            e.into_response()
        }
    }
}

async fn status(State(state): State<Arc<TunnelState>>) -> impl IntoResponse {
    Json(json!({
        "status": "running",
        "timestamp": Utc::now().to_rfc3339(),
        "local_target": state.config.tunnel.local_target(),
        "public_url": state.config.public_url(),
        "connections": state.stats.connections(),
        "stats": state.stats.snapshot(),
    }))
}

async fn health(State(state): State<Arc<TunnelState>>) -> Response {
    let target = state.config.tunnel.local_target();
    if probe(&target, Duration::from_secs(HEALTH_PROBE_TIMEOUT_SECS)).await {
        Json(json!({"status": "healthy", "local_server": "reachable"})).into_response()
    } else {
        warn!(%target, "local server unreachable");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "unhealthy", "local_server": "unreachable"})),
        )
            .into_response()
    }
}

/// Exposes per-client addresses, so it sits behind the same checks as relays.
async fn stats(
    State(state): State<Arc<TunnelState>>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    state.guard.check(client.ip(), &headers)?;
    Ok(Json(json!({
        "requests": state.stats.snapshot(),
        "connections": state.stats.connections(),
        "rate_limiter": state.limiter.snapshot(),
    })))
}

pub fn router(state: Arc<TunnelState>) -> Router {
    Router::new()
        .route("/webhook", any(relay))
        .route("/webhook/*path", any(relay))
        .route("/status", get(status))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Serves until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: Arc<TunnelState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;
    info!(
        %addr,
        local_target = %state.config.tunnel.local_target(),
        public_url = %state.config.public_url(),
        "tunnel gateway listening"
    );

    Server::from_tcp(listener)?
        .serve(router(state).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await?;

    info!(%addr, "tunnel gateway stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(config: Config) -> Arc<TunnelState> {
        let limiter = Arc::new(RateLimiter::new(config.security.rate_limit));
        Arc::new(TunnelState::new(Arc::new(config), limiter, Arc::new(RequestStats::new())).unwrap())
    }

    fn open_config(local_port: u16) -> Config {
        let mut config = Config::default();
        config.security.require_auth = false;
        config.tunnel.local_port = local_port;
        config
    }

    fn client() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    async fn call(state: &Arc<TunnelState>, uri: &str) -> Response {
        relay(
            State(state.clone()),
            ConnectInfo(client()),
            Method::POST,
            uri.parse().unwrap(),
            HeaderMap::new(),
            Bytes::from_static(b"{}"),
        )
        .await
    }

    #[tokio::test]
    async fn unauthorized_request_counts_as_error() {
        let mut config = Config::default();
        config.tunnel.auth_token = "s3cret".into();
        let state = state(config);

        let response = call(&state, "/webhook").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let snapshot = state.stats().snapshot();
        assert_eq!((snapshot.total, snapshot.errors), (1, 1));
        assert_eq!(state.limiter().tracked_clients(), 0);
    }

    #[tokio::test]
    async fn limit_applies_before_forwarding() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let mut config = open_config(port);
        config.security.rate_limit = 2;
        let state = state(config);

        assert_eq!(call(&state, "/webhook").await.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(call(&state, "/webhook").await.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(call(&state, "/webhook").await.status(), StatusCode::TOO_MANY_REQUESTS);

        let snapshot = state.stats().snapshot();
        assert_eq!((snapshot.total, snapshot.success, snapshot.errors), (3, 0, 3));
        assert_eq!(state.stats().connections(), 0);
    }

    #[tokio::test]
    async fn connection_cap_rejects_with_overloaded() {
        let mut config = open_config(1);
        config.tunnel.max_connections = 1;
        let state = state(config);
        let _held = state.slots.try_acquire().unwrap();

        assert_eq!(call(&state, "/webhook").await.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
