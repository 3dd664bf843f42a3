//! Local processing endpoint behind the tunnel.
//!
//! Turns forwarded webhook bodies into canonical signals, scores them and hands
//! them to the dispatch router. Dispatch runs on its own task so a caller that
//! disconnects mid-request cannot leave a signal half-delivered.

use crate::config::Config;
use crate::dispatch::{probe, DispatchRouter, FileTransport, SocketTargets, SocketTransport, Transport};
use crate::error::{HookError, Result};
use crate::signal::{normalize, CanonicalSignal, ConstantVolatility, DeliveryResult, Enricher, Platform};
use crate::sink::{persist_detached, JsonLinesSink, SignalRecord, SignalSink, TracingSink};
use crate::stats::RequestStats;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use hyper::Server;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::future::Future;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub struct SignalState {
    router: DispatchRouter,
    enricher: Enricher,
    sink: Arc<dyn SignalSink>,
    targets: SocketTargets,
    data_dir: PathBuf,
    probe_timeout: Duration,
    stats: RequestStats,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl SignalState {
    pub fn new(
        router: DispatchRouter,
        enricher: Enricher,
        sink: Arc<dyn SignalSink>,
        targets: SocketTargets,
        data_dir: PathBuf,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            router,
            enricher,
            sink,
            targets,
            data_dir,
            probe_timeout,
            stats: RequestStats::new(),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Socket first, then file. Must be called inside a tokio runtime.
    pub fn from_config(config: &Config) -> Arc<Self> {
        let signals = &config.signals;
        let targets = SocketTargets {
            host: signals.engine_host.clone(),
            mt4_port: signals.mt4_port,
            mt5_port: signals.mt5_port,
        };
        let socket = Arc::new(SocketTransport::new(targets.clone(), signals.socket_timeout()));
        let file = Arc::new(FileTransport::spawn(
            &signals.data_dir,
            signals.file_capacity,
            signals.socket_timeout(),
        ));
        let router = DispatchRouter::new(vec![socket as Arc<dyn Transport>, file]);
        let enricher = Enricher::new(Arc::new(ConstantVolatility(signals.volatility_factor)));
        let sink: Arc<dyn SignalSink> = match &signals.signal_log {
            Some(path) => Arc::new(JsonLinesSink::new(path.clone())),
            None => Arc::new(TracingSink),
        };

        Arc::new(Self::new(
            router,
            enricher,
            sink,
            targets,
            signals.data_dir.clone(),
            signals.socket_timeout(),
        ))
    }

    pub fn stats(&self) -> &RequestStats {
        &self.stats
    }

    async fn deliver(&self, signal: CanonicalSignal, received: Instant) -> (CanonicalSignal, DeliveryResult) {
        let result = self.router.dispatch(&signal).await;
        if result.success {
            self.stats.record_success();
            crate::metrics::record_signal_processed("delivered");
        } else {
            self.stats.record_error();
            crate::metrics::record_signal_processed("failed");
            warn!(symbol = %signal.symbol, message = %result.message, "signal was not delivered");
        }

        let processing_ms = received.elapsed().as_secs_f64() * 1000.0;
        persist_detached(
            self.sink.clone(),
            SignalRecord::new(signal.clone(), processing_ms, result.clone()),
        );
        (signal, result)
    }
}

async fn receive_signal(State(state): State<Arc<SignalState>>, body: Bytes) -> Result<Json<Value>> {
    let received = Instant::now();

    let signal = match serde_json::from_slice::<Value>(&body)
        .map_err(|e| HookError::Validation(format!("invalid JSON body: {e}")))
        .and_then(|raw| normalize(&raw))
    {
        Ok(signal) => signal,
        Err(e) => {
            state.stats.record_error();
            crate::metrics::record_signal_processed("rejected");
            warn!(error = %e, "rejected signal");
            return Err(e);
        }
    };

    crate::metrics::record_signal_received(signal.action);
    let signal = state.enricher.enrich(signal);
    info!(
        action = %signal.action,
        symbol = %signal.symbol,
        platform = %signal.platform,
        risk_score = signal.risk_score,
        confidence = signal.confidence,
        "signal accepted"
    );

    let worker = state.clone();
    let (signal, result) = tokio::spawn(async move { worker.deliver(signal, received).await })
        .await
        .map_err(|e| HookError::Internal(format!("dispatch task failed: {e}")))?;

    if !result.success {
        return Err(HookError::DispatchFailure(result.message));
    }

    Ok(Json(json!({
        "status": "success",
        "message": result.message,
        "channel": result.channel,
        "latency_ms": result.latency_ms,
        "risk_score": signal.risk_score,
        "confidence": signal.confidence,
    })))
}

async fn health(State(state): State<Arc<SignalState>>) -> Json<Value> {
    let mut sockets = serde_json::Map::new();
    for platform in Platform::ALL {
        let address = state.targets.address_for(platform);
        let reachable = probe(&address, state.probe_timeout).await;
        sockets.insert(
            platform.to_string(),
            json!({ "address": address, "reachable": reachable }),
        );
    }

    let dir_ready = tokio::fs::metadata(&state.data_dir)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);

    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "socket": sockets,
        "file": {
            "dir": state.data_dir.display().to_string(),
            "exists": dir_ready,
        },
    }))
}

async fn status(State(state): State<Arc<SignalState>>) -> Json<Value> {
    Json(json!({
        "status": "running",
        "timestamp": Utc::now().to_rfc3339(),
        "started_at": state.started_at.to_rfc3339(),
        "uptime_secs": state.started.elapsed().as_secs(),
        "channels": state.router.channels(),
        "signals": state.stats.snapshot(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics_text() -> Response {
    match crate::metrics::handle() {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

pub fn router(state: Arc<SignalState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/webhook", post(receive_signal))
        .route("/webhook/*path", post(receive_signal))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/metrics", get(metrics_text))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}

/// Serves until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: Arc<SignalState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;
    info!(%addr, "signal server listening");

    Server::from_tcp(listener)?
        .serve(router(state).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    info!(%addr, "signal server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::TransportError;
    use crate::signal::Channel;
    use async_trait::async_trait;

    struct Fixed(bool);

    #[async_trait]
    impl Transport for Fixed {
        fn channel(&self) -> Channel {
            Channel::File
        }

        async fn deliver(&self, _signal: &CanonicalSignal) -> std::result::Result<String, TransportError> {
            if self.0 {
                Ok("stored".into())
            } else {
                Err(TransportError::WriterGone("MT5".into()))
            }
        }
    }

    fn state(succeed: bool) -> Arc<SignalState> {
        Arc::new(SignalState::new(
            DispatchRouter::new(vec![Arc::new(Fixed(succeed)) as Arc<dyn Transport>]),
            Enricher::default(),
            Arc::new(TracingSink),
            SocketTargets { host: "127.0.0.1".into(), mt4_port: 1, mt5_port: 1 },
            PathBuf::from("data"),
            Duration::from_millis(100),
        ))
    }

    fn body(value: Value) -> Bytes {
        Bytes::from(serde_json::to_vec(&value).unwrap())
    }

    #[tokio::test]
    async fn delivered_signal_reports_channel_and_scores() {
        let state = state(true);
        let Json(reply) = receive_signal(
            State(state.clone()),
            body(json!({"action": "buy", "symbol": "EURUSD", "lot_size": 0.02, "source": "TradingView"})),
        )
        .await
        .unwrap();

        assert_eq!(reply["status"], "success");
        assert_eq!(reply["channel"], "file");
        assert_eq!(reply["message"], "Signal sent via file");
        assert!((reply["risk_score"].as_f64().unwrap() - 0.3).abs() < 1e-9);
        assert!((reply["confidence"].as_f64().unwrap() - 0.8).abs() < 1e-9);
        assert_eq!(state.stats().snapshot().success, 1);
    }

    #[tokio::test]
    async fn invalid_signal_is_a_validation_error() {
        let state = state(true);
        let err = receive_signal(State(state.clone()), body(json!({"action": "HOLD", "symbol": "EURUSD"})))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err = receive_signal(State(state.clone()), Bytes::from_static(b"{oops"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(state.stats().snapshot().errors, 2);
    }

    #[tokio::test]
    async fn exhausted_channels_are_a_dispatch_failure() {
        let err = receive_signal(State(state(false)), body(json!({"action": "SELL", "symbol": "EURUSD"})))
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::DispatchFailure(_)));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn health_is_ok_with_engine_down() {
        let Json(reply) = health(State(state(true))).await;
        assert_eq!(reply["status"], "healthy");
        assert_eq!(reply["socket"]["MT5"]["reachable"], false);
    }
}
