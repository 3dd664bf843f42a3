//! Ordered delivery of signals to the execution engine.
//!
//! Channels are tried once each, in order. A failing channel is logged and the
//! next one is tried; only exhaustion is reported to the caller.

pub mod file;
pub mod socket;

use crate::signal::{CanonicalSignal, Channel, DeliveryResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

pub use file::{read_signal_file, FileTransport};
pub use socket::{probe, SocketTargets, SocketTransport};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("writer for {0} is not running")]
    WriterGone(String),
}

/// One delivery channel to the execution engine.
#[async_trait]
pub trait Transport: Send + Sync {
    fn channel(&self) -> Channel;

    /// Delivers the signal once. Returns a short description on success.
    async fn deliver(&self, signal: &CanonicalSignal) -> Result<String, TransportError>;
}

#[derive(Clone)]
pub struct DispatchRouter {
    transports: Vec<Arc<dyn Transport>>,
}

impl DispatchRouter {
    /// Transports are attempted in the order given.
    pub fn new(transports: Vec<Arc<dyn Transport>>) -> Self {
        Self { transports }
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.transports.iter().map(|t| t.channel()).collect()
    }

    pub async fn dispatch(&self, signal: &CanonicalSignal) -> DeliveryResult {
        let started = Instant::now();
        let mut failures = Vec::with_capacity(self.transports.len());

        for transport in &self.transports {
            let channel = transport.channel();
            let attempt = Instant::now();
            match transport.deliver(signal).await {
                Ok(detail) => {
                    let latency = attempt.elapsed();
                    crate::metrics::record_dispatch(channel, latency.as_secs_f64());
                    info!(
                        %channel,
                        symbol = %signal.symbol,
                        platform = %signal.platform,
                        latency_ms = latency.as_secs_f64() * 1000.0,
                        "signal delivered: {}", detail
                    );
                    return DeliveryResult {
                        channel,
                        success: true,
                        latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                        message: format!("Signal sent via {channel}"),
                    };
                }
                Err(e) => {
                    warn!(%channel, symbol = %signal.symbol, error = %e, "channel failed, falling through");
                    failures.push(format!("{channel}: {e}"));
                }
            }
        }

        DeliveryResult {
            channel: Channel::None,
            success: false,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            message: if failures.is_empty() {
                "no delivery channels configured".to_string()
            } else {
                format!("all channels failed ({})", failures.join("; "))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::normalize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        channel: Channel,
        succeed: bool,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(channel: Channel, succeed: bool) -> Arc<Self> {
            Arc::new(Self { channel, succeed, calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        fn channel(&self) -> Channel {
            self.channel
        }

        async fn deliver(&self, _signal: &CanonicalSignal) -> Result<String, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                Ok("ok".into())
            } else {
                Err(TransportError::MalformedResponse("scripted".into()))
            }
        }
    }

    fn signal() -> CanonicalSignal {
        normalize(&json!({"action": "BUY", "symbol": "EURUSD"})).unwrap()
    }

    #[tokio::test]
    async fn first_healthy_channel_wins() {
        let socket = Scripted::new(Channel::Socket, true);
        let file = Scripted::new(Channel::File, true);
        let router = DispatchRouter::new(vec![socket.clone() as Arc<dyn Transport>, file.clone()]);

        let result = router.dispatch(&signal()).await;
        assert!(result.success);
        assert_eq!(result.channel, Channel::Socket);
        assert_eq!(file.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn falls_through_to_file_once() {
        let socket = Scripted::new(Channel::Socket, false);
        let file = Scripted::new(Channel::File, true);
        let router = DispatchRouter::new(vec![socket.clone() as Arc<dyn Transport>, file.clone()]);

        let result = router.dispatch(&signal()).await;
        assert!(result.success);
        assert_eq!(result.channel, Channel::File);
        assert_eq!(result.message, "Signal sent via file");
        assert_eq!(socket.calls.load(Ordering::SeqCst), 1);
        assert_eq!(file.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_is_reported_without_retry() {
        let socket = Scripted::new(Channel::Socket, false);
        let file = Scripted::new(Channel::File, false);
        let router = DispatchRouter::new(vec![socket.clone() as Arc<dyn Transport>, file.clone()]);

        let result = router.dispatch(&signal()).await;
        assert!(!result.success);
        assert_eq!(result.channel, Channel::None);
        assert!(result.message.contains("socket"));
        assert!(result.message.contains("file"));
        assert_eq!(socket.calls.load(Ordering::SeqCst), 1);
        assert_eq!(file.calls.load(Ordering::SeqCst), 1);
    }
}
