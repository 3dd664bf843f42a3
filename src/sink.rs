//! Fire-and-forget history of processed signals.

use crate::signal::{CanonicalSignal, DeliveryResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub signal: CanonicalSignal,
    pub processing_ms: f64,
    pub result: DeliveryResult,
    pub recorded_at: DateTime<Utc>,
}

impl SignalRecord {
    pub fn new(signal: CanonicalSignal, processing_ms: f64, result: DeliveryResult) -> Self {
        Self { signal, processing_ms, result, recorded_at: Utc::now() }
    }
}

#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn persist(&self, record: &SignalRecord) -> anyhow::Result<()>;
}

/// Runs `persist` on its own task. Errors are logged and dropped.
pub fn persist_detached(sink: Arc<dyn SignalSink>, record: SignalRecord) {
    tokio::spawn(async move {
        if let Err(e) = sink.persist(&record).await {
            warn!(symbol = %record.signal.symbol, error = %e, "failed to persist signal record");
        }
    });
}

/// Writes each record as a structured log event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl SignalSink for TracingSink {
    async fn persist(&self, record: &SignalRecord) -> anyhow::Result<()> {
        info!(
            action = %record.signal.action,
            symbol = %record.signal.symbol,
            platform = %record.signal.platform,
            channel = %record.result.channel,
            success = record.result.success,
            processing_ms = record.processing_ms,
            risk_score = record.signal.risk_score,
            confidence = record.signal.confidence,
            "signal processed"
        );
        Ok(())
    }
}

/// Appends one JSON line per record.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SignalSink for JsonLinesSink {
    async fn persist(&self, record: &SignalRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
