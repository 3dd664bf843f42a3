//! Per-platform ring-buffer JSON files polled by the expert advisor.
//!
//! Each file is owned by exactly one writer task. Callers hand signals to it over a
//! channel, so concurrent deliveries are serialized and none is lost on rewrite.

use super::{Transport, TransportError};
use crate::signal::{CanonicalSignal, Channel, Platform};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};

const WRITER_QUEUE: usize = 256;

struct WriteRequest {
    signal: CanonicalSignal,
    reply: oneshot::Sender<Result<u64, TransportError>>,
}

#[derive(Clone)]
pub struct FileTransport {
    dir: PathBuf,
    writers: HashMap<Platform, mpsc::Sender<WriteRequest>>,
    timeout: Duration,
}

impl FileTransport {
    /// Starts one writer task per platform. Must be called inside a tokio runtime.
    pub fn spawn(dir: impl Into<PathBuf>, capacity: usize, timeout: Duration) -> Self {
        let dir = dir.into();
        let writers = Platform::ALL
            .iter()
            .map(|&platform| {
                let (tx, rx) = mpsc::channel(WRITER_QUEUE);
                let writer = RingFileWriter {
                    path: dir.join(platform.signal_file_name()),
                    capacity,
                    appended: 0,
                };
                tokio::spawn(writer.run(rx));
                (platform, tx)
            })
            .collect();
        Self { dir, writers, timeout }
    }

    pub fn path_for(&self, platform: Platform) -> PathBuf {
        self.dir.join(platform.signal_file_name())
    }

    /// Appends through the platform's writer. Returns the arrival sequence number.
    ///
    /// `timeout` bounds only the enqueue. A queued request is always written, so
    /// the caller waits for the writer's verdict instead of guessing.
    pub async fn append(&self, signal: &CanonicalSignal) -> Result<u64, TransportError> {
        let gone = || TransportError::WriterGone(signal.platform.to_string());
        let writer = self.writers.get(&signal.platform).ok_or_else(gone)?;

        let (reply, response) = oneshot::channel();
        let request = WriteRequest { signal: signal.clone(), reply };
        timeout(self.timeout, writer.send(request))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(|_| gone())?;

        response.await.map_err(|_| gone())?
    }
}

#[async_trait]
impl Transport for FileTransport {
    fn channel(&self) -> Channel {
        Channel::File
    }

    async fn deliver(&self, signal: &CanonicalSignal) -> Result<String, TransportError> {
        self.append(signal).await?;
        Ok(format!("saved to {}", self.path_for(signal.platform).display()))
    }
}

struct RingFileWriter {
    path: PathBuf,
    capacity: usize,
    appended: u64,
}

impl RingFileWriter {
    async fn run(mut self, mut rx: mpsc::Receiver<WriteRequest>) {
        debug!(path = %self.path.display(), "signal file writer started");
        while let Some(request) = rx.recv().await {
            let result = self.append(&request.signal).await;
            if let Err(e) = &result {
                warn!(path = %self.path.display(), error = %e, "signal file write failed");
            }
            let _ = request.reply.send(result);
        }
        debug!(path = %self.path.display(), "signal file writer stopped");
    }

    async fn append(&mut self, signal: &CanonicalSignal) -> Result<u64, TransportError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut entries = load_entries(&self.path).await;
        entries.push(serde_json::to_value(signal)?);
        if entries.len() > self.capacity {
            let excess = entries.len() - self.capacity;
            entries.drain(..excess);
        }

        let body = serde_json::to_vec_pretty(&entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        self.appended += 1;
        info!(path = %self.path.display(), entries = entries.len(), "signal saved to file");
        Ok(self.appended)
    }
}

async fn load_entries(path: &Path) -> Vec<Value> {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<Vec<Value>>(&bytes) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "signal file is not a JSON array, starting over");
                Vec::new()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read signal file, starting over");
            Vec::new()
        }
    }
}

/// Reads a platform file back as typed signals.
pub async fn read_signal_file(path: &Path) -> Result<Vec<CanonicalSignal>, TransportError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
