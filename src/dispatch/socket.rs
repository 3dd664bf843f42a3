use super::{Transport, TransportError};
use crate::signal::{CanonicalSignal, Channel, Platform};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Longest response line accepted from the expert advisor.
const MAX_RESPONSE_BYTES: u64 = 4096;

#[derive(Debug, Clone)]
pub struct SocketTargets {
    pub host: String,
    pub mt4_port: u16,
    pub mt5_port: u16,
}

impl SocketTargets {
    pub fn port_for(&self, platform: Platform) -> u16 {
        match platform {
            Platform::Mt4 => self.mt4_port,
            Platform::Mt5 => self.mt5_port,
        }
    }

    pub fn address_for(&self, platform: Platform) -> String {
        format!("{}:{}", self.host, self.port_for(platform))
    }
}

/// True when a TCP connection to `address` opens within `limit`.
pub async fn probe(address: &str, limit: Duration) -> bool {
    matches!(timeout(limit, TcpStream::connect(address)).await, Ok(Ok(_)))
}

/// One short-lived TCP exchange per signal: a JSON line out, a response line back.
#[derive(Debug, Clone)]
pub struct SocketTransport {
    targets: SocketTargets,
    timeout: Duration,
}

impl SocketTransport {
    pub fn new(targets: SocketTargets, timeout: Duration) -> Self {
        Self { targets, timeout }
    }

    async fn exchange(&self, address: &str, line: &[u8]) -> Result<String, TransportError> {
        let mut stream = TcpStream::connect(address)
            .await
            .map_err(TransportError::Connect)?;
        stream.set_nodelay(true)?;
        stream.write_all(line).await?;
        stream.flush().await?;

        let mut reader = BufReader::new(stream).take(MAX_RESPONSE_BYTES);
        let mut response = String::new();
        let read = reader.read_line(&mut response).await?;
        if read == 0 {
            return Err(TransportError::MalformedResponse(
                "connection closed before a response".into(),
            ));
        }
        if !response.ends_with('\n') {
            return Err(TransportError::MalformedResponse(format!(
                "partial response line ({read} bytes)"
            )));
        }
        let response = response.trim();
        if response.is_empty() {
            return Err(TransportError::MalformedResponse("empty response line".into()));
        }
        Ok(response.to_string())
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn channel(&self) -> Channel {
        Channel::Socket
    }

    async fn deliver(&self, signal: &CanonicalSignal) -> Result<String, TransportError> {
        let address = self.targets.address_for(signal.platform);
        let mut line = serde_json::to_vec(signal)?;
        line.push(b'\n');

        let response = timeout(self.timeout, self.exchange(&address, &line))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))??;
        Ok(format!("{} at {} replied '{}'", signal.platform, address, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::normalize;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    fn signal(platform: &str) -> CanonicalSignal {
        normalize(&json!({"action": "sell", "symbol": "GBPJPY", "mt_platform": platform})).unwrap()
    }

    fn transport(mt4_port: u16, mt5_port: u16, timeout: Duration) -> SocketTransport {
        SocketTransport::new(
            SocketTargets { host: "127.0.0.1".into(), mt4_port, mt5_port },
            timeout,
        )
    }

    async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn sends_one_json_line_and_reads_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let engine = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            reader.get_mut().write_all(b"OK\n").await.unwrap();
            line
        });

        let result = transport(1, port, Duration::from_secs(2))
            .deliver(&signal("MT5"))
            .await
            .unwrap();
        assert!(result.contains("OK"));

        let line = engine.await.unwrap();
        assert!(line.ends_with('\n'));
        let record: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(record["action"], "SELL");
        assert_eq!(record["symbol"], "GBPJPY");
        assert_eq!(record["mt_platform"], "MT5");
    }

    #[tokio::test]
    async fn port_follows_platform() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mt4_port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            reader.get_mut().write_all(b"ACK mt4\n").await.unwrap();
        });

        let transport = transport(mt4_port, unused_port().await, Duration::from_secs(2));
        assert!(transport.deliver(&signal("MT4")).await.is_ok());
        assert!(transport.deliver(&signal("MT5")).await.is_err());
    }

    #[tokio::test]
    async fn probe_reports_reachability() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().to_string();
        assert!(probe(&open, Duration::from_secs(1)).await);

        let closed = format!("127.0.0.1:{}", unused_port().await);
        assert!(!probe(&closed, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn refused_connection_fails() {
        let err = transport(1, unused_port().await, Duration::from_secs(2))
            .deliver(&signal("MT5"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
    }

    #[tokio::test]
    async fn close_without_reply_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let err = transport(1, port, Duration::from_secs(2))
            .deliver(&signal("MT5"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::MalformedResponse(_) | TransportError::Io(_)
        ));
    }

    #[tokio::test]
    async fn partial_line_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            reader.get_mut().write_all(b"OK-without-newline").await.unwrap();
        });

        let err = transport(1, port, Duration::from_secs(2))
            .deliver(&signal("MT5"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn silent_engine_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _engine = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        });

        let err = transport(1, port, Duration::from_millis(200))
            .deliver(&signal("MT5"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }
}
