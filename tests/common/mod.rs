#![allow(dead_code)]

use dodohook::config::Config;
use dodohook::rate_limiter::RateLimiter;
use dodohook::signal_server::{self, SignalState};
use dodohook::stats::RequestStats;
use dodohook::tunnel::{self, TunnelState};
use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::sync::Arc;

pub const TOKEN: &str = "integration-token";

/// A port nothing listens on.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn config(data_dir: &Path, local_port: u16) -> Config {
    let mut config = Config::default();
    config.tunnel.local_host = "127.0.0.1".into();
    config.tunnel.local_port = local_port;
    config.tunnel.auth_token = TOKEN.into();
    config.tunnel.timeout_secs = 5;
    config.signals.engine_host = "127.0.0.1".into();
    config.signals.mt4_port = closed_port();
    config.signals.mt5_port = closed_port();
    config.signals.socket_timeout_secs = 1;
    config.signals.data_dir = data_dir.to_path_buf();
    config
}

pub fn start_signal_server(config: &Config) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let state = SignalState::from_config(config);
    tokio::spawn(signal_server::serve(listener, state, std::future::pending()));
    addr
}

pub fn start_tunnel(config: Config) -> (SocketAddr, Arc<TunnelState>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let limiter = Arc::new(RateLimiter::new(config.security.rate_limit));
    let state = Arc::new(
        TunnelState::new(Arc::new(config), limiter, Arc::new(RequestStats::new())).unwrap(),
    );
    tokio::spawn(tunnel::serve(listener, state.clone(), std::future::pending()));
    (addr, state)
}
