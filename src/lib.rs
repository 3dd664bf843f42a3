pub mod config;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod rate_limiter;
pub mod signal;
pub mod signal_server;
pub mod sink;
pub mod stats;
pub mod tasks;
pub mod tunnel;

pub use config::Config;
pub use error::{HookError, Result};
