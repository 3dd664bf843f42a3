//! Header and route names shared by the gateway and the signal server.

pub const PLATFORM_HEADER: &str = "x-dodohook-platform";
pub const TIMESTAMP_HEADER: &str = "x-dodohook-timestamp";
pub const TYPE_HEADER: &str = "x-dodohook-type";
pub const PROCESSED_HEADER: &str = "x-dodohook-processed";
pub const WORKFLOW_HEADER: &str = "x-n8n-workflow-id";

pub const WEBHOOK_PREFIX: &str = "/webhook";

/// Headers that only mean something between adjacent hops.
pub const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Trailing window and block length of the rate limiter.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 3600;

/// Connect timeout used by health probes.
pub const HEALTH_PROBE_TIMEOUT_SECS: u64 = 5;
