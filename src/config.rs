use crate::error::{HookError, Result};
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "dodohook.toml";

/// Process-wide settings, built once at startup and shared as `Arc<Config>`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub tunnel: TunnelConfig,
    pub security: SecurityConfig,
    pub signals: SignalsConfig,
    pub logging: LoggingConfig,
    pub maintenance: MaintenanceConfig,
}

/// Public listener of the tunnel gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Domain advertised in `public_url`.
    pub domain: String,
    /// Scheme advertised in `public_url`; TLS itself is terminated in front of the gateway.
    pub public_scheme: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8443,
            domain: "localhost".to_string(),
            public_scheme: "https".to_string(),
        }
    }
}

/// Where the gateway relays to and how.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub local_host: String,
    pub local_port: u16,
    /// Bearer secret. Empty with `require_auth` means one is generated at startup.
    pub auth_token: String,
    /// Relays allowed in flight at once.
    pub max_connections: usize,
    /// Per-request forward timeout.
    pub timeout_secs: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            local_host: "127.0.0.1".to_string(),
            local_port: 5000,
            auth_token: String::new(),
            max_connections: 100,
            timeout_secs: 30,
        }
    }
}

impl TunnelConfig {
    pub fn local_target(&self) -> String {
        format!("{}:{}", self.local_host, self.local_port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Empty allows every client address.
    pub allowed_ips: Vec<IpAddr>,
    /// Admitted requests per client per trailing hour.
    pub rate_limit: usize,
    pub require_auth: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_ips: Vec::new(),
            rate_limit: 1000,
            require_auth: true,
        }
    }
}

/// Local processing endpoint and the execution-engine channels behind it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalsConfig {
    pub host: String,
    pub port: u16,
    pub engine_host: String,
    pub mt4_port: u16,
    pub mt5_port: u16,
    pub socket_timeout_secs: u64,
    /// Directory holding `mt4_signals.json` / `mt5_signals.json`.
    pub data_dir: PathBuf,
    /// Entries kept per platform file.
    pub file_capacity: usize,
    pub volatility_factor: f64,
    /// NDJSON history of processed signals; logged only when unset.
    pub signal_log: Option<PathBuf>,
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            engine_host: "localhost".to_string(),
            mt4_port: 8081,
            mt5_port: 8082,
            socket_timeout_secs: 5,
            data_dir: PathBuf::from("data"),
            file_capacity: 100,
            volatility_factor: 0.1,
            signal_log: None,
        }
    }
}

impl SignalsConfig {
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: PathBuf,
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: PathBuf::from("logs"),
            file: "dodohook.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub cleanup_interval_secs: u64,
    pub report_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: 300,
            report_interval_secs: 3600,
        }
    }
}

impl Config {
    /// Reads `path`, falling back to defaults when the file does not exist,
    /// then applies environment overrides and validates.
    pub fn load(path: &Path) -> Result<Self> {
        let (config, warnings) = Self::load_with_warnings(path)?;
        for warning in &warnings {
            tracing::warn!("{warning}");
        }
        Ok(config)
    }

    /// Like [`Config::load`], but hands fallbacks back instead of logging them,
    /// for callers that install the subscriber from the loaded config.
    pub fn load_with_warnings(path: &Path) -> Result<(Self, Vec<String>)> {
        let mut warnings = Vec::new();
        let mut config = match fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warnings.push(format!("config file {} not found, using defaults", path.display()));
                Config::default()
            }
            Err(e) => {
                return Err(HookError::Config(format!(
                    "Failed to read config file '{}': {}",
                    path.display(),
                    e
                )))
            }
        };
        warnings.extend(config.apply_env_overrides());
        config.validate()?;
        Ok((config, warnings))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// `WEBHOOK_TOKEN` and `DODOHOOK_RATE_LIMIT` win over the file.
    /// Returns a warning for each override that was ignored.
    pub fn apply_env_overrides(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Ok(token) = std::env::var("WEBHOOK_TOKEN") {
            if !token.is_empty() {
                self.tunnel.auth_token = token;
            }
        }
        if let Ok(limit) = std::env::var("DODOHOOK_RATE_LIMIT") {
            match limit.parse() {
                Ok(n) => self.security.rate_limit = n,
                Err(_) => warnings.push(format!("ignoring non-numeric DODOHOOK_RATE_LIMIT '{limit}'")),
            }
        }
        warnings
    }

    pub fn validate(&self) -> Result<()> {
        if self.security.rate_limit == 0 {
            return Err(HookError::Config("security.rate_limit must be > 0".into()));
        }
        if self.tunnel.timeout_secs == 0 {
            return Err(HookError::Config("tunnel.timeout_secs must be > 0".into()));
        }
        if self.tunnel.max_connections == 0 {
            return Err(HookError::Config("tunnel.max_connections must be > 0".into()));
        }
        if self.signals.socket_timeout_secs == 0 {
            return Err(HookError::Config("signals.socket_timeout_secs must be > 0".into()));
        }
        if self.signals.file_capacity == 0 {
            return Err(HookError::Config("signals.file_capacity must be > 0".into()));
        }
        let vf = self.signals.volatility_factor;
        if !vf.is_finite() || vf < 0.0 {
            return Err(HookError::Config(
                "signals.volatility_factor must be a finite, non-negative number".into(),
            ));
        }
        if self.maintenance.cleanup_interval_secs == 0 || self.maintenance.report_interval_secs == 0 {
            return Err(HookError::Config("maintenance intervals must be > 0".into()));
        }
        Ok(())
    }

    /// Generates a bearer secret when auth is required but none was configured.
    /// Returns true when a token was generated.
    pub fn ensure_auth_token(&mut self) -> bool {
        if self.security.require_auth && self.tunnel.auth_token.is_empty() {
            self.tunnel.auth_token = uuid::Uuid::new_v4().to_string();
            return true;
        }
        false
    }

    pub fn public_url(&self) -> String {
        format!("{}://{}/webhook", self.server.public_scheme, self.server.domain)
    }
}
