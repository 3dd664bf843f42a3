//! Trading signal model shared by the normalizer, enrichment and dispatch.

pub mod enrich;
pub mod normalize;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use enrich::{ConstantVolatility, Enricher, VolatilityFeed};
pub use normalize::{normalize, parse, validate, SignalDraft};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Buy,
    Sell,
    Close,
    CloseAll,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::Close => "CLOSE",
            Action::CloseAll => "CLOSE_ALL",
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(Action::Buy),
            "SELL" => Ok(Action::Sell),
            "CLOSE" => Ok(Action::Close),
            "CLOSE_ALL" => Ok(Action::CloseAll),
            other => Err(format!("unsupported action '{other}'")),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MetaTrader terminal the signal is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "MT4")]
    Mt4,
    #[default]
    #[serde(rename = "MT5")]
    Mt5,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Mt4, Platform::Mt5];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Mt4 => "MT4",
            Platform::Mt5 => "MT5",
        }
    }

    /// Case-insensitive; anything but MT4/MT5 is `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "MT4" => Some(Platform::Mt4),
            "MT5" => Some(Platform::Mt5),
            _ => None,
        }
    }

    /// Name of the ring-buffer file the expert advisor polls.
    pub fn signal_file_name(&self) -> &'static str {
        match self {
            Platform::Mt4 => "mt4_signals.json",
            Platform::Mt5 => "mt5_signals.json",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated trading instruction. Field names are the expert advisor's wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSignal {
    pub action: Action,
    pub symbol: String,
    pub price: f64,
    pub lot_size: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub comment: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub processed: bool,
    #[serde(rename = "mt_platform")]
    pub platform: Platform,
    pub risk_score: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Socket,
    File,
    /// No channel accepted the signal.
    None,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Socket => "socket",
            Channel::File => "file",
            Channel::None => "none",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub channel: Channel,
    pub success: bool,
    pub latency_ms: f64,
    pub message: String,
}
