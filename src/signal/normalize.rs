use super::{Action, CanonicalSignal, Platform};
use crate::error::{HookError, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

pub const DEFAULT_LOT_SIZE: f64 = 0.1;
pub const DEFAULT_SOURCE: &str = "webhook";

/// A parsed payload whose action has not been checked yet.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDraft {
    /// Upper-cased, trimmed; empty when the payload had none.
    pub action: String,
    pub symbol: String,
    pub price: f64,
    pub lot_size: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub comment: String,
    pub source: String,
    pub platform: Platform,
    pub timestamp: DateTime<Utc>,
}

/// Lifts a raw webhook payload into a draft, filling defaults.
///
/// Only structural problems fail here: a non-object body or a field of the wrong shape.
pub fn parse(raw: &Value) -> Result<SignalDraft> {
    let obj = raw
        .as_object()
        .ok_or_else(|| HookError::Validation("payload must be a JSON object".into()))?;

    let platform = ["mt_platform", "platform"]
        .iter()
        .filter_map(|key| obj.get(*key).and_then(Value::as_str))
        .find_map(Platform::from_label)
        .unwrap_or_default();

    Ok(SignalDraft {
        action: string_field(obj, "action", "")?.trim().to_uppercase(),
        symbol: string_field(obj, "symbol", "")?.trim().to_string(),
        price: number_field(obj, "price", 0.0)?,
        lot_size: number_field(obj, "lot_size", DEFAULT_LOT_SIZE)?,
        stop_loss: number_field(obj, "stop_loss", 0.0)?,
        take_profit: number_field(obj, "take_profit", 0.0)?,
        comment: string_field(obj, "comment", "")?,
        source: string_field(obj, "source", DEFAULT_SOURCE)?,
        platform,
        timestamp: Utc::now(),
    })
}

/// Accepts a draft only if its action is known, it names a symbol and its lot size is positive.
pub fn validate(draft: SignalDraft) -> Result<CanonicalSignal> {
    let action: Action = draft.action.parse().map_err(HookError::Validation)?;

    if draft.symbol.is_empty() {
        return Err(HookError::Validation("symbol is required".into()));
    }
    if draft.lot_size.is_nan() || draft.lot_size <= 0.0 {
        return Err(HookError::Validation(format!(
            "lot_size must be positive, got {}",
            draft.lot_size
        )));
    }

    Ok(CanonicalSignal {
        action,
        symbol: draft.symbol,
        price: draft.price,
        lot_size: draft.lot_size,
        stop_loss: draft.stop_loss,
        take_profit: draft.take_profit,
        comment: draft.comment,
        source: draft.source,
        timestamp: draft.timestamp,
        processed: false,
        platform: draft.platform,
        risk_score: 0.0,
        confidence: 0.0,
    })
}

pub fn normalize(raw: &Value) -> Result<CanonicalSignal> {
    validate(parse(raw)?)
}

fn string_field(obj: &Map<String, Value>, key: &str, default: &str) -> Result<String> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(default.to_string()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(HookError::Validation(format!(
            "{key} must be a string, got {other}"
        ))),
    }
}

// TradingView templates render numbers as strings ("{{close}}"), so both forms are accepted.
fn number_field(obj: &Map<String, Value>, key: &str, default: f64) -> Result<f64> {
    let value = match obj.get(key) {
        None | Some(Value::Null) => return Ok(default),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    value
        .filter(|v| v.is_finite())
        .ok_or_else(|| HookError::Validation(format!("{key} must be a finite number")))
}
