use super::CanonicalSignal;
use std::sync::Arc;

const BASE_CONFIDENCE: f64 = 0.7;
const TRADINGVIEW_BONUS: f64 = 0.1;
const AI_ANALYSIS_BONUS: f64 = 0.2;

/// Source of the volatility term added to every risk score.
pub trait VolatilityFeed: Send + Sync {
    fn factor(&self, signal: &CanonicalSignal) -> f64;
}

/// Same factor for every symbol.
#[derive(Debug, Clone, Copy)]
pub struct ConstantVolatility(pub f64);

impl Default for ConstantVolatility {
    fn default() -> Self {
        Self(0.1)
    }
}

impl VolatilityFeed for ConstantVolatility {
    fn factor(&self, _signal: &CanonicalSignal) -> f64 {
        self.0
    }
}

/// Scores validated signals before dispatch.
#[derive(Clone)]
pub struct Enricher {
    volatility: Arc<dyn VolatilityFeed>,
}

impl Default for Enricher {
    fn default() -> Self {
        Self::new(Arc::new(ConstantVolatility::default()))
    }
}

impl Enricher {
    pub fn new(volatility: Arc<dyn VolatilityFeed>) -> Self {
        Self { volatility }
    }

    pub fn risk_score(&self, signal: &CanonicalSignal) -> f64 {
        (signal.lot_size * 10.0 + self.volatility.factor(signal)).min(1.0)
    }

    pub fn confidence(&self, signal: &CanonicalSignal) -> f64 {
        let bonus = match signal.source.as_str() {
            "TradingView" => TRADINGVIEW_BONUS,
            "AI_Analysis" => AI_ANALYSIS_BONUS,
            _ => 0.0,
        };
        (BASE_CONFIDENCE + bonus).min(1.0)
    }

    pub fn enrich(&self, mut signal: CanonicalSignal) -> CanonicalSignal {
        signal.risk_score = self.risk_score(&signal);
        signal.confidence = self.confidence(&signal);
        signal
    }
}
