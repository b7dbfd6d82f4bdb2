use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One screener row mapped to named fields. Values are kept as the provider's
/// display text ("5.12%", "210.44M", ...) and never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenedStock {
    pub ticker: String,
    pub change: String,
    pub market_cap: String,
    pub volume: String,
    pub relative_volume: String,
}

impl ScreenedStock {
    /// Placeholder record used for single-symbol reports.
    pub fn placeholder(ticker: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            change: "0%".to_string(),
            market_cap: "N/A".to_string(),
            volume: "N/A".to_string(),
            relative_volume: "N/A".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}
