use crate::config::Settings;
use crate::domain::stock::PriceBar;
use crate::ingest::types::{ChartQuote, ChartResponse};
use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::StatusCode;

const CHART_PATH: &str = "/v8/finance/chart";
const DEFAULT_RANGE: &str = "5d";
const DEFAULT_INTERVAL: &str = "1h";

// Yahoo rejects requests without a browser-like agent.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[async_trait::async_trait]
pub trait PriceHistorySource: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Recent hourly bars for `symbol`, oldest first. An unknown symbol or an
    /// empty window is an empty vector, not an error.
    async fn fetch_hourly_bars(&self, symbol: &str) -> Result<Vec<PriceBar>>;
}

#[derive(Debug, Clone)]
pub struct YahooChartProvider {
    http: reqwest::Client,
    base_url: String,
    range: String,
    interval: String,
}

impl YahooChartProvider {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.http_timeout)
            .build()
            .context("failed to build market data http client")?;

        Ok(Self {
            http,
            base_url: settings.market_data_base_url.clone(),
            range: DEFAULT_RANGE.to_string(),
            interval: DEFAULT_INTERVAL.to_string(),
        })
    }

    fn url(&self, symbol: &str) -> String {
        format!(
            "{}{}/{}",
            self.base_url.trim_end_matches('/'),
            CHART_PATH,
            symbol
        )
    }

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers
    }
}

#[async_trait::async_trait]
impl PriceHistorySource for YahooChartProvider {
    fn provider_name(&self) -> &'static str {
        "yahoo_chart"
    }

    async fn fetch_hourly_bars(&self, symbol: &str) -> Result<Vec<PriceBar>> {
        let res = self
            .http
            .get(self.url(symbol))
            .headers(Self::headers())
            .query(&[
                ("range", self.range.as_str()),
                ("interval", self.interval.as_str()),
            ])
            .send()
            .await
            .context("market data request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read market data response")?;

        if status == StatusCode::NOT_FOUND {
            tracing::warn!(%symbol, "market data provider has no such symbol");
            return Ok(Vec::new());
        }
        if !status.is_success() {
            anyhow::bail!("market data HTTP {status}: {text}");
        }

        let parsed = serde_json::from_str::<ChartResponse>(&text)
            .with_context(|| format!("market data response is not a chart payload: {text}"))?;

        if let Some(err) = parsed.chart.error {
            tracing::warn!(%symbol, code = %err.code, description = %err.description, "market data provider reported no data");
            return Ok(Vec::new());
        }

        let Some(result) = parsed.chart.result.and_then(|r| r.into_iter().next()) else {
            return Ok(Vec::new());
        };
        let quote = result
            .indicators
            .quote
            .into_iter()
            .next()
            .unwrap_or_default();

        Ok(zip_bars(&result.timestamp, &quote))
    }
}

/// Joins the column arrays into bars, dropping any hour with a missing value.
fn zip_bars(timestamps: &[i64], quote: &ChartQuote) -> Vec<PriceBar> {
    let at = |col: &[Option<f64>], i: usize| col.get(i).copied().flatten();

    timestamps
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            Some(PriceBar {
                time: Utc.timestamp_opt(*ts, 0).single()?,
                open: at(&quote.open, i)?,
                high: at(&quote.high, i)?,
                low: at(&quote.low, i)?,
                close: at(&quote.close, i)?,
                volume: at(&quote.volume, i)?,
            })
        })
        .collect()
}
