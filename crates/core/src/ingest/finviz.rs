use crate::config::Settings;
use crate::domain::stock::ScreenedStock;
use crate::error::ScreenerError;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::Value;

const TABLE_PATH: &str = "/table";

/// Screener rows kept per run.
pub const MAX_STOCKS: usize = 19;

// Small caps, relative volume over 3x, top technical performers; biggest movers first.
const SCREENER_QUERY: [(&str, &str); 5] = [
    ("order", "change"),
    ("desc", "true"),
    ("filters", "cap_small"),
    ("filters", "sh_relvol_o3"),
    ("filters", "ta_perf_dup"),
];

/// Positions of the fields we read out of each screener row.
///
/// The table endpoint returns rows as bare arrays in the column order of the
/// default Finviz "overview" view, so the mapping is positional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenerColumns {
    pub ticker: usize,
    pub change: usize,
    pub market_cap: usize,
    pub volume: usize,
    pub relative_volume: usize,
}

impl Default for ScreenerColumns {
    fn default() -> Self {
        Self {
            ticker: 1,
            change: 9,
            market_cap: 6,
            volume: 7,
            relative_volume: 8,
        }
    }
}

/// Unparsed screener answer, as returned to the passthrough endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RawScreenerResponse {
    pub status_code: u16,
    pub raw_response: String,
    pub response: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct FinvizClient {
    http: reqwest::Client,
    base_url: String,
    host: String,
    api_key: Option<String>,
    columns: ScreenerColumns,
}

impl FinvizClient {
    pub fn from_settings(settings: &Settings) -> Result<Self, ScreenerError> {
        let http = reqwest::Client::builder()
            .timeout(settings.http_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: settings.finviz_base_url.clone(),
            host: settings.finviz_host.clone(),
            api_key: settings.rapidapi_key.clone(),
            columns: ScreenerColumns::default(),
        })
    }

    pub fn with_columns(mut self, columns: ScreenerColumns) -> Self {
        self.columns = columns;
        self
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), TABLE_PATH)
    }

    fn headers(&self) -> Result<HeaderMap, ScreenerError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ScreenerError::Config("RAPIDAPI_KEY is required".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "X-RapidAPI-Key",
            HeaderValue::from_str(api_key)
                .map_err(|e| ScreenerError::Config(format!("invalid RAPIDAPI_KEY: {e}")))?,
        );
        headers.insert(
            "X-RapidAPI-Host",
            HeaderValue::from_str(&self.host)
                .map_err(|e| ScreenerError::Config(format!("invalid FINVIZ_HOST: {e}")))?,
        );
        Ok(headers)
    }

    /// Issues the screener request and hands back the body untouched. The JSON
    /// is only decoded for successful responses.
    pub async fn fetch_raw(&self) -> Result<RawScreenerResponse, ScreenerError> {
        let res = self
            .http
            .get(self.url())
            .headers(self.headers()?)
            .query(&SCREENER_QUERY[..])
            .send()
            .await?;

        let status = res.status();
        let text = res.text().await?;
        tracing::debug!(%status, body_len = text.len(), "screener response received");

        let response = if status.is_success() {
            Some(serde_json::from_str::<Value>(&text)?)
        } else {
            None
        };

        Ok(RawScreenerResponse {
            status_code: status.as_u16(),
            raw_response: text,
            response,
        })
    }

    pub async fn fetch_screened_stocks(&self) -> Result<Vec<ScreenedStock>, ScreenerError> {
        let raw = self.fetch_raw().await?;
        let Some(body) = raw.response else {
            let status = reqwest::StatusCode::from_u16(raw.status_code)
                .unwrap_or(reqwest::StatusCode::BAD_GATEWAY);
            return Err(ScreenerError::Status {
                status,
                body: raw.raw_response,
            });
        };

        let stocks = parse_rows(&body, &self.columns, MAX_STOCKS)?;
        tracing::info!(count = stocks.len(), "screened stocks fetched");
        Ok(stocks)
    }
}

/// Maps the first `limit` entries of `body.rows` into stocks. A body without a
/// `rows` array yields nothing, which is reported as [`ScreenerError::NoStocks`].
pub fn parse_rows(
    body: &Value,
    columns: &ScreenerColumns,
    limit: usize,
) -> Result<Vec<ScreenedStock>, ScreenerError> {
    let rows = body
        .get("rows")
        .and_then(Value::as_array)
        .map(|rows| &rows[..rows.len().min(limit)])
        .unwrap_or(&[]);

    if rows.is_empty() {
        return Err(ScreenerError::NoStocks);
    }

    rows.iter()
        .enumerate()
        .map(|(idx, row)| {
            let cell = |column: usize| {
                row.as_array()
                    .and_then(|cells| cells.get(column))
                    .map(cell_text)
                    .ok_or(ScreenerError::MalformedRow { row: idx, column })
            };

            Ok(ScreenedStock {
                ticker: cell(columns.ticker)?,
                change: cell(columns.change)?,
                market_cap: cell(columns.market_cap)?,
                volume: cell(columns.volume)?,
                relative_volume: cell(columns.relative_volume)?,
            })
        })
        .collect()
}

fn cell_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{screener_row, settings_for, spawn_mock};
    use axum::extract::Query;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    fn rows(n: usize) -> Value {
        let rows: Vec<Value> = (0..n).map(|i| screener_row(i + 1, &format!("T{i:02}"))).collect();
        json!({ "rows": rows })
    }

    #[test]
    fn truncates_to_nineteen_in_input_order() {
        let stocks = parse_rows(&rows(25), &ScreenerColumns::default(), MAX_STOCKS).unwrap();
        assert_eq!(stocks.len(), 19);
        assert_eq!(stocks[0].ticker, "T00");
        assert_eq!(stocks[18].ticker, "T18");
    }

    #[test]
    fn maps_fixed_columns() {
        let stocks = parse_rows(&rows(1), &ScreenerColumns::default(), MAX_STOCKS).unwrap();
        assert_eq!(
            stocks[0],
            ScreenedStock {
                ticker: "T00".to_string(),
                change: "12.50%".to_string(),
                market_cap: "210.44M".to_string(),
                volume: "1,204,331".to_string(),
                relative_volume: "4.12".to_string(),
            }
        );
    }

    #[test]
    fn non_string_cells_keep_their_json_text() {
        let body = json!({ "rows": [[1, "ABC", "", "", "", "", 1.5e8, 1000, 4.5, null]] });
        let stocks = parse_rows(&body, &ScreenerColumns::default(), MAX_STOCKS).unwrap();
        assert_eq!(stocks[0].volume, "1000");
        assert_eq!(stocks[0].relative_volume, "4.5");
        assert_eq!(stocks[0].change, "null");
    }

    #[test]
    fn empty_rows_is_an_error() {
        let err = parse_rows(&json!({ "rows": [] }), &ScreenerColumns::default(), MAX_STOCKS)
            .unwrap_err();
        assert!(matches!(err, ScreenerError::NoStocks));
    }

    #[test]
    fn unexpected_shape_is_treated_as_empty() {
        for body in [json!([["1", "ABC"]]), json!({ "data": [] }), json!({ "rows": "x" })] {
            let err = parse_rows(&body, &ScreenerColumns::default(), MAX_STOCKS).unwrap_err();
            assert!(matches!(err, ScreenerError::NoStocks), "{body}");
        }
    }

    #[test]
    fn short_row_is_reported() {
        let body = json!({ "rows": [["1", "ABC", "x"]] });
        let err = parse_rows(&body, &ScreenerColumns::default(), MAX_STOCKS).unwrap_err();
        assert!(matches!(err, ScreenerError::MalformedRow { row: 0, .. }));
    }

    #[test]
    fn custom_columns_are_honoured() {
        let body = json!({ "rows": [["ABC", "1%", "2M", "300", "1.1"]] });
        let columns = ScreenerColumns {
            ticker: 0,
            change: 1,
            market_cap: 2,
            volume: 3,
            relative_volume: 4,
        };
        let stocks = parse_rows(&body, &columns, MAX_STOCKS).unwrap();
        assert_eq!(stocks[0].ticker, "ABC");
        assert_eq!(stocks[0].relative_volume, "1.1");
    }

    #[tokio::test]
    async fn sends_filters_and_rapidapi_headers() {
        let router = Router::new().route(
            "/table",
            get(
                |headers: AxumHeaders, Query(q): Query<Vec<(String, String)>>| async move {
                    let key = headers
                        .get("x-rapidapi-key")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    let filters: Vec<String> = q
                        .iter()
                        .filter(|(k, _)| k == "filters")
                        .map(|(_, v)| v.clone())
                        .collect();
                    if key != "test-key"
                        || filters != ["cap_small", "sh_relvol_o3", "ta_perf_dup"]
                        || !q.contains(&("order".to_string(), "change".to_string()))
                    {
                        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "bad query" })));
                    }
                    let rows: Vec<Value> = (0..3).map(|i| screener_row(i, "ZZZ")).collect();
                    (StatusCode::OK, Json(json!({ "rows": rows })))
                },
            ),
        );
        let base = spawn_mock(router).await;
        let dir = tempfile::tempdir().unwrap();
        let client = FinvizClient::from_settings(&settings_for(&base, dir.path())).unwrap();

        let stocks = client.fetch_screened_stocks().await.unwrap();
        assert_eq!(stocks.len(), 3);
    }

    #[tokio::test]
    async fn non_success_status_fails_with_body() {
        let router = Router::new().route(
            "/table",
            get(|| async { (StatusCode::FORBIDDEN, "quota exceeded") }),
        );
        let base = spawn_mock(router).await;
        let dir = tempfile::tempdir().unwrap();
        let client = FinvizClient::from_settings(&settings_for(&base, dir.path())).unwrap();

        let raw = client.fetch_raw().await.unwrap();
        assert_eq!(raw.status_code, 403);
        assert!(raw.response.is_none());

        let err = client.fetch_screened_stocks().await.unwrap_err();
        assert!(matches!(err, ScreenerError::Status { .. }));
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn missing_api_key_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings_for("http://127.0.0.1:9", dir.path());
        settings.rapidapi_key = None;
        let client = FinvizClient::from_settings(&settings).unwrap();
        let err = client.fetch_screened_stocks().await.unwrap_err();
        assert!(matches!(err, ScreenerError::Config(_)));
    }
}
