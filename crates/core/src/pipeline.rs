use crate::chart::ChartRenderer;
use crate::config::Settings;
use crate::domain::stock::ScreenedStock;
use crate::email::Mailer;
use crate::error::PipelineError;
use crate::ingest::finviz::FinvizClient;
use crate::ingest::provider::{PriceHistorySource, YahooChartProvider};
use crate::report::ReportBuilder;
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::Instrument;
use uuid::Uuid;

/// Proof that the caller owns the single report run slot.
pub type RunGuard<'a> = MutexGuard<'a, ()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Email,
    /// Build the report and leave it on disk.
    KeepLocal,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub stocks: usize,
    pub recipient: Option<String>,
    /// Set only when the report was kept on disk.
    pub report_path: Option<PathBuf>,
}

/// Screener -> charts/PDF -> email -> cleanup. At most one run at a time.
pub struct Pipeline {
    screener: FinvizClient,
    reports: ReportBuilder,
    mailer: Mailer,
    run_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(screener: FinvizClient, reports: ReportBuilder, mailer: Mailer) -> Self {
        Self {
            screener,
            reports,
            mailer,
            run_lock: Mutex::new(()),
        }
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let screener =
            FinvizClient::from_settings(settings).context("failed to build screener client")?;
        let source: Arc<dyn PriceHistorySource> = Arc::new(YahooChartProvider::from_settings(settings)?);
        let charts = ChartRenderer::from_settings(settings, source);
        let reports = ReportBuilder::from_settings(settings, charts);
        let mailer = Mailer::from_settings(settings).context("failed to build mail client")?;
        Ok(Self::new(screener, reports, mailer))
    }

    pub fn screener(&self) -> &FinvizClient {
        &self.screener
    }

    pub fn reports(&self) -> &ReportBuilder {
        &self.reports
    }

    pub fn mailer(&self) -> &Mailer {
        &self.mailer
    }

    /// Claims the run slot, or reports that a run is already in flight.
    pub fn try_begin(&self) -> Result<RunGuard<'_>, PipelineError> {
        self.run_lock
            .try_lock()
            .map_err(|_| PipelineError::AlreadyRunning)
    }

    pub async fn run(&self) -> Result<RunOutcome, PipelineError> {
        self.execute(Delivery::Email).await
    }

    pub async fn execute(&self, delivery: Delivery) -> Result<RunOutcome, PipelineError> {
        let _guard = self.try_begin()?;
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("report_run", %run_id, ?delivery);
        self.stages(run_id, delivery).instrument(span).await
    }

    async fn stages(&self, run_id: Uuid, delivery: Delivery) -> Result<RunOutcome, PipelineError> {
        tracing::info!("starting report run");
        let stocks = self.screener.fetch_screened_stocks().await?;
        tracing::info!(count = stocks.len(), "retrieved stocks");

        let pdf_path = self.reports.build_report(&stocks).await?;
        tracing::info!(path = %pdf_path.display(), "generated PDF report");

        if delivery == Delivery::KeepLocal {
            return Ok(RunOutcome {
                run_id,
                stocks: stocks.len(),
                recipient: None,
                report_path: Some(pdf_path),
            });
        }

        self.mailer.send_report(&pdf_path).await?;
        tokio::fs::remove_file(&pdf_path)
            .await
            .map_err(|source| PipelineError::Cleanup {
                path: pdf_path.clone(),
                source,
            })?;
        tracing::info!("report run completed");

        Ok(RunOutcome {
            run_id,
            stocks: stocks.len(),
            recipient: self.mailer.recipient().map(str::to_string),
            report_path: None,
        })
    }

    /// One-stock report for `symbol` with placeholder metrics. Skips the
    /// screener and email. Writes the same PDF as a full run, so it holds
    /// the run slot while building.
    pub async fn build_single(&self, symbol: &str) -> Result<PathBuf, PipelineError> {
        let _guard = self.try_begin()?;
        let stock = ScreenedStock::placeholder(symbol);
        Ok(self.reports.build_report(std::slice::from_ref(&stock)).await?)
    }

    /// Renders the report chart for `symbol` under the run slot, since a
    /// full run writes and deletes the same `temp_<SYMBOL>.png`.
    pub async fn render_chart(&self, symbol: &str) -> Result<PathBuf, PipelineError> {
        let _guard = self.try_begin()?;
        Ok(self.reports.charts().render_chart(symbol).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{screener_row, settings_for, spawn_mock};
    use axum::extract::{DefaultBodyLimit, Path as AxumPath};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde_json::{json, Value};
    use std::path::Path;
    use std::sync::Mutex as StdMutex;

    fn chart_body() -> Value {
        json!({"chart": {"result": [{
            "timestamp": [1767623400, 1767627000],
            "indicators": {"quote": [{
                "open": [2.0, 2.1], "high": [2.3, 2.4], "low": [1.9, 2.0],
                "close": [2.1, 2.2], "volume": [5000, 7000]
            }]}
        }], "error": null}})
    }

    /// Mock of all three upstreams. Captured email payloads land in `sent`.
    fn upstreams(rows: Value, sent: Arc<StdMutex<Vec<Value>>>) -> Router {
        Router::new()
            .route(
                "/table",
                get(move || {
                    let rows = rows.clone();
                    async move { Json(json!({ "rows": rows })) }
                }),
            )
            .route(
                "/v8/finance/chart/:symbol",
                get(|AxumPath(_symbol): AxumPath<String>| async { Json(chart_body()) }),
            )
            .route(
                "/v3.1/send",
                post(move |Json(body): Json<Value>| {
                    let sent = sent.clone();
                    async move {
                        sent.lock().unwrap().push(body);
                        Json(json!({"Messages": [{"Status": "success"}]}))
                    }
                }),
            )
            .layer(DefaultBodyLimit::disable())
    }

    fn pipeline(settings: &Settings) -> Pipeline {
        let source: Arc<dyn PriceHistorySource> =
            Arc::new(YahooChartProvider::from_settings(settings).unwrap());
        let charts = ChartRenderer::new(source, &settings.work_dir);
        Pipeline::new(
            FinvizClient::from_settings(settings).unwrap(),
            ReportBuilder::new(charts, &settings.work_dir),
            Mailer::from_settings(settings).unwrap(),
        )
    }

    fn page_count(pdf: &[u8]) -> usize {
        lopdf::Document::load_mem(pdf).unwrap().get_pages().len()
    }

    #[tokio::test]
    async fn full_run_emails_report_and_removes_it() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let rows = json!([screener_row(1, "AAA"), screener_row(2, "BBB")]);
        let base = spawn_mock(upstreams(rows, sent.clone())).await;
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_for(&base, dir.path());

        let outcome = pipeline(&settings).run().await.unwrap();
        assert_eq!(outcome.stocks, 2);
        assert_eq!(outcome.recipient.as_deref(), Some("me@example.com"));
        assert!(outcome.report_path.is_none());
        assert!(!dir.path().join("stock_analysis.pdf").exists());

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let encoded = sent[0]["Messages"][0]["Attachments"][0]["Base64Content"]
            .as_str()
            .unwrap();
        let pdf = STANDARD.decode(encoded).unwrap();
        assert!(pdf.starts_with(b"%PDF"));
        assert_eq!(page_count(&pdf), 3);
    }

    #[tokio::test]
    async fn dry_run_keeps_the_report_and_sends_nothing() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let base = spawn_mock(upstreams(json!([screener_row(1, "AAA")]), sent.clone())).await;
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_for(&base, dir.path());

        let outcome = pipeline(&settings).execute(Delivery::KeepLocal).await.unwrap();
        let path = outcome.report_path.unwrap();
        assert!(path.exists());
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_run_is_rejected_while_one_is_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(&settings_for("http://127.0.0.1:9", dir.path()));

        let guard = p.try_begin().unwrap();
        assert!(matches!(p.run().await, Err(PipelineError::AlreadyRunning)));
        drop(guard);

        // Slot is free again; this run gets as far as the (unreachable) screener.
        assert!(matches!(p.run().await, Err(PipelineError::Screener(_))));
    }

    #[tokio::test]
    async fn empty_screener_result_aborts_before_any_report() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let base = spawn_mock(upstreams(json!([]), sent.clone())).await;
        let dir = tempfile::tempdir().unwrap();

        let err = pipeline(&settings_for(&base, dir.path())).run().await.unwrap_err();
        assert!(matches!(err, PipelineError::Screener(crate::error::ScreenerError::NoStocks)));
        assert!(!dir.path().join("stock_analysis.pdf").exists());
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn email_rejection_surfaces_provider_body() {
        let router = Router::new()
            .route(
                "/table",
                get(|| async { Json(json!({"rows": [screener_row(1, "AAA")]})) }),
            )
            .route(
                "/v8/finance/chart/:symbol",
                get(|| async { Json(chart_body()) }),
            )
            .route(
                "/v3.1/send",
                post(|| async { (StatusCode::BAD_REQUEST, "sender not validated") }),
            );
        let base = spawn_mock(router).await;
        let dir = tempfile::tempdir().unwrap();

        let err = pipeline(&settings_for(&base, dir.path())).run().await.unwrap_err();
        assert!(matches!(err, PipelineError::Email(_)));
        assert!(err.to_string().contains("sender not validated"));
    }

    #[tokio::test]
    async fn single_symbol_report_uses_placeholder_metrics() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let base = spawn_mock(upstreams(json!([]), sent)).await;
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(&settings_for(&base, dir.path()));

        let path = p.build_single("ABC").await.unwrap();
        let bytes = std::fs::read(Path::new(&path)).unwrap();
        assert_eq!(page_count(&bytes), 2);
    }

    #[tokio::test]
    async fn single_symbol_report_waits_for_the_run_slot() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let base = spawn_mock(upstreams(json!([]), sent)).await;
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(&settings_for(&base, dir.path()));

        // Stands in for the PDF a full run is about to email.
        let in_flight = p.reports().report_path();
        std::fs::write(&in_flight, b"report being sent").unwrap();

        let guard = p.try_begin().unwrap();
        let err = p.build_single("XYZ").await.unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyRunning));
        assert_eq!(std::fs::read(&in_flight).unwrap(), b"report being sent");
        drop(guard);

        let path = p.build_single("XYZ").await.unwrap();
        assert_eq!(path, in_flight);
        assert_eq!(page_count(&std::fs::read(&path).unwrap()), 2);
    }

    #[tokio::test]
    async fn chart_render_waits_for_the_run_slot() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let base = spawn_mock(upstreams(json!([]), sent)).await;
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(&settings_for(&base, dir.path()));
        let chart = p.reports().charts().chart_path("XYZ");

        let guard = p.try_begin().unwrap();
        let err = p.render_chart("XYZ").await.unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyRunning));
        assert!(!chart.exists());
        drop(guard);

        assert_eq!(p.render_chart("XYZ").await.unwrap(), chart);
        assert!(chart.exists());
    }
}
