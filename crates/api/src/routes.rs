use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use smallcap_core::config::Settings;
use smallcap_core::domain::stock::ScreenedStock;
use smallcap_core::pipeline::Pipeline;

use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, settings: Settings) -> Self {
        Self {
            pipeline,
            settings: Arc::new(settings),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/generate-report", get(generate_report))
        .route("/test-finviz", get(test_finviz))
        .route("/test-chart/:symbol", get(test_chart))
        .route("/test-stocks", get(test_stocks))
        .route("/test-single/:symbol", get(test_single))
        .route("/debug-chart/:symbol", get(debug_chart))
        .route("/test-email", get(test_email))
        .route("/check-env", get(check_env))
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "Welcome to Stock Screener API",
        "endpoints": {
            "generate_report": "/generate-report",
            "test_finviz": "/test-finviz",
            "test_chart": "/test-chart/{symbol}",
            "test_stocks": "/test-stocks",
            "test_single": "/test-single/{symbol}",
            "debug_chart": "/debug-chart/{symbol}",
            "test_email": "/test-email",
            "check_env": "/check-env",
            "healthz": "/healthz"
        }
    }))
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct ReportSent {
    message: &'static str,
    recipient: Option<String>,
}

async fn generate_report(State(state): State<AppState>) -> Result<Json<ReportSent>, AppError> {
    let outcome = state
        .pipeline
        .run()
        .await
        .map_err(|e| AppError::from_pipeline("Failed to generate report: ", e))?;

    Ok(Json(ReportSent {
        message: "Stock analysis report generated and sent successfully",
        recipient: outcome.recipient,
    }))
}

async fn test_finviz(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let raw = state
        .pipeline
        .screener()
        .fetch_raw()
        .await
        .map_err(|e| AppError::internal("Failed to connect to Finviz API: ", e))?;

    Ok(Json(json!({
        "status": "success",
        "status_code": raw.status_code,
        "raw_response": raw.raw_response,
        "response": raw.response,
    })))
}

async fn test_chart(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Value>, AppError> {
    let path = state
        .pipeline
        .render_chart(&symbol)
        .await
        .map_err(|e| AppError::from_pipeline("Failed to generate chart: ", e))?;

    Ok(Json(json!({
        "status": "success",
        "chart_path": path.display().to_string(),
    })))
}

#[derive(Debug, Serialize)]
struct StockList {
    status: &'static str,
    count: usize,
    stocks: Vec<ScreenedStock>,
}

async fn test_stocks(State(state): State<AppState>) -> Result<Json<StockList>, AppError> {
    let stocks = state
        .pipeline
        .screener()
        .fetch_screened_stocks()
        .await
        .map_err(|e| AppError::internal("Failed to get stocks: ", e))?;

    Ok(Json(StockList {
        status: "success",
        count: stocks.len(),
        stocks,
    }))
}

async fn test_single(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Value>, AppError> {
    let path = state
        .pipeline
        .build_single(&symbol)
        .await
        .map_err(|e| AppError::from_pipeline("Failed to generate report: ", e))?;

    Ok(Json(json!({
        "status": "success",
        "pdf_path": path.display().to_string(),
    })))
}

async fn debug_chart(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Value>, AppError> {
    let chart = state
        .pipeline
        .reports()
        .charts()
        .render_debug_chart(&symbol)
        .await
        .map_err(|e| AppError::internal("", e))?;

    Ok(Json(json!({
        "status": "success",
        "data_points": chart.data_points,
        "file_exists": chart.file_exists,
        "file_size": chart.file_size,
        "file_path": chart.file_path,
    })))
}

async fn test_email(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let path = state
        .pipeline
        .reports()
        .build_test_pdf()
        .await
        .map_err(|e| AppError::internal("Failed to send test email: ", e))?;

    let sent = state.pipeline.mailer().send_report(&path).await;
    if let Err(err) = tokio::fs::remove_file(&path).await {
        tracing::warn!(path = %path.display(), error = %err, "failed to remove test PDF");
    }
    sent.map_err(|e| AppError::internal("Failed to send test email: ", e))?;

    Ok(Json(json!({
        "status": "success",
        "message": format!(
            "Test email sent to {}",
            state.settings.personal_email.as_deref().unwrap_or_default()
        ),
    })))
}

async fn check_env(State(state): State<AppState>) -> Json<Value> {
    let s = &state.settings;
    Json(json!({
        "RAPIDAPI_KEY": s.rapidapi_key.is_some(),
        "MAILJET_API_KEY": s.mailjet_api_key.is_some(),
        "MAILJET_API_SECRET": s.mailjet_api_secret.is_some(),
        "MAIL_FROM": s.mail_from,
        "PERSONAL_EMAIL": s.personal_email,
    }))
}
