use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use smallcap_core::error::PipelineError;

/// Error response rendered as `{"detail": "..."}`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub detail: String,
}

impl AppError {
    pub fn conflict(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            detail: detail.into(),
        }
    }

    /// 500 with `prefix` prepended to the error text. The error is also
    /// reported to Sentry.
    pub fn internal<E>(prefix: &str, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let err = anyhow::Error::new(err);
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %err, "{}", prefix.trim_end_matches(": "));
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: format!("{prefix}{err}"),
        }
    }

    /// 409 when the run slot is taken, otherwise [`AppError::internal`].
    pub fn from_pipeline(prefix: &str, err: PipelineError) -> Self {
        match err {
            PipelineError::AlreadyRunning => Self::conflict("A report run is already in progress"),
            err => Self::internal(prefix, err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}
