use reqwest::StatusCode;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ScreenerError {
    #[error("screener is not configured: {0}")]
    Config(String),

    #[error("failed to fetch data from screener API: {0}")]
    Http(#[from] reqwest::Error),

    #[error("screener API response: {status} {body}")]
    Status { status: StatusCode, body: String },

    #[error("screener response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("screener row {row} has no column {column}")]
    MalformedRow { row: usize, column: usize },

    #[error("no stocks found matching the criteria")]
    NoStocks,
}

#[derive(Debug, thiserror::Error)]
pub enum ChartError {
    #[error("price fetch failed for {symbol}: {detail}")]
    Fetch { symbol: String, detail: String },

    #[error("chart drawing failed for {symbol}: {detail}")]
    Draw { symbol: String, detail: String },

    #[error("failed to create chart image for {symbol} at {}", .path.display())]
    Missing { symbol: String, path: PathBuf },

    #[error("chart image for {symbol} could not be decoded: {detail}")]
    Decode { symbol: String, detail: String },

    #[error("chart task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("PDF write failed: {0}")]
    Pdf(String),

    #[error("report I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to create PDF or PDF is empty: {}", .0.display())]
    Empty(PathBuf),

    #[error("report task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("email is not configured: {0}")]
    Config(String),

    #[error("failed to read attachment {}: {source}", .path.display())]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("email request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to send email. Mailjet response ({status}): {body}")]
    Rejected { status: StatusCode, body: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("a report run is already in progress")]
    AlreadyRunning,

    #[error(transparent)]
    Screener(#[from] ScreenerError),

    #[error(transparent)]
    Chart(#[from] ChartError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Email(#[from] EmailError),

    #[error("cleanup of {} failed: {source}", .path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
