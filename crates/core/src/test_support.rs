use crate::config::Settings;
use std::path::Path;

/// Serves `router` on an ephemeral localhost port and returns its base URL.
pub async fn spawn_mock(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Settings pointing every upstream at `base_url` and writing into `work_dir`.
pub fn settings_for(base_url: &str, work_dir: &Path) -> Settings {
    let mut settings = Settings::from_lookup(|_| None).unwrap();
    settings.rapidapi_key = Some("test-key".to_string());
    settings.finviz_base_url = base_url.to_string();
    settings.market_data_base_url = base_url.to_string();
    settings.mailjet_base_url = base_url.to_string();
    settings.mailjet_api_key = Some("mj-key".to_string());
    settings.mailjet_api_secret = Some("mj-secret".to_string());
    settings.mail_from = Some("reports@example.com".to_string());
    settings.personal_email = Some("me@example.com".to_string());
    settings.work_dir = work_dir.to_path_buf();
    settings
}

/// A screener row with the default column layout filled in.
pub fn screener_row(no: usize, ticker: &str) -> serde_json::Value {
    serde_json::json!([
        no.to_string(),
        ticker,
        "Company",
        "Technology",
        "Software",
        "USA",
        "210.44M",
        "1,204,331",
        "4.12",
        "12.50%"
    ])
}
