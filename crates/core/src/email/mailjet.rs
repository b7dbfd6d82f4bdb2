use crate::config::Settings;
use crate::error::EmailError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Local};
use reqwest::StatusCode;
use serde::Serialize;
use std::path::Path;

const SEND_PATH: &str = "/v3.1/send";

const SENDER_NAME: &str = "Stock Analysis";
const RECIPIENT_NAME: &str = "Recipient";
const ATTACHMENT_NAME: &str = "stock_analysis.pdf";
const TEXT_PART: &str = "Please find attached today's stock analysis report.";
const HTML_PART: &str =
    "<h3>Stock Analysis Report</h3><p>Please find attached today's stock analysis report.</p>";

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SendRequest {
    pub messages: Vec<EmailMessage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EmailMessage {
    pub from: Contact,
    pub to: Vec<Contact>,
    pub subject: String,
    pub text_part: String,
    #[serde(rename = "HTMLPart")]
    pub html_part: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Contact {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Attachment {
    pub content_type: String,
    pub filename: String,
    pub base64_content: String,
}

/// Builds the single-message payload sent for a report.
pub fn build_message(from: &str, to: &str, pdf: &[u8], now: DateTime<Local>) -> SendRequest {
    SendRequest {
        messages: vec![EmailMessage {
            from: Contact {
                email: from.to_string(),
                name: SENDER_NAME.to_string(),
            },
            to: vec![Contact {
                email: to.to_string(),
                name: RECIPIENT_NAME.to_string(),
            }],
            subject: format!("Stock Analysis Report {}", now.format("%Y-%m-%d %H:%M")),
            text_part: TEXT_PART.to_string(),
            html_part: HTML_PART.to_string(),
            attachments: vec![Attachment {
                content_type: "application/pdf".to_string(),
                filename: ATTACHMENT_NAME.to_string(),
                base64_content: STANDARD.encode(pdf),
            }],
        }],
    }
}

/// Mailjet v3.1 client delivering the report to the one configured recipient.
///
/// Credentials and addresses are checked when sending, not when building, so
/// the HTTP surface can start (and report via `/check-env`) without them.
#[derive(Debug, Clone)]
pub struct Mailer {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    from: Option<String>,
    to: Option<String>,
}

impl Mailer {
    pub fn from_settings(settings: &Settings) -> Result<Self, EmailError> {
        let http = reqwest::Client::builder()
            .timeout(settings.http_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: settings.mailjet_base_url.clone(),
            api_key: settings.mailjet_api_key.clone(),
            api_secret: settings.mailjet_api_secret.clone(),
            from: settings.mail_from.clone(),
            to: settings.personal_email.clone(),
        })
    }

    pub fn recipient(&self) -> Option<&str> {
        self.to.as_deref()
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), SEND_PATH)
    }

    fn required<'a>(value: &'a Option<String>, key: &str) -> Result<&'a str, EmailError> {
        value
            .as_deref()
            .ok_or_else(|| EmailError::Config(format!("{key} is required")))
    }

    pub async fn send_report(&self, pdf_path: &Path) -> Result<bool, EmailError> {
        let api_key = Self::required(&self.api_key, "MAILJET_API_KEY")?;
        let api_secret = Self::required(&self.api_secret, "MAILJET_API_SECRET")?;
        let from = Self::required(&self.from, "MAIL_FROM")?;
        let to = Self::required(&self.to, "PERSONAL_EMAIL")?;

        tracing::info!(path = %pdf_path.display(), "reading report for email");
        let pdf = tokio::fs::read(pdf_path)
            .await
            .map_err(|source| EmailError::Attachment {
                path: pdf_path.to_path_buf(),
                source,
            })?;

        tracing::info!(%from, %to, bytes = pdf.len(), "sending email via Mailjet");
        let payload = build_message(from, to, &pdf, Local::now());
        let res = self
            .http
            .post(self.url())
            .basic_auth(api_key, Some(api_secret))
            .json(&payload)
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;
        tracing::info!(status = %status, response = %body, "Mailjet response");

        if status != StatusCode::OK {
            return Err(EmailError::Rejected { status, body });
        }

        tracing::info!(%to, "email sent");
        Ok(true)
    }
}
