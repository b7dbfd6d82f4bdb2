pub mod chart;
pub mod domain;
pub mod email;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod report;
pub mod schedule;

#[cfg(test)]
pub(crate) mod test_support;

pub mod config {
    use anyhow::Context;
    use std::path::PathBuf;
    use std::time::Duration;

    const DEFAULT_FINVIZ_HOST: &str = "finviz-screener.p.rapidapi.com";
    const DEFAULT_FINVIZ_BASE_URL: &str = "https://finviz-screener.p.rapidapi.com";
    const DEFAULT_MARKET_DATA_BASE_URL: &str = "https://query1.finance.yahoo.com";
    const DEFAULT_MAILJET_BASE_URL: &str = "https://api.mailjet.com";
    const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

    // Weekdays at 15:30 local time (sec min hour dom month dow).
    pub const DEFAULT_SCHEDULE_CRON: &str = "0 30 15 * * Mon-Fri";
    pub const DEFAULT_SCHEDULE_TIMEZONE: chrono_tz::Tz = chrono_tz::Europe::Stockholm;

    /// Process-wide configuration, read once at startup and passed to each
    /// component explicitly.
    #[derive(Debug, Clone)]
    pub struct Settings {
        pub rapidapi_key: Option<String>,
        pub finviz_host: String,
        pub finviz_base_url: String,
        pub market_data_base_url: String,
        pub mailjet_api_key: Option<String>,
        pub mailjet_api_secret: Option<String>,
        pub mailjet_base_url: String,
        pub mail_from: Option<String>,
        pub personal_email: Option<String>,
        pub sentry_dsn: Option<String>,
        pub work_dir: PathBuf,
        pub chart_font_path: Option<PathBuf>,
        pub http_timeout: Duration,
        pub schedule_cron: String,
        pub schedule_timezone: chrono_tz::Tz,
        pub scheduler_enabled: bool,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Self::from_lookup(|key| std::env::var(key).ok())
        }

        /// Builds settings from an arbitrary key lookup. Blank values count as unset.
        pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
        where
            F: Fn(&str) -> Option<String>,
        {
            let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

            let http_timeout_secs = match get("HTTP_TIMEOUT_SECS") {
                Some(s) => s
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("HTTP_TIMEOUT_SECS must be an integer (got {s})"))?,
                None => DEFAULT_HTTP_TIMEOUT_SECS,
            };

            let schedule_timezone = match get("SCHEDULE_TIMEZONE") {
                Some(s) => s
                    .trim()
                    .parse::<chrono_tz::Tz>()
                    .map_err(|e| anyhow::anyhow!("invalid SCHEDULE_TIMEZONE {s}: {e}"))?,
                None => DEFAULT_SCHEDULE_TIMEZONE,
            };

            let scheduler_enabled = match get("SCHEDULER_ENABLED") {
                Some(s) => parse_bool(&s)
                    .with_context(|| format!("SCHEDULER_ENABLED must be true/false (got {s})"))?,
                None => true,
            };

            Ok(Self {
                rapidapi_key: get("RAPIDAPI_KEY"),
                finviz_host: get("FINVIZ_HOST").unwrap_or_else(|| DEFAULT_FINVIZ_HOST.to_string()),
                finviz_base_url: get("FINVIZ_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_FINVIZ_BASE_URL.to_string()),
                market_data_base_url: get("MARKET_DATA_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_MARKET_DATA_BASE_URL.to_string()),
                mailjet_api_key: get("MAILJET_API_KEY"),
                mailjet_api_secret: get("MAILJET_API_SECRET"),
                mailjet_base_url: get("MAILJET_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_MAILJET_BASE_URL.to_string()),
                mail_from: get("MAIL_FROM"),
                personal_email: get("PERSONAL_EMAIL"),
                sentry_dsn: get("SENTRY_DSN"),
                work_dir: get("WORK_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(".")),
                chart_font_path: get("CHART_FONT_PATH").map(PathBuf::from),
                http_timeout: Duration::from_secs(http_timeout_secs),
                schedule_cron: get("SCHEDULE_CRON")
                    .unwrap_or_else(|| DEFAULT_SCHEDULE_CRON.to_string()),
                schedule_timezone,
                scheduler_enabled,
            })
        }

        pub fn require_rapidapi_key(&self) -> anyhow::Result<&str> {
            self.rapidapi_key
                .as_deref()
                .context("RAPIDAPI_KEY is required")
        }

        pub fn require_mailjet_api_key(&self) -> anyhow::Result<&str> {
            self.mailjet_api_key
                .as_deref()
                .context("MAILJET_API_KEY is required")
        }

        pub fn require_mailjet_api_secret(&self) -> anyhow::Result<&str> {
            self.mailjet_api_secret
                .as_deref()
                .context("MAILJET_API_SECRET is required")
        }

        pub fn require_mail_from(&self) -> anyhow::Result<&str> {
            self.mail_from.as_deref().context("MAIL_FROM is required")
        }

        pub fn require_personal_email(&self) -> anyhow::Result<&str> {
            self.personal_email
                .as_deref()
                .context("PERSONAL_EMAIL is required")
        }
    }

    fn parse_bool(s: &str) -> Option<bool> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::collections::HashMap;

        fn settings(pairs: &[(&str, &str)]) -> anyhow::Result<Settings> {
            let map: HashMap<String, String> = pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            Settings::from_lookup(|k| map.get(k).cloned())
        }

        #[test]
        fn defaults_when_nothing_is_set() {
            let s = settings(&[]).unwrap();
            assert_eq!(s.finviz_host, DEFAULT_FINVIZ_HOST);
            assert_eq!(s.schedule_cron, DEFAULT_SCHEDULE_CRON);
            assert_eq!(s.schedule_timezone, chrono_tz::Europe::Stockholm);
            assert_eq!(s.http_timeout, Duration::from_secs(30));
            assert_eq!(s.work_dir, PathBuf::from("."));
            assert!(s.scheduler_enabled);
            assert!(s.rapidapi_key.is_none());
            assert!(s.require_mail_from().is_err());
        }

        #[test]
        fn blank_values_count_as_unset() {
            let s = settings(&[("PERSONAL_EMAIL", "   "), ("MAIL_FROM", "a@b.c")]).unwrap();
            assert!(s.personal_email.is_none());
            assert_eq!(s.require_mail_from().unwrap(), "a@b.c");
        }

        #[test]
        fn rejects_bad_timezone_and_timeout() {
            assert!(settings(&[("SCHEDULE_TIMEZONE", "Mars/Olympus")]).is_err());
            assert!(settings(&[("HTTP_TIMEOUT_SECS", "soon")]).is_err());
            assert!(settings(&[("SCHEDULER_ENABLED", "maybe")]).is_err());
        }

        #[test]
        fn reads_overrides() {
            let s = settings(&[
                ("SCHEDULE_TIMEZONE", "America/New_York"),
                ("SCHEDULER_ENABLED", "false"),
                ("WORK_DIR", "/tmp/reports"),
            ])
            .unwrap();
            assert_eq!(s.schedule_timezone, chrono_tz::America::New_York);
            assert!(!s.scheduler_enabled);
            assert_eq!(s.work_dir, PathBuf::from("/tmp/reports"));
        }
    }
}
