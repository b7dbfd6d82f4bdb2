use crate::config::Settings;
use crate::error::PipelineError;
use crate::pipeline::Pipeline;
use anyhow::Context;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;

/// Cron expression (with seconds) evaluated in a fixed IANA timezone, so the
/// daily fire time follows local daylight saving changes.
#[derive(Debug, Clone)]
pub struct ReportSchedule {
    expression: String,
    schedule: Schedule,
    tz: Tz,
}

impl ReportSchedule {
    pub fn new(expression: &str, tz: Tz) -> anyhow::Result<Self> {
        let schedule = Schedule::from_str(expression)
            .with_context(|| format!("invalid cron expression: {expression}"))?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
            tz,
        })
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Self::new(&settings.schedule_cron, settings.schedule_timezone)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.tz))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Runs one scheduled report. Failures are logged only; returns whether the
/// run completed.
pub async fn run_scheduled(pipeline: &Pipeline) -> bool {
    match pipeline.run().await {
        Ok(outcome) => {
            tracing::info!(run_id = %outcome.run_id, stocks = outcome.stocks, "scheduled report sent");
            true
        }
        Err(PipelineError::AlreadyRunning) => {
            tracing::warn!("report run already in progress; skipping scheduled run");
            false
        }
        Err(err) => {
            tracing::error!(error = %err, "scheduled report run failed");
            false
        }
    }
}

/// Sleeps until each fire time and runs the pipeline, forever.
pub async fn run_scheduler(pipeline: Arc<Pipeline>, schedule: ReportSchedule) {
    tracing::info!(
        cron = schedule.expression(),
        timezone = schedule.timezone().name(),
        "report scheduler started"
    );

    loop {
        let now = Utc::now();
        let Some(next) = schedule.next_after(now) else {
            tracing::warn!(cron = schedule.expression(), "schedule has no future fire times; scheduler stopping");
            return;
        };
        tracing::info!(next_run = %next, "next scheduled report");

        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        run_scheduled(&pipeline).await;
    }
}
