use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use smallcap_core::config::Settings;
use smallcap_core::pipeline::{Delivery, Pipeline};

/// Runs the report pipeline once and exits.
#[derive(Debug, Parser)]
#[command(name = "smallcap_worker")]
struct Args {
    /// Build the report but do not email it; the PDF is left in WORK_DIR.
    #[arg(long)]
    dry_run: bool,

    /// Report on this one symbol instead of the screener results.
    #[arg(long)]
    symbol: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let pipeline = Pipeline::from_settings(&settings)?;

    let result = match args.symbol.as_deref() {
        Some(symbol) => run_single(&pipeline, symbol, args.dry_run).await,
        None => run_screened(&pipeline, args.dry_run).await,
    };

    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %format!("{err:#}"), "report run failed");
    }
    result
}

async fn run_screened(pipeline: &Pipeline, dry_run: bool) -> anyhow::Result<()> {
    let delivery = if dry_run {
        Delivery::KeepLocal
    } else {
        Delivery::Email
    };
    let outcome = pipeline.execute(delivery).await?;

    match outcome.report_path {
        Some(path) => tracing::info!(
            run_id = %outcome.run_id,
            stocks = outcome.stocks,
            path = %path.display(),
            dry_run = true,
            "report built"
        ),
        None => tracing::info!(
            run_id = %outcome.run_id,
            stocks = outcome.stocks,
            recipient = outcome.recipient.as_deref().unwrap_or_default(),
            "report sent"
        ),
    }
    Ok(())
}

async fn run_single(pipeline: &Pipeline, symbol: &str, dry_run: bool) -> anyhow::Result<()> {
    let path = pipeline
        .build_single(symbol)
        .await
        .with_context(|| format!("failed to build report for {symbol}"))?;

    if dry_run {
        tracing::info!(%symbol, path = %path.display(), dry_run = true, "single-symbol report built");
        return Ok(());
    }

    pipeline
        .mailer()
        .send_report(&path)
        .await
        .context("failed to email single-symbol report")?;
    tokio::fs::remove_file(&path)
        .await
        .with_context(|| format!("failed to remove {}", path.display()))?;
    tracing::info!(%symbol, "single-symbol report sent");
    Ok(())
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from(["smallcap_worker", "--dry-run", "--symbol", "ABC"]).unwrap();
        assert!(args.dry_run);
        assert_eq!(args.symbol.as_deref(), Some("ABC"));

        let args = Args::try_parse_from(["smallcap_worker"]).unwrap();
        assert!(!args.dry_run);
        assert!(args.symbol.is_none());
    }
}
