use crate::config::Settings;
use crate::domain::stock::PriceBar;
use crate::error::ChartError;
use crate::ingest::provider::PriceHistorySource;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters::style::FontStyle;
use serde::Serialize;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// Logical canvas; files are written at `CHART_SCALE` times this size.
pub const CHART_WIDTH: u32 = 800;
pub const CHART_HEIGHT: u32 = 400;
pub const CHART_SCALE: u32 = 2;
const CHART_MARGIN: u32 = 50;

const DEBUG_WIDTH: u32 = 700;
const DEBUG_HEIGHT: u32 = 500;

const FONT_FAMILY: &str = "sans-serif";
// DejaVu Sans (Bitstream Vera license, see assets/fonts/LICENSE-DejaVu.txt).
const BUNDLED_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

const VOLUME_COLOR: RGBColor = RGBColor(128, 128, 128);
// Volume bars use the lower part of the plot so candles stay readable.
const VOLUME_HEADROOM: f64 = 4.0;

static CHART_FONT: OnceLock<bool> = OnceLock::new();

/// Registers the TTF used for chart text: `configured` when it loads, the
/// bundled font otherwise. Runs once per process; later calls return the
/// first outcome.
pub fn register_chart_font(configured: Option<&Path>) -> bool {
    *CHART_FONT.get_or_init(|| {
        if let Some(path) = configured {
            match std::fs::read(path) {
                Ok(bytes) => {
                    // plotters keeps a reference to the font data for the life of the process.
                    let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
                    if plotters::style::register_font(FONT_FAMILY, FontStyle::Normal, bytes).is_ok() {
                        tracing::info!(path = %path.display(), "chart font registered");
                        return true;
                    }
                    tracing::warn!(path = %path.display(), "chart font rejected: invalid font data; using bundled font");
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "chart font unreadable; using bundled font");
                }
            }
        }

        if plotters::style::register_font(FONT_FAMILY, FontStyle::Normal, BUNDLED_FONT).is_ok() {
            return true;
        }
        tracing::error!("bundled chart font rejected; charts will be drawn without text");
        false
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugChart {
    pub data_points: usize,
    pub file_exists: bool,
    pub file_size: u64,
    pub file_path: String,
}

#[derive(Clone)]
pub struct ChartRenderer {
    source: Arc<dyn PriceHistorySource>,
    work_dir: PathBuf,
    text: bool,
}

impl ChartRenderer {
    /// Text is drawn with the bundled font unless a font was registered earlier.
    pub fn new(source: Arc<dyn PriceHistorySource>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            work_dir: work_dir.into(),
            text: register_chart_font(None),
        }
    }

    pub fn from_settings(settings: &Settings, source: Arc<dyn PriceHistorySource>) -> Self {
        // Register the configured font before `new` falls back to the bundled one.
        let text = register_chart_font(settings.chart_font_path.as_deref());
        Self::new(source, &settings.work_dir).with_text(text)
    }

    /// Toggles captions, axis titles and tick labels.
    pub fn with_text(mut self, text: bool) -> Self {
        self.text = text;
        self
    }

    pub fn chart_path(&self, symbol: &str) -> PathBuf {
        self.work_dir
            .join(format!("temp_{}.png", file_safe_symbol(symbol)))
    }

    pub fn debug_chart_path(&self, symbol: &str) -> PathBuf {
        self.work_dir
            .join(format!("debug_{}.png", file_safe_symbol(symbol)))
    }

    /// Candlestick + volume chart for the last five days of hourly bars.
    ///
    /// An empty series still yields an image (a "No data available"
    /// placeholder). Fails only when the fetch fails or the PNG is missing or
    /// empty afterwards.
    pub async fn render_chart(&self, symbol: &str) -> Result<PathBuf, ChartError> {
        tracing::info!(%symbol, "starting chart generation");
        let bars = self
            .source
            .fetch_hourly_bars(symbol)
            .await
            .map_err(|e| ChartError::Fetch {
                symbol: symbol.to_string(),
                detail: format!("{e:#}"),
            })?;
        tracing::info!(%symbol, rows = bars.len(), provider = self.source.provider_name(), "downloaded price history");

        let path = self.chart_path(symbol);
        let task_path = path.clone();
        let task_symbol = symbol.to_string();
        let text = self.text;
        tokio::task::spawn_blocking(move || {
            if bars.is_empty() {
                tracing::warn!(symbol = %task_symbol, "no price data; drawing placeholder chart");
                draw_placeholder(&task_path, &task_symbol, text)
            } else {
                draw_candles(&task_path, &task_symbol, &bars, text)
            }
        })
        .await??;

        let size = file_size(&path).await;
        tracing::info!(%symbol, path = %path.display(), size, "chart file written");
        if size == 0 {
            return Err(ChartError::Missing {
                symbol: symbol.to_string(),
                path,
            });
        }

        Ok(path)
    }

    /// Minimal close-price line chart used to diagnose the rendering stack.
    /// Reports what ended up on disk instead of verifying it.
    pub async fn render_debug_chart(&self, symbol: &str) -> Result<DebugChart, ChartError> {
        let bars = self
            .source
            .fetch_hourly_bars(symbol)
            .await
            .map_err(|e| ChartError::Fetch {
                symbol: symbol.to_string(),
                detail: format!("{e:#}"),
            })?;
        tracing::info!(%symbol, rows = bars.len(), "debug chart: downloaded price history");

        let path = self.debug_chart_path(symbol);
        let task_path = path.clone();
        let task_symbol = symbol.to_string();
        let data_points = bars.len();
        tokio::task::spawn_blocking(move || draw_close_line(&task_path, &task_symbol, &bars))
            .await??;

        let file_exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
        Ok(DebugChart {
            data_points,
            file_exists,
            file_size: file_size(&path).await,
            file_path: path.display().to_string(),
        })
    }
}

async fn file_size(path: &Path) -> u64 {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .unwrap_or(0)
}

/// Symbols end up in file names; keep them to a conservative character set.
fn file_safe_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '=') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn draw_error(symbol: &str, err: impl Display) -> ChartError {
    ChartError::Draw {
        symbol: symbol.to_string(),
        detail: err.to_string(),
    }
}

fn scaled(v: u32) -> u32 {
    v * CHART_SCALE
}

fn price_bounds(bars: &[PriceBar]) -> (f64, f64) {
    let lo = bars.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let hi = bars.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    if !lo.is_finite() || !hi.is_finite() || hi <= lo {
        let mid = if lo.is_finite() { lo } else { 0.0 };
        return (mid - 1.0, mid + 1.0);
    }
    let pad = (hi - lo) * 0.05;
    (lo - pad, hi + pad)
}

fn draw_candles(path: &Path, symbol: &str, bars: &[PriceBar], text: bool) -> Result<(), ChartError> {
    let (width, height) = (scaled(CHART_WIDTH), scaled(CHART_HEIGHT));
    let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| draw_error(symbol, e))?;

    let n = bars.len();
    let x_range = -0.5f64..(n as f64 - 0.5);
    let (lo, hi) = price_bounds(bars);
    let max_volume = bars.iter().map(|b| b.volume).fold(0.0, f64::max).max(1.0);

    let mut builder = ChartBuilder::on(&root);
    builder.margin(scaled(CHART_MARGIN) / 2);
    if text {
        builder
            .caption(format!("{symbol} Price Chart"), (FONT_FAMILY, 18.0 * CHART_SCALE as f64))
            .x_label_area_size(scaled(40))
            .y_label_area_size(scaled(CHART_MARGIN))
            .right_y_label_area_size(scaled(CHART_MARGIN));
    }

    let mut chart = builder
        .build_cartesian_2d(x_range.clone(), lo..hi)
        .map_err(|e| draw_error(symbol, e))?
        .set_secondary_coord(x_range, 0f64..max_volume * VOLUME_HEADROOM);

    let bar_label = |x: &f64| {
        let idx = x.round();
        if idx < 0.0 || idx as usize >= n {
            return String::new();
        }
        bars[idx as usize].time.format("%m-%d %H:%M").to_string()
    };

    let mut mesh = chart.configure_mesh();
    mesh.disable_x_mesh()
        .light_line_style(RGBColor(235, 235, 235));
    if text {
        mesh.x_desc("Date")
            .y_desc("Price ($)")
            .x_labels(6)
            .x_label_formatter(&bar_label)
            .label_style((FONT_FAMILY, 11.0 * CHART_SCALE as f64));
    } else {
        mesh.x_labels(0).y_labels(0);
    }
    mesh.draw().map_err(|e| draw_error(symbol, e))?;

    if text {
        chart
            .configure_secondary_axes()
            .y_desc("Volume")
            .label_style((FONT_FAMILY, 11.0 * CHART_SCALE as f64))
            .draw()
            .map_err(|e| draw_error(symbol, e))?;
    }

    chart
        .draw_secondary_series(bars.iter().enumerate().map(|(i, b)| {
            let x = i as f64;
            Rectangle::new(
                [(x - 0.35, 0.0), (x + 0.35, b.volume)],
                VOLUME_COLOR.mix(0.5).filled(),
            )
        }))
        .map_err(|e| draw_error(symbol, e))?;

    let plot_width = f64::from(width - scaled(CHART_MARGIN) * 3);
    let candle_width = (plot_width / n as f64 * 0.6).clamp(1.0, 24.0) as u32;
    chart
        .draw_series(bars.iter().enumerate().map(|(i, b)| {
            CandleStick::new(
                i as f64,
                b.open,
                b.high,
                b.low,
                b.close,
                GREEN.filled(),
                RED.filled(),
                candle_width,
            )
        }))
        .map_err(|e| draw_error(symbol, e))?;

    root.present().map_err(|e| draw_error(symbol, e))?;
    Ok(())
}

fn draw_placeholder(path: &Path, symbol: &str, text: bool) -> Result<(), ChartError> {
    let (width, height) = (scaled(CHART_WIDTH), scaled(CHART_HEIGHT));
    let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| draw_error(symbol, e))?;

    let mut builder = ChartBuilder::on(&root);
    builder.margin(scaled(CHART_MARGIN) / 2);
    if text {
        builder.caption(format!("{symbol} Price Chart"), (FONT_FAMILY, 18.0 * CHART_SCALE as f64));
    }
    let mut chart = builder
        .build_cartesian_2d(0f64..1f64, 0f64..1f64)
        .map_err(|e| draw_error(symbol, e))?;
    chart
        .configure_mesh()
        .x_labels(0)
        .y_labels(0)
        .light_line_style(RGBColor(235, 235, 235))
        .draw()
        .map_err(|e| draw_error(symbol, e))?;

    if text {
        let style = TextStyle::from((FONT_FAMILY, 16.0 * CHART_SCALE as f64))
            .pos(Pos::new(HPos::Center, VPos::Center));
        let centre = ((width / 2) as i32, (height / 2) as i32);
        // The placeholder must not fail on its annotation alone.
        if let Err(err) = root.draw(&Text::new("No data available", centre, style)) {
            tracing::warn!(%symbol, error = %err, "placeholder annotation failed");
        }
    }

    root.present().map_err(|e| draw_error(symbol, e))?;
    Ok(())
}

fn draw_close_line(path: &Path, symbol: &str, bars: &[PriceBar]) -> Result<(), ChartError> {
    let root = BitMapBackend::new(path, (DEBUG_WIDTH, DEBUG_HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| draw_error(symbol, e))?;

    let (lo, hi) = if bars.is_empty() {
        (0.0, 1.0)
    } else {
        let lo = bars.iter().map(|b| b.close).fold(f64::INFINITY, f64::min);
        let hi = bars.iter().map(|b| b.close).fold(f64::NEG_INFINITY, f64::max);
        if hi > lo {
            (lo, hi)
        } else {
            (lo - 1.0, hi + 1.0)
        }
    };
    let x_max = bars.len().max(2) as f64 - 1.0;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .build_cartesian_2d(0f64..x_max, lo..hi)
        .map_err(|e| draw_error(symbol, e))?;
    chart
        .configure_mesh()
        .x_labels(0)
        .y_labels(0)
        .draw()
        .map_err(|e| draw_error(symbol, e))?;
    chart
        .draw_series(LineSeries::new(
            bars.iter().enumerate().map(|(i, b)| (i as f64, b.close)),
            &BLUE,
        ))
        .map_err(|e| draw_error(symbol, e))?;

    root.present().map_err(|e| draw_error(symbol, e))?;
    Ok(())
}
