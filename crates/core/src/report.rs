use crate::chart::ChartRenderer;
use crate::config::Settings;
use crate::domain::stock::ScreenedStock;
use crate::error::{ChartError, ReportError};
use printpdf::image_crate::{self, DynamicImage, ImageFormat};
use printpdf::{BuiltinFont, Image, ImageTransform, IndirectFontRef, Mm, PdfDocument, PdfLayerReference};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub const REPORT_FILE_NAME: &str = "stock_analysis.pdf";
pub const TEST_PDF_FILE_NAME: &str = "test_email.pdf";

// A4, millimetres, origin top-left for layout purposes.
const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 10.0;
const LINE_HEIGHT_MM: f32 = 10.0;

const CHART_X_MM: f32 = 10.0;
const CHART_TOP_MM: f32 = 30.0;
const CHART_WIDTH_MM: f32 = 190.0;
const METRICS_TOP_MM: f32 = 200.0;

const PT_TO_MM: f32 = 0.3528;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    pub size: f32,
    pub bold: bool,
    pub align: Align,
    /// Top of the line's cell, measured from the top edge of the page.
    pub top_mm: f32,
}

/// A rendered chart, kept as PNG bytes until it is embedded.
#[derive(Debug, Clone)]
pub struct ChartImage {
    png: Vec<u8>,
    width: u32,
    height: u32,
}

impl ChartImage {
    /// Checks that `png` decodes and records its size. The pixels are not kept.
    pub fn from_png(png: Vec<u8>) -> Result<Self, image_crate::ImageError> {
        let image = decode_png(&png)?;
        Ok(Self {
            width: image.width(),
            height: image.height(),
            png,
        })
    }

    pub fn png(&self) -> &[u8] {
        &self.png
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

fn decode_png(png: &[u8]) -> Result<DynamicImage, image_crate::ImageError> {
    image_crate::load_from_memory_with_format(png, ImageFormat::Png)
}

#[derive(Debug, Clone, Default)]
pub struct ReportPage {
    pub lines: Vec<TextLine>,
    pub chart: Option<ChartImage>,
}

impl ReportPage {
    pub fn text(&self) -> Vec<&str> {
        self.lines.iter().map(|l| l.text.as_str()).collect()
    }
}

/// Page-by-page content of a report, independent of the PDF encoding.
#[derive(Debug, Clone, Default)]
pub struct ReportLayout {
    pub pages: Vec<ReportPage>,
    pub successful_charts: usize,
}

/// Flowing text cursor: each cell takes one line height below the previous one.
struct PageCursor {
    page: ReportPage,
    y: f32,
    size: f32,
    bold: bool,
}

impl PageCursor {
    fn new() -> Self {
        Self {
            page: ReportPage::default(),
            y: MARGIN_MM,
            size: 12.0,
            bold: false,
        }
    }

    fn font(&mut self, size: f32, bold: bool) -> &mut Self {
        self.size = size;
        self.bold = bold;
        self
    }

    fn cell(&mut self, text: impl Into<String>, align: Align) -> &mut Self {
        self.page.lines.push(TextLine {
            text: text.into(),
            size: self.size,
            bold: self.bold,
            align,
            top_mm: self.y,
        });
        self.y += LINE_HEIGHT_MM;
        self
    }

    fn set_y(&mut self, y: f32) -> &mut Self {
        self.y = y;
        self
    }

    fn finish(self) -> ReportPage {
        self.page
    }
}

#[derive(Clone)]
pub struct ReportBuilder {
    charts: ChartRenderer,
    work_dir: PathBuf,
}

impl ReportBuilder {
    pub fn new(charts: ChartRenderer, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            charts,
            work_dir: work_dir.into(),
        }
    }

    pub fn from_settings(settings: &Settings, charts: ChartRenderer) -> Self {
        Self::new(charts, &settings.work_dir)
    }

    pub fn charts(&self) -> &ChartRenderer {
        &self.charts
    }

    pub fn report_path(&self) -> PathBuf {
        self.work_dir.join(REPORT_FILE_NAME)
    }

    /// One page per stock, in order, plus a summary page. Chart failures are
    /// noted on the stock's page and never abort the run.
    pub async fn build_layout(&self, stocks: &[ScreenedStock]) -> ReportLayout {
        tracing::info!(stocks = stocks.len(), "generating report");
        let mut layout = ReportLayout::default();

        for stock in stocks {
            tracing::info!(symbol = %stock.ticker, "processing stock");
            let mut cursor = PageCursor::new();
            cursor
                .font(16.0, true)
                .cell(format!("{} Analysis", stock.ticker), Align::Center)
                .font(12.0, false)
                .cell(format!("Daily Change: {}", stock.change), Align::Center);

            let chart = if stock.ticker.trim().is_empty() {
                tracing::warn!("empty symbol; skipping chart");
                None
            } else {
                match self.load_chart(&stock.ticker).await {
                    Ok(image) => Some(image),
                    Err(err) => {
                        tracing::error!(symbol = %stock.ticker, error = %err, "chart generation failed");
                        None
                    }
                }
            };

            match chart {
                Some(image) => {
                    cursor.page.chart = Some(image);
                    layout.successful_charts += 1;
                }
                None => {
                    cursor.cell("Chart generation failed", Align::Center);
                }
            }

            cursor
                .set_y(METRICS_TOP_MM)
                .cell(format!("Market Cap: {}", stock.market_cap), Align::Left)
                .cell(format!("Volume: {}", stock.volume), Align::Left)
                .cell(format!("Relative Volume: {}", stock.relative_volume), Align::Left);
            layout.pages.push(cursor.finish());
        }

        let mut summary = PageCursor::new();
        summary
            .font(14.0, true)
            .cell("Report Summary", Align::Center)
            .font(12.0, false)
            .cell(format!("Total stocks processed: {}", stocks.len()), Align::Left)
            .cell(
                format!("Successful charts generated: {}", layout.successful_charts),
                Align::Left,
            );
        layout.pages.push(summary.finish());

        layout
    }

    pub async fn build_report(&self, stocks: &[ScreenedStock]) -> Result<PathBuf, ReportError> {
        let layout = self.build_layout(stocks).await;
        let successful = layout.successful_charts;
        let path = self.report_path();
        self.write(layout, path.clone(), "Stock Analysis Report").await?;
        tracing::info!(path = %path.display(), successful_charts = successful, "PDF generated");
        Ok(path)
    }

    /// One-page PDF used to exercise the mail path without running the screener.
    pub async fn build_test_pdf(&self) -> Result<PathBuf, ReportError> {
        let mut cursor = PageCursor::new();
        cursor
            .font(16.0, true)
            .cell("Test Email PDF", Align::Center)
            .cell(format!("Generated at: {}", chrono::Local::now()), Align::Center);
        let layout = ReportLayout {
            pages: vec![cursor.finish()],
            successful_charts: 0,
        };

        let path = self.work_dir.join(TEST_PDF_FILE_NAME);
        self.write(layout, path.clone(), "Test Email PDF").await?;
        Ok(path)
    }

    async fn write(&self, layout: ReportLayout, path: PathBuf, title: &'static str) -> Result<(), ReportError> {
        let task_path = path.clone();
        tokio::task::spawn_blocking(move || write_pdf(&layout, &task_path, title)).await??;

        let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(ReportError::Empty(path));
        }
        Ok(())
    }

    /// Renders, reads back and deletes the chart PNG for `symbol`.
    async fn load_chart(&self, symbol: &str) -> Result<ChartImage, ChartError> {
        let path = self.charts.render_chart(symbol).await?;
        let bytes = tokio::fs::read(&path).await.map_err(|_| ChartError::Missing {
            symbol: symbol.to_string(),
            path: path.clone(),
        })?;
        if let Err(err) = tokio::fs::remove_file(&path).await {
            tracing::warn!(path = %path.display(), error = %err, "failed to remove chart file");
        }

        ChartImage::from_png(bytes).map_err(|e| ChartError::Decode {
            symbol: symbol.to_string(),
            detail: e.to_string(),
        })
    }
}

fn pdf_error(err: impl std::fmt::Display) -> ReportError {
    ReportError::Pdf(err.to_string())
}

fn write_pdf(layout: &ReportLayout, path: &Path, title: &str) -> Result<(), ReportError> {
    let (doc, first_page, first_layer) =
        PdfDocument::new(title, Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1");
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(pdf_error)?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(pdf_error)?;

    for (idx, page) in layout.pages.iter().enumerate() {
        let layer = if idx == 0 {
            doc.get_page(first_page).get_layer(first_layer)
        } else {
            let (p, l) = doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1");
            doc.get_page(p).get_layer(l)
        };

        if let Some(chart) = &page.chart {
            place_chart(&layer, chart)?;
        }

        for line in &page.lines {
            let font = if line.bold { &bold } else { &regular };
            place_text(&layer, line, font);
        }
    }

    let file = File::create(path)?;
    doc.save(&mut BufWriter::new(file)).map_err(pdf_error)?;
    Ok(())
}

/// Decodes one chart at a time so only the page being written holds pixels.
fn place_chart(layer: &PdfLayerReference, chart: &ChartImage) -> Result<(), ReportError> {
    let (w, h) = chart.dimensions();
    if w == 0 || h == 0 {
        return Ok(());
    }
    let (px_w, px_h) = (w as f32, h as f32);
    let height_mm = CHART_WIDTH_MM * px_h / px_w;
    let dpi = px_w * 25.4 / CHART_WIDTH_MM;

    // Alpha is dropped; the chart background is opaque white anyway.
    let pixels = DynamicImage::ImageRgb8(decode_png(chart.png()).map_err(pdf_error)?.to_rgb8());
    Image::from_dynamic_image(&pixels).add_to_layer(
        layer.clone(),
        ImageTransform {
            translate_x: Some(Mm(CHART_X_MM)),
            translate_y: Some(Mm(PAGE_HEIGHT_MM - CHART_TOP_MM - height_mm)),
            dpi: Some(dpi),
            ..Default::default()
        },
    );
    Ok(())
}

fn place_text(layer: &PdfLayerReference, line: &TextLine, font: &IndirectFontRef) {
    let x = match line.align {
        Align::Left => MARGIN_MM,
        Align::Center => ((PAGE_WIDTH_MM - approx_text_width_mm(line)) / 2.0).max(MARGIN_MM),
    };
    // Baseline sits near the bottom of the cell, like a single-line table cell.
    let baseline = PAGE_HEIGHT_MM - line.top_mm - LINE_HEIGHT_MM * 0.65;
    layer.use_text(line.text.clone(), line.size, Mm(x), Mm(baseline), font);
}

// Builtin fonts carry no metrics here; Helvetica averages about half an em per glyph.
fn approx_text_width_mm(line: &TextLine) -> f32 {
    let em = if line.bold { 0.56 } else { 0.5 };
    line.text.chars().count() as f32 * line.size * em * PT_TO_MM
}
