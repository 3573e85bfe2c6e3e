//! Report sinks: the styled workbook and the plain CSV bar dump.

pub mod dump;

use crate::config::ReportConfig;
use crate::models::{META_COLUMNS, Report, ReportRow, StyleGrid, TrendCategory};
use anyhow::{Context, Result};
use rust_xlsxwriter::{Color, Format, Workbook, Worksheet};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Where a finished report goes.
pub trait ReportSink: Send + Sync {
    fn write(&self, report: &Report, grid: &StyleGrid, path: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnWidths {
    pub code: f64,
    pub name: f64,
    pub group: f64,
    pub date: f64,
}

impl ColumnWidths {
    /// Widths for the meta columns followed by `dates` date columns.
    pub fn layout(&self, dates: usize) -> Vec<f64> {
        let mut widths = vec![self.code, self.name, self.group];
        widths.resize(META_COLUMNS.len() + dates, self.date);
        widths
    }
}

/// Font colour for a price cell. Taiwan convention: up red, down green.
pub fn font_color(category: TrendCategory) -> Option<Color> {
    match category {
        TrendCategory::Up => Some(Color::Red),
        TrendCategory::Down => Some(Color::Green),
        TrendCategory::Neutral => None,
    }
}

/// Content of one body cell before it reaches the worksheet.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Price(f64, TrendCategory),
    Blank,
}

/// Body cells of report row `i`, meta columns first.
pub fn row_cells(row: &ReportRow, i: usize, grid: &StyleGrid) -> Vec<Cell> {
    let mut cells = vec![
        Cell::Text(row.record.code.clone()),
        Cell::Text(row.record.display_name.clone()),
        Cell::Text(row.record.group.clone()),
    ];
    cells.extend(row.prices.iter().enumerate().map(|(j, price)| match price {
        Some(v) => Cell::Price(*v, grid.get(i, META_COLUMNS.len() + j)),
        None => Cell::Blank,
    }));
    cells
}

/// Single-sheet `.xlsx` writer. Up is red, down is green.
pub struct XlsxExporter {
    sheet_name: String,
    widths: ColumnWidths,
}

impl XlsxExporter {
    pub fn new(sheet_name: impl Into<String>, widths: ColumnWidths) -> Self {
        Self { sheet_name: sheet_name.into(), widths }
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    pub fn from_config(cfg: &ReportConfig) -> Self {
        Self::new(
            cfg.sheet_name.clone(),
            ColumnWidths {
                code: cfg.code_width,
                name: cfg.name_width,
                group: cfg.group_width,
                date: cfg.date_width,
            },
        )
    }

    /// Render the workbook in memory.
    pub fn render(&self, report: &Report, grid: &StyleGrid) -> Result<Vec<u8>> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet
            .set_name(&self.sheet_name)
            .with_context(|| format!("Invalid sheet name {:?}", self.sheet_name))?;

        self.write_header(sheet, report)?;
        self.write_rows(sheet, report, grid)?;

        workbook.save_to_buffer().context("Failed to render workbook")
    }

    fn write_header(&self, sheet: &mut Worksheet, report: &Report) -> Result<()> {
        let bold = Format::new().set_bold();
        let titles = META_COLUMNS
            .iter()
            .map(|t| t.to_string())
            .chain(report.dates.iter().map(|d| d.to_string()));

        for (c, (title, width)) in titles.zip(self.widths.layout(report.dates.len())).enumerate() {
            let col = col_index(c)?;
            sheet.write_string_with_format(0, col, title, &bold)?;
            sheet.set_column_width(col, width)?;
        }
        sheet.set_freeze_panes(1, 0)?;
        Ok(())
    }

    fn write_rows(&self, sheet: &mut Worksheet, report: &Report, grid: &StyleGrid) -> Result<()> {
        let colored = |category| font_color(category).map(|c| Format::new().set_font_color(c));
        let up = colored(TrendCategory::Up);
        let down = colored(TrendCategory::Down);

        for (i, row) in report.rows.iter().enumerate() {
            let r = u32::try_from(i + 1).context("Too many rows for a worksheet")?;

            for (c, cell) in row_cells(row, i, grid).into_iter().enumerate() {
                let col = col_index(c)?;
                let format = match &cell {
                    Cell::Price(_, TrendCategory::Up) => up.as_ref(),
                    Cell::Price(_, TrendCategory::Down) => down.as_ref(),
                    _ => None,
                };
                match (cell, format) {
                    (Cell::Text(t), _) => sheet.write_string(r, col, t)?,
                    (Cell::Price(v, _), Some(f)) => sheet.write_number_with_format(r, col, v, f)?,
                    (Cell::Price(v, _), None) => sheet.write_number(r, col, v)?,
                    // Missing prices stay blank
                    (Cell::Blank, _) => continue,
                };
            }
        }
        Ok(())
    }
}

fn col_index(c: usize) -> Result<u16> {
    u16::try_from(c).context("Too many columns for a worksheet")
}

impl ReportSink for XlsxExporter {
    fn write(&self, report: &Report, grid: &StyleGrid, path: &Path) -> Result<()> {
        let bytes = self.render(report, grid)?;
        write_atomically(path, &bytes)?;
        info!(
            "Wrote {:?}: {} rows x {} dates",
            path,
            report.rows.len(),
            report.dates.len()
        );
        Ok(())
    }
}

/// Write through a temp file in the target directory, then rename over the
/// target. Either the complete file lands or nothing does.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).with_context(|| format!("Could not create dir {:?}", dir))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".tw-price-report-")
        .tempfile_in(dir)
        .with_context(|| format!("Could not create temp file in {:?}", dir))?;
    tmp.write_all(bytes).context("Failed to write temp file")?;
    tmp.as_file().sync_all().context("Failed to flush temp file")?;

    debug!("Persisting {:?} → {:?}", tmp.path(), path);
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to move report into place at {:?}", path))?;
    Ok(())
}
