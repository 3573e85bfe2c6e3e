//! Up/down classification of every price cell against the next-older date.

use crate::models::{META_COLUMNS, Report, StyleGrid, TrendCategory};
use tracing::debug;

const PROGRESS_EVERY: usize = 500;

/// `Up`/`Down` when both prices exist and differ, `Neutral` otherwise.
pub fn classify(current: Option<f64>, previous: Option<f64>) -> TrendCategory {
    match (current, previous) {
        (Some(c), Some(p)) if c > p => TrendCategory::Up,
        (Some(c), Some(p)) if c < p => TrendCategory::Down,
        _ => TrendCategory::Neutral,
    }
}

/// Trend categories for one row of prices (newest first). The oldest
/// column has nothing to compare against and stays neutral.
pub fn row_trend(prices: &[Option<f64>]) -> Vec<TrendCategory> {
    let mut out: Vec<TrendCategory> = prices
        .windows(2)
        .map(|pair| classify(pair[0], pair[1]))
        .collect();
    if !prices.is_empty() {
        out.push(TrendCategory::Neutral);
    }
    out
}

/// Style grid with the same shape as the report table; meta columns neutral.
pub fn compute_style_grid(report: &Report) -> StyleGrid {
    let mut cells = Vec::with_capacity(report.rows.len());

    for (i, row) in report.rows.iter().enumerate() {
        if (i + 1) % PROGRESS_EVERY == 0 {
            debug!("Styled {} rows", i + 1);
        }

        let mut styles = Vec::with_capacity(report.column_count());
        styles.extend([TrendCategory::Neutral; META_COLUMNS.len()]);
        styles.extend(row_trend(&row.prices));
        cells.push(styles);
    }

    StyleGrid { cells }
}
