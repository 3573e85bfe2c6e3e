//! Price matrix builder: raw per-symbol series → aligned report table.
//!
//! 1. coerce every close to a number or missing
//! 2. pick the date columns (shared calendar, or each instrument's own tail)
//! 3. reindex each series onto those columns; gaps stay `None`
//! 4. drop rows with no price at all, round the rest
//! 5. order rows: benchmark first, then build order

use crate::config::{CalendarMode, MAX_PRECISION, ReportConfig};
use crate::fetcher::cleaner::coerce_price;
use crate::models::{DateLabel, FetchBatch, InstrumentKind, Observation, Report, ReportRow};
use crate::universe::Universe;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct MatrixSettings {
    pub trading_days: usize,
    pub precision: u32,
    pub calendar: CalendarMode,
}

impl From<&ReportConfig> for MatrixSettings {
    fn from(cfg: &ReportConfig) -> Self {
        Self {
            trading_days: cfg.trading_days,
            precision: cfg.precision,
            calendar: cfg.calendar,
        }
    }
}

/// Usable closes by date. For repeated dates the last usable value wins.
pub fn coerce_series(series: &[Observation]) -> BTreeMap<NaiveDate, f64> {
    series
        .iter()
        .filter_map(|o| coerce_price(&o.close).map(|v| (o.date, v)))
        .collect()
}

/// Keep only the most recent `k` entries.
fn tail(values: BTreeMap<NaiveDate, f64>, k: usize) -> BTreeMap<NaiveDate, f64> {
    let skip = values.len().saturating_sub(k);
    values.into_iter().skip(skip).collect()
}

/// Most recent `k` dates across all series, newest first.
pub fn reference_calendar<'a, I>(series: I, k: usize) -> Vec<DateLabel>
where
    I: IntoIterator<Item = &'a BTreeMap<NaiveDate, f64>>,
{
    let all: BTreeSet<NaiveDate> = series.into_iter().flat_map(|s| s.keys().copied()).collect();
    all.into_iter().rev().take(k).map(DateLabel).collect()
}

/// Reindex onto `calendar`; dates without a value are `None`.
pub fn align(values: &BTreeMap<NaiveDate, f64>, calendar: &[DateLabel]) -> Vec<Option<f64>> {
    calendar.iter().map(|d| values.get(&d.date()).copied()).collect()
}

/// Round half away from zero to `precision` decimals, capped at
/// `MAX_PRECISION` so the scale factor stays finite.
pub fn round_to(v: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision.min(MAX_PRECISION) as i32);
    (v * factor).round() / factor
}

/// Stable: index rows move to the front, everything else keeps its order.
pub fn pin_benchmark(rows: Vec<ReportRow>) -> Vec<ReportRow> {
    let (mut pinned, rest): (Vec<_>, Vec<_>) = rows
        .into_iter()
        .partition(|r| r.record.kind == InstrumentKind::Index);
    pinned.extend(rest);
    pinned
}

/// `None` when the batch holds no usable price at all.
pub fn build_report(universe: &Universe, batch: &FetchBatch, settings: &MatrixSettings) -> Option<Report> {
    for id in batch.keys() {
        if !universe.records.contains_key(id) {
            warn!("{}: fetched but not in universe; ignored", id);
        }
    }

    // Build order follows the universe, not the batch's arrival order.
    let mut series: Vec<(&str, BTreeMap<NaiveDate, f64>)> = universe
        .ids
        .iter()
        .filter_map(|id| batch.get(id).map(|s| (id.as_str(), coerce_series(s))))
        .collect();

    let limit = match settings.calendar {
        CalendarMode::Shared => settings.trading_days,
        CalendarMode::PerInstrument => {
            series = series
                .into_iter()
                .map(|(id, s)| (id, tail(s, settings.trading_days)))
                .collect();
            usize::MAX
        }
    };

    let dates = reference_calendar(series.iter().map(|(_, s)| s), limit);
    if dates.is_empty() {
        return None;
    }

    let mut rows = Vec::with_capacity(series.len());
    let mut dropped = 0usize;
    for (id, values) in &series {
        let prices = align(values, &dates);
        if prices.iter().all(Option::is_none) {
            debug!("{}: no prices on the reference calendar; dropped", id);
            dropped += 1;
            continue;
        }
        let Some(record) = universe.records.get(*id) else { continue };
        rows.push(ReportRow {
            record: record.clone(),
            prices: prices
                .into_iter()
                .map(|p| p.map(|v| round_to(v, settings.precision)))
                .collect(),
        });
    }

    debug!(
        "Matrix: {} rows x {} dates ({} dropped, {} never fetched)",
        rows.len(),
        dates.len(),
        dropped,
        universe.len().saturating_sub(series.len())
    );

    Some(Report { dates, rows: pin_benchmark(rows) })
}
