use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

// ── Reference table ───────────────────────────────────────────────────────────

/// Listing venue. Decides the fetch-identifier suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Market {
    Listed, // TWSE
    Otc,    // TPEx
}

impl Market {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "上市" => Some(Market::Listed),
            "上櫃" => Some(Market::Otc),
            other => match other.to_ascii_lowercase().as_str() {
                "listed" | "twse" | "tse" => Some(Market::Listed),
                "otc" | "tpex" => Some(Market::Otc),
                _ => None,
            },
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Market::Listed => ".TW",
            Market::Otc => ".TWO",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentKind {
    Stock,
    Etf,
    Index,
}

impl InstrumentKind {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "etf" => InstrumentKind::Etf,
            "index" | "指數" => InstrumentKind::Index,
            _ => InstrumentKind::Stock,
        }
    }
}

/// One row of the static reference table.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceEntry {
    pub code: String,
    pub name: String,
    pub kind: InstrumentKind,
    pub market: Option<Market>,
    pub group: String,
}

/// Raw CSV row: code, name, kind, market, group
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawReferenceRow {
    pub code: Option<String>,
    pub name: Option<String>,
    pub kind: Option<String>,
    pub market: Option<String>,
    pub group: Option<String>,
}

// ── Instruments ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentRecord {
    pub code: String,
    pub display_name: String,
    pub group: String,
    pub kind: InstrumentKind,
}

// ── Dates ─────────────────────────────────────────────────────────────────────

/// Trading date used as a report column. Later dates sort first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateLabel(pub NaiveDate);

impl DateLabel {
    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl Ord for DateLabel {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.cmp(&self.0)
    }
}

impl PartialOrd for DateLabel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DateLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

// ── Raw provider data ─────────────────────────────────────────────────────────

/// A price exactly as the provider handed it over, before coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPrice {
    Number(f64),
    Text(String),
    Missing,
}

impl From<&serde_json::Value> for RawPrice {
    fn from(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Number(n) => n.as_f64().map(RawPrice::Number).unwrap_or(RawPrice::Missing),
            serde_json::Value::String(s) => RawPrice::Text(s.clone()),
            _ => RawPrice::Missing,
        }
    }
}

impl From<Option<f64>> for RawPrice {
    fn from(v: Option<f64>) -> Self {
        v.map(RawPrice::Number).unwrap_or(RawPrice::Missing)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub date: NaiveDate,
    pub close: RawPrice,
}

/// Fetch identifier → raw close series. Arrival order carries no meaning.
pub type FetchBatch = std::collections::HashMap<String, Vec<Observation>>;

/// Full daily bar, used by the single-symbol dump.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub adj_close: Option<f64>,
    pub volume: Option<u64>,
}

// ── Report ────────────────────────────────────────────────────────────────────

/// Leading text columns of every report row.
pub const META_COLUMNS: [&str; 3] = ["股票代號", "股票名稱", "產業分類"];

#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub record: InstrumentRecord,
    /// One slot per `Report::dates` entry.
    pub prices: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// Descending: newest first.
    pub dates: Vec<DateLabel>,
    pub rows: Vec<ReportRow>,
}

impl Report {
    pub fn column_count(&self) -> usize {
        META_COLUMNS.len() + self.dates.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendCategory {
    Up,
    Down,
    Neutral,
}

/// Per-cell presentation categories, same shape as the report table
/// (meta columns included).
#[derive(Debug, Clone, PartialEq)]
pub struct StyleGrid {
    pub cells: Vec<Vec<TrendCategory>>,
}

impl StyleGrid {
    pub fn get(&self, row: usize, col: usize) -> TrendCategory {
        self.cells
            .get(row)
            .and_then(|r| r.get(col))
            .copied()
            .unwrap_or(TrendCategory::Neutral)
    }
}
