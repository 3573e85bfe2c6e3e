//! Single-symbol bar dump to CSV.

use super::write_atomically;
use crate::models::DailyBar;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct BarCsvRow {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Open")]
    open: Option<f64>,
    #[serde(rename = "High")]
    high: Option<f64>,
    #[serde(rename = "Low")]
    low: Option<f64>,
    #[serde(rename = "Close")]
    close: Option<f64>,
    #[serde(rename = "Adj Close")]
    adj_close: Option<f64>,
    #[serde(rename = "Volume")]
    volume: Option<u64>,
}

impl From<&DailyBar> for BarCsvRow {
    fn from(b: &DailyBar) -> Self {
        Self {
            date: b.date.format("%Y-%m-%d").to_string(),
            open: b.open,
            high: b.high,
            low: b.low,
            close: b.close,
            adj_close: b.adj_close,
            volume: b.volume,
        }
    }
}

pub fn bars_to_csv(bars: &[DailyBar]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for bar in bars {
        writer.serialize(BarCsvRow::from(bar))?;
    }
    writer.into_inner().context("Failed to finish CSV buffer")
}

pub fn write_bars_csv(bars: &[DailyBar], path: &Path) -> Result<()> {
    let bytes = bars_to_csv(bars)?;
    write_atomically(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bars() -> Vec<DailyBar> {
        vec![
            DailyBar {
                date: NaiveDate::from_ymd_opt(2025, 12, 22).unwrap(),
                open: Some(150.5),
                high: Some(155.0),
                low: Some(149.0),
                close: Some(154.0),
                adj_close: Some(154.0),
                volume: Some(81_234_000),
            },
            DailyBar {
                date: NaiveDate::from_ymd_opt(2025, 12, 23).unwrap(),
                open: None,
                high: None,
                low: None,
                close: Some(153.5),
                adj_close: None,
                volume: None,
            },
        ]
    }

    #[test]
    fn test_bars_to_csv() {
        let text = String::from_utf8(bars_to_csv(&bars()).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Date,Open,High,Low,Close,Adj Close,Volume");
        assert_eq!(lines[1], "2025-12-22,150.5,155.0,149.0,154.0,154.0,81234000");
        assert_eq!(lines[2], "2025-12-23,,,,153.5,,");
    }

    #[test]
    fn test_write_bars_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2408_history.csv");
        write_bars_csv(&bars(), &path).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().starts_with("Date,"));
    }
}
