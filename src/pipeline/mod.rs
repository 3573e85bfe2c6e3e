//! Pipeline orchestrator: selector → fetch → matrix → colours → sink.
//!
//! Every stage consumes the complete output of the one before it. Nothing is
//! kept between runs, so running twice on the same fetch result produces the
//! same table.

use crate::config::AppConfig;
use crate::fetcher::{FetchWindow, MarketDataSource, fetch_batch};
use crate::matrix::{MatrixSettings, build_report};
use crate::models::ReferenceEntry;
use crate::report::ReportSink;
use crate::trend::compute_style_grid;
use crate::universe::{Benchmark, select};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub struct Pipeline {
    config: AppConfig,
    source: Arc<dyn MarketDataSource>,
    sink: Box<dyn ReportSink>,
}

#[derive(Debug, PartialEq)]
pub enum PipelineOutcome {
    Written {
        path: PathBuf,
        instruments: usize,
        dates: usize,
    },
    /// The fetch produced no usable price; nothing was written.
    NoData { requested: usize, errors: usize },
}

impl Pipeline {
    pub fn new(config: AppConfig, source: Arc<dyn MarketDataSource>, sink: Box<dyn ReportSink>) -> Self {
        Self { config, source, sink }
    }

    pub async fn run(&self, table: &[ReferenceEntry], output: &Path) -> Result<PipelineOutcome> {
        // ── 1. Universe ───────────────────────────────────────────────────────
        let benchmark = Benchmark {
            symbol: self.config.universe.benchmark_symbol.clone(),
            name: self.config.universe.benchmark_name.clone(),
        };
        let universe = select(table, self.config.universe.policy, &benchmark);
        if universe.is_empty() {
            warn!("Reference table selected no symbols");
        }
        info!(
            "=== Step 1: {} symbols selected ({:?}) ===",
            universe.len(),
            self.config.universe.policy
        );

        // ── 2. Fetch ──────────────────────────────────────────────────────────
        let window = FetchWindow::from_config(&self.config.fetch);
        info!(
            "=== Step 2: Fetching {} of {} closes ===",
            self.config.fetch.range, self.config.fetch.interval
        );
        let (batch, stats) = fetch_batch(
            Arc::clone(&self.source),
            &universe.ids,
            &window,
            self.config.fetch.effective_concurrency(),
        )
        .await;

        // ── 3. Matrix ─────────────────────────────────────────────────────────
        info!("=== Step 3: Building price matrix ===");
        let settings = MatrixSettings::from(&self.config.report);
        let Some(report) = build_report(&universe, &batch, &settings) else {
            warn!("No usable price data in fetch result");
            return Ok(PipelineOutcome::NoData {
                requested: stats.requested,
                errors: stats.errors,
            });
        };

        // ── 4. Styles + export ────────────────────────────────────────────────
        info!("=== Step 4: Writing {:?} ===", output);
        let grid = compute_style_grid(&report);
        self.sink
            .write(&report, &grid, output)
            .with_context(|| format!("Failed to write report to {:?}", output))?;

        Ok(PipelineOutcome::Written {
            path: output.to_path_buf(),
            instruments: report.rows.len(),
            dates: report.dates.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SelectionPolicy;
    use crate::fetcher::FetchError;
    use crate::models::{
        DailyBar, InstrumentKind, Market, Observation, RawPrice, Report, StyleGrid, TrendCategory,
    };
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeSource {
        data: HashMap<String, Vec<Observation>>,
    }

    #[async_trait]
    impl MarketDataSource for FakeSource {
        async fn fetch_closes(&self, symbol: &str, _window: &FetchWindow) -> Result<Vec<Observation>, FetchError> {
            self.data
                .get(symbol)
                .cloned()
                .ok_or_else(|| FetchError::SymbolNotFound(symbol.to_string()))
        }

        async fn fetch_bars(&self, symbol: &str, _window: &FetchWindow) -> Result<Vec<DailyBar>, FetchError> {
            Err(FetchError::SymbolNotFound(symbol.to_string()))
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        written: Arc<Mutex<Vec<(Report, StyleGrid, PathBuf)>>>,
    }

    impl ReportSink for RecordingSink {
        fn write(&self, report: &Report, grid: &StyleGrid, path: &Path) -> Result<()> {
            self.written
                .lock()
                .unwrap()
                .push((report.clone(), grid.clone(), path.to_path_buf()));
            Ok(())
        }
    }

    fn entry(code: &str, market: Market) -> ReferenceEntry {
        ReferenceEntry {
            code: code.to_string(),
            name: format!("name-{}", code),
            kind: InstrumentKind::Stock,
            market: Some(market),
            group: "group".to_string(),
        }
    }

    fn table() -> Vec<ReferenceEntry> {
        vec![
            entry("2330", Market::Listed),
            entry("0050", Market::Listed),
            entry("6488", Market::Otc),
            entry("2881A", Market::Listed),
        ]
    }

    fn series(values: &[(u32, f64)]) -> Vec<Observation> {
        values
            .iter()
            .map(|(day, v)| Observation {
                date: NaiveDate::from_ymd_opt(2025, 3, *day).unwrap(),
                close: RawPrice::Number(*v),
            })
            .collect()
    }

    fn config(policy: SelectionPolicy) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.universe.policy = policy;
        cfg.fetch.request_delay_ms = 0;
        cfg.fetch.jitter_ms = 0;
        cfg
    }

    fn source() -> Arc<FakeSource> {
        let mut data = HashMap::new();
        data.insert("^TWII".to_string(), series(&[(3, 22000.0), (4, 22100.5)]));
        data.insert("2330.TW".to_string(), series(&[(3, 1000.0), (4, 990.0)]));
        data.insert("0050.TW".to_string(), series(&[(3, 180.0), (4, 180.0)]));
        data.insert(
            "6488.TWO".to_string(),
            vec![Observation {
                date: NaiveDate::from_ymd_opt(2025, 3, 4).unwrap(),
                close: RawPrice::Missing,
            }],
        );
        Arc::new(FakeSource { data })
    }

    #[tokio::test]
    async fn test_broad_run_writes_report() {
        let sink = RecordingSink::default();
        let pipeline = Pipeline::new(config(SelectionPolicy::Broad), source(), Box::new(sink.clone()));

        let outcome = pipeline.run(&table(), Path::new("report.xlsx")).await.unwrap();
        assert_eq!(
            outcome,
            PipelineOutcome::Written { path: PathBuf::from("report.xlsx"), instruments: 3, dates: 2 }
        );

        let written = sink.written.lock().unwrap();
        let (report, grid, _) = &written[0];
        let codes: Vec<&str> = report.rows.iter().map(|r| r.record.code.as_str()).collect();
        // 6488 has no prices, 2881A is not selected
        assert_eq!(codes, vec!["^TWII", "2330", "0050"]);
        assert_eq!(grid.get(0, 3), TrendCategory::Up);
        assert_eq!(grid.get(1, 3), TrendCategory::Down);
        assert_eq!(grid.get(2, 3), TrendCategory::Neutral);
    }

    #[tokio::test]
    async fn test_narrow_run_skips_etf_and_index() {
        let sink = RecordingSink::default();
        let pipeline = Pipeline::new(config(SelectionPolicy::Narrow), source(), Box::new(sink.clone()));

        pipeline.run(&table(), Path::new("narrow.xlsx")).await.unwrap();
        let written = sink.written.lock().unwrap();
        let codes: Vec<&str> = written[0].0.rows.iter().map(|r| r.record.code.as_str()).collect();
        assert_eq!(codes, vec!["2330"]);
    }

    #[tokio::test]
    async fn test_empty_fetch_writes_nothing() {
        let sink = RecordingSink::default();
        let empty = Arc::new(FakeSource { data: HashMap::new() });
        let pipeline = Pipeline::new(config(SelectionPolicy::Broad), empty, Box::new(sink.clone()));

        let outcome = pipeline.run(&table(), Path::new("never.xlsx")).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::NoData { requested: 4, errors: 4 });
        assert!(sink.written.lock().unwrap().is_empty());
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let sink = RecordingSink::default();
        let pipeline = Pipeline::new(config(SelectionPolicy::Broad), source(), Box::new(sink.clone()));

        tokio_test::block_on(pipeline.run(&table(), Path::new("a.xlsx"))).unwrap();
        tokio_test::block_on(pipeline.run(&table(), Path::new("a.xlsx"))).unwrap();

        let written = sink.written.lock().unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0], written[1]);
    }
}
