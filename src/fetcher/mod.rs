pub mod cleaner;
pub mod http_client;

use crate::config::FetchConfig;
use crate::models::{DailyBar, FetchBatch, Observation};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use url::Url;

use self::cleaner::{ChartResponse, chart_to_bars, chart_to_observations};
use self::http_client::HttpClient;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("response format changed: {0}")]
    Format(String),
}

// ── Window ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum WindowSpan {
    /// Provider lookback notation, e.g. "8mo".
    Range(String),
    /// `end` is exclusive.
    Between { start: NaiveDate, end: NaiveDate },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchWindow {
    pub span: WindowSpan,
    pub interval: String,
    pub include_actions: bool,
}

impl FetchWindow {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            span: WindowSpan::Range(config.range.clone()),
            interval: config.interval.clone(),
            include_actions: config.include_actions,
        }
    }

    pub fn between(start: NaiveDate, end: NaiveDate, interval: impl Into<String>) -> Self {
        Self {
            span: WindowSpan::Between { start, end },
            interval: interval.into(),
            include_actions: false,
        }
    }
}

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable market-data source.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Closing-price series for one identifier.
    async fn fetch_closes(&self, symbol: &str, window: &FetchWindow) -> Result<Vec<Observation>, FetchError>;

    /// OHLCV bars for one identifier.
    async fn fetch_bars(&self, symbol: &str, window: &FetchWindow) -> Result<Vec<DailyBar>, FetchError>;
}

// ── Yahoo chart source ────────────────────────────────────────────────────────

pub struct YahooChartSource {
    client: HttpClient,
    base_url: String,
}

impl YahooChartSource {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        Ok(Self {
            client: HttpClient::new(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// e.g. `2330.TW` → `/v8/finance/chart/2330.TW?range=8mo&interval=1d`
    pub fn chart_url(&self, symbol: &str, window: &FetchWindow) -> Result<Url, FetchError> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| FetchError::Format(format!("base url {} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(["v8", "finance", "chart", symbol]);

        {
            let mut q = url.query_pairs_mut();
            match &window.span {
                WindowSpan::Range(range) => {
                    q.append_pair("range", range);
                }
                WindowSpan::Between { start, end } => {
                    let p1 = start.and_time(NaiveTime::MIN).and_utc().timestamp();
                    let p2 = end.and_time(NaiveTime::MIN).and_utc().timestamp();
                    q.append_pair("period1", &p1.to_string());
                    q.append_pair("period2", &p2.to_string());
                }
            }
            q.append_pair("interval", &window.interval);
            q.append_pair("includeAdjustedClose", "true");
            if window.include_actions {
                q.append_pair("events", "div,splits");
            }
        }
        Ok(url)
    }

    async fn fetch_chart(&self, symbol: &str, window: &FetchWindow) -> Result<ChartResponse, FetchError> {
        let url = self.chart_url(symbol, window)?;
        match self.client.get_json::<ChartResponse>(url).await {
            Err(FetchError::NotFound(_)) => Err(FetchError::SymbolNotFound(symbol.to_string())),
            other => other,
        }
    }
}

#[async_trait]
impl MarketDataSource for YahooChartSource {
    async fn fetch_closes(&self, symbol: &str, window: &FetchWindow) -> Result<Vec<Observation>, FetchError> {
        let chart = self.fetch_chart(symbol, window).await?;
        let obs = chart_to_observations(symbol, chart)?;
        debug!("{}: {} observations", symbol, obs.len());
        Ok(obs)
    }

    async fn fetch_bars(&self, symbol: &str, window: &FetchWindow) -> Result<Vec<DailyBar>, FetchError> {
        let chart = self.fetch_chart(symbol, window).await?;
        chart_to_bars(symbol, chart)
    }
}

// ── Bulk fetch ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct FetchStats {
    pub requested: usize,
    pub fetched: usize,
    pub errors: usize,
}

/// Fetch every identifier with at most `concurrency` requests in flight.
/// A failed symbol is logged and left out of the batch.
pub async fn fetch_batch(
    source: Arc<dyn MarketDataSource>,
    ids: &[String],
    window: &FetchWindow,
    concurrency: usize,
) -> (FetchBatch, FetchStats) {
    let sem = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::with_capacity(ids.len());

    for symbol in ids {
        let task_symbol = symbol.clone();
        let source = Arc::clone(&source);
        let sem = Arc::clone(&sem);
        let window = window.clone();

        let handle = tokio::spawn(async move {
            let _permit = sem
                .acquire()
                .await
                .map_err(|e| FetchError::Format(format!("semaphore closed: {}", e)))?;
            source.fetch_closes(&task_symbol, &window).await
        });

        handles.push((symbol.clone(), handle));
    }

    let mut batch = FetchBatch::with_capacity(ids.len());
    let mut stats = FetchStats { requested: ids.len(), ..Default::default() };

    for (symbol, handle) in handles {
        match handle.await {
            Ok(Ok(obs)) => {
                stats.fetched += 1;
                batch.insert(symbol, obs);
            }
            Ok(Err(e)) => {
                warn!("{}: {}", symbol, e);
                stats.errors += 1;
            }
            Err(e) => {
                error!("Task panic for {}: {}", symbol, e);
                stats.errors += 1;
            }
        }
    }

    info!(
        "Fetched {}/{} symbols ({} errors)",
        stats.fetched, stats.requested, stats.errors
    );
    (batch, stats)
}
