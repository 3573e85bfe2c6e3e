use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub universe: UniverseConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

/// Market-data fetch configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Lookback window in provider notation ("8mo", "1y", ...).
    #[serde(default = "default_range")]
    pub range: String,

    #[serde(default = "default_interval")]
    pub interval: String,

    /// Include dividends/splits in the request.
    #[serde(default)]
    pub include_actions: bool,

    /// Issue per-symbol requests concurrently.
    #[serde(default = "default_true")]
    pub threads: bool,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

/// Which reference-table codes make it into the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Four-character ordinary stocks only.
    Narrow,
    /// Stocks, `00`-prefixed ETFs and the benchmark index.
    #[default]
    Broad,
}

impl SelectionPolicy {
    /// Output file name used when none is configured.
    pub fn default_output(self) -> PathBuf {
        match self {
            SelectionPolicy::Narrow => PathBuf::from("tw_stock_with_industry.xlsx"),
            SelectionPolicy::Broad => PathBuf::from("tw_stock_etf_index.xlsx"),
        }
    }
}

/// How date columns are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CalendarMode {
    /// One shared calendar of the most recent trading dates across all instruments.
    #[default]
    Shared,
    /// Each instrument keeps its own trailing dates; columns are their union.
    PerInstrument,
}

/// Where the reference table comes from when no CSV path is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSource {
    /// Full 上市 + 上櫃 listing from the TWSE ISIN pages.
    #[default]
    Isin,
    /// Snapshot compiled into the binary.
    Bundled,
}

/// Symbol universe configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UniverseConfig {
    #[serde(default)]
    pub policy: SelectionPolicy,

    #[serde(default)]
    pub source: ReferenceSource,

    /// Reference table CSV; overrides `source` when set.
    #[serde(default)]
    pub reference_path: Option<PathBuf>,

    #[serde(default = "default_isin_url")]
    pub isin_url: String,

    #[serde(default = "default_benchmark")]
    pub benchmark_symbol: String,

    #[serde(default = "default_benchmark_name")]
    pub benchmark_name: String,
}

/// Report layout configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    #[serde(default = "default_trading_days")]
    pub trading_days: usize,

    #[serde(default = "default_precision")]
    pub precision: u32,

    #[serde(default)]
    pub calendar: CalendarMode,

    /// Falls back to the policy's fixed file name.
    #[serde(default)]
    pub output_path: Option<PathBuf>,

    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,

    #[serde(default = "default_code_width")]
    pub code_width: f64,

    #[serde(default = "default_name_width")]
    pub name_width: f64,

    #[serde(default = "default_group_width")]
    pub group_width: f64,

    #[serde(default = "default_date_width")]
    pub date_width: f64,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://query2.finance.yahoo.com".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_request_delay_ms() -> u64 {
    200
}
fn default_jitter_ms() -> u64 {
    150
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
        .to_string()
}
fn default_range() -> String {
    "8mo".to_string()
}
fn default_interval() -> String {
    "1d".to_string()
}
fn default_true() -> bool {
    true
}
fn default_concurrency() -> usize {
    8
}
fn default_isin_url() -> String {
    "https://isin.twse.com.tw/isin/C_public.jsp".to_string()
}
fn default_benchmark() -> String {
    "^TWII".to_string()
}
fn default_benchmark_name() -> String {
    "加權指數".to_string()
}
fn default_trading_days() -> usize {
    120
}
fn default_precision() -> u32 {
    2
}
fn default_sheet_name() -> String {
    "台股報表".to_string()
}
fn default_code_width() -> f64 {
    10.0
}
fn default_name_width() -> f64 {
    15.0
}
fn default_group_width() -> f64 {
    15.0
}
fn default_date_width() -> f64 {
    12.0
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            jitter_ms: default_jitter_ms(),
            user_agent: default_user_agent(),
            range: default_range(),
            interval: default_interval(),
            include_actions: false,
            threads: true,
            concurrency: default_concurrency(),
        }
    }
}

impl FetchConfig {
    /// Number of in-flight requests the fetcher may keep.
    pub fn effective_concurrency(&self) -> usize {
        if self.threads { self.concurrency.max(1) } else { 1 }
    }
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            policy: SelectionPolicy::default(),
            source: ReferenceSource::default(),
            reference_path: None,
            isin_url: default_isin_url(),
            benchmark_symbol: default_benchmark(),
            benchmark_name: default_benchmark_name(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            trading_days: default_trading_days(),
            precision: default_precision(),
            calendar: CalendarMode::default(),
            output_path: None,
            sheet_name: default_sheet_name(),
            code_width: default_code_width(),
            name_width: default_name_width(),
            group_width: default_group_width(),
            date_width: default_date_width(),
        }
    }
}

/// Largest rounding precision; `f64` carries no more decimal digits.
pub const MAX_PRECISION: u32 = 15;

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("TWRPT").separator("__"))
            .build()?;

        let cfg: Self = cfg.try_deserialize().context("Invalid configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would silently produce an empty or garbled report.
    pub fn validate(&self) -> Result<()> {
        if self.report.trading_days == 0 {
            bail!("report.trading_days must be at least 1");
        }
        if self.report.precision > MAX_PRECISION {
            bail!(
                "report.precision must be at most {} (got {})",
                MAX_PRECISION,
                self.report.precision
            );
        }
        if self.report.sheet_name.trim().is_empty() {
            bail!("report.sheet_name must not be empty");
        }
        Ok(())
    }

    /// Output path: configured value, otherwise the policy's fixed name.
    pub fn output_path(&self) -> PathBuf {
        self.report
            .output_path
            .clone()
            .unwrap_or_else(|| self.universe.policy.default_output())
    }
}
