mod config;
mod fetcher;
mod loader;
mod matrix;
mod models;
mod pipeline;
mod report;
mod trend;
mod universe;
mod utils;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{AppConfig, CalendarMode, ReferenceSource, SelectionPolicy};
use crate::fetcher::{FetchWindow, MarketDataSource, YahooChartSource};
use crate::loader::load_universe_table;
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::report::XlsxExporter;
use crate::report::dump::write_bars_csv;
use crate::universe::{Benchmark, select};

#[derive(Parser)]
#[command(name = "tw-price-report", about = "Taiwan equity closing-price report", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch closes for the selected universe and write the styled workbook
    Report {
        #[arg(long, value_enum)]
        policy: Option<SelectionPolicy>,

        #[arg(long, value_enum)]
        calendar: Option<CalendarMode>,

        /// Output .xlsx path (default depends on the policy)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Reference table CSV (code,name,kind,market,group)
        #[arg(long)]
        reference: Option<PathBuf>,

        /// Where the reference table comes from when no CSV is given
        #[arg(long, value_enum)]
        source: Option<ReferenceSource>,

        /// Fetch one symbol at a time
        #[arg(long)]
        no_threads: bool,
    },

    /// List the fetch identifiers a report run would request
    Symbols {
        #[arg(long, value_enum)]
        policy: Option<SelectionPolicy>,

        #[arg(long)]
        reference: Option<PathBuf>,

        #[arg(long, value_enum)]
        source: Option<ReferenceSource>,
    },

    /// Dump one symbol's daily bars to CSV
    Dump {
        /// Fetch identifier, e.g. 2408.TW
        symbol: String,

        #[arg(long)]
        start: NaiveDate,

        /// Exclusive
        #[arg(long)]
        end: NaiveDate,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "tw_price_report=info,warn",
        1 => "tw_price_report=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;

    match cli.command {
        Command::Report { policy, calendar, output, reference, source, no_threads } => {
            if let Some(p) = policy {
                config.universe.policy = p;
            }
            if let Some(c) = calendar {
                config.report.calendar = c;
            }
            if let Some(o) = output {
                config.report.output_path = Some(o);
            }
            if reference.is_some() {
                config.universe.reference_path = reference;
            }
            if let Some(s) = source {
                config.universe.source = s;
            }
            if no_threads {
                config.fetch.threads = false;
            }

            let _t = utils::Timer::start("Report run");
            let table = load_universe_table(&config.universe, &config.fetch).await?;
            let output = config.output_path();
            let source: Arc<dyn MarketDataSource> = Arc::new(
                YahooChartSource::new(&config.fetch).context("Failed to build market-data client")?,
            );
            let sink = Box::new(XlsxExporter::from_config(&config.report));

            match Pipeline::new(config, source, sink).run(&table, &output).await? {
                PipelineOutcome::Written { path, instruments, dates } => {
                    println!("─────────────────────────────────");
                    println!("  Report written");
                    println!("─────────────────────────────────");
                    println!("  File        : {}", path.display());
                    println!("  Instruments : {}", utils::fmt_number(instruments));
                    println!("  Dates       : {}", dates);
                    println!("─────────────────────────────────");
                }
                PipelineOutcome::NoData { requested, errors } => {
                    println!(
                        "Download failed: no price data for {} symbols ({} errors). No file written.",
                        utils::fmt_number(requested),
                        utils::fmt_number(errors)
                    );
                }
            }
        }

        Command::Symbols { policy, reference, source } => {
            let policy = policy.unwrap_or(config.universe.policy);
            if reference.is_some() {
                config.universe.reference_path = reference;
            }
            if let Some(s) = source {
                config.universe.source = s;
            }
            let table = load_universe_table(&config.universe, &config.fetch).await?;
            let benchmark = Benchmark {
                symbol: config.universe.benchmark_symbol,
                name: config.universe.benchmark_name,
            };
            let universe = select(&table, policy, &benchmark);

            println!("{} symbols:", universe.len());
            for id in &universe.ids {
                let r = &universe.records[id];
                println!("  {:<10} {:<12} {}", id, r.display_name, r.group);
            }
        }

        Command::Dump { symbol, start, end, output } => {
            let source = YahooChartSource::new(&config.fetch).context("Failed to build market-data client")?;
            let window = FetchWindow::between(start, end, config.fetch.interval.clone());
            let bars = source
                .fetch_bars(&symbol, &window)
                .await
                .with_context(|| format!("Failed to fetch {}", symbol))?;

            let code = symbol.split('.').next().unwrap_or(&symbol);
            let output = output.unwrap_or_else(|| PathBuf::from(format!("{}_history.csv", code)));
            write_bars_csv(&bars, &output)?;
            info!("{}: {} bars → {:?}", symbol, bars.len(), output);

            for bar in &bars[bars.len().saturating_sub(5)..] {
                println!(
                    "  {}  close={}  volume={}",
                    bar.date,
                    bar.close.map(|v| v.to_string()).unwrap_or("—".into()),
                    bar.volume.map(|v| v.to_string()).unwrap_or("—".into()),
                );
            }
        }
    }

    Ok(())
}
