//! Reference-table loader: instrument codes → market / name / group.
//!
//! By default the full listing is pulled from the TWSE ISIN pages. A small
//! snapshot also ships inside the binary, and a CSV on disk with the same
//! header (`code,name,kind,market,group`) replaces either.

pub mod isin;

use crate::config::{FetchConfig, ReferenceSource, UniverseConfig};
use crate::fetcher::http_client::HttpClient;
use crate::models::{InstrumentKind, Market, RawReferenceRow, ReferenceEntry};
use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

const BUNDLED_REFERENCE: &str = include_str!("../../data/tw_reference.csv");

/// Load the reference table from `path`, or the bundled snapshot when `None`.
pub fn load_reference_table(path: Option<&Path>) -> Result<Vec<ReferenceEntry>> {
    match path {
        Some(p) => {
            let file = std::fs::File::open(p)
                .with_context(|| format!("Failed to open reference table {:?}", p))?;
            let entries = parse_reference_csv(file)
                .with_context(|| format!("Failed to parse reference table {:?}", p))?;
            info!("{} reference entries loaded from {:?}", entries.len(), p);
            Ok(entries)
        }
        None => {
            let entries = parse_reference_csv(BUNDLED_REFERENCE.as_bytes())
                .context("Failed to parse bundled reference table")?;
            debug!("{} reference entries loaded from bundled table", entries.len());
            Ok(entries)
        }
    }
}

/// Reference table for a run: the configured CSV, else the configured source.
/// An unreachable ISIN listing falls back to the bundled snapshot.
pub async fn load_universe_table(universe: &UniverseConfig, fetch: &FetchConfig) -> Result<Vec<ReferenceEntry>> {
    if let Some(path) = universe.reference_path.as_deref() {
        return load_reference_table(Some(path));
    }

    match universe.source {
        ReferenceSource::Bundled => load_reference_table(None),
        ReferenceSource::Isin => {
            let client = HttpClient::new(fetch).context("Failed to build ISIN client")?;
            match isin::fetch_isin_table(&client, &universe.isin_url).await {
                Ok(entries) if !entries.is_empty() => Ok(entries),
                Ok(_) => {
                    warn!("ISIN listing was empty; using the bundled snapshot");
                    load_reference_table(None)
                }
                Err(e) => {
                    warn!("ISIN listing unavailable ({:#}); using the bundled snapshot", e);
                    load_reference_table(None)
                }
            }
        }
    }
}

pub fn parse_reference_csv<R: Read>(input: R) -> Result<Vec<ReferenceEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let mut entries = Vec::new();
    for (i, result) in reader.deserialize::<RawReferenceRow>().enumerate() {
        let raw = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Reference row {}: {}", i + 1, e);
                continue;
            }
        };
        if let Some(entry) = reference_row_to_entry(&raw) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

pub fn reference_row_to_entry(row: &RawReferenceRow) -> Option<ReferenceEntry> {
    let code = row.code.as_deref()?.trim();
    if code.is_empty() {
        return None;
    }

    Some(ReferenceEntry {
        code: code.to_string(),
        name: row.name.clone().unwrap_or_default().trim().to_string(),
        kind: row
            .kind
            .as_deref()
            .map(InstrumentKind::parse)
            .unwrap_or(InstrumentKind::Stock),
        market: row.market.as_deref().and_then(Market::parse),
        group: row.group.clone().unwrap_or_default().trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_table_loads() {
        let entries = load_reference_table(None).unwrap();
        assert!(entries.len() > 40);
        let tsmc = entries.iter().find(|e| e.code == "2330").unwrap();
        assert_eq!(tsmc.name, "台積電");
        assert_eq!(tsmc.market, Some(Market::Listed));
        assert_eq!(tsmc.group, "半導體業");
    }

    #[test]
    fn test_parse_skips_blank_codes_and_keeps_unknown_market() {
        let csv = "code,name,kind,market,group\n\
                   2330,台積電,stock,上市,半導體業\n\
                   ,無代號,stock,上市,其他\n\
                   6488, 環球晶 ,stock,上櫃,半導體業\n\
                   7788,興櫃股,stock,興櫃,其他\n";
        let entries = parse_reference_csv(csv.as_bytes()).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].name, "環球晶");
        assert_eq!(entries[1].market, Some(Market::Otc));
        assert_eq!(entries[2].market, None);
    }

    #[tokio::test]
    async fn test_reference_path_overrides_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.csv");
        std::fs::write(&path, "code,name,kind,market,group\n9999,測試,stock,上市,其他\n").unwrap();

        let universe = UniverseConfig {
            reference_path: Some(path),
            // never contacted: the CSV wins
            isin_url: "http://127.0.0.1:9/isin".into(),
            ..UniverseConfig::default()
        };
        let entries = load_universe_table(&universe, &FetchConfig::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].code, "9999");
    }

    #[tokio::test]
    async fn test_bundled_source_skips_network() {
        let universe = UniverseConfig {
            source: ReferenceSource::Bundled,
            isin_url: "http://127.0.0.1:9/isin".into(),
            ..UniverseConfig::default()
        };
        let entries = load_universe_table(&universe, &FetchConfig::default()).await.unwrap();
        assert_eq!(entries, load_reference_table(None).unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_isin_falls_back_to_bundled() {
        let universe = UniverseConfig {
            isin_url: "http://127.0.0.1:9/isin".into(),
            ..UniverseConfig::default()
        };
        let fetch = FetchConfig {
            timeout_secs: 2,
            request_delay_ms: 0,
            jitter_ms: 0,
            ..FetchConfig::default()
        };
        let entries = load_universe_table(&universe, &fetch).await.unwrap();
        assert_eq!(entries, load_reference_table(None).unwrap());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = load_reference_table(Some(Path::new("/nonexistent/ref.csv"))).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to open reference table"));
    }
}
