//! Symbol selection: reference table → ordered fetch identifiers.

use crate::config::SelectionPolicy;
use crate::models::{InstrumentKind, InstrumentRecord, ReferenceEntry};
use std::collections::HashMap;
use tracing::{debug, warn};

const ETF_PREFIX: &str = "00";

/// Synthetic benchmark prepended by the broad policy.
#[derive(Debug, Clone)]
pub struct Benchmark {
    pub symbol: String,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct Universe {
    /// Fetch identifiers in build order.
    pub ids: Vec<String>,
    pub records: HashMap<String, InstrumentRecord>,
}

impl Universe {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn push(&mut self, id: String, record: InstrumentRecord) {
        if self.records.contains_key(&id) {
            debug!("Duplicate identifier {} ignored", id);
            return;
        }
        self.records.insert(id.clone(), record);
        self.ids.push(id);
    }
}

fn is_ordinary_stock(code: &str) -> bool {
    code.chars().count() == 4 && !code.starts_with(ETF_PREFIX)
}

fn is_etf(code: &str) -> bool {
    code.starts_with(ETF_PREFIX) && code.chars().count() >= 4
}

pub fn includes(policy: SelectionPolicy, code: &str) -> bool {
    match policy {
        SelectionPolicy::Narrow => is_ordinary_stock(code),
        SelectionPolicy::Broad => is_ordinary_stock(code) || is_etf(code),
    }
}

pub fn select(table: &[ReferenceEntry], policy: SelectionPolicy, benchmark: &Benchmark) -> Universe {
    let mut universe = Universe::default();

    if policy == SelectionPolicy::Broad {
        universe.push(
            benchmark.symbol.clone(),
            InstrumentRecord {
                code: benchmark.symbol.clone(),
                display_name: benchmark.name.clone(),
                group: "market".to_string(),
                kind: InstrumentKind::Index,
            },
        );
    }

    let mut skipped = 0usize;
    for entry in table {
        if !includes(policy, &entry.code) {
            continue;
        }
        let Some(market) = entry.market else {
            warn!("{} ({}) has no market; skipped", entry.code, entry.name);
            skipped += 1;
            continue;
        };

        let kind = if is_etf(&entry.code) { InstrumentKind::Etf } else { entry.kind };
        universe.push(
            format!("{}{}", entry.code, market.suffix()),
            InstrumentRecord {
                code: entry.code.clone(),
                display_name: entry.name.clone(),
                group: entry.group.clone(),
                kind,
            },
        );
    }

    debug!("{:?} selection: {} identifiers, {} skipped", policy, universe.len(), skipped);
    universe
}
