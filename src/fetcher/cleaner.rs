use super::FetchError;
use crate::models::{DailyBar, Observation, RawPrice};
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

// ── Chart payload ─────────────────────────────────────────────────────────────

/// Yahoo v8 chart response. Quote columns are kept as raw JSON values so
/// that text or garbage entries can be coerced instead of failing the decode.
#[derive(Debug, Deserialize)]
pub struct ChartResponse {
    pub chart: ChartEnvelope,
}

#[derive(Debug, Deserialize)]
pub struct ChartEnvelope {
    pub result: Option<Vec<ChartData>>,
    pub error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
pub struct ChartError {
    pub code: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChartData {
    #[serde(default)]
    pub meta: ChartMeta,
    #[serde(default)]
    pub timestamp: Vec<i64>,
    pub indicators: Indicators,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChartMeta {
    /// Exchange offset from UTC in seconds (28800 for Taipei).
    #[serde(default)]
    pub gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
pub struct Indicators {
    #[serde(default)]
    pub quote: Vec<QuoteData>,
    #[serde(default)]
    pub adjclose: Vec<AdjCloseData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QuoteData {
    #[serde(default)]
    pub open: Vec<Value>,
    #[serde(default)]
    pub high: Vec<Value>,
    #[serde(default)]
    pub low: Vec<Value>,
    #[serde(default)]
    pub close: Vec<Value>,
    #[serde(default)]
    pub volume: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AdjCloseData {
    #[serde(default)]
    pub adjclose: Vec<Value>,
}

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Parse a textual price. Thousands separators are tolerated, anything else
/// that is not a plain finite number yields `None`.
/// "1,234.56" → 1234.56 | "610.00" → 610.0 | "N/A" → None | "12abc" → None
pub fn parse_price(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || s == "N/A" || s == "-" || s == "—" || s == "--" {
        return None;
    }
    let cleaned = s.replace(',', "");
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Coerce a provider value to a number; non-numeric input becomes missing.
pub fn coerce_price(raw: &RawPrice) -> Option<f64> {
    match raw {
        RawPrice::Number(v) if v.is_finite() => Some(*v),
        RawPrice::Number(_) => None,
        RawPrice::Text(s) => parse_price(s),
        RawPrice::Missing => None,
    }
}

fn value_to_f64(v: Option<&Value>) -> Option<f64> {
    v.map(RawPrice::from).as_ref().and_then(coerce_price)
}

fn value_to_u64(v: Option<&Value>) -> Option<u64> {
    match v? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

/// Unix timestamp → exchange-local calendar date.
pub fn local_date(ts: i64, gmtoffset: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(ts + gmtoffset, 0).map(|dt| dt.date_naive())
}

// ── Chart → domain ────────────────────────────────────────────────────────────

fn first_result(symbol: &str, resp: ChartResponse) -> Result<ChartData, FetchError> {
    let Some(results) = resp.chart.result else {
        return Err(match resp.chart.error {
            Some(err) if err.code == "Not Found" => FetchError::SymbolNotFound(symbol.to_string()),
            Some(err) => FetchError::Format(format!(
                "{}: {}",
                err.code,
                err.description.unwrap_or_default()
            )),
            None => FetchError::Format("empty result with no error".into()),
        });
    };

    results
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::Format(format!("{}: result array is empty", symbol)))
}

/// Closing-price series. Entries are kept raw; coercion happens downstream.
pub fn chart_to_observations(symbol: &str, resp: ChartResponse) -> Result<Vec<Observation>, FetchError> {
    let data = first_result(symbol, resp)?;
    let offset = data.meta.gmtoffset;
    let quote = data.indicators.quote.into_iter().next().unwrap_or_default();

    let mut out = Vec::with_capacity(data.timestamp.len());
    for (i, &ts) in data.timestamp.iter().enumerate() {
        let Some(date) = local_date(ts, offset) else {
            warn!("{}: invalid timestamp {}", symbol, ts);
            continue;
        };
        let close = quote.close.get(i).map(RawPrice::from).unwrap_or(RawPrice::Missing);
        out.push(Observation { date, close });
    }
    Ok(out)
}

/// Full OHLCV bars; rows with no values at all (holidays) are dropped.
pub fn chart_to_bars(symbol: &str, resp: ChartResponse) -> Result<Vec<DailyBar>, FetchError> {
    let data = first_result(symbol, resp)?;
    let offset = data.meta.gmtoffset;
    let quote = data.indicators.quote.into_iter().next().unwrap_or_default();
    let adj = data.indicators.adjclose.into_iter().next().unwrap_or_default();

    let mut bars = Vec::with_capacity(data.timestamp.len());
    for (i, &ts) in data.timestamp.iter().enumerate() {
        let Some(date) = local_date(ts, offset) else {
            warn!("{}: invalid timestamp {}", symbol, ts);
            continue;
        };
        let bar = DailyBar {
            date,
            open: value_to_f64(quote.open.get(i)),
            high: value_to_f64(quote.high.get(i)),
            low: value_to_f64(quote.low.get(i)),
            close: value_to_f64(quote.close.get(i)),
            adj_close: value_to_f64(adj.adjclose.get(i)),
            volume: value_to_u64(quote.volume.get(i)),
        };
        if bar.open.is_none() && bar.high.is_none() && bar.low.is_none() && bar.close.is_none() {
            continue;
        }
        bars.push(bar);
    }

    if bars.is_empty() {
        return Err(FetchError::SymbolNotFound(symbol.to_string()));
    }
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAIPEI: i64 = 28_800;

    fn payload() -> ChartResponse {
        // 2025-03-03 and 2025-03-04 09:00 Taipei, plus a holiday row
        serde_json::from_str(
            r#"{"chart":{"result":[{
                "meta":{"symbol":"2330.TW","gmtoffset":28800},
                "timestamp":[1740963600,1741050000,1741136400],
                "indicators":{
                    "quote":[{"open":[1000.0,null,null],"high":[1010.0,null,null],
                              "low":[990.0,null,null],"close":[1005.0,"998.5",null],
                              "volume":[31000000,null,null]}],
                    "adjclose":[{"adjclose":[1001.2,null,null]}]}
            }],"error":null}}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("123.45"), Some(123.45));
        assert_eq!(parse_price(" 1,234.5 "), Some(1234.5));
        assert_eq!(parse_price("N/A"), None);
        assert_eq!(parse_price("12abc"), None);
        assert_eq!(parse_price("NaN"), None);
        assert_eq!(parse_price(""), None);
    }

    #[test]
    fn test_coerce_price() {
        assert_eq!(coerce_price(&RawPrice::Number(7.0)), Some(7.0));
        assert_eq!(coerce_price(&RawPrice::Number(f64::NAN)), None);
        assert_eq!(coerce_price(&RawPrice::Text("123.45".into())), Some(123.45));
        assert_eq!(coerce_price(&RawPrice::Text("halted".into())), None);
        assert_eq!(coerce_price(&RawPrice::Missing), None);
    }

    #[test]
    fn test_local_date_uses_exchange_offset() {
        // 2025-03-03T16:30:00Z is already the 4th in Taipei
        assert_eq!(local_date(1741019400, 0), NaiveDate::from_ymd_opt(2025, 3, 3));
        assert_eq!(local_date(1741019400, TAIPEI), NaiveDate::from_ymd_opt(2025, 3, 4));
    }

    #[test]
    fn test_chart_to_observations_keeps_raw_values() {
        let obs = chart_to_observations("2330.TW", payload()).unwrap();
        assert_eq!(obs.len(), 3);
        assert_eq!(obs[0].date, NaiveDate::from_ymd_opt(2025, 3, 3).unwrap());
        assert_eq!(obs[0].close, RawPrice::Number(1005.0));
        assert_eq!(obs[1].close, RawPrice::Text("998.5".into()));
        assert_eq!(obs[2].close, RawPrice::Missing);
    }

    #[test]
    fn test_chart_to_bars_drops_empty_rows() {
        let bars = chart_to_bars("2330.TW", payload()).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].volume, Some(31_000_000));
        assert_eq!(bars[0].adj_close, Some(1001.2));
        assert_eq!(bars[1].close, Some(998.5));
        assert_eq!(bars[1].open, None);
    }

    #[test]
    fn test_not_found_error() {
        let resp: ChartResponse = serde_json::from_str(
            r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#,
        )
        .unwrap();
        let err = chart_to_observations("9999.TW", resp).unwrap_err();
        assert!(matches!(err, FetchError::SymbolNotFound(s) if s == "9999.TW"));
    }
}
