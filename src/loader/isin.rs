//! Full-market reference table from the TWSE ISIN listing pages.
//!
//! `C_public.jsp?strMode=2` lists 上市 securities, `strMode=4` lists 上櫃.
//! Both pages are Big5. Rows are grouped under one-cell section headers
//! (股票, ETF, 上市認購(售)權證, ...); each data row starts with
//! `代號　名稱` separated by a full-width space.

use crate::fetcher::http_client::HttpClient;
use crate::models::{InstrumentKind, Market, ReferenceEntry};
use anyhow::{Context, Result, anyhow};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};
use url::Url;

/// Warrant sections run to tens of thousands of rows and never pass selection.
const SKIPPED_SECTIONS: [&str; 1] = ["權證"];

fn mode(market: Market) -> &'static str {
    match market {
        Market::Listed => "2",
        Market::Otc => "4",
    }
}

pub fn listing_url(base_url: &str, market: Market) -> Result<Url> {
    let mut url = Url::parse(base_url).with_context(|| format!("Invalid ISIN url {:?}", base_url))?;
    url.query_pairs_mut().clear().append_pair("strMode", mode(market));
    Ok(url)
}

/// Fetch and parse both listings, 上市 first.
pub async fn fetch_isin_table(client: &HttpClient, base_url: &str) -> Result<Vec<ReferenceEntry>> {
    let mut entries = Vec::with_capacity(4096);
    for market in [Market::Listed, Market::Otc] {
        let url = listing_url(base_url, market)?;
        let bytes = client
            .get_bytes(url.clone())
            .await
            .with_context(|| format!("Failed to download ISIN listing {}", url))?;
        let page = parse_isin_page(&decode_big5(&bytes), market)?;
        info!("{} {:?} entries from {}", page.len(), market, url);
        entries.extend(page);
    }
    Ok(entries)
}

pub fn decode_big5(bytes: &[u8]) -> String {
    let (text, _, had_errors) = encoding_rs::BIG5.decode(bytes);
    if had_errors {
        debug!("ISIN page had bytes outside Big5; replaced");
    }
    text.into_owned()
}

fn cell_text(cell: &ElementRef) -> String {
    cell.text().collect::<String>().trim().to_string()
}

pub fn parse_isin_page(html: &str, market: Market) -> Result<Vec<ReferenceEntry>> {
    let document = Html::parse_document(html);
    let row_selector = Selector::parse("table.h4 tr")
        .map_err(|why| anyhow!("Failed to Selector::parse because: {:?}", why))?;
    let cell_selector =
        Selector::parse("td").map_err(|why| anyhow!("Failed to Selector::parse because: {:?}", why))?;

    let mut entries = Vec::new();
    let mut kind = InstrumentKind::Stock;
    let mut skipping = false;

    for row in document.select(&row_selector) {
        let cells: Vec<ElementRef> = row.select(&cell_selector).collect();

        if cells.len() == 1 {
            let section = cell_text(&cells[0]);
            kind = if section.contains("ETF") { InstrumentKind::Etf } else { InstrumentKind::Stock };
            skipping = SKIPPED_SECTIONS.iter().any(|s| section.contains(s));
            continue;
        }
        if skipping || cells.len() < 5 {
            continue;
        }

        // Column headers and malformed rows have no full-width separator
        let first = cell_text(&cells[0]);
        let Some((code, name)) = first.split_once('\u{3000}') else {
            continue;
        };
        let code = code.trim();
        if code.is_empty() {
            continue;
        }

        entries.push(ReferenceEntry {
            code: code.to_string(),
            name: name.trim().to_string(),
            kind,
            market: Market::parse(&cell_text(&cells[3])).or(Some(market)),
            group: cell_text(&cells[4]),
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"<html><body>
<table class="h4" align="center" border="0" cellspacing="3" cellpadding="2" width="750">
<tr align="center"><td bgcolor="#D5FFD5">有價證券代號及名稱 </td><td bgcolor="#D5FFD5">國際證券辨識號碼(ISIN Code)</td><td bgcolor="#D5FFD5">上市日</td><td bgcolor="#D5FFD5">市場別</td><td bgcolor="#D5FFD5">產業別</td><td bgcolor="#D5FFD5">CFICode</td><td bgcolor="#D5FFD5">備註</td></tr>
<tr><td bgcolor="#FAFAD2" colspan="7"><b> 股票 <b></td></tr>
<tr><td bgcolor="#FAFAD2">1101　台泥</td><td bgcolor="#FAFAD2">TW0001101004</td><td bgcolor="#FAFAD2">1962/02/09</td><td bgcolor="#FAFAD2">上市</td><td bgcolor="#FAFAD2">水泥工業</td><td bgcolor="#FAFAD2">ESVUFR</td><td bgcolor="#FAFAD2"></td></tr>
<tr><td bgcolor="#FAFAD2">2330　台積電</td><td bgcolor="#FAFAD2">TW0002330008</td><td bgcolor="#FAFAD2">1994/09/05</td><td bgcolor="#FAFAD2">上市</td><td bgcolor="#FAFAD2">半導體業</td><td bgcolor="#FAFAD2">ESVUFR</td><td bgcolor="#FAFAD2"></td></tr>
<tr><td bgcolor="#FAFAD2" colspan="7"><b> 上市認購(售)權證 <b></td></tr>
<tr><td bgcolor="#FAFAD2">030001　台積電元大58購01</td><td bgcolor="#FAFAD2">TW18Z0300012</td><td bgcolor="#FAFAD2">2025/01/02</td><td bgcolor="#FAFAD2">上市</td><td bgcolor="#FAFAD2"></td><td bgcolor="#FAFAD2">RWSCCE</td><td bgcolor="#FAFAD2"></td></tr>
<tr><td bgcolor="#FAFAD2" colspan="7"><b> ETF <b></td></tr>
<tr><td bgcolor="#FAFAD2">0050　元大台灣50</td><td bgcolor="#FAFAD2">TW0000050004</td><td bgcolor="#FAFAD2">2003/06/30</td><td bgcolor="#FAFAD2">上市</td><td bgcolor="#FAFAD2"></td><td bgcolor="#FAFAD2">CEOGEU</td><td bgcolor="#FAFAD2"></td></tr>
</table></body></html>"##;

    #[test]
    fn test_parse_isin_page_sections() {
        let entries = parse_isin_page(PAGE, Market::Listed).unwrap();
        let codes: Vec<&str> = entries.iter().map(|e| e.code.as_str()).collect();
        assert_eq!(codes, vec!["1101", "2330", "0050"]);

        assert_eq!(entries[1].name, "台積電");
        assert_eq!(entries[1].group, "半導體業");
        assert_eq!(entries[1].kind, InstrumentKind::Stock);
        assert_eq!(entries[1].market, Some(Market::Listed));

        assert_eq!(entries[2].kind, InstrumentKind::Etf);
        assert_eq!(entries[2].group, "");
    }

    #[test]
    fn test_market_column_falls_back_to_page_market() {
        let page = PAGE.replace("<td bgcolor=\"#FAFAD2\">上市</td>", "<td bgcolor=\"#FAFAD2\"></td>");
        let entries = parse_isin_page(&page, Market::Otc).unwrap();
        assert!(entries.iter().all(|e| e.market == Some(Market::Otc)));
    }

    #[test]
    fn test_decode_big5() {
        let (bytes, _, _) = encoding_rs::BIG5.encode("2330　台積電");
        assert_eq!(decode_big5(&bytes), "2330　台積電");
    }

    #[test]
    fn test_listing_url_modes() {
        let base = "https://isin.twse.com.tw/isin/C_public.jsp";
        assert_eq!(
            listing_url(base, Market::Listed).unwrap().as_str(),
            "https://isin.twse.com.tw/isin/C_public.jsp?strMode=2"
        );
        assert_eq!(listing_url(base, Market::Otc).unwrap().query(), Some("strMode=4"));
    }
}
