use crate::models::{RawCalendarRow, RawDetailFields};
use anyhow::Result;
use scraper::{ElementRef, Html, Selector};

fn selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| anyhow::anyhow!("selector {:?}: {:?}", s, e))
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

// ── Calendar page ─────────────────────────────────────────────────────────────

/// Lift every calendar `<tr>` into a [`RawCalendarRow`].
///
/// Column layout: company | sector | ex-dividend | payment | (yield) | net dividend.
/// Rows are returned even when cells are missing; validation happens in the cleaner.
pub fn parse_calendar_page(html: &str) -> Result<Vec<RawCalendarRow>> {
    let doc = Html::parse_document(html);

    let row_sel = selector("tbody.ec-reports-container tr")?;
    let td_sel = selector("td")?;
    let name_sel = selector("span.ec-company__name")?;
    let a_sel = selector("a")?;

    let mut rows = Vec::new();

    for tr in doc.select(&row_sel) {
        let cells: Vec<ElementRef<'_>> = tr.select(&td_sel).collect();
        let attr = |idx: usize, name: &str| {
            cells
                .get(idx)
                .and_then(|td| td.value().attr(name))
                .map(|v| v.trim().to_string())
        };

        let company = cells.first();
        rows.push(RawCalendarRow {
            name: company
                .and_then(|td| td.select(&name_sel).next())
                .map(text_of)
                .and_then(non_empty),
            full_name: attr(0, "data-company-name"),
            sector: attr(1, "data-sector-name"),
            ex_dividend_date: attr(2, "data-exdividend-date"),
            payment_date: attr(3, "data-payment-date"),
            detail_link: company
                .and_then(|td| td.select(&a_sel).next())
                .and_then(|a| a.value().attr("href"))
                .map(|h| h.trim().to_string())
                .and_then(non_empty),
            net_dividend: attr(5, "data-net-dividend"),
        });
    }

    Ok(rows)
}

// ── Detail page ───────────────────────────────────────────────────────────────

/// Pull the price and "Market Cap" stat text off an instrument page.
pub fn parse_detail_page(html: &str) -> Result<RawDetailFields> {
    let doc = Html::parse_document(html);

    let price_sel = selector(r#"span[data-automation-id="AssetShortInfoPrice"]"#)?;
    let price = doc.select(&price_sel).map(text_of).find(|t| !t.is_empty());

    Ok(RawDetailFields {
        price,
        market_cap: find_market_cap(&doc)?,
    })
}

/// The stats block sits next to the `#stats` anchor; each stat is a row with a
/// plain-text label and a number cell.
fn find_market_cap(doc: &Html) -> Result<Option<String>> {
    let anchor_sel = selector("#stats")?;
    let stat_row_sel = selector(".Table_row___1rR3")?;
    let label_sel = selector("div.ets-plain-text")?;
    let value_sel = selector("div.ets-number")?;

    let Some(container) = doc
        .select(&anchor_sel)
        .next()
        .and_then(|anchor| anchor.parent())
        .and_then(ElementRef::wrap)
    else {
        return Ok(None);
    };

    let value = container
        .select(&stat_row_sel)
        .find(|row| {
            row.select(&label_sel)
                .next()
                .is_some_and(|label| text_of(label).eq_ignore_ascii_case("Market Cap"))
        })
        .and_then(|row| row.select(&value_sel).next())
        .map(text_of)
        .and_then(non_empty);

    Ok(value)
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub const CALENDAR: &str = r#"
<html><body><table>
<tbody class="ec-reports-container">
  <tr>
    <td data-company-name="Acme Corp"><a href="/markets/acme"><span class="ec-company__name">ACME</span></a></td>
    <td data-sector-name="Industrials"></td>
    <td data-exdividend-date="2025-03-05"></td>
    <td data-payment-date="2025-03-20"></td>
    <td>2.1%</td>
    <td data-net-dividend="0.42"></td>
  </tr>
  <tr>
    <td data-company-name="Globex Inc"><a href="/markets/gbx"><span class="ec-company__name">GBX</span></a></td>
    <td data-sector-name=""></td>
    <td data-exdividend-date="2025-04-01"></td>
    <td data-payment-date="2025-04-15"></td>
    <td>1.0%</td>
    <td data-net-dividend="1.10"></td>
  </tr>
  <tr>
    <td data-company-name="Initech"><span class="ec-company__name">INTC</span></td>
    <td data-sector-name="Technology"></td>
    <td data-exdividend-date="2025-05-01"></td>
    <td data-payment-date="2025-05-10"></td>
    <td>0.5%</td>
    <td data-net-dividend="0.05"></td>
  </tr>
</tbody>
</table></body></html>"#;

    pub const DETAIL: &str = r#"
<html><body>
  <span data-automation-id="AssetShortInfoPrice">1,234.50</span>
  <section>
    <a id="stats"></a>
    <div class="Table_row___1rR3">
      <div class="ets-plain-text">P/E Ratio</div><div class="ets-number">14.2</div>
    </div>
    <div class="Table_row___1rR3">
      <div class="ets-plain-text">Market Cap</div><div class="ets-number">2.5B</div>
    </div>
  </section>
</body></html>"#;
}
