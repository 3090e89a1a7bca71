use crate::models::{Company, RawCalendarRow};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why a calendar row was rejected. A rejected row never enters the cache.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("missing field `{0}`")]
    Missing(&'static str),

    #[error("field `{field}` is not a date: {value:?}")]
    BadDate { field: &'static str, value: String },

    #[error("field `{field}` is not a number: {value:?}")]
    BadNumber { field: &'static str, value: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MarketCapError {
    #[error("empty market cap")]
    Empty,

    #[error("market cap {0:?} has no numeric prefix")]
    NotNumeric(String),

    #[error("market cap {0:?} overflows")]
    Overflow(String),
}

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Parse a displayed price: commas stripped. "1,234.50" → 1234.5
pub fn parse_price(s: &str) -> Option<f64> {
    let cleaned = s.trim().replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|p| p.is_finite())
}

/// Parse market cap with T/B/M suffixes into an exact decimal.
/// "2.5B" → 2,500,000,000 | "750M" → 750,000,000 | "1234" → 1234
pub fn parse_market_cap(s: &str) -> Result<Decimal, MarketCapError> {
    let s = s.trim().to_uppercase().replace(',', "");
    if s.is_empty() {
        return Err(MarketCapError::Empty);
    }

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix('T') {
        (n, Decimal::from(1_000_000_000_000u64))
    } else if let Some(n) = s.strip_suffix('B') {
        (n, Decimal::from(1_000_000_000u64))
    } else if let Some(n) = s.strip_suffix('M') {
        (n, Decimal::from(1_000_000u64))
    } else {
        (s.as_str(), Decimal::ONE)
    };

    let num_str = num_str.trim();
    if num_str.is_empty() {
        return Err(MarketCapError::NotNumeric(s.clone()));
    }

    let base = Decimal::from_str(num_str).map_err(|_| MarketCapError::NotNumeric(s.clone()))?;
    base.checked_mul(multiplier)
        .map(|v| v.normalize())
        .ok_or(MarketCapError::Overflow(s))
}

/// Calendar dates come as ISO "2025-03-20".
pub fn parse_iso_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

// ── Calendar row → Company ────────────────────────────────────────────────────

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, RowError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(RowError::Missing(field)),
    }
}

fn date_field(value: &Option<String>, field: &'static str) -> Result<NaiveDate, RowError> {
    let raw = required(value, field)?;
    parse_iso_date(raw).ok_or_else(|| RowError::BadDate {
        field,
        value: raw.to_string(),
    })
}

/// Build a `NEW`-tagged company from one calendar row, or reject the whole row.
pub fn parse_row(row: &RawCalendarRow) -> Result<Company, RowError> {
    let name = required(&row.name, "name")?;
    let full_name = required(&row.full_name, "fullName")?;
    let sector = row
        .sector
        .as_deref()
        .map(str::trim)
        .ok_or(RowError::Missing("sector"))?;
    let ex_dividend_date = date_field(&row.ex_dividend_date, "exDividendDate")?;
    let dividend_date = date_field(&row.payment_date, "dividendDate")?;
    let detail_link = required(&row.detail_link, "detailLink")?;

    let raw_dps = required(&row.net_dividend, "dividendPerShare")?;
    let dividend_per_share = raw_dps
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| RowError::BadNumber {
            field: "dividendPerShare",
            value: raw_dps.to_string(),
        })?;

    Ok(Company::new(
        name.to_string(),
        full_name.to_string(),
        sector.to_string(),
        ex_dividend_date,
        dividend_date,
        detail_link.to_string(),
        dividend_per_share,
    ))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> RawCalendarRow {
        RawCalendarRow {
            name: Some("ACME".into()),
            full_name: Some("Acme Corp".into()),
            sector: Some("Industrials".into()),
            ex_dividend_date: Some("2025-03-05".into()),
            payment_date: Some("2025-03-20".into()),
            detail_link: Some("/markets/acme".into()),
            net_dividend: Some("0.42".into()),
        }
    }

    #[test]
    fn test_parse_market_cap() {
        assert_eq!(parse_market_cap("2.5B"), Ok(Decimal::from(2_500_000_000u64)));
        assert_eq!(parse_market_cap("750M"), Ok(Decimal::from(750_000_000u64)));
        assert_eq!(
            parse_market_cap("1.2T"),
            Ok(Decimal::from(1_200_000_000_000u64))
        );
        assert_eq!(parse_market_cap(" 3.75b "), Ok(Decimal::from(3_750_000_000u64)));
        assert_eq!(parse_market_cap("12,345"), Ok(Decimal::from(12_345)));
    }

    #[test]
    fn test_parse_market_cap_malformed() {
        assert!(matches!(parse_market_cap("N/A"), Err(MarketCapError::NotNumeric(_))));
        assert!(matches!(parse_market_cap("B"), Err(MarketCapError::NotNumeric(_))));
        assert_eq!(parse_market_cap("   "), Err(MarketCapError::Empty));
    }

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("1,234.50"), Some(1234.5));
        assert_eq!(parse_price(" 12.5 "), Some(12.5));
        assert_eq!(parse_price(""), None);
        assert_eq!(parse_price("abc"), None);
    }

    #[test]
    fn parse_row_builds_new_company() {
        let c = parse_row(&row()).unwrap();
        assert_eq!(c.full_name, "Acme Corp");
        assert_eq!(c.dividend_date, NaiveDate::from_ymd_opt(2025, 3, 20).unwrap());
        assert!((c.dividend_per_share - 0.42).abs() < 1e-9);
        assert!(c.is_new());
        assert!(!c.is_enriched());
    }

    #[test]
    fn parse_row_accepts_empty_sector() {
        let mut r = row();
        r.sector = Some(String::new());
        assert_eq!(parse_row(&r).unwrap().sector, "");
    }

    #[test]
    fn parse_row_rejects_missing_link() {
        let mut r = row();
        r.detail_link = None;
        assert_eq!(parse_row(&r), Err(RowError::Missing("detailLink")));

        r.detail_link = Some("  ".into());
        assert_eq!(parse_row(&r), Err(RowError::Missing("detailLink")));
    }

    #[test]
    fn parse_row_rejects_bad_date_and_number() {
        let mut r = row();
        r.payment_date = Some("20/03/2025".into());
        assert!(matches!(parse_row(&r), Err(RowError::BadDate { field: "dividendDate", .. })));

        let mut r = row();
        r.net_dividend = Some("n/a".into());
        assert!(matches!(parse_row(&r), Err(RowError::BadNumber { .. })));
    }
}
