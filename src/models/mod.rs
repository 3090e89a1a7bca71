use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Pipeline-owned tag: set on creation, cleared once a later pass sees a price.
pub const TAG_NEW: &str = "NEW";
/// UI-owned tag. The pipeline never adds or removes it.
pub const TAG_FAVOURITE: &str = "FAVOURITE";

// ── Company ───────────────────────────────────────────────────────────────────

/// One dividend-calendar entry, keyed in the cache by `full_name`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub sector: String,
    #[serde(with = "calendar_date")]
    pub ex_dividend_date: NaiveDate,
    #[serde(with = "calendar_date")]
    pub dividend_date: NaiveDate,
    pub detail_link: String,
    #[serde(default)]
    pub price: f64,
    pub dividend_per_share: f64,
    #[serde(default)]
    pub market_cap: Decimal,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Company {
    /// Fresh, unenriched entry tagged `NEW`.
    pub fn new(
        name: String,
        full_name: String,
        sector: String,
        ex_dividend_date: NaiveDate,
        dividend_date: NaiveDate,
        detail_link: String,
        dividend_per_share: f64,
    ) -> Self {
        Self {
            name,
            full_name,
            sector,
            ex_dividend_date,
            dividend_date,
            detail_link,
            price: 0.0,
            dividend_per_share,
            market_cap: Decimal::ZERO,
            tags: BTreeSet::from([TAG_NEW.to_string()]),
        }
    }

    pub fn is_enriched(&self) -> bool {
        self.price != 0.0
    }

    pub fn is_new(&self) -> bool {
        self.tags.contains(TAG_NEW)
    }

    /// Expired once the payment date is strictly before `today`.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.dividend_date < today
    }
}

// ── Enrichment ────────────────────────────────────────────────────────────────

/// Result of one detail-page fetch. `price == 0` means the fetch failed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Enrichment {
    pub price: f64,
    pub market_cap: Decimal,
}

impl Enrichment {
    pub const FAILED: Enrichment = Enrichment {
        price: 0.0,
        market_cap: Decimal::ZERO,
    };

    pub fn is_failed(&self) -> bool {
        self.price == 0.0
    }
}

// ── Raw scraped shapes ────────────────────────────────────────────────────────

/// One calendar `<tr>`, lifted out of the DOM as plain attribute/text values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCalendarRow {
    pub name: Option<String>,
    pub full_name: Option<String>,
    pub sector: Option<String>,
    pub ex_dividend_date: Option<String>,
    pub payment_date: Option<String>,
    pub detail_link: Option<String>,
    pub net_dividend: Option<String>,
}

/// Price and market-cap text as found on a detail page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDetailFields {
    pub price: Option<String>,
    pub market_cap: Option<String>,
}

// ── Date (de)serialisation ────────────────────────────────────────────────────

/// `"05 Mar 2025"` on disk.
pub mod calendar_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%d %b %Y";

    pub fn serialize<S: Serializer>(date: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDate::parse_from_str(raw.trim(), FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sample() -> Company {
        Company::new(
            "ACME".into(),
            "Acme Corp".into(),
            "Industrials".into(),
            NaiveDate::from_ymd_opt(2025, 3, 5).unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 20).unwrap(),
            "/markets/acme".into(),
            0.42,
        )
    }

    #[test]
    fn new_company_is_unenriched_and_tagged_new() {
        let c = sample();
        assert!(!c.is_enriched());
        assert!(c.is_new());
        assert_eq!(c.market_cap, Decimal::ZERO);
    }

    #[test]
    fn expiry_is_strict() {
        let c = sample();
        assert!(!c.is_expired(NaiveDate::from_ymd_opt(2025, 3, 20).unwrap()));
        assert!(c.is_expired(NaiveDate::from_ymd_opt(2025, 3, 21).unwrap()));
    }

    #[test]
    fn json_uses_calendar_date_format_and_camel_case() {
        let mut c = sample();
        c.market_cap = Decimal::from_str("2500000000").unwrap();
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["exDividendDate"], "05 Mar 2025");
        assert_eq!(json["dividendDate"], "20 Mar 2025");
        assert_eq!(json["fullName"], "Acme Corp");
        assert_eq!(json["tags"], serde_json::json!(["NEW"]));
    }

    #[test]
    fn market_cap_accepts_number_on_load() {
        let json = r#"{
            "name": "ACME", "fullName": "Acme Corp", "sector": "",
            "exDividendDate": "05 Mar 2025", "dividendDate": "20 Mar 2025",
            "detailLink": "/markets/acme", "price": 12.5,
            "dividendPerShare": 0.42, "marketCap": 1200000, "tags": ["FAVOURITE"]
        }"#;
        let c: Company = serde_json::from_str(json).unwrap();
        assert_eq!(c.market_cap, Decimal::from(1_200_000));
        assert!(c.tags.contains(TAG_FAVOURITE));
        assert!(c.is_enriched());
    }
}
