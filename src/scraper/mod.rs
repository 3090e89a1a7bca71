pub mod cleaner;
pub mod http_client;
pub mod parsers;

use crate::config::ScraperConfig;
use crate::models::{Enrichment, RawCalendarRow};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use self::cleaner::{parse_market_cap, parse_price};
use self::http_client::HttpClient;
use self::parsers::{parse_calendar_page, parse_detail_page};

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why a detail page produced no price.
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("bad detail link: {0}")]
    BadLink(#[from] url::ParseError),

    #[error("request failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("unreadable page: {0}")]
    Page(String),

    #[error("no price on page")]
    MissingPrice,

    #[error("price {0:?} is not a number")]
    BadPrice(String),
}

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable data source abstraction.
#[async_trait]
pub trait DividendSource: Send + Sync {
    /// All rows currently on the dividend calendar.
    async fn fetch_calendar_rows(&self) -> Result<Vec<RawCalendarRow>>;

    /// Price and market cap from one company's detail page.
    async fn fetch_details(&self, detail_link: &str) -> Result<Enrichment, EnrichError>;
}

/// Enrich one company. Any failure collapses to [`Enrichment::FAILED`]; the
/// entry stays unpriced and is picked up again on the next update.
pub async fn enrich(source: &dyn DividendSource, detail_link: &str, key: &str) -> Enrichment {
    match source.fetch_details(detail_link).await {
        Ok(e) => {
            debug!("{}: price={} market_cap={}", key, e.price, e.market_cap);
            e
        }
        Err(e) => {
            warn!("Failed to fetch {} details: {}", key, e);
            Enrichment::FAILED
        }
    }
}

// ── eToro scraper ─────────────────────────────────────────────────────────────

pub struct EtoroScraper {
    client: HttpClient,
    base_url: Url,
    calendar_url: Url,
    calendar_timeout: Duration,
    detail_timeout: Duration,
}

impl EtoroScraper {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid base URL {:?}", config.base_url))?;
        let calendar_url = base_url
            .join(&config.calendar_path)
            .with_context(|| format!("Invalid calendar path {:?}", config.calendar_path))?;

        Ok(Self {
            client: HttpClient::new(config)?,
            base_url,
            calendar_url,
            calendar_timeout: config.calendar_timeout(),
            detail_timeout: config.detail_timeout(),
        })
    }

    /// Detail links are site-relative, e.g. `/markets/acme`.
    fn detail_url(&self, detail_link: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(detail_link)
    }
}

#[async_trait]
impl DividendSource for EtoroScraper {
    async fn fetch_calendar_rows(&self) -> Result<Vec<RawCalendarRow>> {
        info!("Fetching dividend calendar ({})", self.calendar_url);

        let html = self
            .client
            .get_text(self.calendar_url.as_str(), self.calendar_timeout)
            .await
            .with_context(|| format!("Couldn't connect to {}", self.calendar_url))?;

        let rows = parse_calendar_page(&html)?;
        info!("Calendar rows found: {}", rows.len());
        Ok(rows)
    }

    async fn fetch_details(&self, detail_link: &str) -> Result<Enrichment, EnrichError> {
        let url = self.detail_url(detail_link)?;
        let html = self.client.get_text(url.as_str(), self.detail_timeout).await?;

        let fields = parse_detail_page(&html).map_err(|e| EnrichError::Page(format!("{:#}", e)))?;

        let raw_price = fields.price.ok_or(EnrichError::MissingPrice)?;
        let price = parse_price(&raw_price).ok_or(EnrichError::BadPrice(raw_price))?;

        let market_cap = match fields.market_cap {
            Some(raw) => parse_market_cap(&raw).unwrap_or_else(|e| {
                warn!("{}: {}", url, e);
                Decimal::ZERO
            }),
            None => {
                debug!("{}: no market cap on page", url);
                Decimal::ZERO
            }
        };

        Ok(Enrichment { price, market_cap })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use httpmock::prelude::*;

    fn scraper_for(server: &MockServer) -> EtoroScraper {
        let mut cfg = AppConfig::default().scraper;
        cfg.base_url = server.base_url();
        cfg.calendar_path = "/investing/dividend-calendar/".into();
        cfg.detail_timeout_secs = 2;
        cfg.calendar_timeout_secs = 2;
        EtoroScraper::new(&cfg).unwrap()
    }

    #[tokio::test]
    async fn fetches_calendar_rows_over_http() {
        let server = MockServer::start_async().await;
        let calendar = server
            .mock_async(|when, then| {
                when.method(GET).path("/investing/dividend-calendar/");
                then.status(200).body(parsers::fixtures::CALENDAR);
            })
            .await;

        let rows = scraper_for(&server).fetch_calendar_rows().await.unwrap();
        calendar.assert_async().await;
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn calendar_http_error_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/investing/dividend-calendar/");
                then.status(503);
            })
            .await;

        assert!(scraper_for(&server).fetch_calendar_rows().await.is_err());
    }

    #[tokio::test]
    async fn fetches_details_relative_to_base() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/markets/acme");
                then.status(200).body(parsers::fixtures::DETAIL);
            })
            .await;

        let e = scraper_for(&server).fetch_details("/markets/acme").await.unwrap();
        assert_eq!(e.price, 1234.5);
        assert_eq!(e.market_cap, Decimal::from(2_500_000_000u64));
    }

    #[tokio::test]
    async fn missing_detail_page_enriches_to_zero() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/markets/gone");
                then.status(404);
            })
            .await;

        let scraper = scraper_for(&server);
        assert!(matches!(
            scraper.fetch_details("/markets/gone").await,
            Err(EnrichError::Fetch(_))
        ));
        assert_eq!(enrich(&scraper, "/markets/gone", "Gone").await, Enrichment::FAILED);
    }

    struct Unreachable;

    #[async_trait]
    impl DividendSource for Unreachable {
        async fn fetch_calendar_rows(&self) -> Result<Vec<RawCalendarRow>> {
            anyhow::bail!("offline")
        }

        async fn fetch_details(&self, _detail_link: &str) -> Result<Enrichment, EnrichError> {
            Err(EnrichError::Page("offline".into()))
        }
    }

    #[test]
    fn enrich_collapses_any_error_to_failed() {
        let result = tokio_test::block_on(enrich(&Unreachable, "/markets/x", "X"));
        assert!(result.is_failed());
        assert_eq!(result.market_cap, Decimal::ZERO);
    }

    #[tokio::test]
    async fn page_without_price_is_a_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/markets/blank");
                then.status(200).body("<html><body></body></html>");
            })
            .await;

        assert!(matches!(
            scraper_for(&server).fetch_details("/markets/blank").await,
            Err(EnrichError::MissingPrice)
        ));
    }
}
