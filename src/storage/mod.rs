use crate::models::{Company, TAG_FAVOURITE};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use indexmap::IndexMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// `fullName` → company, in calendar order.
pub type CompanyMap = IndexMap<String, Company>;

// ── Cache store ───────────────────────────────────────────────────────────────

/// JSON file holding the whole company map.
#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<CompanyMap> {
        info!("Loading companies from {:?}", self.path);
        let file = File::open(&self.path)
            .with_context(|| format!("Could not open cache {:?}", self.path))?;
        let companies: CompanyMap = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Could not parse cache {:?}", self.path))?;
        info!("Loaded {} companies", companies.len());
        Ok(companies)
    }

    /// Rewrite the cache file: write a sibling `.json.tmp`, then rename it
    /// over the cache.
    pub fn save(&self, companies: &CompanyMap) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        {
            let file = File::create(&tmp).with_context(|| format!("Could not create {:?}", tmp))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, companies)
                .with_context(|| format!("Could not serialise {} companies", companies.len()))?;
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Could not replace cache {:?}", self.path))?;

        info!("Saved {} companies to {:?}", companies.len(), self.path);
        Ok(())
    }
}

// ── Summary ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CacheSummary {
    pub entries: usize,
    pub enriched: usize,
    pub new: usize,
    pub favourites: usize,
    /// Earliest dividend date on or after today.
    pub next_dividend: Option<NaiveDate>,
}

pub fn summarize(companies: &CompanyMap, today: NaiveDate) -> CacheSummary {
    CacheSummary {
        entries: companies.len(),
        enriched: companies.values().filter(|c| c.is_enriched()).count(),
        new: companies.values().filter(|c| c.is_new()).count(),
        favourites: companies
            .values()
            .filter(|c| c.tags.contains(TAG_FAVOURITE))
            .count(),
        next_dividend: companies
            .values()
            .map(|c| c.dividend_date)
            .filter(|d| *d >= today)
            .min(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TAG_NEW;
    use rust_decimal::Decimal;

    fn company(full_name: &str, day: u32) -> Company {
        Company::new(
            full_name.to_uppercase(),
            full_name.to_string(),
            "Energy".into(),
            NaiveDate::from_ymd_opt(2025, 6, day).unwrap(),
            NaiveDate::from_ymd_opt(2025, 6, day + 1).unwrap(),
            format!("/markets/{}", full_name),
            0.1,
        )
    }

    #[test]
    fn round_trip_preserves_order_and_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("nested/companies.json"));

        let mut map = CompanyMap::new();
        for (name, day) in [("zeta", 3), ("alpha", 1), ("mid", 2)] {
            let c = company(name, day);
            map.insert(c.full_name.clone(), c);
        }
        let alpha = map.get_mut("alpha").unwrap();
        alpha.price = 42.25;
        alpha.market_cap = Decimal::from(750_000_000u64);
        alpha.tags.remove(TAG_NEW);
        alpha.tags.insert(TAG_FAVOURITE.into());

        store.save(&map).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded, map);
        let keys: Vec<&str> = loaded.keys().map(String::as_str).collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("absent.json"));
        assert!(store.load().is_err());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("companies.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(CacheStore::new(path).load().is_err());
    }

    #[test]
    fn summary_counts_tags_and_next_date() {
        let mut map = CompanyMap::new();
        for (name, day) in [("a", 1), ("b", 10), ("c", 20)] {
            let c = company(name, day);
            map.insert(c.full_name.clone(), c);
        }
        let b = map.get_mut("b").unwrap();
        b.price = 3.0;
        b.tags.clear();
        b.tags.insert(TAG_FAVOURITE.into());

        let summary = summarize(&map, NaiveDate::from_ymd_opt(2025, 6, 5).unwrap());
        assert_eq!(
            summary,
            CacheSummary {
                entries: 3,
                enriched: 1,
                new: 2,
                favourites: 1,
                next_dividend: NaiveDate::from_ymd_opt(2025, 6, 11),
            }
        );
    }
}
