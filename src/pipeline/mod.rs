//! Pipeline orchestrator: ties calendar → enrichment → cache together.
//!
//! ## Run modes
//!
//! `run()` picks the mode from the persisted cache:
//!   - cold extract when no usable cache exists: every parseable calendar row
//!     becomes a `NEW` company and is enriched.
//!   - warm update otherwise: expired entries are dropped, priced entries are
//!     kept as-is (losing `NEW`), unpriced and unseen rows are enriched.
//!
//! Both modes plan all structural changes to the map up front, then hand the
//! jobs to a bounded worker pool. Workers only ever call
//! [`CompanyBook::apply_enrichment`]. The coordinator waits for the pool with
//! an overall deadline, aborts stragglers and persists whatever landed.

use crate::config::PipelineConfig;
use crate::models::{Company, Enrichment, RawCalendarRow, TAG_NEW};
use crate::progress::ProgressTracker;
use crate::scraper::cleaner::parse_row;
use crate::scraper::{enrich, DividendSource};
use crate::storage::{CacheStore, CompanyMap};
use chrono::{Local, NaiveDate};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

// ── Shared map ────────────────────────────────────────────────────────────────

/// The company map while enrichment tasks are in flight.
#[derive(Debug, Default)]
pub struct CompanyBook {
    inner: Mutex<CompanyMap>,
}

impl CompanyBook {
    pub fn new(companies: CompanyMap) -> Self {
        Self {
            inner: Mutex::new(companies),
        }
    }

    /// Merge one enrichment result. A failed result never clears an existing
    /// price, and results for keys no longer in the map are dropped.
    /// Returns whether the entry now carries the fetched price.
    pub fn apply_enrichment(&self, key: &str, result: Enrichment) -> bool {
        let mut map = self.lock();
        let Some(company) = map.get_mut(key) else {
            debug!("{}: no longer cached, dropping result", key);
            return false;
        };
        if result.is_failed() {
            return false;
        }
        company.price = result.price;
        company.market_cap = result.market_cap;
        true
    }

    pub fn snapshot(&self) -> CompanyMap {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, CompanyMap> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ── Planning ──────────────────────────────────────────────────────────────────

/// One company to enrich.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichJob {
    pub key: String,
    pub detail_link: String,
}

/// Outcome of walking the calendar against the cache.
#[derive(Debug, Default)]
pub struct Plan {
    pub jobs: Vec<EnrichJob>,
    /// Already priced, not re-fetched.
    pub kept: usize,
    /// Rows that failed to parse.
    pub rejected: usize,
}

/// Drop every entry whose dividend date is strictly before `today`.
pub fn remove_expired(companies: &mut CompanyMap, today: NaiveDate) -> usize {
    let before = companies.len();
    companies.retain(|_, c| !c.is_expired(today));
    before - companies.len()
}

/// Cold start: every parseable row becomes a `NEW` company with a job.
pub fn plan_extract(rows: &[RawCalendarRow]) -> (CompanyMap, Plan) {
    let mut companies = CompanyMap::new();
    let mut plan = Plan::default();

    for row in rows {
        let company = match parse_row(row) {
            Ok(c) => c,
            Err(e) => {
                warn!("Couldn't extract company {:?}: {}", row.full_name, e);
                plan.rejected += 1;
                continue;
            }
        };
        if companies.contains_key(&company.full_name) {
            debug!("{}: duplicate calendar row", company.full_name);
            continue;
        }
        plan.jobs.push(job_for(&company));
        companies.insert(company.full_name.clone(), company);
    }

    (companies, plan)
}

/// Carry user-owned tags (everything but `NEW`) from a previous cache onto
/// the matching keys of a rebuilt map.
pub fn carry_user_tags(companies: &mut CompanyMap, previous: &CompanyMap) {
    for (key, company) in companies.iter_mut() {
        if let Some(old) = previous.get(key) {
            company
                .tags
                .extend(old.tags.iter().filter(|t| t.as_str() != TAG_NEW).cloned());
        }
    }
}

/// Warm start against an already expiry-pruned cache. Priced entries lose
/// `NEW` and count as done on `tracker`; everything else gets a job.
pub fn plan_update(
    companies: &mut CompanyMap,
    rows: &[RawCalendarRow],
    tracker: &ProgressTracker,
) -> Plan {
    let mut plan = Plan::default();
    let mut seen: HashSet<String> = HashSet::new();

    for row in rows {
        let key = row.full_name.as_deref().map(str::trim).unwrap_or_default();

        if seen.contains(key) {
            debug!("{}: duplicate calendar row", key);
            continue;
        }
        if let Some(existing) = companies.get_mut(key).filter(|c| c.is_enriched()) {
            existing.tags.remove(TAG_NEW);
            tracker.record_completion();
            plan.kept += 1;
            seen.insert(key.to_string());
            continue;
        }

        let fresh = match parse_row(row) {
            Ok(c) => c,
            Err(e) => {
                warn!("Couldn't extract company {:?}: {}", key, e);
                plan.rejected += 1;
                continue;
            }
        };

        let job = job_for(&fresh);
        match companies.get_mut(&fresh.full_name) {
            Some(existing) => {
                debug!("Re-enriching unpriced {}", fresh.full_name);
                refresh_from_row(existing, fresh);
            }
            None => {
                info!("Adding {} to companies...", fresh.full_name);
                companies.insert(fresh.full_name.clone(), fresh);
            }
        }

        seen.insert(job.key.clone());
        plan.jobs.push(job);
    }

    plan
}

/// Take the row's calendar fields, keep the existing tags (plus `NEW`).
fn refresh_from_row(existing: &mut Company, fresh: Company) {
    let mut tags = std::mem::take(&mut existing.tags);
    tags.extend(fresh.tags.iter().cloned());
    *existing = Company { tags, ..fresh };
}

fn job_for(company: &Company) -> EnrichJob {
    EnrichJob {
        key: company.full_name.clone(),
        detail_link: company.detail_link.clone(),
    }
}

// ── Coordinator ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    ColdExtract,
    WarmUpdate,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::ColdExtract => f.write_str("cold extract"),
            RunMode::WarmUpdate => f.write_str("warm update"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub mode: RunMode,
    pub calendar_rows: usize,
    pub rejected: usize,
    pub expired: usize,
    pub kept: usize,
    pub scheduled: usize,
    pub enriched: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub saved: bool,
}

/// What a run leaves behind for the reporting layer.
#[derive(Debug)]
pub struct RunOutcome {
    pub companies: CompanyMap,
    pub stats: RunStats,
}

#[derive(Debug, Default)]
struct DrainStats {
    enriched: usize,
    failed: usize,
    abandoned: usize,
}

pub struct Coordinator {
    source: Arc<dyn DividendSource>,
    store: CacheStore,
    concurrency: usize,
    wait_timeout: Duration,
    progress_alpha: f64,
}

impl Coordinator {
    pub fn new(source: Arc<dyn DividendSource>, store: CacheStore, config: &PipelineConfig) -> Self {
        Self {
            source,
            store,
            concurrency: config.concurrency.max(1),
            wait_timeout: config.wait_timeout(),
            progress_alpha: config.progress_alpha,
        }
    }

    #[cfg(test)]
    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    /// Scheduled entry point: warm update when a non-empty cache loads,
    /// cold extract otherwise.
    pub async fn run(&self) -> RunOutcome {
        match self.store.load() {
            Ok(cache) if !cache.is_empty() => self.warm_update(cache, today()).await,
            Ok(_) => {
                info!("Cache is empty");
                self.cold_extract(&CompanyMap::new()).await
            }
            Err(e) => {
                warn!("Failed to load companies: {:#}", e);
                self.cold_extract(&CompanyMap::new()).await
            }
        }
    }

    /// Rebuild the cache from the calendar. Prices are re-fetched, but tags
    /// other than `NEW` on companies still listed survive the rebuild.
    pub async fn run_cold_extract(&self) -> RunOutcome {
        let previous = self.store.load().unwrap_or_else(|e| {
            debug!("No previous cache to carry tags from: {:#}", e);
            CompanyMap::new()
        });
        self.cold_extract(&previous).await
    }

    async fn cold_extract(&self, previous: &CompanyMap) -> RunOutcome {
        let rows = self.calendar_rows().await;
        let tracker = Arc::new(ProgressTracker::new(rows.len(), self.progress_alpha));

        info!("Extracting companies...");
        let (mut companies, plan) = plan_extract(&rows);
        carry_user_tags(&mut companies, previous);

        let book = Arc::new(CompanyBook::new(companies));
        let drained = self.dispatch(&book, &plan.jobs, &tracker).await;
        info!("Extraction completed.");

        self.finish(RunMode::ColdExtract, &book, rows.len(), 0, &plan, drained)
    }

    /// Warm update against whatever the store holds; an unreadable cache
    /// counts as empty.
    pub async fn run_warm_update(&self) -> RunOutcome {
        let cache = self.store.load().unwrap_or_else(|e| {
            warn!("Failed to load companies: {:#}", e);
            CompanyMap::new()
        });
        self.warm_update(cache, today()).await
    }

    /// Warm update with an explicit "today" for expiry.
    pub async fn warm_update(&self, mut cache: CompanyMap, today: NaiveDate) -> RunOutcome {
        info!("Updating companies...");
        let rows = self.calendar_rows().await;

        let expired = remove_expired(&mut cache, today);
        info!("Removed {} outdated companies", expired);

        let tracker = Arc::new(ProgressTracker::new(rows.len(), self.progress_alpha));
        let plan = plan_update(&mut cache, &rows, &tracker);

        let book = Arc::new(CompanyBook::new(cache));
        let drained = self.dispatch(&book, &plan.jobs, &tracker).await;
        info!("Update completed.");

        self.finish(RunMode::WarmUpdate, &book, rows.len(), expired, &plan, drained)
    }

    /// Calendar fetch failure means zero rows this run.
    async fn calendar_rows(&self) -> Vec<RawCalendarRow> {
        self.source.fetch_calendar_rows().await.unwrap_or_else(|e| {
            warn!("{:#}", e);
            Vec::new()
        })
    }

    /// Run every job on the bounded pool, then wait up to the deadline.
    /// Tasks still running at the deadline are aborted and awaited, so no
    /// write lands after this returns.
    async fn dispatch(
        &self,
        book: &Arc<CompanyBook>,
        jobs: &[EnrichJob],
        tracker: &Arc<ProgressTracker>,
    ) -> DrainStats {
        // `None` when the wait is too long to represent: wait without limit.
        let deadline = Instant::now().checked_add(self.wait_timeout);
        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut handles: Vec<(String, JoinHandle<bool>)> = Vec::with_capacity(jobs.len());

        for job in jobs {
            let job = job.clone();
            let key = job.key.clone();
            let source = Arc::clone(&self.source);
            let book = Arc::clone(book);
            let tracker = Arc::clone(tracker);
            let sem = Arc::clone(&sem);

            let handle = tokio::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return false;
                };
                let result = enrich(source.as_ref(), &job.detail_link, &job.key).await;
                let applied = book.apply_enrichment(&job.key, result);
                tracker.record_completion();
                applied
            });

            handles.push((key, handle));
        }

        let mut stats = DrainStats::default();
        let mut pending = handles.into_iter();

        while let Some((key, mut handle)) = pending.next() {
            let waited = match deadline {
                Some(deadline) => timeout_at(deadline, &mut handle).await,
                None => Ok((&mut handle).await),
            };
            match waited {
                Ok(Ok(true)) => stats.enriched += 1,
                Ok(Ok(false)) => stats.failed += 1,
                Ok(Err(e)) => {
                    error!("Task panic for {}: {}", key, e);
                    stats.failed += 1;
                }
                Err(_) => {
                    let stragglers: Vec<_> = std::iter::once((key, handle))
                        .chain(pending.by_ref())
                        .collect();
                    warn!(
                        "Could not fetch all prices in time! Abandoning {} tasks",
                        stragglers.len()
                    );
                    for (_, h) in &stragglers {
                        h.abort();
                    }
                    // A task may still finish between the deadline and abort().
                    for (_, h) in stragglers {
                        match h.await {
                            Ok(true) => stats.enriched += 1,
                            Ok(false) => stats.failed += 1,
                            Err(_) => stats.abandoned += 1,
                        }
                    }
                    break;
                }
            }
        }

        stats
    }

    fn finish(
        &self,
        mode: RunMode,
        book: &CompanyBook,
        calendar_rows: usize,
        expired: usize,
        plan: &Plan,
        drained: DrainStats,
    ) -> RunOutcome {
        let companies = book.snapshot();

        info!("Saving companies to file...");
        let saved = match self.store.save(&companies) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to save companies to file: {:#}", e);
                false
            }
        };

        let stats = RunStats {
            mode,
            calendar_rows,
            rejected: plan.rejected,
            expired,
            kept: plan.kept,
            scheduled: plan.jobs.len(),
            enriched: drained.enriched,
            failed: drained.failed,
            abandoned: drained.abandoned,
            saved,
        };
        info!(
            "=== {}: {} rows | {} kept | {} enriched | {} failed | {} abandoned | {} rejected | {} expired ===",
            mode,
            stats.calendar_rows,
            stats.kept,
            stats.enriched,
            stats.failed,
            stats.abandoned,
            stats.rejected,
            stats.expired,
        );

        RunOutcome { companies, stats }
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}
