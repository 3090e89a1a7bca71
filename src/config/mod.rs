use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub scraper: ScraperConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
}

/// Scraper configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_calendar_path")]
    pub calendar_path: String,

    #[serde(default = "default_calendar_timeout_secs")]
    pub calendar_timeout_secs: u64,

    #[serde(default = "default_detail_timeout_secs")]
    pub detail_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Size of the enrichment worker pool.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Overall wait for the pool to drain before persisting.
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,

    /// Smoothing factor for the per-item duration estimate.
    #[serde(default = "default_progress_alpha")]
    pub progress_alpha: f64,
}

impl ScraperConfig {
    pub fn calendar_timeout(&self) -> Duration {
        Duration::from_secs(self.calendar_timeout_secs)
    }

    pub fn detail_timeout(&self) -> Duration {
        Duration::from_secs(self.detail_timeout_secs)
    }
}

impl PipelineConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://www.etoro.com".to_string()
}
fn default_calendar_path() -> String {
    "/investing/dividend-calendar/".to_string()
}
fn default_calendar_timeout_secs() -> u64 {
    30
}
fn default_detail_timeout_secs() -> u64 {
    10
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) divcal/0.1".to_string()
}
fn default_cache_path() -> PathBuf {
    PathBuf::from("companies.json")
}
fn default_concurrency() -> usize {
    10
}
fn default_wait_timeout_secs() -> u64 {
    60
}
fn default_progress_alpha() -> f64 {
    0.6
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("DIVCAL").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|_| AppConfig::default());
        Ok(app_cfg)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scraper: ScraperConfig {
                base_url: default_base_url(),
                calendar_path: default_calendar_path(),
                calendar_timeout_secs: default_calendar_timeout_secs(),
                detail_timeout_secs: default_detail_timeout_secs(),
                user_agent: default_user_agent(),
            },
            storage: StorageConfig {
                cache_path: default_cache_path(),
            },
            pipeline: PipelineConfig {
                concurrency: default_concurrency(),
                wait_timeout_secs: default_wait_timeout_secs(),
                progress_alpha: default_progress_alpha(),
            },
        }
    }
}
