mod config;
mod models;
mod pipeline;
mod progress;
mod scraper;
mod storage;
mod utils;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::AppConfig;
use crate::models::calendar_date;
use crate::pipeline::{Coordinator, RunOutcome};
use crate::scraper::EtoroScraper;
use crate::storage::{summarize, CacheStore};

#[derive(Parser)]
#[command(name = "divcal", about = "Dividend calendar scraper with a local cache", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scheduled run: update the cache if one exists, extract from scratch otherwise
    Run,

    /// Rebuild the cache from scratch, keeping favourites of companies still listed
    Extract,

    /// Incrementally update the cache (expire, keep priced, enrich the rest)
    Update,

    /// Show cache statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "divcal=info,warn",
        1 => "divcal=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;
    let store = CacheStore::new(&config.storage.cache_path);

    match cli.command {
        Command::Run | Command::Extract | Command::Update => {
            let source = Arc::new(
                EtoroScraper::new(&config.scraper).context("Failed to build scraper")?,
            );
            let coordinator = Coordinator::new(source, store, &config.pipeline);

            let _t = utils::Timer::start("Dividend calendar refresh");
            let outcome = match cli.command {
                Command::Extract => coordinator.run_cold_extract().await,
                Command::Update => coordinator.run_warm_update().await,
                _ => coordinator.run().await,
            };
            report(&outcome);
        }

        Command::Stats => {
            let companies = store.load()?;
            let s = summarize(&companies, Local::now().date_naive());
            println!("─────────────────────────────────");
            println!("  Dividend cache: {}", store.path().display());
            println!("─────────────────────────────────");
            println!("  Companies  : {}", s.entries);
            println!("  Priced     : {}", s.enriched);
            println!("  New        : {}", s.new);
            println!("  Favourites : {}", s.favourites);
            println!(
                "  Next paid  : {}",
                s.next_dividend
                    .map(|d| d.format(calendar_date::FORMAT).to_string())
                    .unwrap_or("—".into())
            );
            println!("─────────────────────────────────");
        }
    }

    Ok(())
}

fn report(outcome: &RunOutcome) {
    let s = &outcome.stats;
    info!(
        "Done ({}): {} companies cached, {} newly priced, {} left unpriced{}",
        s.mode,
        outcome.companies.len(),
        s.enriched,
        s.failed + s.abandoned,
        if s.saved { "" } else { " (cache NOT saved)" },
    );
}
