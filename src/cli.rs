//! CLI commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::addresses::read_unique_addresses;
use crate::cache::ResumeCache;
use crate::config::{Settings, StoreKind};
use crate::driver::DriverFactory;
use crate::models::{OutcomeStatus, ProxyRecord};
use crate::orchestrator::Orchestrator;
use crate::proxy;
use crate::store::{DiskStore, RemoteStore, YandexDiskStore};

#[derive(Parser)]
#[command(name = "txharvest")]
#[command(about = "Per-address transaction export harvester")]
#[command(version)]
pub struct Cli {
    /// Settings file (default: ./txharvest.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest transaction exports for every address in a CSV source
    Harvest {
        /// CSV file with an address column
        addresses: PathBuf,
        /// Number of concurrent workers (default: 4)
        #[arg(short, long, default_value = "4")]
        workers: usize,
        /// Newline-delimited proxy candidate file; omit to run unproxied
        #[arg(short, long)]
        proxies: Option<PathBuf>,
    },

    /// Vet a proxy candidate list and print the fastest survivors
    Proxies {
        /// Newline-delimited candidate file
        file: PathBuf,
        /// How many proxies to select
        #[arg(short, long, default_value = "16")]
        count: usize,
    },

    /// Show the resume cache
    Status,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;

    match cli.command {
        Commands::Harvest {
            addresses,
            workers,
            proxies,
        } => harvest(&settings, &addresses, workers, proxies.as_deref()).await,
        Commands::Proxies { file, count } => vet_proxies(&settings, &file, count).await,
        Commands::Status => status(&settings),
    }
}

async fn harvest(
    settings: &Settings,
    source: &std::path::Path,
    workers: usize,
    proxy_file: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    let addresses = read_unique_addresses(source, settings.address_column())
        .with_context(|| format!("reading addresses from {}", source.display()))?;
    anyhow::ensure!(!addresses.is_empty(), "address source contains no addresses");
    println!(
        "{} {} unique addresses",
        style("Harvesting").green().bold(),
        addresses.len()
    );

    // Proxy shortfall is fatal before any worker starts.
    let proxies: Vec<ProxyRecord> = match proxy_file {
        Some(path) => {
            let candidates = proxy::load_candidates(path)
                .with_context(|| format!("reading proxy candidates from {}", path.display()))?;
            let selected =
                proxy::select(&candidates, &settings.proxy.probe_url, settings.proxy.count)
                    .await
                    .context("proxy vetting failed")?;
            println!(
                "{} {} proxies (of {} candidates)",
                style("Vetted").green().bold(),
                selected.len(),
                candidates.len()
            );
            selected
        }
        None => {
            warn!("no proxy list supplied, workers run unproxied");
            Vec::new()
        }
    };

    let cache = Arc::new(ResumeCache::load(&settings.cache_path()).context("loading resume cache")?);
    info!(entries = cache.len(), "resume cache loaded");

    let progress = ProgressBar::new(addresses.len() as u64).with_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} addresses ({eta})",
        )?
        .progress_chars("#>-"),
    );

    let orchestrator = Orchestrator::new(
        build_factory(settings)?,
        build_store(settings)?,
        cache,
        settings.cache_path(),
        settings.site.clone(),
        settings.work_root(),
    )
    .with_progress(progress);

    // The finalize step (cache persist + workspace cleanup) must run on
    // every exit path, including interrupt.
    let result = tokio::select! {
        result = orchestrator.run(addresses, workers, proxies) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupt received, shutting down");
            Err(anyhow::anyhow!("interrupted"))
        }
    };
    orchestrator.finalize()?;
    let outcomes = result?;

    let success = outcomes
        .iter()
        .filter(|o| o.status == OutcomeStatus::Success)
        .count();
    let skipped = outcomes
        .iter()
        .filter(|o| o.status == OutcomeStatus::AlreadyExists)
        .count();
    let failed = outcomes
        .iter()
        .filter(|o| o.status == OutcomeStatus::Failed)
        .count();
    println!(
        "{}: {} succeeded, {} already present, {} failed",
        style("Done").green().bold(),
        success,
        skipped,
        failed
    );
    for outcome in outcomes.iter().filter(|o| o.status == OutcomeStatus::Failed) {
        println!(
            "  {} {} ({} page errors)",
            style("failed").red(),
            outcome.address,
            outcome.errors
        );
    }
    Ok(())
}

async fn vet_proxies(
    settings: &Settings,
    file: &std::path::Path,
    count: usize,
) -> anyhow::Result<()> {
    let candidates = proxy::load_candidates(file)?;
    println!("Probing {} candidates...", candidates.len());
    let selected = proxy::select(&candidates, &settings.proxy.probe_url, count).await?;
    for record in &selected {
        println!("{:>8.0?}  {}", record.latency, record.endpoint);
    }
    Ok(())
}

fn status(settings: &Settings) -> anyhow::Result<()> {
    let cache = ResumeCache::load(&settings.cache_path())?;
    println!(
        "{} {} completed addresses in {}",
        style("Cache").cyan().bold(),
        cache.len(),
        settings.cache_path().display()
    );
    for address in cache.snapshot() {
        println!("  {address}");
    }
    Ok(())
}

fn build_store(settings: &Settings) -> anyhow::Result<Arc<dyn RemoteStore>> {
    match settings.store.kind {
        StoreKind::Local => {
            let root = if settings.store.local_root.is_absolute() {
                settings.store.local_root.clone()
            } else {
                settings.data_dir().join(&settings.store.local_root)
            };
            Ok(Arc::new(DiskStore::new(root)))
        }
        StoreKind::YandexDisk => {
            let token = std::env::var("YADISK_TOKEN")
                .context("YADISK_TOKEN must be set for the yandex_disk store")?;
            Ok(Arc::new(YandexDiskStore::new(token)))
        }
    }
}

#[cfg(feature = "browser")]
fn build_factory(settings: &Settings) -> anyhow::Result<Arc<dyn DriverFactory>> {
    Ok(Arc::new(crate::browser::CdpLauncher::new(
        settings.browser.headless,
        settings.browser.chrome_args.clone(),
    )))
}

#[cfg(not(feature = "browser"))]
fn build_factory(_settings: &Settings) -> anyhow::Result<Arc<dyn DriverFactory>> {
    anyhow::bail!("this build has no browser support; rebuild with the `browser` feature")
}
