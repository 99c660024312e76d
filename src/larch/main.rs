// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use chrono::NaiveDate;
use clap::Parser;
use larch::caches::LarchCaches;
use larch::clock::{Clock, SystemClock};
use larch::config::LarchConfig;
use larch::directory::InMemoryTransitDirectory;
use larch::historical_store::HistoricalStore;
use larch::postgres_tools::{
    PostgresHistoricalStore, PostgresVehicleConfigSource, database_url_for_env, make_async_pool,
};
use larch::service_time::service_date;
use larch::warm_up::warm_up_caches;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// RON file with cache settings. Defaults apply when absent.
    #[arg(long, env = "LARCH_CONFIG")]
    config: Option<PathBuf>,
    /// RON export of routes and stops used to resolve queries.
    #[arg(long, env = "LARCH_DIRECTORY")]
    directory: Option<PathBuf>,
    /// Number of service days to load, overriding `warm_up_days`.
    #[arg(long)]
    days: Option<u32>,
    /// Last service day to load, as YYYY-MM-DD. Defaults to today in the
    /// agency timezone.
    #[arg(long)]
    end_date: Option<NaiveDate>,
    /// Concurrent warm-up tasks, overriding `parallel_threads`.
    #[arg(long)]
    threads: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let mut config = LarchConfig::load(args.config.as_deref())?;
    if let Some(threads) = args.threads {
        config.parallel_threads = Some(threads);
    }
    let days = args.days.unwrap_or(config.warm_up_days);
    let threads = config.parallel_thread_count();

    let directory = match &args.directory {
        Some(path) => InMemoryTransitDirectory::from_ron_file(path)?,
        None => {
            warn!("No directory given, route and stop lookups will miss");
            InMemoryTransitDirectory::new()
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let end_date = args
        .end_date
        .unwrap_or_else(|| service_date(config.agency_timezone, clock.now_ms()));

    info!("Connecting to postgres");
    let pool = Arc::new(make_async_pool(&database_url_for_env()?).await?);
    let store: Arc<dyn HistoricalStore> = Arc::new(PostgresHistoricalStore::new(Arc::clone(&pool)));
    let vehicle_config_source = Arc::new(PostgresVehicleConfigSource::new(Arc::clone(&pool)));

    let caches = Arc::new(LarchCaches::new(
        config,
        directory.into_shared(),
        clock,
        vehicle_config_source,
    ));

    let vehicle_configs = caches.vehicle_configs.get_vehicle_configs().await;
    info!("Read {} vehicle configs", vehicle_configs.len());

    let report = warm_up_caches(Arc::clone(&caches), store, end_date, days, threads).await;

    for outcome in &report.failed {
        error!(
            "Warm-up task {} ({}) failed: {:?}",
            outcome.task_number, outcome.description, outcome.status
        );
    }

    info!("Caches after warm-up: {}", caches.summary());

    Ok(())
}
