// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Startup population of the caches from the arrival/departure archive.
//!
//! Work is split into one task per cache family and service day. The
//! history caches go first since the averages and dwell models are derived
//! from them.

use crate::caches::LarchCaches;
use crate::historical_store::HistoricalStore;
use crate::parallel_processor::{ParallelProcessor, ParallelTask, TaskOutcome};
use crate::service_time::start_of_day_ms;
use anyhow::Context;
use chrono::{Days, NaiveDate};
use chrono_tz::Tz;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WarmUpTarget {
    TripHistory,
    StopHistory,
    ScheduleBasedAverages,
    FrequencyBasedAverages,
    DwellTimeModels,
}

impl WarmUpTarget {
    pub const HISTORY: [WarmUpTarget; 2] = [WarmUpTarget::TripHistory, WarmUpTarget::StopHistory];

    pub const MODELS: [WarmUpTarget; 3] = [
        WarmUpTarget::ScheduleBasedAverages,
        WarmUpTarget::FrequencyBasedAverages,
        WarmUpTarget::DwellTimeModels,
    ];
}

impl fmt::Display for WarmUpTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WarmUpTarget::TripHistory => "TripDataHistoryCache",
            WarmUpTarget::StopHistory => "StopArrivalDepartureCache",
            WarmUpTarget::ScheduleBasedAverages => "ScheduleBasedHistoricalAverageCache",
            WarmUpTarget::FrequencyBasedAverages => "FrequencyBasedHistoricalAverageCache",
            WarmUpTarget::DwellTimeModels => "DwellTimeModelCache",
        };
        f.write_str(name)
    }
}

/// Loads `[start_ms, end_ms)` of the archive into one cache family.
pub struct CacheWarmUpTask {
    pub target: WarmUpTarget,
    pub start_ms: u64,
    pub end_ms: u64,
    caches: Arc<LarchCaches>,
    store: Arc<dyn HistoricalStore>,
}

impl CacheWarmUpTask {
    pub fn new(
        target: WarmUpTarget,
        start_ms: u64,
        end_ms: u64,
        caches: Arc<LarchCaches>,
        store: Arc<dyn HistoricalStore>,
    ) -> Self {
        Self {
            target,
            start_ms,
            end_ms,
            caches,
            store,
        }
    }
}

impl ParallelTask for CacheWarmUpTask {
    fn describe(&self) -> String {
        format!("{} {}..{}", self.target, self.start_ms, self.end_ms)
    }

    fn run(self: Box<Self>) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(async move {
            let store = self.store.as_ref();
            let (start, end) = (self.start_ms, self.end_ms);

            let loaded = match self.target {
                WarmUpTarget::TripHistory => {
                    self.caches
                        .trip_history
                        .populate_cache_from_db(store, start, end)
                        .await
                }
                WarmUpTarget::StopHistory => {
                    self.caches
                        .stop_history
                        .populate_cache_from_db(store, start, end)
                        .await
                }
                WarmUpTarget::ScheduleBasedAverages => {
                    self.caches
                        .schedule_averages
                        .populate_cache_from_db(store, start, end)
                        .await
                }
                WarmUpTarget::FrequencyBasedAverages => {
                    self.caches
                        .frequency_averages
                        .populate_cache_from_db(store, start, end)
                        .await
                }
                WarmUpTarget::DwellTimeModels => {
                    self.caches
                        .dwell_models
                        .populate_cache_from_db(store, start, end)
                        .await
                }
            }
            .with_context(|| format!("populating {} between {} and {}", self.target, start, end))?;

            info!("{} took {} records between {} and {}", self.target, loaded, start, end);
            Ok(())
        })
    }
}

/// `[start, end)` epoch milliseconds of each service day from
/// `end_date - days + 1` through `end_date`, oldest first.
pub fn day_ranges(timezone: Tz, end_date: NaiveDate, days: u32) -> Vec<(u64, u64)> {
    (0..days)
        .rev()
        .filter_map(|back| end_date.checked_sub_days(Days::new(back as u64)))
        .filter_map(|date| {
            let next = date.succ_opt()?;
            Some((start_of_day_ms(timezone, date), start_of_day_ms(timezone, next)))
        })
        .collect()
}

#[derive(Clone, Debug, Default)]
pub struct WarmUpReport {
    pub succeeded: Vec<TaskOutcome>,
    pub failed: Vec<TaskOutcome>,
    pub runtime: Duration,
}

impl WarmUpReport {
    fn absorb(&mut self, outcomes: Vec<TaskOutcome>) {
        for outcome in outcomes {
            match outcome.succeeded() {
                true => self.succeeded.push(outcome),
                false => self.failed.push(outcome),
            }
        }
    }

    pub fn task_count(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

async fn run_phase(
    targets: &[WarmUpTarget],
    ranges: &[(u64, u64)],
    threads: usize,
    caches: &Arc<LarchCaches>,
    store: &Arc<dyn HistoricalStore>,
) -> Vec<TaskOutcome> {
    let processor = ParallelProcessor::new(threads);
    for (start_ms, end_ms) in ranges {
        for target in targets {
            processor.enqueue(Box::new(CacheWarmUpTask::new(
                *target,
                *start_ms,
                *end_ms,
                Arc::clone(caches),
                Arc::clone(store),
            )));
        }
    }

    processor.startup();
    processor.wait_until_done().await;
    info!(
        "Warm-up phase for {:?} finished in {} s",
        targets,
        processor.runtime().as_secs()
    );
    processor.outcomes()
}

/// Fills every cache with `days` service days of history ending at
/// `end_date`. Failed tasks are reported, never propagated.
pub async fn warm_up_caches(
    caches: Arc<LarchCaches>,
    store: Arc<dyn HistoricalStore>,
    end_date: NaiveDate,
    days: u32,
    threads: usize,
) -> WarmUpReport {
    let started = Instant::now();
    let ranges = day_ranges(caches.config.agency_timezone, end_date, days);
    info!(
        "Warming caches with {} days ending {} on {} threads",
        ranges.len(),
        end_date,
        threads
    );

    let mut report = WarmUpReport::default();
    report.absorb(run_phase(&WarmUpTarget::HISTORY, &ranges, threads, &caches, &store).await);
    report.absorb(run_phase(&WarmUpTarget::MODELS, &ranges, threads, &caches, &store).await);
    report.runtime = started.elapsed();

    info!(
        "CACHE COMPLETE: {} tasks ({} failed) in {} s",
        report.task_count(),
        report.failed.len(),
        report.runtime.as_secs()
    );
    report
}
