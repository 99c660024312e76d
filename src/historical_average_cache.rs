// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Historical travel and dwell time averages per stop path.
//!
//! Travel time is measured from the departure at the previous stop path to
//! the arrival, dwell time from the arrival to the departure at the same
//! stop. Both are read out of the [`TripDataHistoryCache`], so it has to be
//! fed before these caches are.

use crate::arrival_departure::ArrivalDeparture;
use crate::arrival_departure_history::TripDataHistoryCache;
use crate::backing_store::{BackingStore, BackingStoreKind};
use crate::cache_keys::{StopPathCacheKey, StopPathKey};
use crate::config::FrequencyCacheConfig;
use crate::error::LarchResult;
use crate::historical_store::HistoricalStore;
use crate::service_time::seconds_from_midnight;
use crate::statistics::HistoricalAverage;
use chrono_tz::Tz;
use scc::HashMap as SccHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Signed milliseconds from `from` to `to`.
fn elapsed_ms(from: &ArrivalDeparture, to: &ArrivalDeparture) -> i64 {
    to.time_ms as i64 - from.time_ms as i64
}

/// Travel time ending at `arrival`, dwell time ending at `departure`.
enum Measured {
    Travel(i64),
    Dwell(i64),
}

fn last_duration(history: &TripDataHistoryCache, event: &ArrivalDeparture) -> Option<Measured> {
    match event.is_arrival {
        true => history
            .find_previous_departure(event)
            .map(|previous| Measured::Travel(elapsed_ms(&previous, event))),
        false => history
            .find_previous_arrival(event)
            .map(|previous| Measured::Dwell(elapsed_ms(&previous, event))),
    }
}

pub struct ScheduleBasedHistoricalAverageCache {
    store: Arc<dyn BackingStore<StopPathCacheKey, HistoricalAverage>>,
    history: Arc<TripDataHistoryCache>,
}

impl ScheduleBasedHistoricalAverageCache {
    pub fn new(kind: BackingStoreKind, history: Arc<TripDataHistoryCache>) -> Self {
        Self {
            store: kind.build(),
            history,
        }
    }

    pub fn get_average(&self, key: &StopPathCacheKey) -> Option<HistoricalAverage> {
        self.store.get(key)
    }

    pub fn put_average(&self, key: StopPathCacheKey, average: HistoricalAverage) {
        self.store.put(key, average);
    }

    /// Folds `value` into the average for `key` while holding the entry.
    pub fn add_observation(&self, key: StopPathCacheKey, value: f64) {
        self.store.compute(key, &mut |current| match current {
            Some(average) => {
                average.update(value);
                None
            }
            None => Some(HistoricalAverage::from_observation(value)),
        });
    }

    pub fn put_arrival_departure(&self, event: &ArrivalDeparture) {
        if event.is_frequency_based() {
            return;
        }

        match last_duration(&self.history, event) {
            Some(Measured::Travel(ms)) if ms > 0 => {
                let key = StopPathCacheKey::new(event.trip_id.clone(), event.stop_path_index, true);
                debug!("Updating historical average for {} with travel {}ms", key, ms);
                self.add_observation(key, ms as f64);
            }
            Some(Measured::Dwell(ms)) if ms > 0 => {
                let key = StopPathCacheKey::new(event.trip_id.clone(), event.stop_path_index, false);
                debug!("Updating historical average for {} with dwell {}ms", key, ms);
                self.add_observation(key, ms as f64);
            }
            _ => {}
        }
    }

    pub fn get_keys(&self) -> Vec<StopPathCacheKey> {
        self.store.keys()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub async fn populate_cache_from_db(
        &self,
        store: &dyn HistoricalStore,
        start_ms: u64,
        end_ms: u64,
    ) -> LarchResult<usize> {
        let events = store.arrivals_departures_between(start_ms, end_ms).await?;
        for event in &events {
            self.put_arrival_departure(event);
        }
        info!(
            "Schedule based averages folded in {} events, {} stop paths cached",
            events.len(),
            self.len()
        );
        Ok(events.len())
    }
}

/// Averages for frequency based trips, bucketed by the agency local time of
/// day of the measured event.
pub struct FrequencyBasedHistoricalAverageCache {
    buckets: SccHashMap<StopPathKey, BTreeMap<u32, HistoricalAverage>>,
    history: Arc<TripDataHistoryCache>,
    config: FrequencyCacheConfig,
    timezone: Tz,
}

impl FrequencyBasedHistoricalAverageCache {
    pub fn new(config: FrequencyCacheConfig, timezone: Tz, history: Arc<TripDataHistoryCache>) -> Self {
        Self {
            buckets: SccHashMap::new(),
            history,
            config,
            timezone,
        }
    }

    fn increment(&self) -> u32 {
        self.config.cache_increments_secs.max(1)
    }

    pub fn bucket_for(&self, seconds_from_midnight: u32) -> u32 {
        let increment = self.increment();
        (seconds_from_midnight / increment) * increment
    }

    /// Needs a start time on `key`. Answers only when exactly one bucket
    /// starts inside `[start_time, start_time + increment)`.
    pub fn get_average(&self, key: &StopPathCacheKey) -> Option<HistoricalAverage> {
        let start = key.start_time()?;
        let end = start.saturating_add(self.increment());

        self.buckets
            .read(&StopPathKey::from(key), |_, by_time| {
                let mut in_range = by_time.range(start..end);
                match (in_range.next(), in_range.next()) {
                    (Some((_, average)), None) => Some(*average),
                    _ => {
                        debug!("No single bucket between {} and {} for {}", start, end, key);
                        None
                    }
                }
            })
            .flatten()
    }

    /// Keys without a start time are ignored.
    pub fn put_average(&self, key: &StopPathCacheKey, average: HistoricalAverage) {
        let Some(start) = key.start_time() else {
            return;
        };
        self.buckets
            .entry(StopPathKey::from(key))
            .or_default()
            .get_mut()
            .insert(start, average);
    }

    fn add_observation(&self, key: &StopPathCacheKey, value: f64) {
        let Some(start) = key.start_time() else {
            return;
        };
        self.buckets
            .entry(StopPathKey::from(key))
            .or_default()
            .get_mut()
            .entry(start)
            .or_default()
            .update(value);
    }

    pub fn put_arrival_departure(&self, event: &ArrivalDeparture) {
        if !event.is_frequency_based() {
            debug!("No start time, not a frequency based trip: {}", event);
            return;
        }
        let bucket = self.bucket_for(seconds_from_midnight(self.timezone, event.time_ms));

        match last_duration(&self.history, event) {
            Some(Measured::Travel(ms)) => {
                if ms > self.config.min_travel_time_ms as i64 && ms < self.config.max_travel_time_ms as i64 {
                    let key = StopPathCacheKey::with_start_time(
                        event.trip_id.clone(),
                        event.stop_path_index,
                        true,
                        bucket,
                    );
                    self.add_observation(&key, ms as f64);
                } else {
                    debug!("Travel time {}ms outside bounds for {}", ms, event);
                }
            }
            Some(Measured::Dwell(ms)) => {
                if ms > self.config.min_dwell_time_ms as i64 && ms < self.config.max_dwell_time_ms as i64 {
                    let key = StopPathCacheKey::with_start_time(
                        event.trip_id.clone(),
                        event.stop_path_index,
                        false,
                        bucket,
                    );
                    self.add_observation(&key, ms as f64);
                } else {
                    debug!("Dwell time {}ms outside bounds for {}", ms, event);
                }
            }
            None => debug!("No previous event to measure against for {}", event),
        }
    }

    pub fn get_keys(&self) -> Vec<StopPathKey> {
        let mut keys = Vec::with_capacity(self.buckets.len());
        self.buckets.scan(|key, _| keys.push(key.clone()));
        keys
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub async fn populate_cache_from_db(
        &self,
        store: &dyn HistoricalStore,
        start_ms: u64,
        end_ms: u64,
    ) -> LarchResult<usize> {
        let events = store.arrivals_departures_between(start_ms, end_ms).await?;
        for event in &events {
            self.put_arrival_departure(event);
        }
        info!(
            "Frequency based averages folded in {} events, {} stop paths cached",
            events.len(),
            self.len()
        );
        Ok(events.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrival_departure::test_support::{arrival, departure};

    const DAY: u64 = 1_717_200_000_000;

    fn history_with_two_runs() -> Arc<TripDataHistoryCache> {
        let history = Arc::new(TripDataHistoryCache::new(Tz::UTC));
        for (offset, travel, dwell) in [(0, 120_000, 20_000), (86_400_000, 180_000, 40_000)] {
            let base = DAY + offset;
            history.put_arrival_departure(departure("v1", "t1", "s0", 0, base));
            history.put_arrival_departure(arrival("v1", "t1", "s1", 1, base + travel));
            history.put_arrival_departure(departure("v1", "t1", "s1", 1, base + travel + dwell));
        }
        history
    }

    #[test]
    fn schedule_based_averages_travel_and_dwell() {
        let history = history_with_two_runs();
        let cache = ScheduleBasedHistoricalAverageCache::new(BackingStoreKind::Unbounded, Arc::clone(&history));

        for key in history.get_keys() {
            for event in history.trip_history(&key) {
                cache.put_arrival_departure(&event);
            }
        }

        let travel = cache.get_average(&StopPathCacheKey::new("t1", 1, true)).unwrap();
        assert_eq!(travel.count(), 2);
        assert_eq!(travel.average(), Some(150_000.0));

        let dwell = cache.get_average(&StopPathCacheKey::new("t1", 1, false)).unwrap();
        assert_eq!(dwell.average(), Some(30_000.0));

        // the first departure has nothing before it
        assert!(cache.get_average(&StopPathCacheKey::new("t1", 0, false)).is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn frequency_lookup_needs_exactly_one_bucket() {
        let history = Arc::new(TripDataHistoryCache::new(Tz::UTC));
        let cache = FrequencyBasedHistoricalAverageCache::new(
            FrequencyCacheConfig {
                cache_increments_secs: 3_600,
                ..FrequencyCacheConfig::default()
            },
            Tz::UTC,
            history,
        );

        assert_eq!(cache.bucket_for(7_250), 7_200);

        cache.put_average(
            &StopPathCacheKey::with_start_time("t9", 3, true, 7_200),
            HistoricalAverage::from_observation(90_000.0),
        );
        let hit = cache
            .get_average(&StopPathCacheKey::with_start_time("t9", 3, true, 7_000))
            .unwrap();
        assert_eq!(hit.average(), Some(90_000.0));

        cache.put_average(
            &StopPathCacheKey::with_start_time("t9", 3, true, 7_500),
            HistoricalAverage::from_observation(10_000.0),
        );
        assert!(cache
            .get_average(&StopPathCacheKey::with_start_time("t9", 3, true, 7_000))
            .is_none());
        assert!(cache.get_average(&StopPathCacheKey::new("t9", 3, true)).is_none());
    }

    #[test]
    fn frequency_events_bucket_by_local_event_time() {
        let history = Arc::new(TripDataHistoryCache::new(Tz::UTC));
        let cache = FrequencyBasedHistoricalAverageCache::new(
            FrequencyCacheConfig::default(),
            Tz::UTC,
            Arc::clone(&history),
        );

        // trip started at 00:50, the arrival happens at 08:21:30
        let mut left = departure("v1", "f1", "s0", 0, DAY + 30_000_000);
        let mut reached = arrival("v1", "f1", "s1", 1, DAY + 30_090_000);
        left.trip_start_time = Some(3_000);
        reached.trip_start_time = Some(3_000);
        history.put_arrival_departure(left);
        history.put_arrival_departure(reached.clone());

        cache.put_arrival_departure(&reached);

        assert_eq!(cache.bucket_for(30_090), 21_600);
        let key = StopPathCacheKey::with_start_time("f1", 1, true, 21_600);
        assert_eq!(cache.get_average(&key).unwrap().average(), Some(90_000.0));
        let trip_start_bucket = StopPathCacheKey::with_start_time("f1", 1, true, 0);
        assert!(cache.get_average(&trip_start_bucket).is_none());
        assert_eq!(cache.get_keys(), vec![StopPathKey::new("f1", 1, true)]);
    }

    #[test]
    fn frequency_buckets_follow_agency_timezone() {
        let history = Arc::new(TripDataHistoryCache::new(chrono_tz::America::Los_Angeles));
        let cache = FrequencyBasedHistoricalAverageCache::new(
            FrequencyCacheConfig::default(),
            chrono_tz::America::Los_Angeles,
            Arc::clone(&history),
        );

        // 08:21:30 UTC is 01:21:30 in Los Angeles during daylight time
        let mut left = departure("v1", "f1", "s0", 0, DAY + 30_000_000);
        let mut reached = arrival("v1", "f1", "s1", 1, DAY + 30_090_000);
        left.trip_start_time = Some(3_000);
        reached.trip_start_time = Some(3_000);
        history.put_arrival_departure(left);
        history.put_arrival_departure(reached.clone());

        cache.put_arrival_departure(&reached);

        let key = StopPathCacheKey::with_start_time("f1", 1, true, 0);
        assert_eq!(cache.get_average(&key).unwrap().average(), Some(90_000.0));
    }
}
