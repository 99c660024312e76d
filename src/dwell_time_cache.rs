// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Dwell time models per stop path, conditioned on headway.
//!
//! Samples come from departures: the matching arrival of the same vehicle
//! gives the dwell, the latest earlier arrival of another vehicle on
//! another trip at the same stop gives the headway.

use crate::arrival_departure::ArrivalDeparture;
use crate::arrival_departure_history::StopArrivalDepartureCache;
use crate::backing_store::{BackingStore, BackingStoreKind};
use crate::cache_keys::StopPathCacheKey;
use crate::config::DwellModelConfig;
use crate::error::LarchResult;
use crate::historical_store::HistoricalStore;
use crate::statistics::HistoricalAverage;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headway {
    pub headway_ms: u64,
    pub trip_id: CompactString,
    pub vehicle_id: CompactString,
    pub other_vehicle_id: Option<CompactString>,
}

/// Overall average dwell plus one average per headway band.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DwellTimeModel {
    overall: HistoricalAverage,
    by_headway_band: BTreeMap<u64, HistoricalAverage>,
}

impl DwellTimeModel {
    fn band_of(headway_ms: u64, band_ms: u64) -> u64 {
        headway_ms / band_ms.max(1)
    }

    pub fn put_sample(&mut self, dwell_ms: u64, headway_ms: u64, band_ms: u64) {
        self.overall.update(dwell_ms as f64);
        self.by_headway_band
            .entry(Self::band_of(headway_ms, band_ms))
            .or_default()
            .update(dwell_ms as f64);
    }

    pub fn predict(&self, headway_ms: u64, band_ms: u64) -> Option<f64> {
        self.by_headway_band
            .get(&Self::band_of(headway_ms, band_ms))
            .and_then(HistoricalAverage::average)
            .or_else(|| self.overall.average())
    }

    pub fn sample_count(&self) -> u64 {
        self.overall.count()
    }
}

/// Why a departure did or did not become a dwell sample.
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DwellSampleOutcome {
    Added,
    NotDeparture,
    NoArrival,
    NoPreviousArrival,
    ScheduleAdherenceOutOfBounds(i64),
    WaitOrLayoverStop,
    DwellOutOfRange(i64),
    HeadwayOutOfRange(i64),
}

pub struct DwellTimeModelCache {
    store: Arc<dyn BackingStore<StopPathCacheKey, DwellTimeModel>>,
    stop_history: Arc<StopArrivalDepartureCache>,
    config: DwellModelConfig,
}

impl DwellTimeModelCache {
    pub fn new(
        kind: BackingStoreKind,
        config: DwellModelConfig,
        stop_history: Arc<StopArrivalDepartureCache>,
    ) -> Self {
        Self {
            store: kind.build(),
            stop_history,
            config,
        }
    }

    pub fn add_sample(&self, event: &ArrivalDeparture, headway: &Headway, dwell_ms: u64) {
        let key = StopPathCacheKey::new(headway.trip_id.clone(), event.stop_path_index, false);
        let band_ms = self.config.headway_band_ms;

        self.store.compute(key, &mut |current| match current {
            Some(model) => {
                model.put_sample(dwell_ms, headway.headway_ms, band_ms);
                None
            }
            None => {
                let mut model = DwellTimeModel::default();
                model.put_sample(dwell_ms, headway.headway_ms, band_ms);
                Some(model)
            }
        });
    }

    pub fn add_departure(&self, departure: &ArrivalDeparture) -> DwellSampleOutcome {
        if !departure.is_departure() {
            return DwellSampleOutcome::NotDeparture;
        }

        let stop_data = self
            .stop_history
            .stop_history(&self.stop_history.key_for(departure));
        if stop_data.len() < 2 {
            return DwellSampleOutcome::NoArrival;
        }

        let Some(arrival) = stop_data.iter().rev().find(|e| {
            e.is_arrival
                && e.stop_id == departure.stop_id
                && e.vehicle_id == departure.vehicle_id
                && e.trip_id == departure.trip_id
                && e.time_ms <= departure.time_ms
        }) else {
            return DwellSampleOutcome::NoArrival;
        };

        let Some(previous_arrival) = stop_data.iter().rev().find(|e| {
            e.is_arrival
                && e.vehicle_id != arrival.vehicle_id
                && e.trip_id != arrival.trip_id
                && e.stop_id == arrival.stop_id
                && e.time_ms < arrival.time_ms
        }) else {
            return DwellSampleOutcome::NoPreviousArrival;
        };

        let headway_ms = arrival.time_ms as i64 - previous_arrival.time_ms as i64;
        let dwell_ms = departure.time_ms as i64 - arrival.time_ms as i64;
        let max_adherence = self.config.max_schedule_adherence_secs;

        if !departure.adherence_within(max_adherence) {
            warn!(
                "Schedule adherence {:?} outside allowable range for {}",
                departure.schedule_adherence_secs, departure
            );
            return DwellSampleOutcome::ScheduleAdherenceOutOfBounds(
                departure.schedule_adherence_secs.unwrap_or_default(),
            );
        }

        if departure.is_wait_stop || departure.is_layover_stop {
            warn!(
                "Wait or layover stop, dwell depends on early or late running, skipping {}",
                departure
            );
            return DwellSampleOutcome::WaitOrLayoverStop;
        }

        if !previous_arrival.adherence_within(max_adherence) {
            warn!(
                "Schedule adherence {:?} of previous arrival outside allowable range",
                previous_arrival.schedule_adherence_secs
            );
            return DwellSampleOutcome::ScheduleAdherenceOutOfBounds(
                previous_arrival.schedule_adherence_secs.unwrap_or_default(),
            );
        }

        if dwell_ms >= self.config.max_dwell_ms as i64 || dwell_ms <= self.config.min_dwell_ms as i64 {
            warn!("Dwell time {} outside allowable range for {}", dwell_ms, departure);
            return DwellSampleOutcome::DwellOutOfRange(dwell_ms);
        }

        if headway_ms >= self.config.max_headway_ms as i64
            || headway_ms <= self.config.min_headway_ms as i64
        {
            warn!("Headway {} outside allowable range for {}", headway_ms, departure);
            return DwellSampleOutcome::HeadwayOutOfRange(headway_ms);
        }

        let headway = Headway {
            headway_ms: headway_ms as u64,
            trip_id: arrival.trip_id.clone(),
            vehicle_id: arrival.vehicle_id.clone(),
            other_vehicle_id: Some(previous_arrival.vehicle_id.clone()),
        };
        self.add_sample(departure, &headway, dwell_ms as u64);
        DwellSampleOutcome::Added
    }

    /// `None` without a headway or without any sample for `key`.
    pub fn predict_dwell_time(&self, key: &StopPathCacheKey, headway: Option<&Headway>) -> Option<Duration> {
        let headway = headway?;
        self.store
            .get(key)?
            .predict(headway.headway_ms, self.config.headway_band_ms)
            .map(|ms| Duration::from_millis(ms.max(0.0).round() as u64))
    }

    pub fn get_model(&self, key: &StopPathCacheKey) -> Option<DwellTimeModel> {
        self.store.get(key)
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

    /// Returns how many departures were accepted as samples.
    pub fn populate_cache_from_records(&self, records: &[ArrivalDeparture]) -> usize {
        records
            .iter()
            .filter(|record| record.is_departure())
            .filter(|record| self.add_departure(record) == DwellSampleOutcome::Added)
            .count()
    }

    pub async fn populate_cache_from_db(
        &self,
        store: &dyn HistoricalStore,
        start_ms: u64,
        end_ms: u64,
    ) -> LarchResult<usize> {
        let records = store.arrivals_departures_between(start_ms, end_ms).await?;
        let added = self.populate_cache_from_records(&records);
        info!(
            "Dwell time models took {} samples out of {} events",
            added,
            records.len()
        );
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrival_departure::test_support::{arrival, departure};
    use chrono_tz::Tz;

    const DAY: u64 = 1_717_200_000_000;

    fn cache() -> (DwellTimeModelCache, Arc<StopArrivalDepartureCache>) {
        let stops = Arc::new(StopArrivalDepartureCache::new(Tz::UTC));
        let cache = DwellTimeModelCache::new(
            BackingStoreKind::Unbounded,
            DwellModelConfig::default(),
            Arc::clone(&stops),
        );
        (cache, stops)
    }

    #[test]
    fn departure_with_leader_becomes_sample() {
        let (cache, stops) = cache();
        // v0 on t0 arrived 5 minutes before v1 on t1
        stops.put_arrival_departure(arrival("v0", "t0", "s1", 4, DAY + 100_000));
        stops.put_arrival_departure(arrival("v1", "t1", "s1", 4, DAY + 400_000));
        let leaving = departure("v1", "t1", "s1", 4, DAY + 430_000);
        stops.put_arrival_departure(leaving.clone());

        assert_eq!(cache.add_departure(&leaving), DwellSampleOutcome::Added);

        let key = StopPathCacheKey::new("t1", 4, false);
        let headway = Headway {
            headway_ms: 300_000,
            trip_id: "t1".into(),
            vehicle_id: "v1".into(),
            other_vehicle_id: None,
        };
        assert_eq!(
            cache.predict_dwell_time(&key, Some(&headway)),
            Some(Duration::from_millis(30_000))
        );
        assert_eq!(cache.predict_dwell_time(&key, None), None);
    }

    #[test]
    fn rejects_out_of_range_and_layover_samples() {
        let (cache, stops) = cache();
        stops.put_arrival_departure(arrival("v0", "t0", "s1", 4, DAY + 100_000));
        stops.put_arrival_departure(arrival("v1", "t1", "s1", 4, DAY + 400_000));

        let too_long = departure("v1", "t1", "s1", 4, DAY + 900_000);
        stops.put_arrival_departure(too_long.clone());
        assert_eq!(cache.add_departure(&too_long), DwellSampleOutcome::DwellOutOfRange(500_000));

        let mut layover = departure("v1", "t1", "s1", 4, DAY + 420_000);
        layover.is_layover_stop = true;
        assert_eq!(cache.add_departure(&layover), DwellSampleOutcome::WaitOrLayoverStop);

        let mut late = departure("v1", "t1", "s1", 4, DAY + 420_000);
        late.schedule_adherence_secs = Some(900);
        assert_eq!(
            cache.add_departure(&late),
            DwellSampleOutcome::ScheduleAdherenceOutOfBounds(900)
        );

        assert!(cache.is_empty());
    }

    #[test]
    fn band_average_preferred_over_overall() {
        let mut model = DwellTimeModel::default();
        model.put_sample(10_000, 120_000, 60_000);
        model.put_sample(50_000, 600_000, 60_000);

        assert_eq!(model.predict(130_000, 60_000), Some(10_000.0));
        assert_eq!(model.predict(610_000, 60_000), Some(50_000.0));
        // no band for 20 minutes, falls back to the overall mean
        assert_eq!(model.predict(1_200_000, 60_000), Some(30_000.0));
        assert_eq!(DwellTimeModel::default().predict(1, 60_000), None);
    }

    #[test]
    fn populate_counts_accepted_departures() {
        let (cache, stops) = cache();
        let records = vec![
            arrival("v0", "t0", "s1", 4, DAY + 100_000),
            departure("v0", "t0", "s1", 4, DAY + 120_000),
            arrival("v1", "t1", "s1", 4, DAY + 400_000),
            departure("v1", "t1", "s1", 4, DAY + 430_000),
        ];
        for record in &records {
            stops.put_arrival_departure(record.clone());
        }

        // v0 has no leader, v1 follows v0
        assert_eq!(cache.populate_cache_from_records(&records), 1);
        assert_eq!(cache.len(), 1);
    }
}
