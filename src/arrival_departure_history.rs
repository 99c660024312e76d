// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Recent arrivals and departures indexed by trip run and by stop day.
//! Both lists are kept in time order.

use crate::arrival_departure::ArrivalDeparture;
use crate::cache_keys::{StopArrivalDepartureCacheKey, TripKey};
use crate::error::LarchResult;
use crate::historical_store::HistoricalStore;
use crate::service_time;
use chrono::NaiveDate;
use chrono_tz::Tz;
use scc::HashMap as SccHashMap;
use std::hash::Hash;
use tracing::{debug, info};

fn insert_in_time_order<K>(map: &SccHashMap<K, Vec<ArrivalDeparture>>, key: K, event: ArrivalDeparture)
where
    K: Eq + Hash,
{
    match map.entry(key) {
        scc::hash_map::Entry::Occupied(mut oe) => {
            let events = oe.get_mut();
            if events.contains(&event) {
                return;
            }
            let position = events.partition_point(|e| e.time_ms <= event.time_ms);
            events.insert(position, event);
        }
        scc::hash_map::Entry::Vacant(ve) => {
            let _ = ve.insert_entry(vec![event]);
        }
    }
}

fn keys_of<K: Clone + Eq + Hash, V>(map: &SccHashMap<K, V>) -> Vec<K> {
    let mut keys = Vec::with_capacity(map.len());
    map.scan(|key, _| keys.push(key.clone()));
    keys
}

pub struct TripDataHistoryCache {
    trips: SccHashMap<TripKey, Vec<ArrivalDeparture>>,
    timezone: Tz,
}

impl TripDataHistoryCache {
    pub fn new(timezone: Tz) -> Self {
        Self {
            trips: SccHashMap::new(),
            timezone,
        }
    }

    pub fn trip_key_for(&self, event: &ArrivalDeparture) -> TripKey {
        TripKey::new(
            event.trip_id.clone(),
            service_time::service_date(self.timezone, event.time_ms),
            event.trip_start_time,
        )
    }

    pub fn put_arrival_departure(&self, event: ArrivalDeparture) -> TripKey {
        debug!("Putting {} in trip history", event);
        let key = self.trip_key_for(&event);
        insert_in_time_order(&self.trips, key.clone(), event);
        key
    }

    pub fn trip_history(&self, key: &TripKey) -> Vec<ArrivalDeparture> {
        self.trips
            .read(key, |_, events| events.clone())
            .unwrap_or_default()
    }

    /// Departure of the same vehicle from the stop path before the one
    /// `arrival` reached.
    pub fn find_previous_departure(&self, arrival: &ArrivalDeparture) -> Option<ArrivalDeparture> {
        if !arrival.is_arrival || arrival.stop_path_index == 0 {
            return None;
        }
        let wanted_index = arrival.stop_path_index - 1;

        self.trips
            .read(&self.trip_key_for(arrival), |_, events| {
                events
                    .iter()
                    .rev()
                    .find(|e| {
                        e.is_departure()
                            && e.stop_path_index == wanted_index
                            && e.vehicle_id == arrival.vehicle_id
                            && e.time_ms <= arrival.time_ms
                    })
                    .cloned()
            })
            .flatten()
    }

    /// Arrival of the same vehicle at the stop `departure` left from.
    pub fn find_previous_arrival(&self, departure: &ArrivalDeparture) -> Option<ArrivalDeparture> {
        if !departure.is_departure() {
            return None;
        }

        self.trips
            .read(&self.trip_key_for(departure), |_, events| {
                events
                    .iter()
                    .rev()
                    .find(|e| {
                        e.is_arrival
                            && e.stop_id == departure.stop_id
                            && e.stop_path_index == departure.stop_path_index
                            && e.vehicle_id == departure.vehicle_id
                            && e.time_ms <= departure.time_ms
                    })
                    .cloned()
            })
            .flatten()
    }

    pub fn get_keys(&self) -> Vec<TripKey> {
        keys_of(&self.trips)
    }

    pub fn len(&self) -> usize {
        self.trips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trips.is_empty()
    }

    pub async fn populate_cache_from_db(
        &self,
        store: &dyn HistoricalStore,
        start_ms: u64,
        end_ms: u64,
    ) -> LarchResult<usize> {
        let events = store.arrivals_departures_between(start_ms, end_ms).await?;
        let count = events.len();
        for event in events {
            self.put_arrival_departure(event);
        }
        info!(
            "Trip history loaded {} events between {} and {}",
            count, start_ms, end_ms
        );
        Ok(count)
    }
}

pub struct StopArrivalDepartureCache {
    stops: SccHashMap<StopArrivalDepartureCacheKey, Vec<ArrivalDeparture>>,
    timezone: Tz,
}

impl StopArrivalDepartureCache {
    pub fn new(timezone: Tz) -> Self {
        Self {
            stops: SccHashMap::new(),
            timezone,
        }
    }

    pub fn key_for(&self, event: &ArrivalDeparture) -> StopArrivalDepartureCacheKey {
        StopArrivalDepartureCacheKey::new(
            event.stop_id.clone(),
            service_time::service_date(self.timezone, event.time_ms),
        )
    }

    pub fn put_arrival_departure(&self, event: ArrivalDeparture) -> StopArrivalDepartureCacheKey {
        let key = self.key_for(&event);
        insert_in_time_order(&self.stops, key.clone(), event);
        key
    }

    pub fn stop_history(&self, key: &StopArrivalDepartureCacheKey) -> Vec<ArrivalDeparture> {
        self.stops
            .read(key, |_, events| events.clone())
            .unwrap_or_default()
    }

    pub fn stop_history_on(&self, stop_id: &str, service_date: NaiveDate) -> Vec<ArrivalDeparture> {
        self.stop_history(&StopArrivalDepartureCacheKey::new(stop_id, service_date))
    }

    pub fn get_keys(&self) -> Vec<StopArrivalDepartureCacheKey> {
        keys_of(&self.stops)
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    pub async fn populate_cache_from_db(
        &self,
        store: &dyn HistoricalStore,
        start_ms: u64,
        end_ms: u64,
    ) -> LarchResult<usize> {
        let events = store.arrivals_departures_between(start_ms, end_ms).await?;
        let count = events.len();
        for event in events {
            self.put_arrival_departure(event);
        }
        info!(
            "Stop history loaded {} events between {} and {}",
            count, start_ms, end_ms
        );
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrival_departure::test_support::{arrival, departure};
    use crate::historical_store::InMemoryHistoricalStore;

    const DAY: u64 = 1_717_200_000_000; // 2024-06-01 00:00 UTC

    #[test]
    fn trip_history_is_time_ordered_and_deduplicated() {
        let cache = TripDataHistoryCache::new(Tz::UTC);
        let late = departure("v1", "t1", "s1", 1, DAY + 2_000);
        let early = arrival("v1", "t1", "s1", 1, DAY + 1_000);

        let key = cache.put_arrival_departure(late.clone());
        cache.put_arrival_departure(early.clone());
        cache.put_arrival_departure(late.clone());

        assert_eq!(cache.trip_history(&key), vec![early, late]);
        assert_eq!(cache.get_keys(), vec![key]);
    }

    #[test]
    fn finds_previous_departure_and_arrival() {
        let cache = TripDataHistoryCache::new(Tz::UTC);
        let left_first_stop = departure("v1", "t1", "s0", 0, DAY + 60_000);
        let reached_second = arrival("v1", "t1", "s1", 1, DAY + 180_000);
        let left_second = departure("v1", "t1", "s1", 1, DAY + 200_000);

        cache.put_arrival_departure(departure("v2", "t1", "s0", 0, DAY + 90_000));
        cache.put_arrival_departure(left_first_stop.clone());
        cache.put_arrival_departure(reached_second.clone());
        cache.put_arrival_departure(left_second.clone());

        assert_eq!(cache.find_previous_departure(&reached_second), Some(left_first_stop));
        assert_eq!(cache.find_previous_arrival(&left_second), Some(reached_second.clone()));
        assert_eq!(cache.find_previous_departure(&left_second), None);
        assert_eq!(cache.find_previous_arrival(&reached_second), None);
    }

    #[tokio::test]
    async fn stop_history_groups_by_stop_and_day() {
        let store = InMemoryHistoricalStore::new(vec![
            arrival("v1", "t1", "s1", 1, DAY + 1_000),
            arrival("v2", "t2", "s1", 1, DAY + 5_000),
            arrival("v3", "t3", "s1", 1, DAY + 86_400_000 + 1_000),
            arrival("v1", "t1", "s2", 2, DAY + 9_000),
        ]);
        let cache = StopArrivalDepartureCache::new(Tz::UTC);

        let loaded = cache
            .populate_cache_from_db(&store, DAY, DAY + 2 * 86_400_000)
            .await
            .unwrap();
        assert_eq!(loaded, 4);
        assert_eq!(cache.len(), 3);

        let first_day = service_time::service_date(Tz::UTC, DAY);
        let vehicles: Vec<String> = cache
            .stop_history_on("s1", first_day)
            .iter()
            .map(|e| e.vehicle_id.to_string())
            .collect();
        assert_eq!(vehicles, vec!["v1", "v2"]);
    }
}
