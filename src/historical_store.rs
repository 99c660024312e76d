// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Read side of the arrival/departure archive used to warm the caches.
//! The Postgres implementation lives in [`crate::postgres_tools`].

use crate::arrival_departure::ArrivalDeparture;
use crate::error::LarchResult;
use futures::future::BoxFuture;
use std::sync::RwLock;

pub trait HistoricalStore: Send + Sync {
    /// Events with `start_ms <= time < end_ms`, ordered by time.
    fn arrivals_departures_between(
        &self,
        start_ms: u64,
        end_ms: u64,
    ) -> BoxFuture<'_, LarchResult<Vec<ArrivalDeparture>>>;
}

#[derive(Debug, Default)]
pub struct InMemoryHistoricalStore {
    events: RwLock<Vec<ArrivalDeparture>>,
}

impl InMemoryHistoricalStore {
    pub fn new(mut events: Vec<ArrivalDeparture>) -> Self {
        events.sort_by_key(|e| e.time_ms);
        Self {
            events: RwLock::new(events),
        }
    }

    pub fn push(&self, event: ArrivalDeparture) {
        let mut events = self
            .events
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let position = events.partition_point(|e| e.time_ms <= event.time_ms);
        events.insert(position, event);
    }
}

impl HistoricalStore for InMemoryHistoricalStore {
    fn arrivals_departures_between(
        &self,
        start_ms: u64,
        end_ms: u64,
    ) -> BoxFuture<'_, LarchResult<Vec<ArrivalDeparture>>> {
        Box::pin(async move {
            let events = self
                .events
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            Ok(events
                .iter()
                .filter(|e| e.time_ms >= start_ms && e.time_ms < end_ms)
                .cloned()
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrival_departure::test_support::arrival;

    #[tokio::test]
    async fn range_is_half_open_and_sorted() {
        let store = InMemoryHistoricalStore::new(vec![
            arrival("v1", "t1", "s1", 1, 300),
            arrival("v1", "t1", "s0", 0, 100),
        ]);
        store.push(arrival("v1", "t1", "s2", 2, 200));

        let events = store.arrivals_departures_between(100, 300).await.unwrap();
        let times: Vec<u64> = events.iter().map(|e| e.time_ms).collect();
        assert_eq!(times, vec![100, 200]);
    }
}
