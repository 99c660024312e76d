// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Prediction values and the per route/stop/destination bucket that serves
//! them.

use crate::cache_keys::RouteStopDestKey;
use crate::lock_unpoisoned;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PredictionSource {
    /// Generated from live AVL data.
    RealTime,
    /// Generated from the schedule for a trip with no vehicle yet.
    ScheduleBased,
    /// Carried over from an earlier prediction run.
    Historical,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub vehicle_id: CompactString,
    pub trip_id: CompactString,
    pub block_id: Option<CompactString>,
    pub route_id: CompactString,
    pub route_short_name: CompactString,
    pub direction_id: Option<CompactString>,
    pub headsign: Option<CompactString>,
    pub stop_id: CompactString,
    pub stop_path_index: u32,
    /// Epoch milliseconds.
    pub prediction_time_ms: u64,
    pub scheduled_time_ms: Option<u64>,
    pub avl_time_ms: u64,
    pub creation_time_ms: u64,
    pub is_arrival: bool,
    /// Arrival at the last stop of the trip.
    pub at_end_of_trip: bool,
    pub affected_by_wait_stop: bool,
    pub is_delayed: bool,
    pub trip_start_time: Option<u32>,
    pub source: PredictionSource,
}

impl Prediction {
    pub fn bucket_key(&self) -> RouteStopDestKey {
        RouteStopDestKey::new(
            self.route_short_name.clone(),
            self.stop_id.clone(),
            self.headsign.as_deref(),
        )
    }

    /// Falls back to the predicted time when the stop has no schedule.
    pub fn effective_scheduled_time_ms(&self) -> u64 {
        self.scheduled_time_ms.unwrap_or(self.prediction_time_ms)
    }

    pub fn is_expired(&self, now_ms: u64, ttl_ms: u64) -> bool {
        self.prediction_time_ms.saturating_add(ttl_ms) < now_ms
    }
}

/// An old prediction is held on to while the stop it was made for is
/// still scheduled ahead of `now_ms`, for at most `hold_ms`.
pub fn is_historical_prediction_for_future_stop(prediction: &Prediction, now_ms: u64, hold_ms: u64) -> bool {
    let scheduled = prediction.effective_scheduled_time_ms();
    scheduled > now_ms && scheduled - now_ms <= hold_ms
}

/// Settings that decide whether a prediction may leave a bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub now_ms: u64,
    pub ttl_ms: u64,
    pub hold_ms: u64,
}

impl RetentionPolicy {
    pub fn retains(&self, prediction: &Prediction) -> bool {
        is_historical_prediction_for_future_stop(prediction, self.now_ms, self.hold_ms)
    }

    pub fn expired(&self, prediction: &Prediction) -> bool {
        prediction.is_expired(self.now_ms, self.ttl_ms) && !self.retains(prediction)
    }
}

fn insert_in_time_order(predictions: &mut Vec<Prediction>, prediction: Prediction) {
    let position = predictions.partition_point(|p| p.prediction_time_ms <= prediction.prediction_time_ms);
    predictions.insert(position, prediction);
}

/// Who a bucket serves. Fixed when the bucket is created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BucketIdentity {
    pub route_id: Option<CompactString>,
    pub route_short_name: CompactString,
    pub route_name: Option<CompactString>,
    pub stop_id: CompactString,
    pub stop_name: Option<CompactString>,
    pub stop_code: Option<u32>,
    pub headsign: Option<CompactString>,
    pub direction_id: Option<CompactString>,
}

/// Current predictions for one route/stop/destination, ordered by
/// prediction time. Every access goes through the bucket's own lock.
#[derive(Debug)]
pub struct PredictionBucket {
    identity: Arc<BucketIdentity>,
    predictions: Mutex<Vec<Prediction>>,
}

impl PredictionBucket {
    pub fn new(identity: BucketIdentity) -> Self {
        Self {
            identity: Arc::new(identity),
            predictions: Mutex::new(Vec::with_capacity(5)),
        }
    }

    pub fn identity(&self) -> &BucketIdentity {
        &self.identity
    }

    /// Replaces the entries of the vehicle owning `new_predictions` and drops
    /// expired entries of any vehicle on the way. Old entries of the vehicle
    /// that the policy retains survive, at most one per trip stop visit (the
    /// most recently created).
    pub fn update_predictions_for_vehicle(&self, new_predictions: &[Prediction], policy: &RetentionPolicy) {
        let Some(first) = new_predictions.first() else {
            return;
        };
        let vehicle_id = &first.vehicle_id;

        let mut predictions = lock_unpoisoned(&self.predictions);
        let mut held: Vec<Prediction> = Vec::new();
        predictions.retain(|current| {
            if current.vehicle_id == *vehicle_id {
                if policy.retains(current) && !new_predictions.contains(current) {
                    held.push(current.clone());
                }
                false
            } else {
                !policy.expired(current)
            }
        });

        held.sort_by(|a, b| b.creation_time_ms.cmp(&a.creation_time_ms));
        let mut visits: Vec<(&str, u32, Option<u32>)> = Vec::with_capacity(held.len());
        for prediction in &held {
            let visit = (
                prediction.trip_id.as_str(),
                prediction.stop_path_index,
                prediction.trip_start_time,
            );
            if visits.contains(&visit) {
                continue;
            }
            visits.push(visit);
            insert_in_time_order(&mut predictions, prediction.clone());
        }

        for prediction in new_predictions {
            insert_in_time_order(&mut predictions, prediction.clone());
        }
    }

    pub fn remove_prediction(&self, old: &Prediction) {
        let mut predictions = lock_unpoisoned(&self.predictions);
        if let Some(position) = predictions.iter().position(|p| p == old) {
            predictions.remove(position);
        }
    }

    /// Drops every entry of the vehicle, held ones included.
    pub fn remove_vehicle(&self, vehicle_id: &str) {
        lock_unpoisoned(&self.predictions).retain(|p| p.vehicle_id != vehicle_id);
    }

    pub fn remove_expired_predictions(&self, policy: &RetentionPolicy) {
        lock_unpoisoned(&self.predictions).retain(|p| !policy.expired(p));
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.predictions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(has end of trip, has other)` over the current predictions.
    pub fn end_of_trip_mix(&self) -> (bool, bool) {
        let predictions = lock_unpoisoned(&self.predictions);
        let end = predictions.iter().any(|p| p.at_end_of_trip);
        let other = predictions.iter().any(|p| !p.at_end_of_trip);
        (end, other)
    }

    /// Copies at most `max_per_stop` predictions, stopping at the first one
    /// past `max_time_ms` unless `terminate_at_trip_end` is set.
    pub fn snapshot(
        &self,
        max_per_stop: usize,
        max_time_ms: u64,
        terminate_at_trip_end: bool,
        distance_to_stop: Option<f64>,
    ) -> RouteStopDestPredictions {
        let predictions = lock_unpoisoned(&self.predictions)
            .iter()
            .take(max_per_stop)
            .take_while(|p| terminate_at_trip_end || p.prediction_time_ms <= max_time_ms)
            .cloned()
            .collect();

        RouteStopDestPredictions {
            identity: Arc::clone(&self.identity),
            distance_to_stop,
            predictions,
        }
    }
}

/// Detached copy of a bucket handed to readers.
#[derive(Clone, Debug, PartialEq)]
pub struct RouteStopDestPredictions {
    pub identity: Arc<BucketIdentity>,
    pub distance_to_stop: Option<f64>,
    pub predictions: Vec<Prediction>,
}

impl RouteStopDestPredictions {
    pub fn empty(identity: BucketIdentity, distance_to_stop: Option<f64>) -> Self {
        Self {
            identity: Arc::new(identity),
            distance_to_stop,
            predictions: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    pub fn all_end_of_trip(&self) -> bool {
        !self.predictions.is_empty() && self.predictions.iter().all(|p| p.at_end_of_trip)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn prediction(vehicle_id: &str, stop_id: &str, prediction_time_ms: u64) -> Prediction {
        Prediction {
            vehicle_id: vehicle_id.into(),
            trip_id: format!("trip-{}", vehicle_id).into(),
            block_id: None,
            route_id: "r38".into(),
            route_short_name: "38".into(),
            direction_id: Some("0".into()),
            headsign: Some("Ocean Beach".into()),
            stop_id: stop_id.into(),
            stop_path_index: 3,
            prediction_time_ms,
            scheduled_time_ms: None,
            avl_time_ms: 0,
            creation_time_ms: 0,
            is_arrival: false,
            at_end_of_trip: false,
            affected_by_wait_stop: false,
            is_delayed: false,
            trip_start_time: None,
            source: PredictionSource::RealTime,
        }
    }

    pub fn identity() -> BucketIdentity {
        BucketIdentity {
            route_id: Some("r38".into()),
            route_short_name: "38".into(),
            route_name: Some("Geary".into()),
            stop_id: "s100".into(),
            stop_name: None,
            stop_code: None,
            headsign: Some("Ocean Beach".into()),
            direction_id: Some("0".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{identity, prediction};
    use super::*;

    fn policy(now_ms: u64) -> RetentionPolicy {
        RetentionPolicy {
            now_ms,
            ttl_ms: 0,
            hold_ms: 3_600_000,
        }
    }

    fn no_hold(now_ms: u64) -> RetentionPolicy {
        RetentionPolicy {
            hold_ms: 0,
            ..policy(now_ms)
        }
    }

    #[test]
    fn update_replaces_vehicle_entries_in_time_order() {
        let bucket = PredictionBucket::new(identity());
        bucket.update_predictions_for_vehicle(&[prediction("v1", "s100", 500)], &no_hold(10));
        bucket.update_predictions_for_vehicle(&[prediction("v2", "s100", 300)], &no_hold(10));
        bucket.update_predictions_for_vehicle(&[prediction("v1", "s100", 400)], &no_hold(10));

        let snapshot = bucket.snapshot(10, u64::MAX, false, None);
        let order: Vec<(&str, u64)> = snapshot
            .predictions
            .iter()
            .map(|p| (p.vehicle_id.as_str(), p.prediction_time_ms))
            .collect();
        assert_eq!(order, vec![("v2", 300), ("v1", 400)]);
    }

    #[test]
    fn held_entries_collapse_to_one_per_visit() {
        let bucket = PredictionBucket::new(identity());
        for (round, time) in [(1, 400), (2, 380), (3, 360)] {
            let mut update = prediction("v1", "s100", time);
            update.creation_time_ms = round;
            bucket.update_predictions_for_vehicle(&[update], &policy(10));
        }

        let times: Vec<u64> = bucket
            .snapshot(10, u64::MAX, false, None)
            .predictions
            .iter()
            .map(|p| p.prediction_time_ms)
            .collect();
        // the newest update plus the freshest held estimate
        assert_eq!(times, vec![360, 380]);
    }

    #[test]
    fn expiry_keeps_future_scheduled_entries() {
        let bucket = PredictionBucket::new(identity());
        let mut held = prediction("v1", "s100", 100);
        held.scheduled_time_ms = Some(1_000);
        bucket.update_predictions_for_vehicle(&[held], &policy(0));
        bucket.update_predictions_for_vehicle(&[prediction("v2", "s100", 150)], &policy(0));

        bucket.remove_expired_predictions(&policy(500));
        assert_eq!(bucket.len(), 1);

        bucket.remove_expired_predictions(&policy(1_001));
        assert!(bucket.is_empty());
    }

    #[test]
    fn snapshot_is_bounded_and_detached() {
        let bucket = PredictionBucket::new(identity());
        let batch: Vec<Prediction> = (1..=4).map(|i| prediction("v1", "s100", i * 100)).collect();
        bucket.update_predictions_for_vehicle(&batch, &policy(0));

        assert_eq!(bucket.snapshot(3, u64::MAX, false, None).predictions.len(), 3);
        assert_eq!(bucket.snapshot(10, 250, false, None).predictions.len(), 2);
        assert_eq!(bucket.snapshot(10, 250, true, None).predictions.len(), 4);

        let detached = bucket.snapshot(10, u64::MAX, false, Some(42.0));
        bucket.remove_prediction(&batch[0]);
        assert_eq!(detached.predictions.len(), 4);
        assert_eq!(detached.distance_to_stop, Some(42.0));
        assert_eq!(bucket.len(), 3);
    }

    #[test]
    fn retention_window() {
        let mut p = prediction("v1", "s100", 100);
        assert!(is_historical_prediction_for_future_stop(&p, 90, 60_000));
        assert!(!is_historical_prediction_for_future_stop(&p, 120, 60_000));
        p.scheduled_time_ms = Some(10_000_000);
        assert!(!is_historical_prediction_for_future_stop(&p, 90, 60_000));
    }
}
