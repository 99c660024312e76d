// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Current predictions for every route/stop/destination.
//!
//! Each (route short name, stop) pair owns a list of [`PredictionBucket`]s,
//! one per headsign. A bucket is created once and then only mutated under its
//! own lock, so readers always get a coherent copy of a destination without
//! blocking writers working on other stops.

use crate::cache_keys::{RouteStopDestKey, RouteStopKey};
use crate::clock::Clock;
use crate::config::LarchConfig;
use crate::directory::TransitDirectory;
use crate::error::{LarchError, LarchResult};
use crate::prediction::{BucketIdentity, Prediction, PredictionBucket, RetentionPolicy, RouteStopDestPredictions};
use crate::vehicle_state::VehicleState;
use ahash::{AHashMap, AHashSet};
use compact_str::CompactString;
use scc::HashMap as SccHashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Answers `get_prediction_for_vehicle` from the first few predictions only.
const PREDICTIONS_SEARCHED_FOR_VEHICLE: usize = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PredictionCacheSettings {
    pub ttl_ms: u64,
    pub hold_ms: u64,
    /// Look-ahead used when copying buckets for readers.
    pub max_prediction_time_ms: u64,
    pub terminate_at_trip_end: bool,
    pub return_arrival_prediction_for_end_of_trip: bool,
}

impl From<&LarchConfig> for PredictionCacheSettings {
    fn from(config: &LarchConfig) -> Self {
        Self {
            ttl_ms: config.prediction_ttl().as_millis() as u64,
            hold_ms: config.historical_prediction_hold().as_millis() as u64,
            max_prediction_time_ms: config.max_prediction_time_secs * 1_000,
            terminate_at_trip_end: config.terminate_predictions_at_trip_end,
            return_arrival_prediction_for_end_of_trip: config.return_arrival_prediction_for_end_of_trip,
        }
    }
}

pub struct PredictionDataCache {
    buckets: SccHashMap<RouteStopKey, Vec<Arc<PredictionBucket>>>,
    directory: Arc<dyn TransitDirectory>,
    clock: Arc<dyn Clock>,
    settings: PredictionCacheSettings,
}

impl PredictionDataCache {
    pub fn new(
        directory: Arc<dyn TransitDirectory>,
        clock: Arc<dyn Clock>,
        settings: PredictionCacheSettings,
    ) -> Self {
        Self {
            buckets: SccHashMap::new(),
            directory,
            clock,
            settings,
        }
    }

    fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            now_ms: self.clock.now_ms(),
            ttl_ms: self.settings.ttl_ms,
            hold_ms: self.settings.hold_ms,
        }
    }

    fn identity_for(&self, prediction: &Prediction) -> BucketIdentity {
        let route = self.directory.route_by_id(&prediction.route_id);
        let stop = self.directory.stop_by_id(&prediction.stop_id);

        BucketIdentity {
            route_id: Some(prediction.route_id.clone()),
            route_short_name: prediction.route_short_name.clone(),
            route_name: route.and_then(|r| r.long_name),
            stop_id: prediction.stop_id.clone(),
            stop_name: stop.as_ref().map(|s| s.name.clone()),
            stop_code: stop.and_then(|s| s.code),
            headsign: prediction.headsign.clone(),
            direction_id: prediction.direction_id.clone(),
        }
    }

    /// The one bucket serving the prediction's route, stop and headsign,
    /// created on first use. The route/stop entry stays locked between the
    /// lookup and the insert.
    pub(crate) fn bucket_for(&self, prediction: &Prediction) -> Arc<PredictionBucket> {
        let key = RouteStopKey::new(prediction.route_short_name.clone(), prediction.stop_id.clone());
        let mut destinations = self.buckets.entry(key).or_default();

        if let Some(bucket) = destinations
            .get()
            .iter()
            .find(|b| b.identity().headsign == prediction.headsign)
        {
            return Arc::clone(bucket);
        }

        let bucket = Arc::new(PredictionBucket::new(self.identity_for(prediction)));
        destinations.get_mut().push(Arc::clone(&bucket));
        bucket
    }

    fn existing_bucket(&self, key: &RouteStopDestKey) -> Option<Arc<PredictionBucket>> {
        self.buckets
            .read(&key.route_stop(), |_, destinations| {
                destinations
                    .iter()
                    .find(|b| b.identity().headsign.as_deref() == key.headsign())
                    .cloned()
            })
            .flatten()
    }

    fn buckets_for_route_stop(&self, route_short_name: &str, stop_id: &str) -> Vec<Arc<PredictionBucket>> {
        self.buckets
            .read(&RouteStopKey::new(route_short_name, stop_id), |_, destinations| destinations.clone())
            .unwrap_or_default()
    }

    /// Swaps a vehicle's `old` predictions for `new`. Every destination in
    /// `new` is replaced under its bucket's lock in one step; destinations
    /// only present in `old` lose the old entry unless it is for a stop still
    /// scheduled ahead.
    pub fn update_predictions(&self, old: &[Prediction], new: &[Prediction]) {
        let mut grouped: AHashMap<RouteStopDestKey, Vec<Prediction>> = AHashMap::new();
        for prediction in new {
            grouped
                .entry(prediction.bucket_key())
                .or_default()
                .push(prediction.clone());
        }

        let policy = self.policy();

        for predictions in grouped.values() {
            if let Some(first) = predictions.first() {
                debug!(
                    "Adding predictions for the route/stop/destination: {} {} {:?}",
                    first.route_short_name, first.stop_id, first.headsign
                );
                self.bucket_for(first)
                    .update_predictions_for_vehicle(predictions, &policy);
            }
        }

        for old_prediction in old {
            let key = old_prediction.bucket_key();
            if grouped.contains_key(&key) || policy.retains(old_prediction) {
                continue;
            }
            debug!(
                "Removing prediction vehicle={} stop={} time={}",
                old_prediction.vehicle_id, old_prediction.stop_id, old_prediction.prediction_time_ms
            );
            if let Some(bucket) = self.existing_bucket(&key) {
                bucket.remove_prediction(old_prediction);
            }
        }
    }

    /// For when a vehicle is made unpredictable. Nothing is held back, even
    /// predictions for stops still scheduled ahead.
    pub fn remove_predictions(&self, vehicle_state: &VehicleState) {
        info!("Removing predictions for vehicleId={}", vehicle_state.vehicle_id());
        let destinations: AHashSet<RouteStopDestKey> = vehicle_state
            .predictions
            .iter()
            .map(Prediction::bucket_key)
            .collect();
        for key in &destinations {
            if let Some(bucket) = self.existing_bucket(key) {
                bucket.remove_vehicle(vehicle_state.vehicle_id());
            }
        }
    }

    /// Copies of the predictions for a stop, one entry per destination.
    ///
    /// `route` is a short name or route id; `None` means every route serving
    /// the stop. `stop` is a stop id or a numeric stop code.
    pub fn get_predictions(
        &self,
        route: Option<&str>,
        direction_id: Option<&str>,
        stop: &str,
        max_per_stop: usize,
        distance_to_stop: Option<f64>,
    ) -> LarchResult<Vec<RouteStopDestPredictions>> {
        let route_info = match route {
            Some(route) => Some(
                self.directory
                    .resolve_route(route)
                    .ok_or_else(|| LarchError::InvalidRoute(route.to_string()))?,
            ),
            None => None,
        };
        let stop_info = self
            .directory
            .resolve_stop(stop)
            .ok_or_else(|| LarchError::InvalidStop(stop.to_string()))?;

        let buckets: Vec<Arc<PredictionBucket>> = match &route_info {
            Some(route_info) => self.buckets_for_route_stop(&route_info.short_name, &stop_info.id),
            None => self
                .directory
                .routes_for_stop(&stop_info.id)
                .iter()
                .flat_map(|r| self.buckets_for_route_stop(&r.short_name, &stop_info.id))
                .collect(),
        };

        let policy = self.policy();
        for bucket in &buckets {
            bucket.remove_expired_predictions(&policy);
        }

        let max_time_ms = policy.now_ms + self.settings.max_prediction_time_ms;

        // terminal arrivals are noise next to departures but useful alone
        let (end_of_trip_found, other_found) = buckets
            .iter()
            .map(|b| b.end_of_trip_mix())
            .fold((false, false), |(end, other), (e, o)| (end || e, other || o));
        let suppress_end_of_trip =
            end_of_trip_found && other_found && !self.settings.return_arrival_prediction_for_end_of_trip;

        let mut results: Vec<RouteStopDestPredictions> = buckets
            .iter()
            .filter(|b| {
                direction_id.is_none_or(|d| b.identity().direction_id.as_deref() == Some(d))
            })
            .map(|b| {
                b.snapshot(
                    max_per_stop,
                    max_time_ms,
                    self.settings.terminate_at_trip_end,
                    distance_to_stop,
                )
            })
            .filter(|snapshot| !(suppress_end_of_trip && snapshot.all_end_of_trip()))
            .collect();

        if results.is_empty() {
            if let Some(route_info) = route_info {
                results.push(RouteStopDestPredictions::empty(
                    BucketIdentity {
                        route_id: Some(route_info.id),
                        route_short_name: route_info.short_name,
                        route_name: route_info.long_name,
                        stop_id: stop_info.id,
                        stop_name: Some(stop_info.name),
                        stop_code: stop_info.code,
                        headsign: None,
                        direction_id: direction_id.map(CompactString::from),
                    },
                    distance_to_stop,
                ));
            }
            return Ok(results);
        }

        if results.iter().any(|r| !r.is_empty()) {
            results.retain(|r| !r.is_empty());
        }

        Ok(results)
    }

    /// Concatenated results of [`Self::get_predictions`] for each
    /// `(route, stop)` pair.
    pub fn get_predictions_for_route_stops<R, S>(
        &self,
        route_stops: &[(R, S)],
        max_per_stop: usize,
    ) -> LarchResult<Vec<RouteStopDestPredictions>>
    where
        R: AsRef<str>,
        S: AsRef<str>,
    {
        let mut all = Vec::with_capacity(route_stops.len());
        for (route, stop) in route_stops {
            all.extend(self.get_predictions(Some(route.as_ref()), None, stop.as_ref(), max_per_stop, None)?);
        }
        Ok(all)
    }

    /// First prediction for the vehicle at the route/stop.
    pub fn get_prediction_for_vehicle(
        &self,
        vehicle_id: &str,
        route: &str,
        stop: &str,
    ) -> LarchResult<Option<Prediction>> {
        let destinations = self.get_predictions(
            Some(route),
            None,
            stop,
            PREDICTIONS_SEARCHED_FOR_VEHICLE,
            None,
        )?;

        Ok(destinations
            .into_iter()
            .flat_map(|d| d.predictions)
            .find(|p| p.vehicle_id == vehicle_id))
    }

    /// Every non-empty destination in the system, bounded per destination.
    pub fn get_all_predictions(&self, max_per_stop: usize, max_time_ms: u64) -> Vec<RouteStopDestPredictions> {
        let mut buckets: Vec<Arc<PredictionBucket>> = Vec::with_capacity(self.buckets.len());
        self.buckets
            .scan(|_, destinations| buckets.extend(destinations.iter().cloned()));

        let policy = self.policy();
        buckets
            .iter()
            .filter_map(|bucket| {
                bucket.remove_expired_predictions(&policy);
                let snapshot = bucket.snapshot(max_per_stop, max_time_ms, false, None);
                (!snapshot.is_empty()).then_some(snapshot)
            })
            .collect()
    }

    /// Number of route/stop pairs that have ever had a bucket.
    pub fn route_stop_count(&self) -> usize {
        self.buckets.len()
    }
}
