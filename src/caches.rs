// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Every cache of the serving core, built once from a [`LarchConfig`] and
//! handed to the ingestion and query layers as `Arc`s.

use crate::arrival_departure::ArrivalDeparture;
use crate::arrival_departure_history::{StopArrivalDepartureCache, TripDataHistoryCache};
use crate::clock::Clock;
use crate::config::LarchConfig;
use crate::directory::TransitDirectory;
use crate::dwell_time_cache::{DwellSampleOutcome, DwellTimeModelCache};
use crate::historical_average_cache::{FrequencyBasedHistoricalAverageCache, ScheduleBasedHistoricalAverageCache};
use crate::kalman_error_cache::ErrorCache;
use crate::lock_unpoisoned;
use crate::prediction::Prediction;
use crate::prediction_data_cache::{PredictionCacheSettings, PredictionDataCache};
use crate::vehicle_config::{VehicleConfigCache, VehicleConfigSource};
use crate::vehicle_data_cache::VehicleDataCache;
use crate::vehicle_state::{AvlReport, VehicleStateManager};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

pub struct LarchCaches {
    pub config: LarchConfig,
    pub clock: Arc<dyn Clock>,
    pub directory: Arc<dyn TransitDirectory>,
    pub vehicle_states: Arc<VehicleStateManager>,
    pub vehicles: Arc<VehicleDataCache>,
    pub vehicle_configs: Arc<VehicleConfigCache>,
    pub predictions: Arc<PredictionDataCache>,
    pub kalman_errors: Arc<ErrorCache>,
    pub trip_history: Arc<TripDataHistoryCache>,
    pub stop_history: Arc<StopArrivalDepartureCache>,
    pub schedule_averages: Arc<ScheduleBasedHistoricalAverageCache>,
    pub frequency_averages: Arc<FrequencyBasedHistoricalAverageCache>,
    pub dwell_models: Arc<DwellTimeModelCache>,
}

impl LarchCaches {
    pub fn new(
        config: LarchConfig,
        directory: Arc<dyn TransitDirectory>,
        clock: Arc<dyn Clock>,
        vehicle_config_source: Arc<dyn VehicleConfigSource>,
    ) -> Self {
        let trip_history = Arc::new(TripDataHistoryCache::new(config.agency_timezone));
        let stop_history = Arc::new(StopArrivalDepartureCache::new(config.agency_timezone));

        Self {
            vehicle_states: Arc::new(VehicleStateManager::new(config.avl_history_length)),
            vehicles: Arc::new(VehicleDataCache::new(
                Arc::clone(&directory),
                Arc::clone(&clock),
                config.max_vehicle_report_age(),
            )),
            vehicle_configs: Arc::new(VehicleConfigCache::new(
                vehicle_config_source,
                Arc::clone(&clock),
                config.vehicle_config_refresh(),
            )),
            predictions: Arc::new(PredictionDataCache::new(
                Arc::clone(&directory),
                Arc::clone(&clock),
                PredictionCacheSettings::from(&config),
            )),
            kalman_errors: Arc::new(ErrorCache::new(config.backing_store)),
            schedule_averages: Arc::new(ScheduleBasedHistoricalAverageCache::new(
                config.backing_store,
                Arc::clone(&trip_history),
            )),
            frequency_averages: Arc::new(FrequencyBasedHistoricalAverageCache::new(
                config.frequency.clone(),
                config.agency_timezone,
                Arc::clone(&trip_history),
            )),
            dwell_models: Arc::new(DwellTimeModelCache::new(
                config.backing_store,
                config.dwell.clone(),
                Arc::clone(&stop_history),
            )),
            trip_history,
            stop_history,
            config,
            directory,
            clock,
        }
    }

    /// Records a position report on the vehicle's state, then registers the
    /// vehicle if it is new. A failed registration is logged and retried on
    /// the vehicle's next report.
    pub async fn record_avl_report(&self, report: AvlReport) {
        let state = self.vehicle_states.get_vehicle_state(&report.vehicle_id);
        lock_unpoisoned(&state).set_avl_report(report.clone());

        if let Err(err) = self.vehicle_configs.cache_vehicle_config(&report).await {
            error!("Could not register vehicle {}: {}", report.vehicle_id, err);
        }
    }

    /// Pushes the current state of a vehicle into the read projection.
    pub fn publish_vehicle(&self, vehicle_id: &str) {
        let state = self.vehicle_states.get_vehicle_state(vehicle_id);
        let state = lock_unpoisoned(&state);
        self.vehicles.update_vehicle(&state);
    }

    /// Replaces the predictions held for a vehicle, both on its state and in
    /// the serving cache.
    pub fn replace_predictions(&self, vehicle_id: &str, new_predictions: Vec<Prediction>) {
        let state = self.vehicle_states.get_vehicle_state(vehicle_id);
        let mut state = lock_unpoisoned(&state);
        let old_predictions = std::mem::replace(&mut state.predictions, new_predictions);
        self.predictions
            .update_predictions(&old_predictions, &state.predictions);
    }

    /// Makes a vehicle unpredictable and drops its predictions.
    pub fn make_unpredictable(&self, vehicle_id: &str) {
        let state = self.vehicle_states.get_vehicle_state(vehicle_id);
        let mut state = lock_unpoisoned(&state);
        self.predictions.remove_predictions(&state);
        state.predictions.clear();
        state.predictable = false;
        self.vehicles.update_vehicle(&state);
    }

    /// Feeds one observed arrival or departure to the history caches and
    /// every model derived from them.
    pub fn record_arrival_departure(&self, event: ArrivalDeparture) {
        self.trip_history.put_arrival_departure(event.clone());
        self.stop_history.put_arrival_departure(event.clone());

        match event.is_frequency_based() {
            true => self.frequency_averages.put_arrival_departure(&event),
            false => self.schedule_averages.put_arrival_departure(&event),
        }
        if event.is_departure() {
            let outcome = self.dwell_models.add_departure(&event);
            if outcome != DwellSampleOutcome::Added {
                debug!("No dwell sample from {}: {:?}", event, outcome);
            }
        }
    }

    pub fn summary(&self) -> CacheSummary {
        CacheSummary {
            vehicles: self.vehicle_states.len(),
            route_stops_with_predictions: self.predictions.route_stop_count(),
            kalman_errors: self.kalman_errors.len(),
            trips: self.trip_history.len(),
            stop_days: self.stop_history.len(),
            schedule_based_averages: self.schedule_averages.len(),
            frequency_based_averages: self.frequency_averages.len(),
            dwell_models: self.dwell_models.len(),
        }
    }
}

/// Entry counts, logged after warm-up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheSummary {
    pub vehicles: usize,
    pub route_stops_with_predictions: usize,
    pub kalman_errors: usize,
    pub trips: usize,
    pub stop_days: usize,
    pub schedule_based_averages: usize,
    pub frequency_based_averages: usize,
    pub dwell_models: usize,
}

impl fmt::Display for CacheSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "vehicles={} routeStops={} kalmanErrors={} trips={} stopDays={} scheduleAverages={} frequencyAverages={} dwellModels={}",
            self.vehicles,
            self.route_stops_with_predictions,
            self.kalman_errors,
            self.trips,
            self.stop_days,
            self.schedule_based_averages,
            self.frequency_based_averages,
            self.dwell_models
        )
    }
}
