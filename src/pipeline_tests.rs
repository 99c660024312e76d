// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Scenarios that go through [`LarchCaches`] the way the ingestion and
//! query layers do.

use crate::arrival_departure::test_support::{arrival, departure};
use crate::cache_keys::StopPathCacheKey;
use crate::caches::LarchCaches;
use crate::clock::SettableClock;
use crate::config::LarchConfig;
use crate::directory::test_support::sample_directory;
use crate::error::{LarchError, LarchResult};
use crate::prediction::test_support::prediction;
use crate::vehicle_config::{InMemoryVehicleConfigSource, VehicleConfig, VehicleConfigSource};
use crate::vehicle_state::test_support::report;
use futures::future::BoxFuture;
use std::sync::Arc;

const NOW: u64 = 1_717_200_000_000;

struct Harness {
    caches: LarchCaches,
    clock: Arc<SettableClock>,
    configs: Arc<InMemoryVehicleConfigSource>,
}

fn harness() -> Harness {
    let clock = Arc::new(SettableClock::new(NOW));
    let configs = Arc::new(InMemoryVehicleConfigSource::default());
    let caches = LarchCaches::new(
        LarchConfig::default(),
        sample_directory(),
        clock.clone(),
        configs.clone(),
    );
    Harness {
        caches,
        clock,
        configs,
    }
}

fn assign(caches: &LarchCaches, vehicle_id: &str, route_short_name: &str, block_id: &str) {
    let state = caches.vehicle_states.get_vehicle_state(vehicle_id);
    let mut state = state.lock().unwrap();
    state.route_id = Some(format!("r{}", route_short_name).into());
    state.route_short_name = Some(route_short_name.into());
    state.block_id = Some(block_id.into());
    state.predictable = true;
}

#[tokio::test]
async fn reported_vehicle_is_listed_until_it_goes_quiet() {
    let h = harness();

    h.caches.record_avl_report(report("bus-1", NOW)).await;
    assign(&h.caches, "bus-1", "38", "b1");
    h.caches.publish_vehicle("bus-1");

    assert!(h.configs.contains("bus-1"));
    assert_eq!(h.caches.vehicles.get_vehicles().len(), 1);
    assert_eq!(h.caches.vehicles.get_vehicles_for_route("38").len(), 1);
    assert_eq!(h.caches.vehicles.get_vehicles_for_route("r38").len(), 1);

    h.clock.advance(16 * 60 * 1000);
    assert!(h.caches.vehicles.get_vehicles().is_empty());
    assert!(h.caches.vehicles.get_vehicles_for_route("38").is_empty());
    // direct lookups ignore age
    assert!(h.caches.vehicles.get_vehicle("bus-1").is_some());
}

#[tokio::test]
async fn route_and_block_change_moves_vehicle_between_indices() {
    let h = harness();

    h.caches.record_avl_report(report("bus-1", NOW)).await;
    assign(&h.caches, "bus-1", "38", "b1");
    h.caches.publish_vehicle("bus-1");

    assign(&h.caches, "bus-1", "5", "b2");
    h.caches.publish_vehicle("bus-1");

    assert!(h.caches.vehicles.get_vehicles_for_route("38").is_empty());
    assert_eq!(h.caches.vehicles.get_vehicles_for_route("5").len(), 1);
    assert!(h.caches.vehicles.get_vehicles_by_block_id("b1").is_empty());
    assert_eq!(h.caches.vehicles.get_vehicles_by_block_id("b2"), vec!["bus-1"]);
}

/// A config table that cannot be written to.
struct ReadOnlyConfigs;

impl VehicleConfigSource for ReadOnlyConfigs {
    fn load_all(&self) -> BoxFuture<'_, LarchResult<Vec<VehicleConfig>>> {
        Box::pin(async move { Ok(Vec::new()) })
    }

    fn store(&self, _config: VehicleConfig) -> BoxFuture<'_, LarchResult<()>> {
        Box::pin(async move { Err(LarchError::Pool(String::from("read only"))) })
    }
}

#[tokio::test]
async fn report_is_kept_when_vehicle_registration_fails() {
    let caches = LarchCaches::new(
        LarchConfig::default(),
        sample_directory(),
        Arc::new(SettableClock::new(NOW)),
        Arc::new(ReadOnlyConfigs),
    );

    caches.record_avl_report(report("bus-1", NOW)).await;
    caches.record_avl_report(report("bus-1", NOW + 10_000)).await;

    let state = caches.vehicle_states.get_vehicle_state("bus-1");
    assert_eq!(state.lock().unwrap().last_report_time_ms(), Some(NOW + 10_000));
    assert!(caches.vehicle_configs.get_vehicle_config("bus-1").await.is_none());
}

#[test]
fn predictions_are_served_then_withdrawn() {
    let h = harness();
    assign(&h.caches, "bus-1", "38", "b1");
    h.caches.publish_vehicle("bus-1");

    h.caches.replace_predictions(
        "bus-1",
        vec![
            prediction("bus-1", "s100", NOW + 120_000),
            prediction("bus-1", "s200", NOW + 600_000),
        ],
    );

    let at_stop = h
        .caches
        .predictions
        .get_predictions(Some("38"), None, "14100", 5, None)
        .unwrap();
    assert_eq!(at_stop.len(), 1);
    assert_eq!(at_stop[0].predictions.len(), 1);
    assert_eq!(at_stop[0].identity.headsign.as_deref(), Some("Ocean Beach"));

    let found = h
        .caches
        .predictions
        .get_prediction_for_vehicle("bus-1", "38", "s200")
        .unwrap();
    assert_eq!(found.map(|p| p.prediction_time_ms), Some(NOW + 600_000));

    h.caches.make_unpredictable("bus-1");

    let at_stop = h
        .caches
        .predictions
        .get_predictions(Some("38"), None, "s100", 5, None)
        .unwrap();
    assert!(at_stop.iter().all(|d| d.predictions.is_empty()));
    assert!(h.caches.predictions.get_all_predictions(5, u64::MAX).is_empty());
    assert!(!h.caches.vehicles.get_vehicle("bus-1").unwrap().predictable);
}

#[test]
fn unknown_route_or_stop_is_an_argument_error() {
    let h = harness();

    let err = h
        .caches
        .predictions
        .get_predictions(Some("99"), None, "s100", 5, None)
        .unwrap_err();
    assert!(err.is_argument_error());

    let err = h
        .caches
        .predictions
        .get_predictions(None, None, "nowhere", 5, None)
        .unwrap_err();
    assert!(err.is_argument_error());
}

#[test]
fn observed_events_feed_schedule_averages() {
    let h = harness();

    for event in [
        departure("v1", "t1", "s0", 0, NOW),
        arrival("v1", "t1", "s1", 1, NOW + 120_000),
        departure("v1", "t1", "s1", 1, NOW + 150_000),
    ] {
        h.caches.record_arrival_departure(event);
    }

    let travel = h
        .caches
        .schedule_averages
        .get_average(&StopPathCacheKey::new("t1", 1, true))
        .unwrap();
    assert_eq!(travel.average(), Some(120_000.0));

    let dwell = h
        .caches
        .schedule_averages
        .get_average(&StopPathCacheKey::new("t1", 1, false))
        .unwrap();
    assert_eq!(dwell.average(), Some(30_000.0));

    let summary = h.caches.summary();
    assert_eq!(summary.trips, 1);
    assert_eq!(summary.stop_days, 2);
    assert_eq!(summary.schedule_based_averages, 2);
}
