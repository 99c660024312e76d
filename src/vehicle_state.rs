// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::lock_unpoisoned;
use crate::prediction::Prediction;
use compact_str::CompactString;
use scc::HashMap as SccHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// One position report from a vehicle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AvlReport {
    pub vehicle_id: CompactString,
    /// Hardware id of the tracking unit, when the feed carries one.
    pub tracker_id: Option<CompactString>,
    /// Epoch milliseconds.
    pub time_ms: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_mps: Option<f32>,
    pub heading: Option<f32>,
    /// Synthesized from the schedule rather than reported by a vehicle.
    pub is_schedule_based: bool,
}

/// Everything the pipeline knows about one vehicle. Mutated through the
/// handle returned by [`VehicleStateManager::get_vehicle_state`].
#[derive(Clone, Debug, PartialEq)]
pub struct VehicleState {
    vehicle_id: CompactString,
    pub route_id: Option<CompactString>,
    pub route_short_name: Option<CompactString>,
    pub block_id: Option<CompactString>,
    pub trip_id: Option<CompactString>,
    pub headsign: Option<CompactString>,
    pub direction_id: Option<CompactString>,
    pub predictable: bool,
    /// Placeholder for a scheduled trip with no real-time data.
    pub schedule_based: bool,
    pub canceled: bool,
    pub layover: bool,
    /// Positive when late.
    pub schedule_adherence_secs: Option<i64>,
    pub predictions: Vec<Prediction>,
    avl_history: VecDeque<AvlReport>,
    avl_history_length: usize,
}

impl VehicleState {
    pub fn new(vehicle_id: impl Into<CompactString>, avl_history_length: usize) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            route_id: None,
            route_short_name: None,
            block_id: None,
            trip_id: None,
            headsign: None,
            direction_id: None,
            predictable: false,
            schedule_based: false,
            canceled: false,
            layover: false,
            schedule_adherence_secs: None,
            predictions: Vec::new(),
            avl_history: VecDeque::with_capacity(avl_history_length.max(1)),
            avl_history_length: avl_history_length.max(1),
        }
    }

    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    /// Newest report first. The oldest report falls off once the history is
    /// full.
    pub fn set_avl_report(&mut self, report: AvlReport) {
        if self.avl_history.len() == self.avl_history_length {
            self.avl_history.pop_back();
        }
        self.avl_history.push_front(report);
    }

    pub fn last_avl_report(&self) -> Option<&AvlReport> {
        self.avl_history.front()
    }

    /// `n = 0` is the latest report.
    pub fn previous_avl_report(&self, n: usize) -> Option<&AvlReport> {
        self.avl_history.get(n)
    }

    pub fn avl_history(&self) -> impl Iterator<Item = &AvlReport> {
        self.avl_history.iter()
    }

    pub fn last_report_time_ms(&self) -> Option<u64> {
        self.last_avl_report().map(|r| r.time_ms)
    }

    /// Clears the block, trip and route assignment.
    pub fn unassign(&mut self) {
        self.block_id = None;
        self.trip_id = None;
        self.route_id = None;
        self.route_short_name = None;
        self.headsign = None;
        self.direction_id = None;
        self.predictable = false;
    }
}

/// Registry of every vehicle seen since startup. Entries are never removed.
pub struct VehicleStateManager {
    states: SccHashMap<CompactString, Arc<Mutex<VehicleState>>>,
    avl_history_length: usize,
}

impl VehicleStateManager {
    pub fn new(avl_history_length: usize) -> Self {
        Self {
            states: SccHashMap::new(),
            avl_history_length,
        }
    }

    /// Never absent: a blank state is registered on first reference.
    pub fn get_vehicle_state(&self, vehicle_id: &str) -> Arc<Mutex<VehicleState>> {
        if let Some(existing) = self.states.read(vehicle_id, |_, state| Arc::clone(state)) {
            return existing;
        }

        let state = self
            .states
            .entry(CompactString::from(vehicle_id))
            .or_insert_with(|| {
                Arc::new(Mutex::new(VehicleState::new(
                    vehicle_id,
                    self.avl_history_length,
                )))
            });
        Arc::clone(state.get())
    }

    /// Snapshot of the handles registered so far. Safe to call while other
    /// threads register vehicles.
    pub fn get_vehicles_state(&self) -> Vec<Arc<Mutex<VehicleState>>> {
        let mut states = Vec::with_capacity(self.states.len());
        self.states.scan(|_, state| states.push(Arc::clone(state)));
        states
    }

    /// Copies of the current states, each taken under its own lock.
    pub fn snapshot_states(&self) -> Vec<VehicleState> {
        self.get_vehicles_state()
            .iter()
            .map(|state| lock_unpoisoned(state).clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn report(vehicle_id: &str, time_ms: u64) -> AvlReport {
        AvlReport {
            vehicle_id: vehicle_id.into(),
            tracker_id: None,
            time_ms,
            latitude: 37.7749,
            longitude: -122.4194,
            speed_mps: Some(8.0),
            heading: Some(270.0),
            is_schedule_based: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::report;
    use super::*;

    #[test]
    fn first_reference_creates_and_later_ones_share() {
        let manager = VehicleStateManager::new(5);
        let first = manager.get_vehicle_state("bus-1");
        lock_unpoisoned(&first).route_short_name = Some("38".into());

        let second = manager.get_vehicle_state("bus-1");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(lock_unpoisoned(&second).route_short_name.as_deref(), Some("38"));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn avl_history_is_bounded_newest_first() {
        let mut state = VehicleState::new("bus-1", 3);
        for t in 1..=5 {
            state.set_avl_report(report("bus-1", t * 1_000));
        }

        let times: Vec<u64> = state.avl_history().map(|r| r.time_ms).collect();
        assert_eq!(times, vec![5_000, 4_000, 3_000]);
        assert_eq!(state.last_report_time_ms(), Some(5_000));
        assert_eq!(state.previous_avl_report(1).map(|r| r.time_ms), Some(4_000));
    }

    #[test]
    fn snapshot_while_registering_concurrently() {
        let manager = Arc::new(VehicleStateManager::new(5));

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let manager = Arc::clone(&manager);
                scope.spawn(move || {
                    for i in 0..250 {
                        manager.get_vehicle_state(&format!("bus-{}-{}", worker, i));
                        let _ = manager.get_vehicles_state();
                    }
                });
            }
        });

        assert_eq!(manager.get_vehicles_state().len(), 1_000);
        assert_eq!(manager.snapshot_states().len(), 1_000);
    }
}
