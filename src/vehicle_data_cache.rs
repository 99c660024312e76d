// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Read side copy of the vehicle states, indexed by vehicle, route and
//! block. Fed by [`VehicleDataCache::update_vehicle`] whenever a state
//! changes; readers only ever see whole [`VehicleSnapshot`]s.

use crate::clock::Clock;
use crate::directory::TransitDirectory;
use crate::vehicle_state::{AvlReport, VehicleState};
use ahash::AHashMap;
use compact_str::CompactString;
use scc::HashMap as SccHashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Immutable copy of the fields of a [`VehicleState`] that clients read.
#[derive(Clone, Debug, PartialEq)]
pub struct VehicleSnapshot {
    pub vehicle_id: CompactString,
    pub route_id: Option<CompactString>,
    pub route_short_name: Option<CompactString>,
    pub block_id: Option<CompactString>,
    pub trip_id: Option<CompactString>,
    pub headsign: Option<CompactString>,
    pub direction_id: Option<CompactString>,
    pub predictable: bool,
    pub schedule_based: bool,
    pub canceled: bool,
    pub layover: bool,
    pub schedule_adherence_secs: Option<i64>,
    pub last_avl_report: Option<AvlReport>,
}

impl From<&VehicleState> for VehicleSnapshot {
    fn from(state: &VehicleState) -> Self {
        Self {
            vehicle_id: CompactString::from(state.vehicle_id()),
            route_id: state.route_id.clone(),
            route_short_name: state.route_short_name.clone(),
            block_id: state.block_id.clone(),
            trip_id: state.trip_id.clone(),
            headsign: state.headsign.clone(),
            direction_id: state.direction_id.clone(),
            predictable: state.predictable,
            schedule_based: state.schedule_based,
            canceled: state.canceled,
            layover: state.layover,
            schedule_adherence_secs: state.schedule_adherence_secs,
            last_avl_report: state.last_avl_report().cloned(),
        }
    }
}

impl VehicleSnapshot {
    pub fn last_report_time_ms(&self) -> Option<u64> {
        self.last_avl_report.as_ref().map(|r| r.time_ms)
    }

    /// Placeholder whose reason to exist has gone away.
    fn is_expired_placeholder(&self) -> bool {
        self.schedule_based && !self.predictable && !self.canceled
    }

    /// Layover vehicles go quiet on purpose and are never stale.
    pub fn is_stale(&self, now_ms: u64, max_age: Duration) -> bool {
        if self.layover {
            return false;
        }
        match self.last_report_time_ms() {
            Some(time_ms) => now_ms.saturating_sub(time_ms) > max_age.as_millis() as u64,
            None => true,
        }
    }
}

type RouteKey = Option<CompactString>;

pub struct VehicleDataCache {
    vehicles: SccHashMap<CompactString, Arc<VehicleSnapshot>>,
    vehicles_by_route: SccHashMap<RouteKey, AHashMap<CompactString, Arc<VehicleSnapshot>>>,
    vehicle_ids_by_block: SccHashMap<CompactString, Vec<CompactString>>,
    /// Snapshot each vehicle was last indexed under. Kept even when the
    /// vehicle leaves `vehicles`, so route and block entries can always be
    /// cleaned up.
    last_indexed: SccHashMap<CompactString, Arc<VehicleSnapshot>>,
    directory: Arc<dyn TransitDirectory>,
    clock: Arc<dyn Clock>,
    max_report_age: Duration,
}

impl VehicleDataCache {
    pub fn new(directory: Arc<dyn TransitDirectory>, clock: Arc<dyn Clock>, max_report_age: Duration) -> Self {
        Self {
            vehicles: SccHashMap::new(),
            vehicles_by_route: SccHashMap::new(),
            vehicle_ids_by_block: SccHashMap::new(),
            last_indexed: SccHashMap::new(),
            directory,
            clock,
            max_report_age,
        }
    }

    pub fn update_vehicle(&self, state: &VehicleState) {
        let vehicle = Arc::new(VehicleSnapshot::from(state));
        debug!("Adding to vehicle data cache vehicle={}", vehicle.vehicle_id);

        // the last_indexed entry stays locked until every index is updated,
        // so two updates of one vehicle cannot interleave
        let mut entry = self
            .last_indexed
            .entry(vehicle.vehicle_id.clone())
            .or_insert_with(|| Arc::clone(&vehicle));
        let previous = match Arc::ptr_eq(entry.get(), &vehicle) {
            true => None,
            false => Some(std::mem::replace(entry.get_mut(), Arc::clone(&vehicle))),
        };

        self.update_route_index(previous.as_deref(), &vehicle);
        self.update_block_index(previous.as_deref(), &vehicle);

        if vehicle.is_expired_placeholder() {
            self.vehicles.remove(&vehicle.vehicle_id);
        } else {
            self.vehicles
                .entry(vehicle.vehicle_id.clone())
                .and_modify(|existing| *existing = Arc::clone(&vehicle))
                .or_insert_with(|| Arc::clone(&vehicle));
        }
        drop(entry);
    }

    fn update_route_index(&self, previous: Option<&VehicleSnapshot>, vehicle: &Arc<VehicleSnapshot>) {
        if let Some(previous) = previous {
            if previous.route_short_name != vehicle.route_short_name {
                if let Some(mut old_route) = self.vehicles_by_route.get(&previous.route_short_name) {
                    old_route.get_mut().remove(&vehicle.vehicle_id);
                }
            }
        }

        self.vehicles_by_route
            .entry(vehicle.route_short_name.clone())
            .or_default()
            .get_mut()
            .insert(vehicle.vehicle_id.clone(), Arc::clone(vehicle));
    }

    fn update_block_index(&self, previous: Option<&VehicleSnapshot>, vehicle: &VehicleSnapshot) {
        let previous_block = previous.and_then(|p| p.block_id.as_ref());

        if previous_block != vehicle.block_id.as_ref() {
            if let Some(old_block) = previous_block {
                if let Some(mut ids) = self.vehicle_ids_by_block.get(old_block) {
                    ids.get_mut().retain(|id| *id != vehicle.vehicle_id);
                }
            }
        }

        if let Some(block_id) = &vehicle.block_id {
            let mut ids = self.vehicle_ids_by_block.entry(block_id.clone()).or_default();
            if !ids.get().contains(&vehicle.vehicle_id) {
                ids.get_mut().push(vehicle.vehicle_id.clone());
            }
        }
    }

    /// Drops the vehicle from the by-id map only. Route and block indices
    /// are left alone and get corrected by the next update.
    pub fn remove_vehicle(&self, vehicle_id: &str) {
        debug!("Removing from vehicle data cache vehicleId={}", vehicle_id);
        self.vehicles.remove(vehicle_id);
    }

    /// Direct lookup, no staleness filtering.
    pub fn get_vehicle(&self, vehicle_id: &str) -> Option<Arc<VehicleSnapshot>> {
        self.vehicles.read(vehicle_id, |_, v| Arc::clone(v))
    }

    /// Direct lookups, no staleness filtering. Unknown ids are skipped.
    pub fn get_vehicles_by_ids<S: AsRef<str>>(&self, vehicle_ids: &[S]) -> Vec<Arc<VehicleSnapshot>> {
        vehicle_ids
            .iter()
            .filter_map(|id| self.get_vehicle(id.as_ref()))
            .collect()
    }

    fn keep_for_listing(&self, now_ms: u64, vehicle: &VehicleSnapshot) -> bool {
        !vehicle.is_stale(now_ms, self.max_report_age) && !vehicle.schedule_based
    }

    /// Every known vehicle with a recent report, placeholders excluded.
    pub fn get_vehicles(&self) -> Vec<Arc<VehicleSnapshot>> {
        let now_ms = self.clock.now_ms();
        let mut vehicles = Vec::with_capacity(self.vehicles.len());
        self.vehicles.scan(|_, v| {
            if self.keep_for_listing(now_ms, v) {
                vehicles.push(Arc::clone(v));
            }
        });
        vehicles
    }

    pub fn get_vehicles_including_sched_based(&self) -> Vec<Arc<VehicleSnapshot>> {
        let mut vehicles = Vec::with_capacity(self.vehicles.len());
        self.vehicles.scan(|_, v| vehicles.push(Arc::clone(v)));
        vehicles
    }

    /// `route` may be a short name or a route id; an empty string asks for
    /// vehicles without a route.
    pub fn get_vehicles_for_route(&self, route: &str) -> Vec<Arc<VehicleSnapshot>> {
        let key: RouteKey = match route.is_empty() {
            true => None,
            false => Some(CompactString::from(route)),
        };
        let now_ms = self.clock.now_ms();

        let collect = |key: &RouteKey| {
            self.vehicles_by_route.read(key, |_, by_vehicle| {
                by_vehicle
                    .values()
                    .filter(|v| self.keep_for_listing(now_ms, v))
                    .cloned()
                    .collect::<Vec<_>>()
            })
        };

        collect(&key)
            .or_else(|| {
                self.directory
                    .route_by_id(route)
                    .and_then(|info| collect(&Some(info.short_name)))
            })
            .unwrap_or_default()
    }

    pub fn get_vehicles_for_routes<S: AsRef<str>>(&self, routes: &[S]) -> Vec<Arc<VehicleSnapshot>> {
        routes
            .iter()
            .flat_map(|route| self.get_vehicles_for_route(route.as_ref()))
            .collect()
    }

    /// Copy of the ids assigned to the block, empty when there are none.
    pub fn get_vehicles_by_block_id(&self, block_id: &str) -> Vec<CompactString> {
        self.vehicle_ids_by_block
            .read(block_id, |_, ids| ids.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }
}
