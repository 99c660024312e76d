// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Composite keys shared by every cache. Keys are plain values: fields are
//! private and fixed at construction, and two keys built from the same
//! fields are interchangeable in any map.

use chrono::NaiveDate;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Position of a stop path inside a trip, as seen by the prediction
/// pipeline. Keys for the statistical models are derived from this.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StopPathIndices {
    pub trip_id: CompactString,
    pub route_id: CompactString,
    pub direction_id: Option<CompactString>,
    pub stop_path_index: u32,
    pub origin_stop_id: CompactString,
    pub destination_stop_id: CompactString,
}

/// Key for historical averages and dwell models. `travel_time` separates
/// the travel segment leading into the stop from the dwell at the stop.
/// `start_time` is only set for frequency based trips (seconds from
/// midnight).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StopPathCacheKey {
    trip_id: CompactString,
    stop_path_index: u32,
    travel_time: bool,
    start_time: Option<u32>,
}

impl StopPathCacheKey {
    pub fn new(trip_id: impl Into<CompactString>, stop_path_index: u32, travel_time: bool) -> Self {
        Self {
            trip_id: trip_id.into(),
            stop_path_index,
            travel_time,
            start_time: None,
        }
    }

    pub fn with_start_time(
        trip_id: impl Into<CompactString>,
        stop_path_index: u32,
        travel_time: bool,
        start_time: u32,
    ) -> Self {
        Self {
            trip_id: trip_id.into(),
            stop_path_index,
            travel_time,
            start_time: Some(start_time),
        }
    }

    pub fn from_indices(indices: &StopPathIndices, travel_time: bool) -> Self {
        Self::new(indices.trip_id.clone(), indices.stop_path_index, travel_time)
    }

    pub fn trip_id(&self) -> &str {
        &self.trip_id
    }

    pub fn stop_path_index(&self) -> u32 {
        self.stop_path_index
    }

    pub fn is_travel_time(&self) -> bool {
        self.travel_time
    }

    pub fn start_time(&self) -> Option<u32> {
        self.start_time
    }
}

impl fmt::Display for StopPathCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StopPathCacheKey [tripId={}, stopPathIndex={}, travelTime={}, startTime={:?}]",
            self.trip_id, self.stop_path_index, self.travel_time, self.start_time
        )
    }
}

/// A [`StopPathCacheKey`] with the start time stripped, used to group the
/// time-of-day buckets of frequency based trips.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StopPathKey {
    trip_id: CompactString,
    stop_path_index: u32,
    travel_time: bool,
}

impl StopPathKey {
    pub fn new(trip_id: impl Into<CompactString>, stop_path_index: u32, travel_time: bool) -> Self {
        Self {
            trip_id: trip_id.into(),
            stop_path_index,
            travel_time,
        }
    }

    pub fn trip_id(&self) -> &str {
        &self.trip_id
    }

    pub fn stop_path_index(&self) -> u32 {
        self.stop_path_index
    }

    pub fn is_travel_time(&self) -> bool {
        self.travel_time
    }
}

impl From<&StopPathCacheKey> for StopPathKey {
    fn from(key: &StopPathCacheKey) -> Self {
        Self {
            trip_id: key.trip_id.clone(),
            stop_path_index: key.stop_path_index,
            travel_time: key.travel_time,
        }
    }
}

/// Kalman error segment. The vehicle id rides along so log lines can be
/// correlated with a vehicle, but it takes no part in equality or hashing:
/// every vehicle on the segment shares one error term.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KalmanErrorCacheKey {
    route_id: CompactString,
    direction_id: Option<CompactString>,
    origin_stop_id: CompactString,
    destination_stop_id: CompactString,
    vehicle_id: Option<CompactString>,
}

impl KalmanErrorCacheKey {
    pub fn new(
        route_id: impl Into<CompactString>,
        direction_id: Option<&str>,
        origin_stop_id: impl Into<CompactString>,
        destination_stop_id: impl Into<CompactString>,
    ) -> Self {
        Self {
            route_id: route_id.into(),
            direction_id: direction_id.map(CompactString::from),
            origin_stop_id: origin_stop_id.into(),
            destination_stop_id: destination_stop_id.into(),
            vehicle_id: None,
        }
    }

    pub fn for_vehicle(mut self, vehicle_id: impl Into<CompactString>) -> Self {
        self.vehicle_id = Some(vehicle_id.into());
        self
    }

    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    pub fn direction_id(&self) -> Option<&str> {
        self.direction_id.as_deref()
    }

    pub fn origin_stop_id(&self) -> &str {
        &self.origin_stop_id
    }

    pub fn destination_stop_id(&self) -> &str {
        &self.destination_stop_id
    }

    pub fn vehicle_id(&self) -> Option<&str> {
        self.vehicle_id.as_deref()
    }
}

impl From<&StopPathIndices> for KalmanErrorCacheKey {
    fn from(indices: &StopPathIndices) -> Self {
        Self::new(
            indices.route_id.clone(),
            indices.direction_id.as_deref(),
            indices.origin_stop_id.clone(),
            indices.destination_stop_id.clone(),
        )
    }
}

impl PartialEq for KalmanErrorCacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.route_id == other.route_id
            && self.direction_id == other.direction_id
            && self.origin_stop_id == other.origin_stop_id
            && self.destination_stop_id == other.destination_stop_id
    }
}

impl Eq for KalmanErrorCacheKey {}

impl Hash for KalmanErrorCacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.route_id.hash(state);
        self.direction_id.hash(state);
        self.origin_stop_id.hash(state);
        self.destination_stop_id.hash(state);
    }
}

impl fmt::Display for KalmanErrorCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KalmanErrorCacheKey [routeId={}, directionId={:?}, origin={}, destination={}, vehicleId={:?}]",
            self.route_id,
            self.direction_id,
            self.origin_stop_id,
            self.destination_stop_id,
            self.vehicle_id
        )
    }
}

/// One run of a trip on one service day.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TripKey {
    trip_id: CompactString,
    service_date: NaiveDate,
    start_time: Option<u32>,
}

impl TripKey {
    pub fn new(
        trip_id: impl Into<CompactString>,
        service_date: NaiveDate,
        start_time: Option<u32>,
    ) -> Self {
        Self {
            trip_id: trip_id.into(),
            service_date,
            start_time,
        }
    }

    pub fn trip_id(&self) -> &str {
        &self.trip_id
    }

    pub fn service_date(&self) -> NaiveDate {
        self.service_date
    }

    pub fn start_time(&self) -> Option<u32> {
        self.start_time
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StopArrivalDepartureCacheKey {
    stop_id: CompactString,
    service_date: NaiveDate,
}

impl StopArrivalDepartureCacheKey {
    pub fn new(stop_id: impl Into<CompactString>, service_date: NaiveDate) -> Self {
        Self {
            stop_id: stop_id.into(),
            service_date,
        }
    }

    pub fn stop_id(&self) -> &str {
        &self.stop_id
    }

    pub fn service_date(&self) -> NaiveDate {
        self.service_date
    }
}

/// Groups every destination bucket served at a stop by one route.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteStopKey {
    route_short_name: CompactString,
    stop_id: CompactString,
}

impl RouteStopKey {
    pub fn new(route_short_name: impl Into<CompactString>, stop_id: impl Into<CompactString>) -> Self {
        Self {
            route_short_name: route_short_name.into(),
            stop_id: stop_id.into(),
        }
    }

    pub fn route_short_name(&self) -> &str {
        &self.route_short_name
    }

    pub fn stop_id(&self) -> &str {
        &self.stop_id
    }
}

/// Identity of a single prediction bucket.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteStopDestKey {
    route_short_name: CompactString,
    stop_id: CompactString,
    headsign: Option<CompactString>,
}

impl RouteStopDestKey {
    pub fn new(
        route_short_name: impl Into<CompactString>,
        stop_id: impl Into<CompactString>,
        headsign: Option<&str>,
    ) -> Self {
        Self {
            route_short_name: route_short_name.into(),
            stop_id: stop_id.into(),
            headsign: headsign.map(CompactString::from),
        }
    }

    pub fn route_short_name(&self) -> &str {
        &self.route_short_name
    }

    pub fn stop_id(&self) -> &str {
        &self.stop_id
    }

    pub fn headsign(&self) -> Option<&str> {
        self.headsign.as_deref()
    }

    pub fn route_stop(&self) -> RouteStopKey {
        RouteStopKey {
            route_short_name: self.route_short_name.clone(),
            stop_id: self.stop_id.clone(),
        }
    }
}
