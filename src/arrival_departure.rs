// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A vehicle arriving at or departing from a stop, as recorded by the
/// prediction pipeline. Times are epoch milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrivalDeparture {
    pub vehicle_id: CompactString,
    pub trip_id: CompactString,
    pub route_id: CompactString,
    pub route_short_name: CompactString,
    pub direction_id: Option<CompactString>,
    pub block_id: Option<CompactString>,
    pub stop_id: CompactString,
    pub stop_path_index: u32,
    pub time_ms: u64,
    pub scheduled_time_ms: Option<u64>,
    pub is_arrival: bool,
    /// Seconds from midnight at which the trip started. Only set for
    /// frequency based trips.
    pub trip_start_time: Option<u32>,
    /// Positive when late.
    pub schedule_adherence_secs: Option<i64>,
    pub is_wait_stop: bool,
    pub is_layover_stop: bool,
}

impl ArrivalDeparture {
    pub fn is_departure(&self) -> bool {
        !self.is_arrival
    }

    pub fn is_frequency_based(&self) -> bool {
        self.trip_start_time.is_some()
    }

    /// Missing adherence counts as within bounds.
    pub fn adherence_within(&self, max_secs: i64) -> bool {
        self.schedule_adherence_secs
            .map(|secs| secs.abs() <= max_secs)
            .unwrap_or(true)
    }
}

impl fmt::Display for ArrivalDeparture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} vehicle={} trip={} route={} stop={} stopPathIndex={} time={}",
            match self.is_arrival {
                true => "Arrival",
                false => "Departure",
            },
            self.vehicle_id,
            self.trip_id,
            self.route_short_name,
            self.stop_id,
            self.stop_path_index,
            self.time_ms
        )
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn event(
        vehicle_id: &str,
        trip_id: &str,
        stop_id: &str,
        stop_path_index: u32,
        time_ms: u64,
        is_arrival: bool,
    ) -> ArrivalDeparture {
        ArrivalDeparture {
            vehicle_id: vehicle_id.into(),
            trip_id: trip_id.into(),
            route_id: "r38".into(),
            route_short_name: "38".into(),
            direction_id: Some("0".into()),
            block_id: Some("b1".into()),
            stop_id: stop_id.into(),
            stop_path_index,
            time_ms,
            scheduled_time_ms: Some(time_ms),
            is_arrival,
            trip_start_time: None,
            schedule_adherence_secs: Some(0),
            is_wait_stop: false,
            is_layover_stop: false,
        }
    }

    pub fn arrival(vehicle_id: &str, trip_id: &str, stop_id: &str, index: u32, time_ms: u64) -> ArrivalDeparture {
        event(vehicle_id, trip_id, stop_id, index, time_ms, true)
    }

    pub fn departure(vehicle_id: &str, trip_id: &str, stop_id: &str, index: u32, time_ms: u64) -> ArrivalDeparture {
        event(vehicle_id, trip_id, stop_id, index, time_ms, false)
    }
}
