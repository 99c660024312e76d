// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::arrival_departure::ArrivalDeparture;
use crate::error::LarchError;
use crate::vehicle_config::VehicleConfig;
use diesel::prelude::*;

#[derive(Queryable, Selectable, Insertable, Clone, Debug)]
#[diesel(table_name = crate::schema::larch::arrivals_departures)]
pub struct ArrivalDepartureRow {
    pub vehicle_id: String,
    pub trip_id: String,
    pub route_id: String,
    pub route_short_name: String,
    pub direction_id: Option<String>,
    pub block_id: Option<String>,
    pub stop_id: String,
    pub stop_path_index: i32,
    pub time_ms: i64,
    pub scheduled_time_ms: Option<i64>,
    pub is_arrival: bool,
    pub trip_start_time: Option<i32>,
    pub schedule_adherence_secs: Option<i32>,
    pub is_wait_stop: bool,
    pub is_layover_stop: bool,
}

impl ArrivalDepartureRow {
    fn describe(&self) -> String {
        format!(
            "vehicle={} trip={} stop={} time={}",
            self.vehicle_id, self.trip_id, self.stop_id, self.time_ms
        )
    }

    fn non_negative<T>(&self, field: &'static str, value: T) -> Result<u64, LarchError>
    where
        T: Into<i64> + Copy,
    {
        let value: i64 = value.into();
        u64::try_from(value).map_err(|_| LarchError::MalformedRecord {
            record: self.describe(),
            field,
            reason: format!("negative value {}", value),
        })
    }
}

impl TryFrom<ArrivalDepartureRow> for ArrivalDeparture {
    type Error = LarchError;

    fn try_from(row: ArrivalDepartureRow) -> Result<Self, Self::Error> {
        let time_ms = row.non_negative("time_ms", row.time_ms)?;
        let stop_path_index = row.non_negative("stop_path_index", row.stop_path_index)? as u32;
        let scheduled_time_ms = row
            .scheduled_time_ms
            .map(|t| row.non_negative("scheduled_time_ms", t))
            .transpose()?;
        let trip_start_time = row
            .trip_start_time
            .map(|t| row.non_negative("trip_start_time", t).map(|t| t as u32))
            .transpose()?;

        Ok(ArrivalDeparture {
            vehicle_id: row.vehicle_id.into(),
            trip_id: row.trip_id.into(),
            route_id: row.route_id.into(),
            route_short_name: row.route_short_name.into(),
            direction_id: row.direction_id.map(Into::into),
            block_id: row.block_id.map(Into::into),
            stop_id: row.stop_id.into(),
            stop_path_index,
            time_ms,
            scheduled_time_ms,
            is_arrival: row.is_arrival,
            trip_start_time,
            schedule_adherence_secs: row.schedule_adherence_secs.map(i64::from),
            is_wait_stop: row.is_wait_stop,
            is_layover_stop: row.is_layover_stop,
        })
    }
}

#[derive(Queryable, Selectable, Insertable, Clone, Debug, PartialEq, Eq)]
#[diesel(table_name = crate::schema::larch::vehicle_configs)]
pub struct VehicleConfigRow {
    pub id: String,
    pub tracker_id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub vehicle_type: Option<i32>,
    pub non_passenger_vehicle: bool,
}

impl From<VehicleConfigRow> for VehicleConfig {
    fn from(row: VehicleConfigRow) -> Self {
        VehicleConfig {
            id: row.id.into(),
            tracker_id: row.tracker_id.map(Into::into),
            name: row.name.map(Into::into),
            description: row.description.map(Into::into),
            vehicle_type: row.vehicle_type,
            non_passenger_vehicle: row.non_passenger_vehicle,
        }
    }
}

impl From<&VehicleConfig> for VehicleConfigRow {
    fn from(config: &VehicleConfig) -> Self {
        VehicleConfigRow {
            id: config.id.to_string(),
            tracker_id: config.tracker_id.as_ref().map(ToString::to_string),
            name: config.name.as_ref().map(ToString::to_string),
            description: config.description.as_ref().map(ToString::to_string),
            vehicle_type: config.vehicle_type,
            non_passenger_vehicle: config.non_passenger_vehicle,
        }
    }
}
