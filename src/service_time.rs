// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Agency local calendar helpers. Epoch timestamps are milliseconds.

use chrono::{DateTime, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

pub const MS_PER_SEC: u64 = 1_000;
pub const MS_PER_MIN: u64 = 60 * MS_PER_SEC;
pub const MS_PER_DAY: u64 = 24 * 60 * MS_PER_MIN;

fn local(tz: Tz, epoch_ms: u64) -> DateTime<Tz> {
    let utc = DateTime::<Utc>::from_timestamp_millis(epoch_ms as i64).unwrap_or_default();
    utc.with_timezone(&tz)
}

pub fn service_date(tz: Tz, epoch_ms: u64) -> NaiveDate {
    local(tz, epoch_ms).date_naive()
}

pub fn seconds_from_midnight(tz: Tz, epoch_ms: u64) -> u32 {
    local(tz, epoch_ms).num_seconds_from_midnight()
}

/// Epoch milliseconds of local midnight starting `date`.
pub fn start_of_day_ms(tz: Tz, date: NaiveDate) -> u64 {
    let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    tz.from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.timestamp_millis().max(0) as u64)
        .unwrap_or_default()
}
