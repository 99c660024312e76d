// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::arc_with_non_send_sync,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::bytes_nth,
    clippy::deprecated_clippy_cfg_attr,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::cmp_null,
    clippy::op_ref
)]

pub mod arrival_departure;
pub mod arrival_departure_history;
pub mod backing_store;
pub mod cache_keys;
pub mod caches;
pub mod clock;
pub mod config;
pub mod directory;
pub mod dwell_time_cache;
pub mod error;
pub mod historical_average_cache;
pub mod historical_store;
pub mod kalman_error_cache;
pub mod models;
pub mod parallel_processor;
pub mod postgres_tools;
pub mod prediction;
pub mod prediction_data_cache;
pub mod schema;
pub mod service_time;
pub mod statistics;
pub mod vehicle_config;
pub mod vehicle_data_cache;
pub mod vehicle_state;
pub mod warm_up;

#[cfg(test)]
mod pipeline_tests;

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn duration_since_unix_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

/// Locks `mutex`, taking the guard back if a previous holder panicked.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
