// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::backing_store::BackingStoreKind;
use crate::error::{LarchError, LarchResult};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Process wide settings, read once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LarchConfig {
    pub backing_store: BackingStoreKind,
    pub prediction_ttl_ms: u64,
    pub max_predictions_per_stop: usize,
    pub max_prediction_time_secs: u64,
    pub terminate_predictions_at_trip_end: bool,
    pub return_arrival_prediction_for_end_of_trip: bool,
    /// `None` uses every available processor, `Some(1)` runs warm-up serially.
    pub parallel_threads: Option<usize>,
    pub max_vehicle_report_age_secs: u64,
    pub historical_prediction_hold_mins: u64,
    pub vehicle_config_refresh_secs: u64,
    pub avl_history_length: usize,
    pub agency_timezone: Tz,
    pub warm_up_days: u32,
    pub dwell: DwellModelConfig,
    pub frequency: FrequencyCacheConfig,
}

impl Default for LarchConfig {
    fn default() -> Self {
        Self {
            backing_store: BackingStoreKind::Unbounded,
            prediction_ttl_ms: 0,
            max_predictions_per_stop: 5,
            max_prediction_time_secs: 1800,
            terminate_predictions_at_trip_end: false,
            return_arrival_prediction_for_end_of_trip: false,
            parallel_threads: None,
            max_vehicle_report_age_secs: 900,
            historical_prediction_hold_mins: 60,
            vehicle_config_refresh_secs: 300,
            avl_history_length: 20,
            agency_timezone: Tz::UTC,
            warm_up_days: 4,
            dwell: DwellModelConfig::default(),
            frequency: FrequencyCacheConfig::default(),
        }
    }
}

/// Bounds applied to samples before they reach a dwell time model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DwellModelConfig {
    pub min_dwell_ms: u64,
    pub max_dwell_ms: u64,
    pub min_headway_ms: u64,
    pub max_headway_ms: u64,
    pub max_schedule_adherence_secs: i64,
    /// Width of the headway bands that get their own average.
    pub headway_band_ms: u64,
}

impl Default for DwellModelConfig {
    fn default() -> Self {
        Self {
            min_dwell_ms: 1_000,
            max_dwell_ms: 120_000,
            min_headway_ms: 1_000,
            max_headway_ms: 3_600_000,
            max_schedule_adherence_secs: 600,
            headway_band_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyCacheConfig {
    pub min_travel_time_ms: u64,
    pub max_travel_time_ms: u64,
    pub min_dwell_time_ms: u64,
    pub max_dwell_time_ms: u64,
    /// Width of the time of day buckets, in seconds.
    pub cache_increments_secs: u32,
}

impl Default for FrequencyCacheConfig {
    fn default() -> Self {
        Self {
            min_travel_time_ms: 0,
            max_travel_time_ms: 600_000,
            min_dwell_time_ms: 0,
            max_dwell_time_ms: 600_000,
            cache_increments_secs: 10_800,
        }
    }
}

impl LarchConfig {
    pub fn from_ron_str(contents: &str) -> LarchResult<Self> {
        ron::from_str::<LarchConfig>(contents).map_err(|e| LarchError::Config(e.to_string()))
    }

    pub fn from_ron_file(path: &Path) -> LarchResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| LarchError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_ron_str(&contents)
    }

    /// Config file if given, otherwise defaults, then `LARCH_*` overrides.
    pub fn load(path: Option<&Path>) -> LarchResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_ron_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> LarchResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> LarchResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_from(&lookup, "LARCH_PREDICTION_TTL_MS", &mut self.prediction_ttl_ms)?;
        override_from(
            &lookup,
            "LARCH_MAX_PREDICTIONS_PER_STOP",
            &mut self.max_predictions_per_stop,
        )?;
        override_from(
            &lookup,
            "LARCH_MAX_PREDICTION_TIME_SECS",
            &mut self.max_prediction_time_secs,
        )?;
        override_from(
            &lookup,
            "LARCH_TERMINATE_PREDICTIONS_AT_TRIP_END",
            &mut self.terminate_predictions_at_trip_end,
        )?;
        override_from(
            &lookup,
            "LARCH_RETURN_ARRIVAL_PREDICTION_FOR_END_OF_TRIP",
            &mut self.return_arrival_prediction_for_end_of_trip,
        )?;
        override_from(
            &lookup,
            "LARCH_MAX_VEHICLE_REPORT_AGE_SECS",
            &mut self.max_vehicle_report_age_secs,
        )?;
        override_from(
            &lookup,
            "LARCH_HISTORICAL_PREDICTION_HOLD_MINS",
            &mut self.historical_prediction_hold_mins,
        )?;
        override_from(
            &lookup,
            "LARCH_VEHICLE_CONFIG_REFRESH_SECS",
            &mut self.vehicle_config_refresh_secs,
        )?;
        override_from(&lookup, "LARCH_AGENCY_TIMEZONE", &mut self.agency_timezone)?;
        override_from(&lookup, "LARCH_WARM_UP_DAYS", &mut self.warm_up_days)?;

        if let Some(raw) = lookup("LARCH_PARALLEL_THREADS") {
            self.parallel_threads = Some(parse_setting("LARCH_PARALLEL_THREADS", &raw)?);
        }

        if let Some(raw) = lookup("LARCH_LRU_CAPACITY") {
            self.backing_store = BackingStoreKind::Lru {
                capacity: parse_setting("LARCH_LRU_CAPACITY", &raw)?,
            };
        }

        Ok(())
    }

    pub fn parallel_thread_count(&self) -> usize {
        self.parallel_threads
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1)
    }

    pub fn prediction_ttl(&self) -> Duration {
        Duration::from_millis(self.prediction_ttl_ms)
    }

    pub fn max_vehicle_report_age(&self) -> Duration {
        Duration::from_secs(self.max_vehicle_report_age_secs)
    }

    pub fn historical_prediction_hold(&self) -> Duration {
        Duration::from_secs(self.historical_prediction_hold_mins * 60)
    }

    pub fn vehicle_config_refresh(&self) -> Duration {
        Duration::from_secs(self.vehicle_config_refresh_secs)
    }
}

fn override_from<F, T>(lookup: &F, name: &str, target: &mut T) -> LarchResult<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *target = parse_setting(name, &raw)?;
    }
    Ok(())
}

fn parse_setting<T>(name: &str, raw: &str) -> LarchResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| LarchError::Config(format!("{}={:?}: {}", name, raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_ron_gives_defaults() {
        let config = LarchConfig::from_ron_str("()").unwrap();
        assert_eq!(config, LarchConfig::default());
        assert_eq!(config.max_predictions_per_stop, 5);
        assert_eq!(config.historical_prediction_hold(), Duration::from_secs(3600));
    }

    #[test]
    fn partial_ron_keeps_other_defaults() {
        let config = LarchConfig::from_ron_str(
            r#"(
                backing_store: Lru(capacity: 1000),
                parallel_threads: Some(1),
                agency_timezone: "America/Los_Angeles",
                dwell: (max_dwell_ms: 90000),
            )"#,
        )
        .unwrap();

        assert_eq!(config.backing_store, BackingStoreKind::Lru { capacity: 1000 });
        assert_eq!(config.parallel_thread_count(), 1);
        assert_eq!(config.agency_timezone, chrono_tz::America::Los_Angeles);
        assert_eq!(config.dwell.max_dwell_ms, 90_000);
        assert_eq!(config.dwell.min_dwell_ms, 1_000);
        assert_eq!(config.frequency.cache_increments_secs, 10_800);
    }

    #[test]
    fn overrides_apply_and_reject_garbage() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("LARCH_MAX_PREDICTIONS_PER_STOP", "3"),
            ("LARCH_RETURN_ARRIVAL_PREDICTION_FOR_END_OF_TRIP", "true"),
            ("LARCH_AGENCY_TIMEZONE", "Europe/Zurich"),
        ]);

        let mut config = LarchConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.max_predictions_per_stop, 3);
        assert!(config.return_arrival_prediction_for_end_of_trip);
        assert_eq!(config.agency_timezone, chrono_tz::Europe::Zurich);

        let result = config.apply_overrides(|name| {
            (name == "LARCH_WARM_UP_DAYS").then(|| "four".to_string())
        });
        assert!(matches!(result, Err(LarchError::Config(_))));
    }

    #[test]
    fn thread_count_never_zero() {
        let config = LarchConfig {
            parallel_threads: Some(0),
            ..LarchConfig::default()
        };
        assert_eq!(config.parallel_thread_count(), 1);
        assert!(LarchConfig::default().parallel_thread_count() >= 1);
    }
}
