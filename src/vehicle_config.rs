// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::clock::Clock;
use crate::error::LarchResult;
use crate::vehicle_state::AvlReport;
use compact_str::CompactString;
use futures::future::BoxFuture;
use scc::HashMap as SccHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{error, info};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VehicleConfig {
    pub id: CompactString,
    pub tracker_id: Option<CompactString>,
    pub name: Option<CompactString>,
    pub description: Option<CompactString>,
    pub vehicle_type: Option<i32>,
    pub non_passenger_vehicle: bool,
}

impl VehicleConfig {
    /// Config for a vehicle first seen in the feed. Only the id is known.
    pub fn for_new_vehicle(id: impl Into<CompactString>) -> Self {
        Self {
            id: id.into(),
            tracker_id: None,
            name: None,
            description: None,
            vehicle_type: None,
            non_passenger_vehicle: false,
        }
    }
}

pub trait VehicleConfigSource: Send + Sync {
    fn load_all(&self) -> BoxFuture<'_, LarchResult<Vec<VehicleConfig>>>;

    fn store(&self, config: VehicleConfig) -> BoxFuture<'_, LarchResult<()>>;
}

#[derive(Debug, Default)]
pub struct InMemoryVehicleConfigSource {
    configs: scc::HashMap<CompactString, VehicleConfig>,
    loads: AtomicU64,
}

impl InMemoryVehicleConfigSource {
    pub fn new(configs: Vec<VehicleConfig>) -> Self {
        let source = Self::default();
        for config in configs {
            let _ = source.configs.insert(config.id.clone(), config);
        }
        source
    }

    /// How many times `load_all` has been called.
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn contains(&self, vehicle_id: &str) -> bool {
        self.configs.contains(vehicle_id)
    }

    pub fn upsert(&self, config: VehicleConfig) {
        self.configs
            .entry(config.id.clone())
            .and_modify(|existing| *existing = config.clone())
            .or_insert(config);
    }
}

impl VehicleConfigSource for InMemoryVehicleConfigSource {
    fn load_all(&self) -> BoxFuture<'_, LarchResult<Vec<VehicleConfig>>> {
        Box::pin(async move {
            self.loads.fetch_add(1, Ordering::Relaxed);
            let mut configs = Vec::with_capacity(self.configs.len());
            self.configs.scan(|_, config| configs.push(config.clone()));
            Ok(configs)
        })
    }

    fn store(&self, config: VehicleConfig) -> BoxFuture<'_, LarchResult<()>> {
        Box::pin(async move {
            self.upsert(config);
            Ok(())
        })
    }
}

/// Known vehicles, loaded lazily from a [`VehicleConfigSource`] and extended
/// as new vehicles show up in the AVL feed.
pub struct VehicleConfigCache {
    by_id: SccHashMap<CompactString, VehicleConfig>,
    by_tracker_id: SccHashMap<CompactString, VehicleConfig>,
    source: Arc<dyn VehicleConfigSource>,
    clock: Arc<dyn Clock>,
    refresh_interval: Duration,
    last_read_ms: AtomicU64,
    /// Serializes reads from the source.
    reload_lock: tokio::sync::Mutex<()>,
}

impl VehicleConfigCache {
    pub fn new(source: Arc<dyn VehicleConfigSource>, clock: Arc<dyn Clock>, refresh_interval: Duration) -> Self {
        Self {
            by_id: SccHashMap::new(),
            by_tracker_id: SccHashMap::new(),
            source,
            clock,
            refresh_interval,
            last_read_ms: AtomicU64::new(0),
            reload_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Reads every config from the source. A failed read is logged and the
    /// cache keeps what it had.
    async fn read_from_source(&self) {
        match self.source.load_all().await {
            Ok(configs) => {
                for config in configs {
                    if let Some(tracker_id) = &config.tracker_id {
                        self.by_tracker_id
                            .entry(tracker_id.clone())
                            .and_modify(|existing| *existing = config.clone())
                            .or_insert_with(|| config.clone());
                    }
                    self.by_id
                        .entry(config.id.clone())
                        .and_modify(|existing| *existing = config.clone())
                        .or_insert(config);
                }
                self.last_read_ms
                    .store(self.clock.now_ms(), Ordering::Release);
            }
            Err(err) => {
                error!("Exception reading in VehicleConfig data. {}", err);
            }
        }
    }

    async fn read_if_empty(&self) {
        if !self.by_id.is_empty() {
            return;
        }
        let _guard = self.reload_lock.lock().await;
        if self.by_id.is_empty() {
            self.read_from_source().await;
        }
    }

    async fn read_if_old(&self) {
        let _guard = self.reload_lock.lock().await;
        let last_read_ms = self.last_read_ms.load(Ordering::Acquire);
        if self.clock.now_ms() > last_read_ms + self.refresh_interval.as_millis() as u64 {
            self.read_from_source().await;
        }
    }

    /// Registers the vehicle behind an AVL report. New vehicles are written
    /// back to the source and only counted as known once that write worked,
    /// so a failed write is retried on the next report. Schedule based
    /// reports are ignored.
    pub async fn cache_vehicle_config(&self, report: &AvlReport) -> LarchResult<()> {
        if report.is_schedule_based {
            return Ok(());
        }

        self.read_if_empty().await;

        if self.by_id.contains(report.vehicle_id.as_str()) {
            return Ok(());
        }

        info!(
            "Encountered new vehicle where vehicleId={} so updating vehicle cache and writing the VehicleConfig to database.",
            report.vehicle_id
        );
        let config = VehicleConfig::for_new_vehicle(report.vehicle_id.clone());
        self.source.store(config.clone()).await?;
        let _ = self.by_id.insert(report.vehicle_id.clone(), config);
        Ok(())
    }

    pub async fn get_vehicle_config_by_tracker_id(&self, tracker_id: &str) -> Option<VehicleConfig> {
        if let Some(config) = self.by_tracker_id.read(tracker_id, |_, c| c.clone()) {
            return Some(config);
        }

        self.read_if_old().await;
        self.by_tracker_id.read(tracker_id, |_, c| c.clone())
    }

    pub async fn get_vehicle_config(&self, vehicle_id: &str) -> Option<VehicleConfig> {
        self.read_if_empty().await;
        self.by_id.read(vehicle_id, |_, c| c.clone())
    }

    pub async fn get_vehicle_configs(&self) -> Vec<VehicleConfig> {
        self.read_if_empty().await;
        let mut configs = Vec::with_capacity(self.by_id.len());
        self.by_id.scan(|_, config| configs.push(config.clone()));
        configs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SettableClock;
    use crate::error::LarchError;
    use crate::vehicle_state::test_support::report;

    const NOW: u64 = 1_717_200_000_000;

    fn tracked(id: &str, tracker: &str) -> VehicleConfig {
        VehicleConfig {
            tracker_id: Some(tracker.into()),
            ..VehicleConfig::for_new_vehicle(id)
        }
    }

    fn cache_over(source: Arc<InMemoryVehicleConfigSource>) -> (VehicleConfigCache, Arc<SettableClock>) {
        let clock = Arc::new(SettableClock::new(NOW));
        let cache = VehicleConfigCache::new(source, clock.clone(), Duration::from_secs(300));
        (cache, clock)
    }

    #[tokio::test]
    async fn new_vehicle_is_persisted_once() {
        let source = Arc::new(InMemoryVehicleConfigSource::new(vec![tracked("bus-1", "imei-1")]));
        let (cache, _) = cache_over(source.clone());

        cache.cache_vehicle_config(&report("bus-9", NOW)).await.unwrap();
        cache.cache_vehicle_config(&report("bus-9", NOW + 1)).await.unwrap();

        assert!(source.contains("bus-9"));
        assert_eq!(source.load_count(), 1);
        assert_eq!(cache.get_vehicle_configs().await.len(), 2);
    }

    /// Refuses the first `failures` writes.
    struct RefusingSource {
        inner: InMemoryVehicleConfigSource,
        failures: AtomicU64,
    }

    impl VehicleConfigSource for RefusingSource {
        fn load_all(&self) -> BoxFuture<'_, LarchResult<Vec<VehicleConfig>>> {
            self.inner.load_all()
        }

        fn store(&self, config: VehicleConfig) -> BoxFuture<'_, LarchResult<()>> {
            let refuse = self
                .failures
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
                .is_ok();
            if refuse {
                return Box::pin(async move { Err(LarchError::Pool(String::from("connection refused"))) });
            }
            self.inner.store(config)
        }
    }

    #[tokio::test]
    async fn failed_write_is_retried_on_next_report() {
        let source = Arc::new(RefusingSource {
            inner: InMemoryVehicleConfigSource::default(),
            failures: AtomicU64::new(1),
        });
        let cache = VehicleConfigCache::new(
            source.clone(),
            Arc::new(SettableClock::new(NOW)),
            Duration::from_secs(300),
        );

        assert!(cache.cache_vehicle_config(&report("bus-9", NOW)).await.is_err());
        assert!(!source.inner.contains("bus-9"));
        assert!(cache.get_vehicle_config("bus-9").await.is_none());

        cache.cache_vehicle_config(&report("bus-9", NOW + 1)).await.unwrap();
        assert!(source.inner.contains("bus-9"));
        assert!(cache.get_vehicle_config("bus-9").await.is_some());
    }

    #[tokio::test]
    async fn schedule_based_reports_are_ignored() {
        let source = Arc::new(InMemoryVehicleConfigSource::default());
        let (cache, _) = cache_over(source.clone());

        let mut placeholder = report("sched-1", NOW);
        placeholder.is_schedule_based = true;
        cache.cache_vehicle_config(&placeholder).await.unwrap();

        assert!(!source.contains("sched-1"));
        assert_eq!(source.load_count(), 0);
    }

    #[tokio::test]
    async fn tracker_miss_rereads_only_when_old() {
        let source = Arc::new(InMemoryVehicleConfigSource::new(vec![tracked("bus-1", "imei-1")]));
        let (cache, clock) = cache_over(source.clone());

        assert_eq!(
            cache.get_vehicle_config_by_tracker_id("imei-1").await.map(|c| c.id),
            Some("bus-1".into())
        );
        assert_eq!(source.load_count(), 1);

        source.upsert(tracked("bus-2", "imei-2"));
        assert!(cache.get_vehicle_config_by_tracker_id("imei-2").await.is_none());
        assert_eq!(source.load_count(), 1);

        clock.advance(301_000);
        assert_eq!(
            cache.get_vehicle_config_by_tracker_id("imei-2").await.map(|c| c.id),
            Some("bus-2".into())
        );
        assert_eq!(source.load_count(), 2);
    }
}
