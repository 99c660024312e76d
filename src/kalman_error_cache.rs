// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Per segment Kalman filter error terms.

use crate::backing_store::{BackingStore, BackingStoreKind};
use crate::cache_keys::{KalmanErrorCacheKey, StopPathIndices};
use crate::statistics::KalmanError;
use std::sync::Arc;
use tracing::debug;

pub struct ErrorCache {
    store: Arc<dyn BackingStore<KalmanErrorCacheKey, KalmanError>>,
}

impl ErrorCache {
    pub fn new(kind: BackingStoreKind) -> Self {
        Self {
            store: kind.build(),
        }
    }

    pub fn get_error_value(&self, key: &KalmanErrorCacheKey) -> Option<KalmanError> {
        self.store.get(key)
    }

    pub fn get_error_value_for_indices(&self, indices: &StopPathIndices) -> Option<KalmanError> {
        self.get_error_value(&KalmanErrorCacheKey::from(indices))
    }

    /// Stored error, or a fresh term holding `default` when the segment has
    /// never been observed. Nothing is written.
    pub fn get_error_value_or(&self, key: &KalmanErrorCacheKey, default: f64) -> KalmanError {
        self.get_error_value(key)
            .unwrap_or_else(|| KalmanError::new(default))
    }

    pub fn put_error_value(&self, key: KalmanErrorCacheKey, value: f64) {
        debug!("Putting {} for {}", value, key);

        self.store.compute(key, &mut |current| match current {
            None => Some(KalmanError::new(value)),
            Some(existing) => existing.with_error(value),
        });
    }

    pub fn put_error_value_for_indices(&self, indices: &StopPathIndices, value: f64) {
        self.put_error_value(KalmanErrorCacheKey::from(indices), value);
    }

    pub fn get_keys(&self) -> Vec<KalmanErrorCacheKey> {
        self.store.keys()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl Default for ErrorCache {
    fn default() -> Self {
        Self::new(BackingStoreKind::default())
    }
}
