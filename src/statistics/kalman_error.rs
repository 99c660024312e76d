// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use serde::{Deserialize, Serialize};

/// Measurement noise estimate of the Kalman filter for one segment.
/// `error` is NaN while unset. `updates` counts real changes of `error`,
/// writes of the current value are not counted.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct KalmanError {
    error: f64,
    updates: u64,
}

impl KalmanError {
    pub fn new(error: f64) -> Self {
        Self { error, updates: 0 }
    }

    pub fn unset() -> Self {
        Self::new(f64::NAN)
    }

    pub fn error(&self) -> f64 {
        self.error
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn is_set(&self) -> bool {
        !self.error.is_nan()
    }

    /// NaN compares equal to NaN here, so repeatedly clearing an unset
    /// error is still a no-op.
    pub fn differs_from(&self, value: f64) -> bool {
        match (self.error.is_nan(), value.is_nan()) {
            (true, true) => false,
            (false, false) => self.error != value,
            _ => true,
        }
    }

    /// Returns the replacement value, or `None` when `value` equals the
    /// current error and nothing should be written.
    pub fn with_error(&self, value: f64) -> Option<Self> {
        match self.differs_from(value) {
            true => Some(Self {
                error: value,
                updates: self.updates + 1,
            }),
            false => None,
        }
    }
}

impl PartialEq for KalmanError {
    fn eq(&self, other: &Self) -> bool {
        !self.differs_from(other.error) && self.updates == other.updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_value_is_not_an_update() {
        let error = KalmanError::new(5.0);
        assert!(error.with_error(5.0).is_none());

        let changed = error.with_error(6.0).unwrap();
        assert_eq!(changed.error(), 6.0);
        assert_eq!(changed.updates(), 1);
    }

    #[test]
    fn nan_means_unset() {
        let unset = KalmanError::unset();
        assert!(!unset.is_set());
        assert!(unset.with_error(f64::NAN).is_none());

        let set = unset.with_error(2.5).unwrap();
        assert!(set.is_set());
        assert_eq!(set.updates(), 1);
    }
}
