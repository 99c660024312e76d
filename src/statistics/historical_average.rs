// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use serde::{Deserialize, Serialize};
use std::fmt;

/// Running mean of a series of observations.
///
/// [`HistoricalAverage::update`] takes `&mut self`, so it can only be called
/// by whoever holds the value exclusively (for example inside a cache entry
/// guard). [`HistoricalAverage::with_update`] leaves the receiver untouched
/// and hands back the replacement for callers that publish a new value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoricalAverage {
    count: u64,
    average: f64,
}

impl HistoricalAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_observation(value: f64) -> Self {
        Self {
            count: 1,
            average: value,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// `None` until at least one observation has been folded in.
    pub fn average(&self) -> Option<f64> {
        match self.count {
            0 => None,
            _ => Some(self.average),
        }
    }

    pub fn update(&mut self, value: f64) {
        *self = self.with_update(value);
    }

    #[must_use]
    pub fn with_update(&self, value: f64) -> Self {
        let count = self.count + 1;
        Self {
            count,
            average: (self.count as f64 * self.average + value) / count as f64,
        }
    }
}

impl fmt::Display for HistoricalAverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HistoricalAverage [count={}, average={}]",
            self.count, self.average
        )
    }
}
