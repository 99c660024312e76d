// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

pub mod historical_average;
pub mod kalman_error;

pub use historical_average::HistoricalAverage;
pub use kalman_error::KalmanError;
