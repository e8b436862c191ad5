//! Destinations for finished exposures.

pub mod fits;

use crate::error::AppResult;
use crate::exposure::ExposureResult;

pub use fits::FitsSink;

/// Consumes a finished exposure. The result's lifetime ends here.
pub trait ResultSink {
    fn persist(&mut self, result: ExposureResult) -> AppResult<()>;
}
