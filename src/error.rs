//! Error types for the camera core.
//!
//! Every fallible core operation returns [`AppResult`], carrying either its
//! success value or exactly one [`CoreError`]. Nothing in the core retries:
//! the first failure in a chain of dependent hardware calls short-circuits the
//! rest and is handed back to the caller unchanged.
//!
//! ## Error Hierarchy
//!
//! - **Session**: `GatewayOpenFailed`, `NoCameraFound`, `CameraUnavailable`,
//!   `SensorUnavailable`, `CoolerUnavailable`. These gate every other operation.
//! - **Exposure**: `DeviceQueryFailed`, `BinningUnsupported`,
//!   `SubframeConfigFailed`, `ExposureStartFailed`, `StatusQueryFailed`,
//!   `DownloadFailed`. Each names the step of the sequence that was rejected.
//! - **Thermal**: `CoolerStateFailed` for a rejected TEC state change.
//! - **Output**: `Sink` and `Io` for problems persisting a finished exposure.
//! - **Config**: load or validation problems in the layered configuration.
//!
//! Silent numeric corrections (minimum exposure, cooler setpoint range) are
//! not errors and never appear here.

use thiserror::Error;

use crate::config::ConfigError;
use crate::driver::DriverError;

/// Convenience alias for results using the core error type.
pub type AppResult<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Could not open camera gateway: {0}")]
    GatewayOpenFailed(String),

    #[error("No cameras were found")]
    NoCameraFound,

    #[error("Camera at index {0} is unavailable")]
    CameraUnavailable(usize),

    #[error("Camera sensor is unavailable")]
    SensorUnavailable,

    #[error("Camera cooler (TEC) is unavailable")]
    CoolerUnavailable,

    #[error("Device query failed: {0}")]
    DeviceQueryFailed(String),

    #[error("Camera does not support on-chip binning ({bin_x}x{bin_y} requested). Pass bin=1 and bin the image manually downstream")]
    BinningUnsupported { bin_x: u32, bin_y: u32 },

    #[error("Subframe configuration failed: {0}")]
    SubframeConfigFailed(String),

    #[error("Exposure start failed: {0}")]
    ExposureStartFailed(String),

    #[error("Status query failed: {0}")]
    StatusQueryFailed(String),

    #[error("Image download failed: {0}")]
    DownloadFailed(String),

    #[error("Cooler state change failed: {0}")]
    CoolerStateFailed(String),

    #[error("Could not write exposure: {0}")]
    Sink(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CoreError {
    /// Wraps a driver rejection into the variant chosen by `make`.
    ///
    /// The driver's message is carried verbatim.
    pub(crate) fn from_driver(make: fn(String) -> CoreError, err: DriverError) -> CoreError {
        make(err.to_string())
    }
}
