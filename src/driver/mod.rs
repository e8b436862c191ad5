//! Camera driver capability interface
//!
//! Hardware-agnostic view of the vendor SDK consumed by the core. Each device
//! role (gateway, camera, sensor, cooler) is a narrow trait so that the
//! sequencing logic can run against the real SDK binding or the simulated
//! driver in [`sim`] without change.
//!
//! ## Asynchronous operations
//!
//! Operations that talk to the hardware return a [`Promise`] instead of a
//! value. The core never holds a promise open across another call: it passes
//! each one straight to [`settle`], which waits exactly once and releases
//! exactly once. Results are then read back through the matching synchronous
//! getter (`query_info` then `info`, `query_status` then `status`).

pub mod promise;
pub mod sim;

use std::sync::Arc;

use thiserror::Error;

pub use promise::{settle, Promise};

/// Failure reported by the driver for a single operation.
///
/// The message is the SDK's own text and is surfaced to users verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DriverError {
    message: String,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Sensor geometry and operating limits as reported by `query_info`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorInfo {
    pub pixels_x: u32,
    pub pixels_y: u32,
    /// Physical pixel size in microns
    pub pixel_size_x: f32,
    pub pixel_size_y: f32,
    /// Lowest cooler setpoint in degrees C
    pub min_cooler_setpoint: f64,
    /// Highest cooler setpoint in degrees C
    pub max_cooler_setpoint: f64,
    pub max_bin_x: u32,
    pub max_bin_y: u32,
    /// Shortest exposure in seconds
    pub min_exposure_duration: f64,
    /// Exposure timing resolution in seconds
    pub exposure_precision: f64,
}

/// Region read out from the sensor, with its binning factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subframe {
    pub top: u32,
    pub left: u32,
    pub width: u32,
    pub height: u32,
    pub bin_x: u32,
    pub bin_y: u32,
}

/// Options passed to `start_exposure`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureOptions {
    /// Duration in seconds
    pub duration: f64,
    pub bin_x: u32,
    pub bin_y: u32,
    /// Vendor readout mode index
    pub readout_mode: u32,
    pub is_light_frame: bool,
    pub use_rbi_preflash: bool,
    pub use_ext_trigger: bool,
}

/// State of the main sensor as reported in [`CameraStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState {
    Idle,
    Exposing,
    ReadingOut,
    ReadyToDownload,
}

/// Snapshot returned by `Camera::status` after a `query_status`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraStatus {
    pub main_sensor_state: SensorState,
    /// Cooler drive level in percent
    pub cooler_power: f64,
    pub heat_sink_temperature: f64,
    pub sensor_temperature: f64,
}

/// Optional camera features discovered through `query_capability`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    OnChipBinning,
}

/// Writable sensor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorSetting {
    UseOnChipBinning,
}

/// Metadata attached by the driver to a downloaded image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    /// Exposure duration actually used, in seconds
    pub exposure_duration: f64,
    pub bin_x: u32,
    pub bin_y: u32,
    pub is_light_frame: bool,
}

/// The sensor's latest image. Taking it out of the sensor moves the buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub buffer: Vec<u16>,
    pub metadata: ImageMetadata,
}

/// Entry point of a driver implementation.
pub trait Backend: Send + Sync {
    /// Short name used in logs (e.g. "simulated")
    fn name(&self) -> &str;

    /// Open a gateway to the attached devices
    fn open(&self) -> Result<Box<dyn Gateway>, DriverError>;
}

/// Device discovery and lifetime of the driver connection.
pub trait Gateway: Send + Sync {
    /// Number of cameras currently attached
    fn camera_count(&self) -> usize;

    /// Camera at `index`, or `None` if the driver cannot hand it out
    fn camera(&self, index: usize) -> Option<Arc<dyn Camera>>;

    /// Release the gateway. Called once when the session ends.
    fn close(&self);
}

pub trait Camera: Send + Sync {
    fn sensor(&self, index: usize) -> Option<Arc<dyn Sensor>>;

    fn tec(&self) -> Option<Arc<dyn Cooler>>;

    fn query_status(&self) -> Box<dyn Promise>;

    /// Status captured by the last settled `query_status`
    fn status(&self) -> CameraStatus;

    fn query_capability(&self) -> Box<dyn Promise>;

    /// Whether the camera reported `capability` in the last settled `query_capability`
    fn capability(&self, capability: Capability) -> bool;
}

pub trait Sensor: Send + Sync {
    fn query_info(&self) -> Box<dyn Promise>;

    /// Info captured by the last settled `query_info`
    fn info(&self) -> SensorInfo;

    fn set_subframe(&self, subframe: Subframe) -> Box<dyn Promise>;

    fn set_setting(&self, setting: SensorSetting, value: u32);

    fn start_exposure(&self, options: ExposureOptions) -> Box<dyn Promise>;

    fn start_download(&self) -> Box<dyn Promise>;

    /// Move the latest downloaded image out of the sensor
    fn take_image(&self) -> Option<Image>;
}

/// Thermoelectric cooler.
pub trait Cooler: Send + Sync {
    fn enabled(&self) -> bool;

    /// Current setpoint in degrees C
    fn setpoint(&self) -> f64;

    fn set_state(&self, enabled: bool, setpoint: f64) -> Box<dyn Promise>;
}
