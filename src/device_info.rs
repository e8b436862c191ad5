//! Sensor geometry and operating limits.

use std::fmt;

use tracing::debug;

use crate::driver::{settle, SensorInfo};
use crate::error::{AppResult, CoreError};
use crate::session::SensorHandle;

/// Immutable snapshot of the sensor's geometry and limits.
///
/// Resolved once per session and only read afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceInfo {
    pub pixels_x: u32,
    pub pixels_y: u32,
    /// Physical pixel size in microns
    pub pixel_size_x: f32,
    pub pixel_size_y: f32,
    /// Coldest permitted cooler setpoint in degrees C
    pub cooler_setpoint_min: f64,
    /// Warmest permitted cooler setpoint in degrees C
    pub cooler_setpoint_max: f64,
    pub bin_x_max: u32,
    pub bin_y_max: u32,
    /// Shortest supported exposure in seconds
    pub exposure_duration_min: f64,
    /// Exposure timing resolution in seconds
    pub exposure_precision: f64,
}

impl From<SensorInfo> for DeviceInfo {
    fn from(info: SensorInfo) -> Self {
        Self {
            pixels_x: info.pixels_x,
            pixels_y: info.pixels_y,
            pixel_size_x: info.pixel_size_x,
            pixel_size_y: info.pixel_size_y,
            cooler_setpoint_min: info.min_cooler_setpoint,
            cooler_setpoint_max: info.max_cooler_setpoint,
            bin_x_max: info.max_bin_x,
            bin_y_max: info.max_bin_y,
            exposure_duration_min: info.min_exposure_duration,
            exposure_precision: info.exposure_precision,
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sensor: {} x {} pixels", self.pixels_x, self.pixels_y)?;
        writeln!(
            f,
            "Pixel size: {} x {} um",
            self.pixel_size_x, self.pixel_size_y
        )?;
        writeln!(
            f,
            "Cooler setpoint range: {} to {} degrees C",
            self.cooler_setpoint_min, self.cooler_setpoint_max
        )?;
        writeln!(f, "Max binning: {} x {}", self.bin_x_max, self.bin_y_max)?;
        write!(
            f,
            "Min exposure: {} s (precision {} s)",
            self.exposure_duration_min, self.exposure_precision
        )
    }
}

/// Query the sensor and snapshot its reported info.
///
/// A rejected query is terminal for the caller; there is no retry.
pub async fn resolve(sensor: &SensorHandle<'_>) -> AppResult<DeviceInfo> {
    debug!("querying sensor info");
    settle(sensor.driver().query_info())
        .await
        .map_err(|err| CoreError::from_driver(CoreError::DeviceQueryFailed, err))?;

    let info = DeviceInfo::from(sensor.driver().info());
    debug!(?info, "sensor info resolved");
    Ok(info)
}
