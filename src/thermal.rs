//! Thermoelectric cooler control
//!
//! Setpoints are clamped into the range the sensor reports before they reach
//! the hardware. Clamping is a correction, not a failure: the caller gets the
//! value actually applied back and can report it.

use std::fmt;

use tracing::{info, warn};

use crate::device_info::DeviceInfo;
use crate::driver::settle;
use crate::error::{AppResult, CoreError};
use crate::session::{CameraHandle, CoolerHandle};

/// Setpoint used when switching the cooler off. The driver ignores it.
const DISABLED_SETPOINT: f64 = 0.0;

/// A cooler state ready to be applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoolerTarget {
    pub enabled: bool,
    /// Degrees C
    pub setpoint: f64,
}

impl CoolerTarget {
    /// Enabled target with `requested` clamped to the sensor's setpoint range.
    ///
    /// A NaN request resolves to the warmest permitted setpoint.
    pub fn clamped(info: &DeviceInfo, requested: f64) -> Self {
        let (min, max) = (info.cooler_setpoint_min, info.cooler_setpoint_max);
        let setpoint = if requested.is_nan() || requested > max {
            max
        } else if requested < min {
            min
        } else {
            requested
        };
        Self {
            enabled: true,
            setpoint,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            setpoint: DISABLED_SETPOINT,
        }
    }
}

/// Cooler and temperature readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoolerInfo {
    pub cooler_enabled: bool,
    pub cooler_setpoint: f64,
    /// Drive level in percent
    pub cooler_power: f64,
    pub heatsink_temp: f64,
    pub sensor_temp: f64,
}

impl fmt::Display for CoolerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Cooler: {}",
            if self.cooler_enabled {
                "enabled"
            } else {
                "disabled"
            }
        )?;
        writeln!(f, "Setpoint: {:.2} degrees C", self.cooler_setpoint)?;
        writeln!(f, "Cooler power: {:.1}%", self.cooler_power)?;
        writeln!(f, "Heatsink temperature: {:.2} degrees C", self.heatsink_temp)?;
        write!(f, "Sensor temperature: {:.2} degrees C", self.sensor_temp)
    }
}

async fn apply(cooler: &CoolerHandle<'_>, target: CoolerTarget) -> AppResult<()> {
    settle(cooler.driver().set_state(target.enabled, target.setpoint))
        .await
        .map_err(|err| CoreError::from_driver(CoreError::CoolerStateFailed, err))
}

/// Enable cooling at `requested` degrees C, clamped to the sensor's range.
///
/// Returns the setpoint actually applied.
pub async fn set_target(
    cooler: &CoolerHandle<'_>,
    info: &DeviceInfo,
    requested: f64,
) -> AppResult<f64> {
    let target = CoolerTarget::clamped(info, requested);
    if target.setpoint != requested {
        warn!(
            requested,
            applied = target.setpoint,
            min = info.cooler_setpoint_min,
            max = info.cooler_setpoint_max,
            "cooler setpoint clamped to sensor range"
        );
    }

    apply(cooler, target).await?;
    info!(setpoint = target.setpoint, "cooler enabled");
    Ok(target.setpoint)
}

/// Switch cooling off.
pub async fn disable(cooler: &CoolerHandle<'_>) -> AppResult<()> {
    apply(cooler, CoolerTarget::disabled()).await?;
    info!("cooler disabled");
    Ok(())
}

/// Query camera status and combine it with the cooler's own state.
pub async fn read_status(
    camera: &CameraHandle<'_>,
    cooler: &CoolerHandle<'_>,
) -> AppResult<CoolerInfo> {
    settle(camera.driver().query_status())
        .await
        .map_err(|err| CoreError::from_driver(CoreError::StatusQueryFailed, err))?;
    let status = camera.driver().status();

    Ok(CoolerInfo {
        cooler_enabled: cooler.driver().enabled(),
        cooler_setpoint: cooler.driver().setpoint(),
        cooler_power: status.cooler_power,
        heatsink_temp: status.heat_sink_temperature,
        sensor_temp: status.sensor_temperature,
    })
}
