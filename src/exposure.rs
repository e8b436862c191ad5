//! Exposure sequencing
//!
//! Turns an [`ExposureRequest`] into an ordered chain of driver operations and
//! returns either the downloaded frame or the first failure.
//!
//! ## Sequence
//!
//! 1. Resolve binning. Factors above 1 require the camera's on-chip binning
//!    capability; without it the request fails before any configuration call.
//! 2. Build a full-sensor subframe at the top-left origin.
//! 3. Clamp the duration up to the sensor minimum (a silent correction).
//! 4. Configure the subframe.
//! 5. Start the exposure (preflash and external trigger always off).
//! 6. Poll camera status until the sensor reports ready to download.
//! 7. Download.
//! 8. Move the image out of the driver into an [`ExposureResult`].
//!
//! Each step settles its promise before the next is issued. The first
//! rejection ends the sequence; no cleanup call is made on the device.
//!
//! ## Polling
//!
//! The status loop has no timeout. An exposure that never becomes ready blocks
//! the caller until the process exits. [`PollPolicy`] can add a fixed pause
//! between status queries, which changes load on the driver but not when the
//! loop ends.

use std::fmt;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::device_info::{self, DeviceInfo};
use crate::driver::{settle, Capability, ExposureOptions, SensorSetting, SensorState, Subframe};
use crate::error::{AppResult, CoreError};
use crate::session::{CameraHandle, SensorHandle};

/// Readout speed/noise trade-off, by vendor index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ReadoutMode {
    Low = 0,
    #[default]
    Medium = 1,
    High = 2,
    LowStackPro = 3,
    MediumStackPro = 4,
    HighStackPro = 5,
}

impl ReadoutMode {
    /// Index understood by the driver
    pub fn index(self) -> u32 {
        self as u32
    }
}

/// Light frame (shutter open) or dark frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Light,
    Dark,
}

impl FrameType {
    pub fn is_light(self) -> bool {
        matches!(self, FrameType::Light)
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameType::Light => write!(f, "Light Frame"),
            FrameType::Dark => write!(f, "Dark Frame"),
        }
    }
}

/// What the user asked for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureRequest {
    /// Requested duration in seconds; may be below the sensor minimum
    pub duration: f64,
    pub frame_type: FrameType,
    pub bin_x: u32,
    pub bin_y: u32,
    pub readout_mode: ReadoutMode,
}

impl ExposureRequest {
    /// Unbinned light frame at the default readout mode.
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            frame_type: FrameType::Light,
            bin_x: 1,
            bin_y: 1,
            readout_mode: ReadoutMode::default(),
        }
    }

    pub fn dark(mut self) -> Self {
        self.frame_type = FrameType::Dark;
        self
    }

    pub fn binning(mut self, bin_x: u32, bin_y: u32) -> Self {
        self.bin_x = bin_x;
        self.bin_y = bin_y;
        self
    }

    pub fn readout(mut self, mode: ReadoutMode) -> Self {
        self.readout_mode = mode;
        self
    }

    /// Whether any axis asks for binning
    pub fn wants_binning(&self) -> bool {
        self.bin_x != 1 || self.bin_y != 1
    }
}

/// Where binning happens for one exposure. Exactly one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinningMode {
    /// Binning expressed in the subframe; on-chip binning stays off
    Subframe { bin_x: u32, bin_y: u32 },
    /// The sensor bins internally; the subframe stays at 1x1
    OnChip { bin_x: u32, bin_y: u32 },
}

impl BinningMode {
    /// Factors carried in the exposure options
    pub fn factors(self) -> (u32, u32) {
        match self {
            BinningMode::Subframe { bin_x, bin_y } | BinningMode::OnChip { bin_x, bin_y } => {
                (bin_x, bin_y)
            }
        }
    }

    pub fn is_on_chip(self) -> bool {
        matches!(self, BinningMode::OnChip { .. })
    }
}

/// Final parameters for one exposure, derived from a request and the sensor limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedExposurePlan {
    pub subframe: Subframe,
    /// Duration in seconds, never below the sensor minimum
    pub duration: f64,
    pub binning: BinningMode,
    pub readout_mode: ReadoutMode,
    pub frame_type: FrameType,
}

impl ResolvedExposurePlan {
    /// Decide binning, geometry and duration.
    ///
    /// `on_chip_supported` is only consulted when the request bins.
    pub fn resolve(
        request: &ExposureRequest,
        info: &DeviceInfo,
        on_chip_supported: bool,
    ) -> AppResult<Self> {
        let binning = if request.wants_binning() {
            if !on_chip_supported {
                return Err(CoreError::BinningUnsupported {
                    bin_x: request.bin_x,
                    bin_y: request.bin_y,
                });
            }
            BinningMode::OnChip {
                bin_x: request.bin_x,
                bin_y: request.bin_y,
            }
        } else {
            BinningMode::Subframe { bin_x: 1, bin_y: 1 }
        };

        let (subframe_bin_x, subframe_bin_y) = match binning {
            BinningMode::Subframe { bin_x, bin_y } => (bin_x, bin_y),
            BinningMode::OnChip { .. } => (1, 1),
        };
        let subframe = Subframe {
            top: 0,
            left: 0,
            width: info.pixels_x,
            height: info.pixels_y,
            bin_x: subframe_bin_x,
            bin_y: subframe_bin_y,
        };

        let duration = request.duration.max(info.exposure_duration_min);
        if duration > request.duration {
            warn!(
                requested = request.duration,
                applied = duration,
                "exposure duration clamped to sensor minimum"
            );
        }

        Ok(Self {
            subframe,
            duration,
            binning,
            readout_mode: request.readout_mode,
            frame_type: request.frame_type,
        })
    }

    /// Options for `start_exposure`. Preflash and external trigger are always off.
    pub fn exposure_options(&self) -> ExposureOptions {
        let (bin_x, bin_y) = self.binning.factors();
        ExposureOptions {
            duration: self.duration,
            bin_x,
            bin_y,
            readout_mode: self.readout_mode.index(),
            is_light_frame: self.frame_type.is_light(),
            use_rbi_preflash: false,
            use_ext_trigger: false,
        }
    }
}

/// A downloaded frame and the metadata it was taken with.
///
/// Owns the pixel buffer; the driver keeps no reference to it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureResult {
    pub buffer: Vec<u16>,
    pub width: u32,
    pub height: u32,
    /// Exposure duration actually used, in seconds
    pub exposure_duration: f64,
    pub bin_x: u32,
    pub bin_y: u32,
    pub frame_type: FrameType,
}

impl ExposureResult {
    pub fn element_count(&self) -> usize {
        self.buffer.len()
    }
}

/// Progress of one exposure. `Complete` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposurePhase {
    Idle,
    Configuring,
    Exposing,
    Polling,
    Downloading,
    Complete,
    Failed,
}

impl ExposurePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExposurePhase::Complete | ExposurePhase::Failed)
    }

    /// Whether `next` directly follows this phase on the success path
    pub fn can_advance_to(self, next: ExposurePhase) -> bool {
        use ExposurePhase::*;
        match (self, next) {
            (_, Failed) => !self.is_terminal(),
            (Idle, Configuring)
            | (Configuring, Exposing)
            | (Exposing, Polling)
            | (Polling, Downloading)
            | (Downloading, Complete) => true,
            _ => false,
        }
    }
}

struct PhaseTracker {
    phase: ExposurePhase,
}

impl PhaseTracker {
    fn new() -> Self {
        Self {
            phase: ExposurePhase::Idle,
        }
    }

    fn advance(&mut self, next: ExposurePhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "invalid exposure transition {:?} -> {:?}",
            self.phase,
            next
        );
        debug!(from = ?self.phase, to = ?next, "exposure phase");
        self.phase = next;
    }

    fn fail(&mut self, err: &CoreError) {
        warn!(phase = ?self.phase, error = %err, "exposure failed");
        self.phase = ExposurePhase::Failed;
    }
}

/// Pause between status queries while waiting for the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollPolicy {
    pub interval: Duration,
}

/// Runs exposures against an acquired camera and sensor.
#[derive(Debug, Clone, Default)]
pub struct ExposureSequencer {
    poll: PollPolicy,
}

impl ExposureSequencer {
    pub fn new(poll: PollPolicy) -> Self {
        Self { poll }
    }

    /// Resolve device info, then run one exposure.
    pub async fn run(
        &self,
        camera: &CameraHandle<'_>,
        sensor: &SensorHandle<'_>,
        request: &ExposureRequest,
    ) -> AppResult<ExposureResult> {
        let info = device_info::resolve(sensor).await?;
        self.run_with_info(camera, sensor, &info, request).await
    }

    /// Run one exposure using an already resolved [`DeviceInfo`].
    pub async fn run_with_info(
        &self,
        camera: &CameraHandle<'_>,
        sensor: &SensorHandle<'_>,
        info: &DeviceInfo,
        request: &ExposureRequest,
    ) -> AppResult<ExposureResult> {
        let mut tracker = PhaseTracker::new();
        let outcome = self
            .sequence(&mut tracker, camera, sensor, info, request)
            .await;
        if let Err(err) = &outcome {
            tracker.fail(err);
        }
        outcome
    }

    async fn sequence(
        &self,
        tracker: &mut PhaseTracker,
        camera: &CameraHandle<'_>,
        sensor: &SensorHandle<'_>,
        info: &DeviceInfo,
        request: &ExposureRequest,
    ) -> AppResult<ExposureResult> {
        tracker.advance(ExposurePhase::Configuring);

        let on_chip_supported = if request.wants_binning() {
            query_on_chip_binning(camera).await?
        } else {
            false
        };
        let plan = ResolvedExposurePlan::resolve(request, info, on_chip_supported)?;
        debug!(?plan, "exposure plan resolved");

        if plan.binning.is_on_chip() {
            sensor
                .driver()
                .set_setting(SensorSetting::UseOnChipBinning, 1);
        }

        settle(sensor.driver().set_subframe(plan.subframe))
            .await
            .map_err(|err| CoreError::from_driver(CoreError::SubframeConfigFailed, err))?;

        settle(sensor.driver().start_exposure(plan.exposure_options()))
            .await
            .map_err(|err| CoreError::from_driver(CoreError::ExposureStartFailed, err))?;
        tracker.advance(ExposurePhase::Exposing);
        info!(
            duration = plan.duration,
            frame = %plan.frame_type,
            "exposure started"
        );

        tracker.advance(ExposurePhase::Polling);
        let polls = self.wait_until_ready(camera).await?;
        debug!(polls, "sensor ready to download");

        tracker.advance(ExposurePhase::Downloading);
        settle(sensor.driver().start_download())
            .await
            .map_err(|err| CoreError::from_driver(CoreError::DownloadFailed, err))?;

        let image = sensor.driver().take_image().ok_or_else(|| {
            CoreError::DownloadFailed("Download completed without an image".to_string())
        })?;
        let metadata = image.metadata;
        let result = ExposureResult {
            buffer: image.buffer,
            width: metadata.width,
            height: metadata.height,
            exposure_duration: metadata.exposure_duration,
            bin_x: metadata.bin_x,
            bin_y: metadata.bin_y,
            frame_type: if metadata.is_light_frame {
                FrameType::Light
            } else {
                FrameType::Dark
            },
        };

        tracker.advance(ExposurePhase::Complete);
        info!(
            width = result.width,
            height = result.height,
            elements = result.element_count(),
            "exposure complete"
        );
        Ok(result)
    }

    /// Query status until the sensor is ready. Returns the number of queries made.
    async fn wait_until_ready(&self, camera: &CameraHandle<'_>) -> AppResult<usize> {
        let mut polls = 0;
        loop {
            settle(camera.driver().query_status())
                .await
                .map_err(|err| CoreError::from_driver(CoreError::StatusQueryFailed, err))?;
            polls += 1;

            if camera.driver().status().main_sensor_state == SensorState::ReadyToDownload {
                return Ok(polls);
            }
            if !self.poll.interval.is_zero() {
                tokio::time::sleep(self.poll.interval).await;
            }
        }
    }
}

async fn query_on_chip_binning(camera: &CameraHandle<'_>) -> AppResult<bool> {
    settle(camera.driver().query_capability())
        .await
        .map_err(|err| CoreError::from_driver(CoreError::DeviceQueryFailed, err))?;
    Ok(camera.driver().capability(Capability::OnChipBinning))
}
