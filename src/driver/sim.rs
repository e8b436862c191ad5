//! Simulated camera driver
//!
//! Implements the full capability interface without hardware so the core can
//! be exercised end to end. Used by the test suite and by the `dfcore` binary
//! when no vendor backend is linked.
//!
//! The simulation is deliberately literal about the contract:
//! - every operation's effect is decided when it is issued; the returned
//!   promise only carries the outcome and a configurable latency
//! - a sensor reports `ReadyToDownload` once the (scaled) exposure time has
//!   elapsed and at least `busy_polls` status queries saw it exposing
//! - faults can be injected per operation through [`SimFaults`]
//! - every issued call is appended to a journal, and outstanding promises are
//!   counted, so tests can check ordering and wait/release pairing via
//!   [`SimProbe`]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use super::{
    Backend, Camera, CameraStatus, Capability, Cooler, DriverError, ExposureOptions, Gateway,
    Image, ImageMetadata, Promise, Sensor, SensorInfo, SensorSetting, SensorState, Subframe,
};

const BIAS_LEVEL: u32 = 1000;

/// Parameters of the simulated device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Number of cameras the gateway reports
    pub camera_count: usize,
    /// Whether the camera hands out a sensor
    pub has_sensor: bool,
    /// Whether the camera hands out a TEC
    pub has_cooler: bool,
    pub pixels_x: u32,
    pub pixels_y: u32,
    pub pixel_size_x: f32,
    pub pixel_size_y: f32,
    pub cooler_setpoint_min: f64,
    pub cooler_setpoint_max: f64,
    pub max_bin_x: u32,
    pub max_bin_y: u32,
    pub min_exposure_duration: f64,
    pub exposure_precision: f64,
    /// Whether the camera reports on-chip binning support
    pub on_chip_binning: bool,
    /// Delay before each promise resolves
    pub latency_ms: u64,
    /// Multiplier applied to exposure durations (0 = instantaneous)
    pub time_scale: f64,
    /// Status queries that must report `Exposing` before the sensor is ready
    pub busy_polls: usize,
    pub ambient_temperature: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            camera_count: 1,
            has_sensor: true,
            has_cooler: true,
            pixels_x: 1024,
            pixels_y: 1024,
            pixel_size_x: 13.5,
            pixel_size_y: 13.5,
            cooler_setpoint_min: -25.0,
            cooler_setpoint_max: 25.0,
            max_bin_x: 4,
            max_bin_y: 4,
            min_exposure_duration: 0.1,
            exposure_precision: 0.001,
            on_chip_binning: true,
            latency_ms: 5,
            time_scale: 1.0,
            busy_polls: 0,
            ambient_temperature: 20.0,
        }
    }
}

impl SimConfig {
    /// A configuration that completes instantly, for tests
    pub fn instant() -> Self {
        Self {
            latency_ms: 0,
            time_scale: 0.0,
            ..Self::default()
        }
    }
}

/// Rejections to inject, keyed by operation. Each message is returned verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimFaults {
    pub open: Option<String>,
    /// Gateway reports its cameras but cannot hand any of them out
    pub camera_unavailable: bool,
    pub query_info: Option<String>,
    pub query_capability: Option<String>,
    pub set_subframe: Option<String>,
    pub start_exposure: Option<String>,
    /// Reject status queries once this many have succeeded
    pub query_status_after: Option<(usize, String)>,
    pub start_download: Option<String>,
    pub set_cooler_state: Option<String>,
    /// Download succeeds but leaves no image behind
    pub lose_image: bool,
}

/// One issued driver call, in the order the core made it.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    OpenGateway,
    CloseGateway,
    GetCamera(usize),
    GetSensor(usize),
    GetTec,
    QueryInfo,
    QueryCapability,
    SetSetting(SensorSetting, u32),
    SetSubframe(Subframe),
    StartExposure(ExposureOptions),
    QueryStatus,
    StartDownload,
    TakeImage,
    SetCoolerState { enabled: bool, setpoint: f64 },
}

/// Read-only view of what the simulated driver was asked to do.
#[derive(Debug, Clone, Default)]
pub struct SimProbe {
    calls: Arc<Mutex<Vec<DriverCall>>>,
    outstanding: Arc<AtomicUsize>,
}

impl SimProbe {
    /// Every call issued so far
    pub fn calls(&self) -> Vec<DriverCall> {
        lock(&self.calls).clone()
    }

    /// Number of calls satisfying `predicate`
    pub fn count(&self, predicate: impl Fn(&DriverCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|c| predicate(c)).count()
    }

    /// Promises issued but not yet released
    pub fn outstanding_promises(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    fn record(&self, call: DriverCall) {
        debug!(?call, "sim driver call");
        lock(&self.calls).push(call);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated driver entry point.
#[derive(Debug, Clone, Default)]
pub struct SimBackend {
    config: SimConfig,
    faults: SimFaults,
    probe: SimProbe,
}

impl SimBackend {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            faults: SimFaults::default(),
            probe: SimProbe::default(),
        }
    }

    pub fn with_faults(mut self, faults: SimFaults) -> Self {
        self.faults = faults;
        self
    }

    /// Handle for inspecting issued calls
    pub fn probe(&self) -> SimProbe {
        self.probe.clone()
    }
}

impl Backend for SimBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    fn open(&self) -> Result<Box<dyn Gateway>, DriverError> {
        self.probe.record(DriverCall::OpenGateway);
        if let Some(message) = &self.faults.open {
            return Err(DriverError::new(message.clone()));
        }

        let devices = (0..self.config.camera_count)
            .map(|_| {
                Arc::new(SimDevice {
                    config: self.config.clone(),
                    faults: self.faults.clone(),
                    probe: self.probe.clone(),
                    state: Mutex::new(DeviceState::new(&self.config)),
                })
            })
            .collect();

        Ok(Box::new(SimGateway {
            devices,
            unavailable: self.faults.camera_unavailable,
            probe: self.probe.clone(),
        }))
    }
}

struct SimGateway {
    devices: Vec<Arc<SimDevice>>,
    unavailable: bool,
    probe: SimProbe,
}

impl Gateway for SimGateway {
    fn camera_count(&self) -> usize {
        self.devices.len()
    }

    fn camera(&self, index: usize) -> Option<Arc<dyn Camera>> {
        self.probe.record(DriverCall::GetCamera(index));
        if self.unavailable {
            return None;
        }
        self.devices
            .get(index)
            .map(|device| Arc::new(SimCamera(device.clone())) as Arc<dyn Camera>)
    }

    fn close(&self) {
        self.probe.record(DriverCall::CloseGateway);
    }
}

struct ActiveExposure {
    options: ExposureOptions,
    subframe: Subframe,
    on_chip_binning: bool,
    started: Instant,
    busy_reports: usize,
    ready: bool,
}

struct DeviceState {
    on_chip_binning: bool,
    subframe: Option<Subframe>,
    exposure: Option<ActiveExposure>,
    image: Option<Image>,
    status: CameraStatus,
    status_queries: usize,
    capability_known: bool,
    cooler_enabled: bool,
    cooler_setpoint: f64,
}

impl DeviceState {
    fn new(config: &SimConfig) -> Self {
        Self {
            on_chip_binning: false,
            subframe: None,
            exposure: None,
            image: None,
            status: CameraStatus {
                main_sensor_state: SensorState::Idle,
                cooler_power: 0.0,
                heat_sink_temperature: config.ambient_temperature,
                sensor_temperature: config.ambient_temperature,
            },
            status_queries: 0,
            capability_known: false,
            cooler_enabled: false,
            cooler_setpoint: 0.0,
        }
    }
}

struct SimDevice {
    config: SimConfig,
    faults: SimFaults,
    probe: SimProbe,
    state: Mutex<DeviceState>,
}

impl SimDevice {
    fn promise(&self, outcome: Result<(), DriverError>) -> Box<dyn Promise> {
        self.probe.outstanding.fetch_add(1, Ordering::SeqCst);
        Box::new(SimPromise {
            outcome: Some(outcome),
            latency: Duration::from_millis(self.config.latency_ms),
            outstanding: self.probe.outstanding.clone(),
        })
    }

    fn fault(&self, injected: &Option<String>) -> Result<(), DriverError> {
        match injected {
            Some(message) => Err(DriverError::new(message.clone())),
            None => Ok(()),
        }
    }

    fn sensor_info(&self) -> SensorInfo {
        SensorInfo {
            pixels_x: self.config.pixels_x,
            pixels_y: self.config.pixels_y,
            pixel_size_x: self.config.pixel_size_x,
            pixel_size_y: self.config.pixel_size_y,
            min_cooler_setpoint: self.config.cooler_setpoint_min,
            max_cooler_setpoint: self.config.cooler_setpoint_max,
            max_bin_x: self.config.max_bin_x,
            max_bin_y: self.config.max_bin_y,
            min_exposure_duration: self.config.min_exposure_duration,
            exposure_precision: self.config.exposure_precision,
        }
    }

    fn refresh_status(&self, state: &mut DeviceState) {
        let ambient = self.config.ambient_temperature;
        let (sensor_temperature, cooler_power) = if state.cooler_enabled {
            let delta = (ambient - state.cooler_setpoint).max(0.0);
            (state.cooler_setpoint, (delta / 45.0 * 100.0).min(100.0))
        } else {
            (ambient, 0.0)
        };

        let sensor_state = match &mut state.exposure {
            Some(exposure) if exposure.ready => SensorState::ReadyToDownload,
            Some(exposure) => {
                let scaled = exposure.options.duration * self.config.time_scale;
                let elapsed = exposure.started.elapsed().as_secs_f64();
                if elapsed >= scaled && exposure.busy_reports >= self.config.busy_polls {
                    exposure.ready = true;
                    SensorState::ReadyToDownload
                } else {
                    exposure.busy_reports += 1;
                    SensorState::Exposing
                }
            }
            None => SensorState::Idle,
        };

        state.status = CameraStatus {
            main_sensor_state: sensor_state,
            cooler_power,
            heat_sink_temperature: ambient + cooler_power * 0.05,
            sensor_temperature,
        };
    }

    fn render(&self, exposure: &ActiveExposure) -> Image {
        let options = &exposure.options;
        let (bin_x, bin_y) = if exposure.on_chip_binning {
            (options.bin_x.max(1), options.bin_y.max(1))
        } else {
            (exposure.subframe.bin_x.max(1), exposure.subframe.bin_y.max(1))
        };
        let width = exposure.subframe.width / bin_x;
        let height = exposure.subframe.height / bin_y;
        let binned = bin_x * bin_y;

        let mut rng = rand::thread_rng();
        let mut buffer = Vec::with_capacity((width as usize) * (height as usize));
        for y in 0..height {
            for x in 0..width {
                let mut value = BIAS_LEVEL + rng.gen_range(0..20);
                if options.is_light_frame {
                    let sky = ((x + y) % 512) as f64 * 4.0 * options.duration;
                    value += (sky as u32).saturating_mul(binned);
                }
                buffer.push(value.min(u16::MAX as u32) as u16);
            }
        }

        let precision = self.config.exposure_precision;
        let exposure_duration = if precision > 0.0 {
            (options.duration / precision).round() * precision
        } else {
            options.duration
        };

        Image {
            buffer,
            metadata: ImageMetadata {
                width,
                height,
                exposure_duration,
                bin_x: options.bin_x,
                bin_y: options.bin_y,
                is_light_frame: options.is_light_frame,
            },
        }
    }
}

struct SimCamera(Arc<SimDevice>);

impl Camera for SimCamera {
    fn sensor(&self, index: usize) -> Option<Arc<dyn Sensor>> {
        self.0.probe.record(DriverCall::GetSensor(index));
        if self.0.config.has_sensor && index == 0 {
            Some(Arc::new(SimSensor(self.0.clone())))
        } else {
            None
        }
    }

    fn tec(&self) -> Option<Arc<dyn Cooler>> {
        self.0.probe.record(DriverCall::GetTec);
        if self.0.config.has_cooler {
            Some(Arc::new(SimCooler(self.0.clone())))
        } else {
            None
        }
    }

    fn query_status(&self) -> Box<dyn Promise> {
        let device = &self.0;
        device.probe.record(DriverCall::QueryStatus);

        let mut state = lock(&device.state);
        if let Some((after, message)) = &device.faults.query_status_after {
            if state.status_queries >= *after {
                return device.promise(Err(DriverError::new(message.clone())));
            }
        }
        state.status_queries += 1;
        device.refresh_status(&mut state);
        device.promise(Ok(()))
    }

    fn status(&self) -> CameraStatus {
        lock(&self.0.state).status
    }

    fn query_capability(&self) -> Box<dyn Promise> {
        let device = &self.0;
        device.probe.record(DriverCall::QueryCapability);
        let outcome = device.fault(&device.faults.query_capability);
        if outcome.is_ok() {
            lock(&device.state).capability_known = true;
        }
        device.promise(outcome)
    }

    fn capability(&self, capability: Capability) -> bool {
        let state = lock(&self.0.state);
        match capability {
            Capability::OnChipBinning => state.capability_known && self.0.config.on_chip_binning,
        }
    }
}

struct SimSensor(Arc<SimDevice>);

impl Sensor for SimSensor {
    fn query_info(&self) -> Box<dyn Promise> {
        let device = &self.0;
        device.probe.record(DriverCall::QueryInfo);
        device.promise(device.fault(&device.faults.query_info))
    }

    fn info(&self) -> SensorInfo {
        self.0.sensor_info()
    }

    fn set_subframe(&self, subframe: Subframe) -> Box<dyn Promise> {
        let device = &self.0;
        device.probe.record(DriverCall::SetSubframe(subframe));
        let mut outcome = device.fault(&device.faults.set_subframe);
        if outcome.is_ok()
            && (subframe.left + subframe.width > device.config.pixels_x
                || subframe.top + subframe.height > device.config.pixels_y)
        {
            outcome = Err(DriverError::new("Subframe exceeds sensor dimensions"));
        }
        if outcome.is_ok() {
            lock(&device.state).subframe = Some(subframe);
        }
        device.promise(outcome)
    }

    fn set_setting(&self, setting: SensorSetting, value: u32) {
        let device = &self.0;
        device.probe.record(DriverCall::SetSetting(setting, value));
        match setting {
            SensorSetting::UseOnChipBinning => {
                lock(&device.state).on_chip_binning = value != 0;
            }
        }
    }

    fn start_exposure(&self, options: ExposureOptions) -> Box<dyn Promise> {
        let device = &self.0;
        device.probe.record(DriverCall::StartExposure(options));
        if let Err(err) = device.fault(&device.faults.start_exposure) {
            return device.promise(Err(err));
        }

        let mut state = lock(&device.state);
        if state.exposure.is_some() {
            return device.promise(Err(DriverError::new("Exposure already in progress")));
        }
        let Some(subframe) = state.subframe else {
            return device.promise(Err(DriverError::new("Subframe has not been configured")));
        };
        if state.on_chip_binning
            && (options.bin_x > device.config.max_bin_x || options.bin_y > device.config.max_bin_y)
        {
            return device.promise(Err(DriverError::new(format!(
                "Binning {}x{} exceeds sensor maximum {}x{}",
                options.bin_x, options.bin_y, device.config.max_bin_x, device.config.max_bin_y
            ))));
        }

        state.image = None;
        state.exposure = Some(ActiveExposure {
            options,
            subframe,
            on_chip_binning: state.on_chip_binning,
            started: Instant::now(),
            busy_reports: 0,
            ready: false,
        });
        device.promise(Ok(()))
    }

    fn start_download(&self) -> Box<dyn Promise> {
        let device = &self.0;
        device.probe.record(DriverCall::StartDownload);
        if let Err(err) = device.fault(&device.faults.start_download) {
            return device.promise(Err(err));
        }

        let mut state = lock(&device.state);
        let ready = matches!(&state.exposure, Some(exposure) if exposure.ready);
        if !ready {
            return device.promise(Err(DriverError::new("No exposure is ready for download")));
        }
        if let Some(exposure) = state.exposure.take() {
            if !device.faults.lose_image {
                state.image = Some(device.render(&exposure));
            }
        }
        state.status.main_sensor_state = SensorState::Idle;
        device.promise(Ok(()))
    }

    fn take_image(&self) -> Option<Image> {
        self.0.probe.record(DriverCall::TakeImage);
        lock(&self.0.state).image.take()
    }
}

struct SimCooler(Arc<SimDevice>);

impl Cooler for SimCooler {
    fn enabled(&self) -> bool {
        lock(&self.0.state).cooler_enabled
    }

    fn setpoint(&self) -> f64 {
        lock(&self.0.state).cooler_setpoint
    }

    fn set_state(&self, enabled: bool, setpoint: f64) -> Box<dyn Promise> {
        let device = &self.0;
        device
            .probe
            .record(DriverCall::SetCoolerState { enabled, setpoint });
        let outcome = device.fault(&device.faults.set_cooler_state);
        if outcome.is_ok() {
            let mut state = lock(&device.state);
            state.cooler_enabled = enabled;
            state.cooler_setpoint = setpoint;
        }
        device.promise(outcome)
    }
}

struct SimPromise {
    outcome: Option<Result<(), DriverError>>,
    latency: Duration,
    outstanding: Arc<AtomicUsize>,
}

#[async_trait]
impl Promise for SimPromise {
    async fn wait(&mut self) -> Result<(), DriverError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.outcome
            .take()
            .unwrap_or_else(|| Err(DriverError::new("Promise was already waited on")))
    }

    fn release(self: Box<Self>) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}
