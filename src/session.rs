//! Gateway session and device handles.
//!
//! A [`GatewaySession`] owns the driver gateway for one process invocation and
//! closes it when dropped, on success and early-failure paths alike. Camera,
//! sensor and cooler handles borrow the session, so none of them can outlive
//! the gateway they came from.

use std::sync::Arc;

use tracing::{debug, info};

use crate::driver::{Backend, Camera, Cooler, Gateway, Sensor};
use crate::error::{AppResult, CoreError};

/// Open connection to the camera driver.
pub struct GatewaySession {
    backend: String,
    gateway: Box<dyn Gateway>,
}

impl GatewaySession {
    /// Open a gateway through `backend`.
    pub fn open(backend: &dyn Backend) -> AppResult<Self> {
        let gateway = backend
            .open()
            .map_err(|err| CoreError::from_driver(CoreError::GatewayOpenFailed, err))?;
        info!(backend = backend.name(), "gateway opened");
        Ok(Self {
            backend: backend.name().to_string(),
            gateway,
        })
    }

    /// Select the first attached camera.
    pub fn discover_camera(&self) -> AppResult<CameraHandle<'_>> {
        let count = self.gateway.camera_count();
        debug!(count, "cameras discovered");
        if count == 0 {
            return Err(CoreError::NoCameraFound);
        }

        let camera = self
            .gateway
            .camera(0)
            .ok_or(CoreError::CameraUnavailable(0))?;
        Ok(CameraHandle {
            camera,
            session: self,
        })
    }

    /// Close the gateway now instead of at the end of scope.
    pub fn close(self) {}
}

impl std::fmt::Debug for GatewaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySession")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl Drop for GatewaySession {
    fn drop(&mut self) {
        self.gateway.close();
        info!(backend = %self.backend, "gateway closed");
    }
}

/// Camera selected from an open session.
pub struct CameraHandle<'s> {
    camera: Arc<dyn Camera>,
    session: &'s GatewaySession,
}

impl<'s> CameraHandle<'s> {
    pub fn acquire_sensor(&self) -> AppResult<SensorHandle<'s>> {
        let sensor = self.camera.sensor(0).ok_or(CoreError::SensorUnavailable)?;
        Ok(SensorHandle {
            sensor,
            _session: self.session,
        })
    }

    pub fn acquire_cooler(&self) -> AppResult<CoolerHandle<'s>> {
        let cooler = self.camera.tec().ok_or(CoreError::CoolerUnavailable)?;
        Ok(CoolerHandle {
            cooler,
            _session: self.session,
        })
    }

    pub(crate) fn driver(&self) -> &dyn Camera {
        self.camera.as_ref()
    }
}

/// The camera's main imaging sensor.
pub struct SensorHandle<'s> {
    sensor: Arc<dyn Sensor>,
    _session: &'s GatewaySession,
}

impl SensorHandle<'_> {
    pub(crate) fn driver(&self) -> &dyn Sensor {
        self.sensor.as_ref()
    }
}

/// The camera's thermoelectric cooler.
pub struct CoolerHandle<'s> {
    cooler: Arc<dyn Cooler>,
    _session: &'s GatewaySession,
}

impl CoolerHandle<'_> {
    pub(crate) fn driver(&self) -> &dyn Cooler {
        self.cooler.as_ref()
    }
}
