//! Core library for cooled astronomical cameras.
//!
//! Sequences a single exposure (binning resolution, subframe configuration,
//! start, status polling, download) and controls the thermoelectric cooler,
//! on top of a narrow asynchronous driver interface. A simulated driver is
//! included for tests and for running the `dfcore` binary without hardware.
//!
//! Entry points:
//! - [`session::GatewaySession`] scopes the driver connection and hands out
//!   camera, sensor and cooler handles
//! - [`exposure::ExposureSequencer`] runs one exposure
//! - [`thermal`] sets, disables and reads the cooler
//! - [`sink::FitsSink`] writes a finished exposure to disk

pub mod cli;
pub mod config;
pub mod device_info;
pub mod driver;
pub mod error;
pub mod exposure;
pub mod logging;
pub mod session;
pub mod sink;
pub mod thermal;
