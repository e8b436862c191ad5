//! Command line surface
//!
//! Each subcommand opens a gateway session, discovers the camera, acquires only
//! the handles it needs and runs exactly one core operation. Results are
//! written to the supplied writer (stdout in the binary); diagnostics go
//! through `tracing`.

use std::io::Write;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::config::DfConfig;
use crate::device_info;
use crate::driver::Backend;
use crate::error::AppResult;
use crate::exposure::{ExposureRequest, ExposureSequencer, ReadoutMode};
use crate::session::GatewaySession;
use crate::sink::{FitsSink, ResultSink};
use crate::thermal;

#[derive(Debug, Parser)]
#[command(name = "dfcore", version, about = "Cooled camera core functions")]
pub struct Cli {
    /// Configuration file (defaults to ./dfcore.toml if present)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Functions related to cooling and temperatures
    #[command(subcommand)]
    Cool(CoolCommand),
    /// Take an exposure
    Expose(ExposeArgs),
    /// Print sensor geometry and limits
    Info,
}

#[derive(Debug, Subcommand)]
pub enum CoolCommand {
    /// Turn off cooling
    Disable,
    /// Get the current temperatures for various parts of the system
    Get,
    /// Enable cooling and set the target temperature
    Set {
        /// Target temperature in degrees C
        #[arg(allow_negative_numbers = true, value_parser = parse_temperature)]
        temp: f64,
    },
}

#[derive(Debug, Args)]
pub struct ExposeArgs {
    /// Duration of exposure in seconds
    #[arg(long, value_parser = parse_duration)]
    pub duration: f64,

    /// FITS file to write; must not exist
    #[arg(long)]
    pub file: PathBuf,

    /// Take a dark instead of a light frame
    #[arg(long)]
    pub dark: bool,

    /// Binning for the x axis
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub binx: u32,

    /// Binning for the y axis
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub biny: u32,

    /// Readout mode; overrides the configured one
    #[arg(long, value_enum)]
    pub readout: Option<ReadoutMode>,
}

impl ExposeArgs {
    pub fn request(&self, configured: ReadoutMode) -> ExposureRequest {
        let mut request = ExposureRequest::new(self.duration)
            .binning(self.binx, self.biny)
            .readout(self.readout.unwrap_or(configured));
        if self.dark {
            request = request.dark();
        }
        request
    }
}

fn parse_temperature(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if !value.is_finite() {
        return Err(format!("'{s}' is not a finite temperature"));
    }
    Ok(value)
}

fn parse_duration(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(format!("duration must be a positive number of seconds, got '{s}'"));
    }
    Ok(value)
}

/// Run `command` against `backend`, printing results to `out`.
pub async fn execute<W: Write>(
    command: &Command,
    config: &DfConfig,
    backend: &dyn Backend,
    out: &mut W,
) -> AppResult<()> {
    let session = GatewaySession::open(backend)?;
    let camera = session.discover_camera()?;

    match command {
        Command::Cool(CoolCommand::Disable) => {
            let cooler = camera.acquire_cooler()?;
            thermal::disable(&cooler).await?;
            writeln!(out, "Disabling cooler.")?;
        }
        Command::Cool(CoolCommand::Get) => {
            let cooler = camera.acquire_cooler()?;
            let status = thermal::read_status(&camera, &cooler).await?;
            writeln!(out, "{status}")?;
        }
        Command::Cool(CoolCommand::Set { temp }) => {
            let sensor = camera.acquire_sensor()?;
            let cooler = camera.acquire_cooler()?;
            let info = device_info::resolve(&sensor).await?;
            let applied = thermal::set_target(&cooler, &info, *temp).await?;
            writeln!(out, "Setting temperature to {applied} degrees C.")?;
        }
        Command::Expose(args) => {
            let sensor = camera.acquire_sensor()?;
            let request = args.request(config.exposure.readout_mode);
            writeln!(
                out,
                "Exposing {} for {} s ({}x{} binning).",
                request.frame_type, request.duration, request.bin_x, request.bin_y
            )?;

            let sequencer = ExposureSequencer::new(config.poll_policy());
            let result = sequencer.run(&camera, &sensor, &request).await?;

            let mut sink = FitsSink::new(&args.file);
            sink.persist(result)?;
            writeln!(out, "Saved {}.", sink.path().display())?;
        }
        Command::Info => {
            let sensor = camera.acquire_sensor()?;
            let info = device_info::resolve(&sensor).await?;
            writeln!(out, "{info}")?;
        }
    }

    info!(backend = backend.name(), "command finished");
    Ok(())
}
