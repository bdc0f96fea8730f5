use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use clap::Parser;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use serial_insight::{
    print, InsightError, Pipeline, PipelineConfig, PipelineEvent, QuadratureMethod, ReplayTransport, Result,
    SignalProfile, SimulatedTransport, Transport, DEFAULT_BAUD_RATE,
};

const REPLAY_READ_SIZE: usize = 64; // Bytes handed out per replayed read

/// Serial Insight CLI
#[derive(Parser, Debug)]
#[command(author, version, about = "Serial ADC acquisition with power measurement", long_about = None)]
struct Args {
    /// Serial port to read frames from
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate of the serial port
    #[arg(short, long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Simulate signal samples instead of reading from hardware
    #[arg(short, long)]
    simulate: bool,

    /// Replay a raw capture file instead of reading from hardware
    #[arg(short, long, conflicts_with = "simulate")]
    replay: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Integrate power with Simpson's rule instead of trapezoids
    #[arg(long)]
    simpson: bool,

    /// Directory for recorded batches
    #[arg(long)]
    records: Option<PathBuf>,

    /// Do not record power values
    #[arg(long)]
    no_record: bool,

    /// Simulated current phase lag in degrees
    #[arg(long, default_value_t = 0.0)]
    phase: f64,

    /// Simulated noise relative to the amplitude (0.05 = 5%)
    #[arg(long, default_value_t = 0.0)]
    noise: f64,
}

fn main() -> ExitCode {
    env_logger::init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    if args.list_ports {
        return print_ports();
    }

    let config = load_config(&args)?;
    let transport = build_transport(&args, &config)?;
    let (mut pipeline, events) = Pipeline::new(config)?;

    // Only SIGINT and SIGTERM end the acquisition
    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    if !pipeline.connect(transport) {
        return Err(InsightError::Transport("could not connect".to_string()));
    }

    // Thread reporting pipeline events, ends when the pipeline is dropped
    let reporter = thread::spawn(move || {
        for event in events {
            match event {
                PipelineEvent::Measurement(_) => {}
                PipelineEvent::Flushed(report) => print::print_flush(&report),
                PipelineEvent::FlushFailed(e) => log::warn!("Records kept in memory: {}", e),
                PipelineEvent::Skipped(reason) => log::debug!("Tick skipped: {}", reason),
            }
        }
    });

    if let Some(signal) = signals.forever().next() {
        log::info!("Received signal {}, shutting down", signal);
    }

    let clean = pipeline.disconnect();
    drop(pipeline);
    if reporter.join().is_err() {
        log::error!("Error: Event reporter panicked");
    }

    if clean {
        Ok(())
    } else {
        Err(InsightError::Transport("pipeline did not shut down cleanly".to_string()))
    }
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    if args.simpson {
        config.quadrature = QuadratureMethod::Simpson;
    }
    if let Some(directory) = &args.records {
        config.recorder.directory = directory.clone();
    }
    if args.no_record {
        config.recorder.enabled = false;
    }

    config.validate()?;
    Ok(config)
}

fn build_transport(args: &Args, config: &PipelineConfig) -> Result<Box<dyn Transport>> {
    if args.simulate {
        let header = |channel: usize| {
            config
                .frame_headers
                .get(channel)
                .copied()
                .ok_or_else(|| InsightError::InvalidConfig(format!("no frame header for channel {}", channel)))
        };
        let profile = SignalProfile {
            current_phase_deg: args.phase,
            noise_percent: args.noise,
            ..Default::default()
        };

        return Ok(Box::new(SimulatedTransport::new(
            profile,
            config.calibration.clone(),
            header(config.voltage_channel)?,
            header(config.current_channel)?,
        )?));
    }

    if let Some(path) = &args.replay {
        let data = fs::read(path)?;
        log::info!("Replaying {} bytes from {}", data.len(), path.display());
        return Ok(Box::new(ReplayTransport::from_bytes(&data, REPLAY_READ_SIZE)));
    }

    serial_transport(args)
}

#[cfg(feature = "serial")]
fn serial_transport(args: &Args) -> Result<Box<dyn Transport>> {
    match &args.port {
        Some(port) => Ok(Box::new(serial_insight::SerialTransport::new(port.clone(), args.baud))),
        None => Err(InsightError::InvalidConfig(
            "no source given, use --port, --replay or --simulate".to_string(),
        )),
    }
}

#[cfg(not(feature = "serial"))]
fn serial_transport(_args: &Args) -> Result<Box<dyn Transport>> {
    Err(InsightError::InvalidConfig(
        "built without serial support, use --replay or --simulate".to_string(),
    ))
}

#[cfg(feature = "serial")]
fn print_ports() -> Result<()> {
    let ports = serial_insight::list_ports()?;
    if ports.is_empty() {
        log::info!("No serial ports found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

#[cfg(not(feature = "serial"))]
fn print_ports() -> Result<()> {
    Err(InsightError::InvalidConfig("built without serial support".to_string()))
}
