use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Args, Subcommand, ValueEnum};
use hubwire_driver::{DriverConfig, Hub, PortRegistry};
use tracing::debug;

use crate::exit::{driver_error, CliError, CliResult, HEALTH_CHECK_FAILED, USAGE};
use crate::output::OutputFormat;

pub mod doctor;
pub mod info;
pub mod monitor;
pub mod ports;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show version information.
    Version(VersionArgs),
    /// Check device nodes, the wake line and the serial console.
    Doctor(DoctorArgs),
    /// Print Hub hardware and firmware versions and link health.
    Info(InfoArgs),
    /// List attached ports and their modes.
    Ports(PortsArgs),
    /// Print Hub events until interrupted.
    Monitor(MonitorArgs),
}

pub fn run(command: Command, config: DriverConfig, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Version(args) => version::run(args),
        Command::Doctor(args) => doctor::run(args, &config, format),
        Command::Info(args) => info::run(args, config, format),
        Command::Ports(args) => ports::run(args, config, format),
        Command::Monitor(args) => monitor::run(args, config, format),
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Link {
    /// Binary frames over I2C with the wake line.
    I2c,
    /// Text console over the serial port.
    #[default]
    Serial,
}

#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// How to reach the Hub.
    #[arg(long, value_enum, default_value = "serial")]
    pub link: Link,
    /// Device node, overriding the configuration file.
    #[arg(long, value_name = "PATH")]
    pub device: Option<PathBuf>,
    /// How long to wait for the Hub to be heard from (e.g. 3s, 500ms).
    #[arg(long, default_value = "3s")]
    pub wait: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {}

#[derive(Args, Debug)]
pub struct InfoArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct PortsArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Also list every mode's name and symbol.
    #[arg(long)]
    pub modes: bool,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Exit after N events.
    #[arg(long)]
    pub count: Option<usize>,
}

/// Open the Hub over the chosen link and wait until it is heard from.
pub fn connect(
    args: &ConnectArgs,
    mut config: DriverConfig,
) -> CliResult<(Hub, Arc<PortRegistry>)> {
    let wait = parse_duration(&args.wait)?;
    let registry = Arc::new(PortRegistry::new());

    let hub = match args.link {
        Link::Serial => {
            if let Some(device) = &args.device {
                config.serial.device = device.clone();
            }
            Hub::open_serial(config, registry.clone())
        }
        Link::I2c => {
            if let Some(device) = &args.device {
                config.i2c.device = device.clone();
            }
            open_i2c(config, registry.clone())
        }
    }
    .map_err(|err| driver_error("open failed", err))?;

    let start = Instant::now();
    while hub.check_comms().is_err() {
        if start.elapsed() >= wait {
            return Err(CliError::new(
                HEALTH_CHECK_FAILED,
                format!("Hub not heard from within {wait:?}"),
            ));
        }
        thread::sleep(Duration::from_millis(20));
    }
    debug!(transport = hub.transport_name(), "hub responding");
    Ok((hub, registry))
}

#[cfg(target_os = "linux")]
fn open_i2c(
    config: DriverConfig,
    registry: Arc<PortRegistry>,
) -> hubwire_driver::Result<Hub> {
    Hub::open_i2c(config, registry)
}

#[cfg(not(target_os = "linux"))]
fn open_i2c(
    _config: DriverConfig,
    _registry: Arc<PortRegistry>,
) -> hubwire_driver::Result<Hub> {
    Err(hubwire_driver::DriverError::InvalidArgument(
        "the I2C link is only available on Linux".into(),
    ))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
