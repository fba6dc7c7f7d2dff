mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;
use hubwire_driver::DriverConfig;

use crate::cmd::Command;
use crate::exit::driver_error;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "hubwire", version, about = "LEGO Wireless Protocol Hub diagnostics")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Driver configuration file (JSON).
    #[arg(long, value_name = "FILE", env = "HUBWIRE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = match cli.config {
        Some(path) => DriverConfig::load(&path).map_err(|err| driver_error("config", err)),
        None => Ok(DriverConfig::default()),
    }
    .and_then(|config| cmd::run(cli.command, config, format));

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_info_with_link_options() {
        let cli = Cli::try_parse_from([
            "hubwire",
            "info",
            "--link",
            "i2c",
            "--device",
            "/dev/i2c-3",
            "--wait",
            "500ms",
        ])
        .expect("info args should parse");

        let Command::Info(args) = cli.command else {
            panic!("expected info");
        };
        assert_eq!(args.connect.link, cmd::Link::I2c);
        assert_eq!(args.connect.device, Some(PathBuf::from("/dev/i2c-3")));
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "hubwire",
            "monitor",
            "--count",
            "3",
            "--format",
            "json",
            "--config",
            "/etc/hubwire.json",
        ])
        .expect("monitor args should parse");

        assert!(matches!(cli.format, Some(OutputFormat::Json)));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/hubwire.json")));
        assert!(matches!(cli.command, Command::Monitor(ref m) if m.count == Some(3)));
    }

    #[test]
    fn rejects_unknown_link() {
        let err = Cli::try_parse_from(["hubwire", "ports", "--link", "bluetooth"])
            .expect_err("unknown link should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }
}
