use hubwire_driver::{DriverConfig, DriverError, HealthSnapshot};
use serde::Serialize;
use tracing::warn;

use crate::cmd::{connect, InfoArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, table, OutputFormat};

#[derive(Serialize)]
struct InfoOutput {
    transport: &'static str,
    hardware_version: Option<String>,
    firmware_version: Option<String>,
    attached_ports: Vec<u8>,
    health: HealthSnapshot,
}

pub fn run(args: InfoArgs, config: DriverConfig, format: OutputFormat) -> CliResult<i32> {
    let (hub, registry) = connect(&args.connect, config)?;
    let commands = hub.commands();

    // The serial console has no version request.
    let hardware_version = optional("hardware version", commands.hardware_version())?;
    let firmware_version = optional("firmware version", commands.firmware_version())?;

    let out = InfoOutput {
        transport: hub.transport_name(),
        hardware_version,
        firmware_version,
        attached_ports: registry.ports().into_keys().collect(),
        health: hub.health(),
    };
    hub.shutdown();

    print_info(&out, format);
    Ok(SUCCESS)
}

fn optional(what: &str, result: hubwire_driver::Result<String>) -> CliResult<Option<String>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err @ (DriverError::Timeout(_) | DriverError::Device(_))) => {
            warn!(error = %err, "{what} unavailable");
            Ok(None)
        }
        Err(err) => Err(crate::exit::driver_error(what, err)),
    }
}

fn print_info(out: &InfoOutput, format: OutputFormat) {
    let unknown = || "unavailable".to_string();
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut t = table(vec!["FIELD", "VALUE"]);
            t.add_row(vec!["transport".to_string(), out.transport.to_string()]);
            t.add_row(vec![
                "hardware".to_string(),
                out.hardware_version.clone().unwrap_or_else(unknown),
            ]);
            t.add_row(vec![
                "firmware".to_string(),
                out.firmware_version.clone().unwrap_or_else(unknown),
            ]);
            t.add_row(vec!["ports".to_string(), port_list(&out.attached_ports)]);
            t.add_row(vec![
                "frames".to_string(),
                out.health.frames_received.to_string(),
            ]);
            t.add_row(vec![
                "errors".to_string(),
                format!(
                    "{} protocol, {} transport",
                    out.health.protocol_errors, out.health.transport_errors
                ),
            ]);
            println!("{t}");
        }
        OutputFormat::Pretty => {
            println!("Hub Info:");
            println!("  Transport:        {}", out.transport);
            println!(
                "  Hardware:         {}",
                out.hardware_version.as_deref().unwrap_or("unavailable")
            );
            println!(
                "  Firmware:         {}",
                out.firmware_version.as_deref().unwrap_or("unavailable")
            );
            println!("  Ports:            {}", port_list(&out.attached_ports));
            println!("  Frames received:  {}", out.health.frames_received);
            println!("  Keepalives:       {}", out.health.keepalives);
            println!(
                "  Errors:           {} protocol, {} transport",
                out.health.protocol_errors, out.health.transport_errors
            );
            if let Some(err) = &out.health.last_error {
                println!("  Last error:       {err}");
            }
        }
    }
}

fn port_list(ports: &[u8]) -> String {
    if ports.is_empty() {
        return "none".to_string();
    }
    ports
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
