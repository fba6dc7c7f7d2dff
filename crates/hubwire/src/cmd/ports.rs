use hubwire_driver::{Commands, DriverConfig, PortModes, PortState};
use serde::Serialize;

use crate::cmd::{connect, PortsArgs};
use crate::exit::{driver_error, CliResult, SUCCESS};
use crate::output::{print_json, table, OutputFormat};

#[derive(Serialize)]
struct ModeInfo {
    mode: u8,
    name: String,
    symbol: String,
}

#[derive(Serialize)]
struct PortOutput {
    port: u8,
    #[serde(flatten)]
    state: PortState,
    modes: PortModes,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    mode_info: Vec<ModeInfo>,
}

pub fn run(args: PortsArgs, config: DriverConfig, format: OutputFormat) -> CliResult<i32> {
    let (hub, registry) = connect(&args.connect, config)?;

    let mut ports = Vec::new();
    for (port, state) in registry.ports() {
        let modes = hub
            .commands()
            .port_modes(port)
            .map_err(|err| driver_error(&format!("port {port} modes"), err))?;
        let mode_info = if args.modes {
            describe_modes(hub.commands(), port, modes.count)?
        } else {
            Vec::new()
        };
        ports.push(PortOutput {
            port,
            state,
            modes,
            mode_info,
        });
    }
    hub.shutdown();

    print_ports(&ports, format);
    Ok(SUCCESS)
}

fn describe_modes(commands: &Commands, port: u8, count: u8) -> CliResult<Vec<ModeInfo>> {
    (0..count)
        .map(|mode| -> CliResult<ModeInfo> {
            let context = format!("port {port} mode {mode}");
            Ok(ModeInfo {
                mode,
                name: commands
                    .mode_name(port, mode)
                    .map_err(|err| driver_error(&context, err))?,
                symbol: commands
                    .mode_symbol(port, mode)
                    .map_err(|err| driver_error(&context, err))?,
            })
        })
        .collect()
}

fn print_ports(ports: &[PortOutput], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ports),
        OutputFormat::Table => {
            let mut t = table(vec!["PORT", "TYPE", "MODES", "INPUTS", "OUTPUTS", "NAMES"]);
            for p in ports {
                t.add_row(vec![
                    p.port.to_string(),
                    format!("{:#06x}", p.state.device_type),
                    p.modes.count.to_string(),
                    format!("{:#06x}", p.modes.input_mask),
                    format!("{:#06x}", p.modes.output_mask),
                    p.mode_info
                        .iter()
                        .map(|m| m.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                ]);
            }
            println!("{t}");
        }
        OutputFormat::Pretty => {
            if ports.is_empty() {
                println!("no devices attached");
            }
            for p in ports {
                println!(
                    "port {}: type {:#06x}, {} modes (inputs {:#06x}, outputs {:#06x})",
                    p.port,
                    p.state.device_type,
                    p.modes.count,
                    p.modes.input_mask,
                    p.modes.output_mask
                );
                for m in &p.mode_info {
                    println!("  M{} {} [{}]", m.mode, m.name, m.symbol);
                }
            }
        }
    }
}
