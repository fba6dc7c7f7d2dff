use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use hubwire_driver::Event;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json(value: &impl Serialize) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

#[derive(Serialize)]
struct EventOutput<'a> {
    #[serde(flatten)]
    event: &'a Event,
    description: String,
}

pub fn print_event(event: &Event, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&EventOutput {
            event,
            description: describe_event(event),
        }),
        OutputFormat::Table => {
            let mut t = table(vec!["KIND", "ID", "CODE", "EVENT"]);
            t.add_row(vec![
                format!("{:?}", event.kind).to_lowercase(),
                event.subject_id.to_string(),
                event.event_code.to_string(),
                describe_event(event),
            ]);
            println!("{t}");
        }
        OutputFormat::Pretty => println!("{}", describe_event(event)),
    }
}

pub fn describe_event(event: &Event) -> String {
    use hubwire_driver::{event, CallbackKind};

    let id = event.subject_id;
    match (event.kind, event.event_code) {
        (CallbackKind::Port, event::ATTACHED) => format!("port {id} attached"),
        (CallbackKind::Port, event::DETACHED) => format!("port {id} detached"),
        (CallbackKind::Motor, event::COMPLETE) => format!("motor {id} completed"),
        (CallbackKind::Motor, event::INTERRUPTED) => format!("motor {id} interrupted"),
        (CallbackKind::Motor, event::STALLED) => format!("motor {id} stalled"),
        (CallbackKind::Pair, event::COMPLETE) => format!("pair {id} completed"),
        (CallbackKind::Pair, event::INTERRUPTED) => format!("pair {id} interrupted"),
        (CallbackKind::Pair, event::STALLED) => format!("pair {id} stalled"),
        (CallbackKind::Device, _) => format!("port {id} value"),
        (CallbackKind::Alert, value) => format!("alert {id} = {value}"),
        (CallbackKind::Firmware, status) => format!("firmware op {id} status {status}"),
        (kind, code) => format!("{kind:?} {id} code {code}").to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubwire_driver::{event, CallbackKind};

    #[test]
    fn describes_motor_and_alert_events() {
        let stalled = Event {
            kind: CallbackKind::Motor,
            subject_id: 2,
            event_code: event::STALLED,
        };
        assert_eq!(describe_event(&stalled), "motor 2 stalled");

        let alert = Event {
            kind: CallbackKind::Alert,
            subject_id: 3,
            event_code: 1,
        };
        assert_eq!(describe_event(&alert), "alert 3 = 1");
    }
}
