use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use clap::{ArgAction, Parser, Subcommand};
use log::{info, warn, LevelFilter};

use crate::config::{Config, ConfigIO};
use crate::device::Transport;
use crate::device::connection::BtleTransport;
use crate::device::constants::UNKNOWN_DEVICE_NAME;
use crate::error::AppRunError;
use crate::events::{EventReceiver, SessionEvent, ValueSource};
use crate::formula::{evaluate, Environment, FormulaDefinition};
use crate::notify::history::hex_preview;
use crate::registry::{has_name, FilterMode};
use crate::session::{DiscoveryOutcome, SessionController};
use crate::sim::SimTransport;

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Browse and exercise the GATT characteristics of Bluetooth LE peripherals", long_about = None)]
pub struct Args {
    /// Log more detail; repeat for trace output
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Use this config file instead of the default location
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Talk to a simulated peripheral instead of the Bluetooth adapter
    #[arg(long)]
    pub simulate: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the devices seen during one scan
    Scan {
        /// Only devices that advertise a name
        #[arg(long, conflicts_with = "unnamed")]
        named: bool,

        /// Only devices without a name
        #[arg(long)]
        unnamed: bool,
    },

    /// Connect to a device, run the requested operations and print what happens
    Connect {
        address: String,

        /// Read a characteristic once connected
        #[arg(long, value_name = "UUID")]
        read: Vec<String>,

        /// Write a payload, for example `--write 0000fff2-0000-1000-8000-00805f9b34fb=01,A0`
        #[arg(long, value_name = "UUID=HEX", value_parser = parse_write)]
        write: Vec<WriteRequest>,

        /// Subscribe to notifications of a characteristic
        #[arg(long, value_name = "UUID")]
        notify: Vec<String>,

        /// Evaluate a formula on every notification of a characteristic
        #[arg(long, value_name = "UUID:NAME=EXPR", value_parser = parse_formula)]
        formula: Vec<FormulaRequest>,

        /// Keep a live series for the formula with this name
        #[arg(long, value_name = "NAME")]
        track: Vec<String>,

        /// Seconds to keep printing events before disconnecting
        #[arg(long, default_value_t = 10)]
        duration: u64,
    },

    /// Evaluate a formula against a payload given in hex
    Eval {
        expression: String,

        payload: Option<String>,
    },
}

impl Args {
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub uuid: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaRequest {
    pub uuid: String,
    pub definition: FormulaDefinition,
}

/// Parses `01 A0 0d`, `01,a0,0d` or `01;a0;0d`.
pub fn parse_hex(input: &str) -> Result<Vec<u8>, String> {
    input
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .filter(|part| !part.is_empty())
        .map(|part| u8::from_str_radix(part, 16).map_err(|_| format!("Invalid hex byte: {}", part)))
        .collect()
}

fn parse_write(input: &str) -> Result<WriteRequest, String> {
    let (uuid, hex) = input.split_once('=').ok_or_else(|| String::from("Expected UUID=HEX"))?;
    Ok(WriteRequest { uuid: uuid.trim().to_string(), payload: parse_hex(hex)? })
}

fn parse_formula(input: &str) -> Result<FormulaRequest, String> {
    let (uuid, rest) = input.split_once(':').ok_or_else(|| String::from("Expected UUID:NAME=EXPR"))?;
    let (name, expression) = rest.split_once('=').ok_or_else(|| String::from("Expected UUID:NAME=EXPR"))?;
    if name.trim().is_empty() {
        return Err(String::from("Formula name must not be empty"));
    }
    Ok(FormulaRequest {
        uuid: uuid.trim().to_string(),
        definition: FormulaDefinition::new(name.trim(), expression.trim()),
    })
}

fn load_config(path: &Option<PathBuf>) -> Result<Config, AppRunError> {
    let io = match path {
        Some(path) => ConfigIO::at(path),
        None => ConfigIO::locate()?,
    };
    Ok(io.read()?)
}

fn display_name(name: &str) -> &str {
    if name.trim().is_empty() { UNKNOWN_DEVICE_NAME } else { name }
}

fn describe(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Connected { address } => format!("Connected to {}", address),
        SessionEvent::Disconnected => String::from("Disconnected"),
        SessionEvent::CharacteristicsIndexed(characteristics) => {
            format!("{} characteristic(s) available", characteristics.len())
        },
        SessionEvent::LogLine { text, .. } => text.clone(),
        SessionEvent::ValueDecoded { uuid, source, fields } => {
            let source = match source {
                ValueSource::Read => "read",
                ValueSource::Notify => "notify",
            };
            let fields = fields.fields().into_iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join(" ");
            format!("[STATUS {} {}] {}", uuid, source, fields)
        },
        SessionEvent::FormulaEvaluated { uuid, name, result } => match result {
            Ok(value) => format!("[FORMULA {} {}] {}", uuid, name, value),
            Err(err) => format!("[FORMULA {} {}] {}", uuid, name, err),
        },
        SessionEvent::SeriesUpdated(series) => series.iter()
            .map(|series| match series.points.last() {
                Some(point) => format!("[SERIES {}] {} point(s), latest {:.3}s = {}", series.name, series.points.len(), point.time, point.value),
                None => format!("[SERIES {}] empty", series.name),
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn print_events(receiver: &mut EventReceiver, duration: Duration) {
    let deadline = Instant::now() + duration;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match receiver.wait_for(remaining, |_| true) {
            Some(event) => println!("{}", describe(&event)),
            None => break,
        }
    }
}

fn scan(controller: &SessionController, filter_mode: FilterMode) -> Result<(), AppRunError> {
    controller.scan()?;
    for device in controller.devices(filter_mode) {
        let rssi = device.signal_strength.map(|rssi| format!("{} dBm", rssi)).unwrap_or_else(|| String::from("-"));
        let named = if has_name(&device) { "" } else { " (unnamed)" };
        println!("{}  {}  {}{}", device.address, display_name(&device.display_name), rssi, named);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn connect(
    controller: &SessionController,
    receiver: &mut EventReceiver,
    address: &str,
    reads: Vec<String>,
    writes: Vec<WriteRequest>,
    notifies: Vec<String>,
    formulas: Vec<FormulaRequest>,
    tracks: Vec<String>,
    duration: Duration,
) -> Result<(), AppRunError> {
    let mut by_uuid: Vec<(String, Vec<FormulaDefinition>)> = Vec::new();
    for request in formulas {
        match by_uuid.iter_mut().find(|(uuid, _)| *uuid == request.uuid) {
            Some((_, definitions)) => definitions.push(request.definition),
            None => by_uuid.push((request.uuid, vec![request.definition])),
        }
    }
    for (uuid, definitions) in by_uuid {
        for name in controller.set_formulas(&uuid, definitions) {
            warn!("Formula name {} is used on more than one characteristic; their values share one series", name);
        }
    }
    for name in &tracks {
        controller.add_series(name);
    }

    let info = controller.connect(address)?;
    if info.discovery == DiscoveryOutcome::NoServices {
        println!("{} exposes no GATT services", info.address);
    }
    for characteristic in &info.characteristics {
        println!("{}  handle {}  {}", characteristic.uuid, characteristic.handle, characteristic.capabilities);
    }

    for request in writes {
        if let Err(err) = controller.write(&request.uuid, request.payload) {
            warn!("{}", err);
        }
    }
    for uuid in reads {
        match controller.read(&uuid) {
            Ok(payload) => println!("{} = {}", uuid, hex_preview(&payload)),
            Err(err) => warn!("{}", err),
        }
    }
    for uuid in notifies {
        if let Err(err) = controller.set_notify(&uuid, true) {
            warn!("{}", err);
        }
    }

    print_events(receiver, duration);
    Ok(())
}

/// Run the command line front end. Returns once the command finished and the session is closed.
pub fn execute(args: Args) -> Result<(), AppRunError> {
    if let Command::Eval { expression, payload } = &args.command {
        let payload = match payload {
            Some(payload) => parse_hex(payload).map_err(AppRunError::InvalidArgument)?,
            None => Vec::new(),
        };
        match evaluate(expression, &Environment::from_payload(&payload)) {
            Ok(value) => println!("{}", value),
            Err(err) => println!("{}", err),
        }
        return Ok(());
    }

    let config = load_config(&args.config)?;
    let transport: Arc<dyn Transport> = if args.simulate {
        info!("Using the simulated peripheral");
        Arc::new(SimTransport::demo())
    } else {
        Arc::new(BtleTransport::new())
    };

    let (controller, mut receiver) = SessionController::start(transport, &config)?;

    let result = match args.command {
        Command::Scan { named, unnamed } => {
            let filter_mode = match (named, unnamed) {
                (true, _) => FilterMode::NamedOnly,
                (_, true) => FilterMode::UnnamedOnly,
                _ => FilterMode::All,
            };
            scan(&controller, filter_mode)
        },
        Command::Connect { address, read, write, notify, formula, track, duration } => connect(
            &controller,
            &mut receiver,
            &address,
            read,
            write,
            notify,
            formula,
            track,
            Duration::from_secs(duration),
        ),
        Command::Eval { .. } => Ok(()),
    };

    controller.close();
    // whatever the close produced (Disconnected, last log lines)
    for event in receiver.drain() {
        println!("{}", describe(&event));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_accepts_all_separators() {
        assert_eq!(parse_hex("01 A0 0d").unwrap(), vec![0x01, 0xa0, 0x0d]);
        assert_eq!(parse_hex("01,a0,0d").unwrap(), vec![0x01, 0xa0, 0x0d]);
        assert_eq!(parse_hex("01;a0; 0d").unwrap(), vec![0x01, 0xa0, 0x0d]);
        assert_eq!(parse_hex("").unwrap(), Vec::<u8>::new());
        assert!(parse_hex("01 zz").is_err());
        assert!(parse_hex("100").is_err());
    }

    #[test]
    fn formula_argument_is_split_on_first_colon_and_equals() {
        let request = parse_formula("0000fff1-0000-1000-8000-00805f9b34fb:flow=b1*255 + b2").unwrap();
        assert_eq!(request.uuid, "0000fff1-0000-1000-8000-00805f9b34fb");
        assert_eq!(request.definition, FormulaDefinition::new("flow", "b1*255 + b2"));
        assert!(parse_formula("no-colon").is_err());
        assert!(parse_formula("uuid:=b1").is_err());
    }

    #[test]
    fn verbosity_maps_to_level() {
        let args = Args::parse_from(["gatt-browser", "-vv", "scan", "--named"]);
        assert_eq!(args.log_level(), LevelFilter::Trace);
        assert!(matches!(args.command, Command::Scan { named: true, unnamed: false }));
    }

    #[test]
    fn write_argument_parses_payload() {
        let args = Args::parse_from(["gatt-browser", "connect", "AA:BB", "--write", "fff2=01,02"]);
        match args.command {
            Command::Connect { write, duration, .. } => {
                assert_eq!(write, vec![WriteRequest { uuid: String::from("fff2"), payload: vec![1, 2] }]);
                assert_eq!(duration, 10);
            },
            other => panic!("unexpected command {:?}", other),
        }
    }
}
