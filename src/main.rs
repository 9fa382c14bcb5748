//! Admin tool: weave-check a device or run it against the bus.
//!
//! The built-in device is a small alerting setup (two temperatures and a
//! door contact) meant as a working template; real deployments build
//! their own blocks against the library crate.
//!
//! Exit codes: 0 clean stop, 1 configuration error, 2 runtime failure.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{info, warn};

use knx_weave::error::{ConfigErrorKind, TransceiverErrorKind};
use knx_weave::runner::{daemonize, DeviceRunner};
use knx_weave::{
    AccessMode, AddressStyle, Condition, DatapointEvent, Device, Ets, FunctionalBlock, GadMap,
    IndividualAddress, KnxError, Notifier, Priority, Scheduler, Settings, Value,
};

/// Fallback map so the template device runs out of the box.
const BUILTIN_GAD_MAP: &str = "\
temp_1 = 1/1/1
temp_2 = 1/1/2
door_1 = 1/1/3
";

/// Alert thresholds for the template temperature datapoints.
const TEMP_LIMITS: (f32, f32) = (15.0, 28.0);

#[derive(Parser)]
#[command(name = "knx-weave", version, about = "KNXnet/IP routing device admin tool")]
struct Cli {
    /// GAD map file (one `name = group/address` per line)
    #[arg(long, global = true)]
    gad_map: Option<PathBuf>,

    /// Device individual address
    #[arg(long, global = true, default_value = "1.1.1")]
    address: String,

    /// Group address notation, 2- or 3-level
    #[arg(long, global = true, default_value_t = 3)]
    address_level: u8,

    /// Log level: trace, debug, info, warning, error
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Routing multicast group
    #[arg(long, global = true, default_value = "224.0.23.12")]
    multicast_addr: String,

    /// Routing UDP port
    #[arg(long, global = true, default_value_t = 3671)]
    multicast_port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Weave the device and print the group-object address table
    Check,
    /// Weave the device and enter the main loop
    Run {
        /// Detach from the controlling terminal
        #[arg(long)]
        daemon: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    std::process::exit(match execute(&cli) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("knx-weave: {err}");
            if err.is_config() {
                1
            } else {
                2
            }
        }
    });
}

fn config_error(kind: ConfigErrorKind, detail: String) -> KnxError {
    KnxError::Config(kind, detail)
}

fn settings_from(cli: &Cli) -> Result<Settings, KnxError> {
    let address_style = AddressStyle::from_level(cli.address_level).ok_or_else(|| {
        config_error(
            ConfigErrorKind::BadAddress,
            format!("address level must be 2 or 3, got {}", cli.address_level),
        )
    })?;
    let logger_level = Settings::parse_logger_level(&cli.log_level).ok_or_else(|| {
        config_error(
            ConfigErrorKind::BadState,
            format!("unknown log level {:?}", cli.log_level),
        )
    })?;
    let multicast_addr = cli.multicast_addr.parse().map_err(|_| {
        config_error(
            ConfigErrorKind::BadAddress,
            format!("bad multicast address {:?}", cli.multicast_addr),
        )
    })?;
    Ok(Settings {
        address_style,
        logger_level,
        multicast_addr,
        multicast_port: cli.multicast_port,
        ..Settings::default()
    })
}

fn execute(cli: &Cli) -> Result<(), KnxError> {
    let settings = settings_from(cli)?;
    env_logger::Builder::new()
        .filter_level(settings.logger_level)
        .init();

    let individual_address: IndividualAddress = cli.address.parse()?;
    let gad_map = match &cli.gad_map {
        Some(path) => GadMap::load(path)?,
        None => GadMap::parse(BUILTIN_GAD_MAP)?,
    };

    let ets = Ets::new(gad_map, Notifier::new());
    let device = Device::new(
        "alert-device",
        individual_address,
        settings,
        Arc::clone(&ets),
        Scheduler::new(),
    );
    device.add_block(alert_block()?)?;

    let runner = DeviceRunner::new(device);
    match cli.command {
        Command::Check => {
            let groat = runner.check()?;
            print!("{groat}");
            Ok(())
        }
        Command::Run { daemon } => {
            if daemon {
                daemonize().map_err(|e| {
                    KnxError::Transceiver(TransceiverErrorKind::Io, format!("daemonize: {e}"))
                })?;
            }

            let shutdown = Arc::new(AtomicBool::new(false));
            for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
                signal_hook::flag::register(signal, Arc::clone(&shutdown)).map_err(|e| {
                    KnxError::Transceiver(TransceiverErrorKind::Io, format!("signal handler: {e}"))
                })?;
            }

            runner.device().scheduler().every(
                std::time::Duration::from_secs(60),
                "heartbeat",
                || info!("alive"),
            );

            runner.run(&shutdown)
        }
    }
}

/// The template block: two temperatures and a door contact, with alert
/// logging on out-of-range and door-open transitions.
fn alert_block() -> Result<Arc<FunctionalBlock>, KnxError> {
    FunctionalBlock::builder("alert")
        .description("Temperature and door alerting")
        .datapoint("temp_1", "9.001", AccessMode::Input, Value::Float(19.0))
        .datapoint("temp_2", "9.001", AccessMode::Input, Value::Float(19.0))
        .datapoint("door_1", "1.009", AccessMode::Input, Value::Bool(false))
        .group_object("temp_1", "CWU", Priority::Low)
        .group_object("temp_2", "CWU", Priority::Low)
        .group_object("door_1", "CWU", Priority::Low)
        .on_datapoint("temp_1", Condition::Change, temp_changed)
        .on_datapoint("temp_2", Condition::Change, temp_changed)
        .on_datapoint("door_1", Condition::Change, door_changed)
        .build()
}

fn temp_changed(fb: &FunctionalBlock, event: &DatapointEvent) {
    info!(
        "{}: {} changed {} -> {}",
        fb.name(),
        event.datapoint,
        event.old_value,
        event.new_value
    );
    if let Value::Float(celsius) = event.new_value {
        if !(TEMP_LIMITS.0..=TEMP_LIMITS.1).contains(&celsius) {
            warn!(
                "{}: {} value {celsius} outside limits {TEMP_LIMITS:?}",
                fb.name(),
                event.datapoint
            );
        }
    }
}

fn door_changed(fb: &FunctionalBlock, event: &DatapointEvent) {
    info!(
        "{}: {} changed {} -> {}",
        fb.name(),
        event.datapoint,
        event.old_value,
        event.new_value
    );
    if event.new_value == Value::Bool(true) {
        warn!("{}: {} is now open", fb.name(), event.datapoint);
    }
}
