//! hinj - sensor injection and step synchronization
//!
//! CLI entry point for poking a running simulator by hand.

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use hinj::cli::{Cli, Command, Sensor};
use hinj::config::Config;
use hinj::ipc::listener::{IgnoreHandler, echo_handler};
use hinj::ipc::packets::{
    AccelPacket, BarometerPacket, BatteryPacket, CompassPacket, GpsPacket, GyroPacket, ModePacket, WirePacket,
};
use hinj::{Ack, Endpoints, GpsFix, HinjError, PacketHandler, SensorListener, encode_mode, strerror};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level).map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    debug!(?level, "Logging initialized");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()).context("Failed to setup logging")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Sizes => cmd_sizes(),
        Command::Strerror { code } => {
            println!("{}", strerror(code));
            Ok(())
        }
        Command::Compass { instance } => cmd_compass(&config, instance),
        Command::Inject { sensor } => cmd_inject(&config, sensor),
        Command::Mode {
            mode,
            bmode,
            cmode,
            smode,
        } => cmd_mode(&config, mode.unwrap_or_else(|| encode_mode(bmode, cmode, smode))),
        Command::Sync { iterations } => cmd_sync(&config, iterations),
        Command::Serve { ignore, count } => cmd_serve(&config, ignore, count),
    }
}

fn cmd_sizes() -> Result<()> {
    let sizes = [
        ("gps", GpsPacket::SIZE),
        ("accel", AccelPacket::SIZE),
        ("gyro", GyroPacket::SIZE),
        ("battery", BatteryPacket::SIZE),
        ("compass", CompassPacket::SIZE),
        ("barometer", BarometerPacket::SIZE),
        ("mode", ModePacket::SIZE),
    ];
    for (name, size) in sizes {
        println!("{:<10} {}", name, size);
    }
    Ok(())
}

/// Outcome line for one update; errors become the process error
fn report(what: &str, outcome: Result<Ack, HinjError>) -> Result<()> {
    match outcome {
        Ok(Ack::Applied) => {
            println!("{} {} applied", "✓".green(), what);
            Ok(())
        }
        Ok(Ack::Ignored) => {
            println!("{} {} ignored by simulator", "!".yellow(), what);
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("{} update failed (code {})", what, e.code())),
    }
}

fn cmd_compass(config: &Config, instance: u8) -> Result<()> {
    println!("sizeof(compass_pkt) = {}", CompassPacket::SIZE);

    let endpoints = config.endpoints()?;
    let client = config.client(&endpoints);
    let (mut mag_0, mut mag_1, mut mag_2) = (0.0, 0.0, 0.0);
    let outcome = client.update_compass(&mut mag_0, &mut mag_1, &mut mag_2, instance);

    if outcome.is_ok() {
        println!("compass = [{}, {}, {}]", mag_0, mag_1, mag_2);
    }
    report("compass", outcome)
}

fn cmd_inject(config: &Config, sensor: Sensor) -> Result<()> {
    let endpoints = config.endpoints()?;
    let client = config.client(&endpoints);

    match sensor {
        Sensor::Gyro {
            mut x,
            mut y,
            mut z,
            instance,
        } => {
            let outcome = client.update_gyro(&mut x, &mut y, &mut z, instance);
            report("gyro", outcome)?;
            println!("gyro = [{}, {}, {}]", x, y, z);
        }
        Sensor::Accel {
            mut x,
            mut y,
            mut z,
            instance,
        } => {
            let outcome = client.update_accel(&mut x, &mut y, &mut z, instance);
            report("accel", outcome)?;
            println!("accel = [{}, {}, {}]", x, y, z);
        }
        Sensor::Compass {
            mut mag_0,
            mut mag_1,
            mut mag_2,
            instance,
        } => {
            let outcome = client.update_compass(&mut mag_0, &mut mag_1, &mut mag_2, instance);
            report("compass", outcome)?;
            println!("compass = [{}, {}, {}]", mag_0, mag_1, mag_2);
        }
        Sensor::Barometer {
            mut pressure,
            mut temperature,
            instance,
        } => {
            let outcome = client.update_barometer(&mut pressure, &mut temperature, instance);
            report("barometer", outcome)?;
            println!("barometer = {} hPa, {} C", pressure, temperature);
        }
        Sensor::Battery {
            mut voltage,
            mut current,
            mut throttle,
        } => {
            let outcome = client.update_battery(&mut voltage, &mut current, &mut throttle);
            report("battery", outcome)?;
            println!("battery = {} V, {} A, throttle {}", voltage, current, throttle);
        }
        Sensor::Gps {
            lat,
            lon,
            alt,
            fix_type,
            satellites,
            instance,
        } => {
            let mut fix = GpsFix {
                lat,
                lon,
                alt,
                fix_type,
                satellites_visible: satellites,
                ..Default::default()
            };
            let outcome = client.update_gps(&mut fix, instance);
            report("gps", outcome)?;
            println!("gps = {:?}", fix);
        }
    }

    Ok(())
}

fn cmd_mode(config: &Config, mode: u32) -> Result<()> {
    let endpoints = config.endpoints()?;
    config
        .client(&endpoints)
        .update_mode(mode)
        .with_context(|| format!("Failed to send mode {:#08x}", mode))?;
    println!("{} mode {:#08x} sent", "✓".green(), mode);
    Ok(())
}

fn cmd_sync(config: &Config, iterations: u64) -> Result<()> {
    let endpoints = config.endpoints()?;
    let barrier = config.barrier(&endpoints);
    barrier.init().context("Failed to create sync socket")?;
    info!(socket_path = ?barrier.socket_path(), iterations, "Running sync loop");

    let mut completed = 0u64;
    while iterations == 0 || completed < iterations {
        barrier.start_sync().context("start_sync failed")?;
        match barrier.end_sync() {
            Ok(iteration) => println!("{} step {}", "✓".green(), iteration),
            // The counter still advanced; keep stepping
            Err(e) => warn!(iteration = barrier.iteration() - 1, error = %e, "end_sync failed"),
        }
        completed += 1;
    }

    Ok(())
}

fn cmd_serve(config: &Config, ignore: bool, count: Option<usize>) -> Result<()> {
    let endpoints: Endpoints = config.endpoints()?;
    let listener = SensorListener::from_endpoints(&endpoints)?;
    info!(socket_path = ?listener.socket_path(), ignore, "Serving sensor packets");

    let mut ignore_handler = IgnoreHandler::default();
    let mut echo = echo_handler;
    let handler: &mut dyn PacketHandler = if ignore { &mut ignore_handler } else { &mut echo };

    let served = listener.serve(handler, count, config.barrier_options().max_backoff, |packet| {
        println!("{:?}", packet)
    });
    debug!(served, "cmd_serve: done");

    Ok(())
}
