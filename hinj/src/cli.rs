//! CLI argument parsing for hinj

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hinj")]
#[command(author, version, about = "Inject simulated sensor values and synchronize simulation steps", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the wire size of every packet kind
    Sizes,

    /// Inject a zero compass reading and report the outcome
    Compass {
        /// Sensor instance
        #[arg(short, long, default_value = "0")]
        instance: u8,
    },

    /// Inject one sensor reading and print what the simulator used
    Inject {
        #[command(subcommand)]
        sensor: Sensor,
    },

    /// Report the flight mode
    Mode {
        /// Raw mode value; overrides the component flags
        #[arg(conflicts_with_all = ["bmode", "cmode", "smode"])]
        mode: Option<u32>,

        /// Base mode component
        #[arg(long, default_value = "0")]
        bmode: u8,

        /// Custom mode component
        #[arg(long, default_value = "0")]
        cmode: u8,

        /// System mode component
        #[arg(long, default_value = "0")]
        smode: u8,
    },

    /// Own the sync socket and run start/end rendezvous
    Sync {
        /// Number of steps to run (0 runs until killed)
        #[arg(short = 'n', long, default_value = "1")]
        iterations: u64,
    },

    /// Act as the simulator: answer sensor packets on the message socket
    Serve {
        /// Flag every reply as ignored
        #[arg(long)]
        ignore: bool,

        /// Stop after this many packets
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Print the message for an error code
    Strerror {
        /// Numeric code as returned by the flat API
        #[arg(allow_negative_numbers = true)]
        code: i32,
    },
}

#[derive(Subcommand, Debug)]
pub enum Sensor {
    Gyro {
        #[arg(allow_negative_numbers = true)]
        x: f32,
        #[arg(allow_negative_numbers = true)]
        y: f32,
        #[arg(allow_negative_numbers = true)]
        z: f32,
        #[arg(short, long, default_value = "0")]
        instance: u8,
    },

    Accel {
        #[arg(allow_negative_numbers = true)]
        x: f32,
        #[arg(allow_negative_numbers = true)]
        y: f32,
        #[arg(allow_negative_numbers = true)]
        z: f32,
        #[arg(short, long, default_value = "0")]
        instance: u8,
    },

    Compass {
        #[arg(allow_negative_numbers = true)]
        mag_0: f32,
        #[arg(allow_negative_numbers = true)]
        mag_1: f32,
        #[arg(allow_negative_numbers = true)]
        mag_2: f32,
        #[arg(short, long, default_value = "0")]
        instance: u8,
    },

    Barometer {
        pressure: f32,
        #[arg(allow_negative_numbers = true)]
        temperature: f32,
        #[arg(short, long, default_value = "0")]
        instance: u8,
    },

    Battery {
        voltage: f32,
        #[arg(allow_negative_numbers = true)]
        current: f32,
        throttle: f32,
    },

    Gps {
        /// Latitude in degrees * 1e7
        #[arg(allow_negative_numbers = true)]
        lat: i32,
        /// Longitude in degrees * 1e7
        #[arg(allow_negative_numbers = true)]
        lon: i32,
        /// Altitude in millimetres
        #[arg(allow_negative_numbers = true)]
        alt: i32,
        #[arg(long, default_value = "3")]
        fix_type: u8,
        #[arg(long, default_value = "10")]
        satellites: u8,
        #[arg(short, long, default_value = "0")]
        instance: u8,
    },
}
