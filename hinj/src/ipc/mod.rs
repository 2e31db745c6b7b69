//! Inter-Process Communication with the flight-dynamics simulator
//!
//! Two Unix Domain Sockets live in the user's home directory:
//!
//! - `~/.hardware_controller`: the simulator listens here; the autopilot opens
//!   one short-lived connection per sensor update (see [`ExchangeClient`]).
//! - `~/.drone_signal`: the autopilot side listens here and the simulator and
//!   framework connect once per step to rendezvous (see [`SyncBarrier`]).

use std::env;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{HinjError, Result};

pub mod barrier;
pub mod client;
pub mod listener;
pub mod packets;

pub use barrier::{BarrierOptions, CancelToken, SyncBarrier};
pub use client::ExchangeClient;
pub use listener::{PacketHandler, SensorListener, SyncPeer};
pub use packets::{GpsFix, MessageType, Packet, WirePacket};

/// File name of the message endpoint, relative to the home directory
pub const MESSAGE_SOCKET_NAME: &str = ".hardware_controller";

/// File name of the sync endpoint, relative to the home directory
pub const SYNC_SOCKET_NAME: &str = ".drone_signal";

/// Resolved socket paths for one process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Where the simulator accepts sensor packets
    pub message: PathBuf,
    /// Where the barrier listens for step rendezvous
    pub sync: PathBuf,
}

impl Endpoints {
    /// Derive both paths from `$HOME`
    ///
    /// An unset or empty `HOME` is a configuration error, never a default.
    pub fn from_env() -> Result<Self> {
        match env::var_os("HOME") {
            Some(home) if !home.is_empty() => Ok(Self::from_home(home)),
            _ => {
                debug!("Endpoints::from_env: HOME is not set");
                Err(HinjError::NoPath)
            }
        }
    }

    /// Derive both paths from an explicit home directory
    pub fn from_home(home: impl AsRef<Path>) -> Self {
        let home = home.as_ref();
        let endpoints = Self {
            message: home.join(MESSAGE_SOCKET_NAME),
            sync: home.join(SYNC_SOCKET_NAME),
        };
        debug!(?endpoints, "Endpoints::from_home: resolved");
        endpoints
    }
}
