//! hinj - hardware-in-the-loop sensor injection
//!
//! Lets an autopilot process push simulated sensor values into a flight
//! dynamics simulator running on the same host, read back what the simulator
//! actually used, and keep both processes stepping in lockstep.
//!
//! # Architecture
//!
//! ```text
//!  autopilot                                  simulator
//!  ─────────                                  ─────────
//!  ExchangeClient ── one packet per call ──▶ ~/.hardware_controller
//!                 ◀── same-shape reply ────
//!
//!  SyncBarrier   ◀── connect (start) ──────── framework / simulator
//!  ~/.drone_signal ◀─ connect, read u64 ───── (end, iteration counter)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use hinj::{Endpoints, ExchangeClient, SyncBarrier};
//!
//! let endpoints = Endpoints::from_env()?;
//! let client = ExchangeClient::from_endpoints(&endpoints);
//! let barrier = SyncBarrier::from_endpoints(&endpoints);
//!
//! loop {
//!     barrier.start_sync()?;
//!     let (mut x, mut y, mut z) = (0.0, 0.0, 0.0);
//!     if client.update_gyro(&mut x, &mut y, &mut z, 0)?.is_ignored() {
//!         // simulator kept its own value, now in x/y/z
//!     }
//!     barrier.end_sync()?;
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod global;
pub mod ipc;

pub use config::Config;
pub use error::{Ack, HinjError, strerror};
pub use ipc::{
    BarrierOptions, CancelToken, Endpoints, ExchangeClient, GpsFix, MessageType, Packet, PacketHandler,
    SensorListener, SyncBarrier, SyncPeer, WirePacket,
};
pub use ipc::packets::{decode_mode, encode_mode};
