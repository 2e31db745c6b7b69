//! Simulator side of the protocol
//!
//! Helpers for the process at the other end of the sockets: accepting sensor
//! packets on the message socket and answering them, and connecting to the
//! autopilot's sync socket. Used by the `serve` command and by tests.

use std::fs;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use eyre::{Context, Result};
use tracing::{debug, info, warn};

use super::Endpoints;
use super::barrier::next_backoff;
use super::packets::{MessageType, Packet};

/// Produces the reply for one received packet
///
/// Returning `None` closes the connection without answering. Mode packets are
/// never answered regardless of what the handler returns.
pub trait PacketHandler {
    fn handle(&mut self, packet: Packet) -> Option<Packet>;
}

impl<F> PacketHandler for F
where
    F: FnMut(Packet) -> Option<Packet>,
{
    fn handle(&mut self, packet: Packet) -> Option<Packet> {
        self(packet)
    }
}

/// Answer every packet with itself
pub fn echo_handler(packet: Packet) -> Option<Packet> {
    Some(packet)
}

/// Answer every packet with the ignore flag set, optionally overriding the payload
#[derive(Debug, Default)]
pub struct IgnoreHandler {
    /// Replaces the echoed payload when its kind matches the request
    pub substitute: Option<Packet>,
}

impl PacketHandler for IgnoreHandler {
    fn handle(&mut self, packet: Packet) -> Option<Packet> {
        let mut reply = match self.substitute {
            Some(substitute) if substitute.message_type() == packet.message_type() => substitute,
            _ => packet,
        };
        reply.set_ignore(true);
        Some(reply)
    }
}

/// Listening message socket of a simulator
#[derive(Debug)]
pub struct SensorListener {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl SensorListener {
    /// Bind the message socket, replacing a stale socket file from a previous run
    pub fn bind(socket_path: impl Into<PathBuf>) -> Result<Self> {
        let socket_path = socket_path.into();
        debug!(?socket_path, "SensorListener::bind: creating message socket");

        if let Some(parent) = socket_path.parent() {
            fs::create_dir_all(parent).context("Failed to create socket directory")?;
        }

        if socket_path.exists() {
            debug!(?socket_path, "SensorListener::bind: removing stale socket");
            fs::remove_file(&socket_path).context("Failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(&socket_path).context("Failed to bind message socket")?;
        info!(?socket_path, "Message socket listening");

        Ok(Self { listener, socket_path })
    }

    pub fn from_endpoints(endpoints: &Endpoints) -> Result<Self> {
        Self::bind(endpoints.message.clone())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept one connection, read one packet, answer it via `handler`
    ///
    /// Returns the received request.
    pub fn serve_one<H: PacketHandler + ?Sized>(&self, handler: &mut H) -> Result<Packet> {
        let (mut stream, _) = self.listener.accept().context("Failed to accept connection")?;
        let request = read_packet(&mut stream)?;
        debug!(?request, "SensorListener::serve_one: received packet");

        if !request.expects_reply() {
            return Ok(request);
        }

        match handler.handle(request) {
            Some(reply) => {
                if reply.message_type() != request.message_type() {
                    warn!(
                        request = ?request.message_type(),
                        reply = ?reply.message_type(),
                        "SensorListener: reply kind differs from request"
                    );
                }
                send_packet(&mut stream, &reply)?;
            }
            None => debug!("SensorListener::serve_one: handler declined to reply"),
        }

        Ok(request)
    }

    /// Serve until `count` packets were handled, or forever when `count` is `None`
    ///
    /// Only successful exchanges count. Failures are logged and followed by a
    /// capped exponential backoff that resets on the next success. Returns the
    /// number of packets served.
    pub fn serve<H, F>(&self, handler: &mut H, count: Option<usize>, max_backoff: Duration, mut on_packet: F) -> usize
    where
        H: PacketHandler + ?Sized,
        F: FnMut(&Packet),
    {
        let mut served = 0usize;
        let mut backoff = Duration::ZERO;
        while count.is_none_or(|limit| served < limit) {
            match self.serve_one(&mut *handler) {
                Ok(packet) => {
                    on_packet(&packet);
                    served += 1;
                    backoff = Duration::ZERO;
                }
                Err(e) => {
                    backoff = next_backoff(backoff, max_backoff);
                    warn!(error = %e, ?backoff, "SensorListener: failed to serve packet");
                    if !backoff.is_zero() {
                        thread::sleep(backoff);
                    }
                }
            }
        }
        served
    }
}

impl Drop for SensorListener {
    fn drop(&mut self) {
        cleanup_socket(&self.socket_path);
    }
}

/// Read one complete packet, sized by its leading tag
pub fn read_packet(stream: &mut impl Read) -> Result<Packet> {
    let mut tag = [0u8; 1];
    stream.read_exact(&mut tag).context("Failed to read message type")?;

    let kind = MessageType::try_from(tag[0])?;
    let size = kind
        .packet_size()
        .ok_or_else(|| eyre::eyre!("Message type {:?} has no wire layout", kind))?;

    let mut bytes = vec![0u8; size];
    bytes[0] = tag[0];
    stream
        .read_exact(&mut bytes[1..])
        .with_context(|| format!("Failed to read {:?} packet", kind))?;

    Ok(Packet::decode(&bytes)?)
}

/// Write one packet
pub fn send_packet(stream: &mut impl Write, packet: &Packet) -> Result<()> {
    stream.write_all(packet.as_bytes()).context("Failed to write packet")?;
    stream.flush().context("Failed to flush packet")?;
    debug!(?packet, "send_packet: sent packet");
    Ok(())
}

/// Remove the socket file on shutdown
pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}

/// The connecting side of the sync barrier
#[derive(Debug, Clone)]
pub struct SyncPeer {
    socket_path: PathBuf,
}

impl SyncPeer {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn from_endpoints(endpoints: &Endpoints) -> Self {
        Self::new(endpoints.sync.clone())
    }

    /// Release a pending `start_sync`
    pub fn signal_start(&self) -> Result<()> {
        debug!(socket_path = ?self.socket_path, "SyncPeer::signal_start: connecting");
        UnixStream::connect(&self.socket_path).context("Failed to connect to sync socket")?;
        Ok(())
    }

    /// Release a pending `end_sync` and return the iteration it reports
    pub fn await_end(&self) -> Result<u64> {
        debug!(socket_path = ?self.socket_path, "SyncPeer::await_end: connecting");
        let mut stream = UnixStream::connect(&self.socket_path).context("Failed to connect to sync socket")?;
        let mut buf = [0u8; 8];
        stream.read_exact(&mut buf).context("Failed to read iteration counter")?;
        let iteration = u64::from_ne_bytes(buf);
        debug!(iteration, "SyncPeer::await_end: released");
        Ok(iteration)
    }
}
