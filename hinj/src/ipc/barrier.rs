//! Step synchronization barrier
//!
//! The autopilot side owns a listening socket. Once per simulation step the
//! simulator and the framework each connect to it: the first connection
//! releases [`SyncBarrier::start_sync`], the second releases
//! [`SyncBarrier::end_sync`], which also hands the peer the iteration counter.
//! The connection itself is the signal; no payload flows towards the barrier.

use std::fs;
use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use nix::sys::socket::{AddressFamily, Backlog, SockFlag, SockType, UnixAddr, bind, listen, socket};
use tracing::{debug, info, warn};

use super::Endpoints;
use crate::error::{HinjError, Result};

/// Pending connections the sync socket queues while nobody is waiting
pub const SYNC_BACKLOG: i32 = 50;

/// Default cap for the accept retry backoff
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_millis(100);

/// Default poll period while waiting with a cancel token
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

const MIN_BACKOFF: Duration = Duration::from_millis(1);

/// Shared flag that aborts a pending barrier wait
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Re-arm the token for the next wait
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Tuning for the accept loop
#[derive(Debug, Clone)]
pub struct BarrierOptions {
    /// Upper bound for the sleep between failed accepts; zero retries immediately
    pub max_backoff: Duration,
    /// How often a cancellable wait checks its token
    pub poll_interval: Duration,
    /// When set, waits poll instead of blocking and stop once cancelled
    pub cancel: Option<CancelToken>,
}

impl Default for BarrierOptions {
    fn default() -> Self {
        Self {
            max_backoff: DEFAULT_MAX_BACKOFF,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: None,
        }
    }
}

/// Rendezvous point for simulator, autopilot and framework
///
/// The listening socket is created on first use. A failure at that point is
/// remembered and returned by every later call on this barrier.
#[derive(Debug)]
pub struct SyncBarrier {
    socket_path: PathBuf,
    options: BarrierOptions,
    listener: OnceLock<Result<UnixListener>>,
    iteration: AtomicU64,
}

impl SyncBarrier {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            options: BarrierOptions::default(),
            listener: OnceLock::new(),
            iteration: AtomicU64::new(0),
        }
    }

    pub fn from_endpoints(endpoints: &Endpoints) -> Self {
        Self::new(endpoints.sync.clone())
    }

    pub fn with_options(mut self, options: BarrierOptions) -> Self {
        self.options = options;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Number of completed end-of-step rendezvous
    pub fn iteration(&self) -> u64 {
        self.iteration.load(Ordering::SeqCst)
    }

    /// Create the listening socket now instead of on the first wait
    pub fn init(&self) -> Result<()> {
        self.listener().map(|_| ())
    }

    /// Wait for the start-of-step connection
    pub fn start_sync(&self) -> Result<()> {
        debug!(socket_path = ?self.socket_path, "SyncBarrier::start_sync: waiting for peer");
        let listener = self.listener()?;
        drop(self.accept(listener)?);
        debug!("SyncBarrier::start_sync: released");
        Ok(())
    }

    /// Wait for the end-of-step connection and send it the iteration counter
    ///
    /// The counter advances whether or not the write succeeds, so it counts
    /// completed calls rather than delivered acknowledgements. Returns the
    /// value that was sent.
    pub fn end_sync(&self) -> Result<u64> {
        debug!(socket_path = ?self.socket_path, "SyncBarrier::end_sync: waiting for peer");
        let listener = self.listener()?;
        let mut stream = self.accept(listener)?;

        let iteration = self.iteration.fetch_add(1, Ordering::SeqCst);
        let sent = stream.write_all(&iteration.to_ne_bytes());
        drop(stream);

        match sent {
            Ok(()) => {
                debug!(iteration, "SyncBarrier::end_sync: released");
                Ok(iteration)
            }
            Err(e) => {
                warn!(iteration, error = %e, "SyncBarrier::end_sync: failed to send iteration");
                Err(HinjError::BadSend)
            }
        }
    }

    fn listener(&self) -> Result<&UnixListener> {
        self.listener
            .get_or_init(|| create_listener_at(&self.socket_path, self.options.cancel.is_some()))
            .as_ref()
            .map_err(|e| *e)
    }

    /// Accept one connection, retrying transient failures forever
    fn accept(&self, listener: &UnixListener) -> Result<UnixStream> {
        let mut backoff = Duration::ZERO;
        loop {
            if let Some(cancel) = &self.options.cancel
                && cancel.is_cancelled()
            {
                debug!("SyncBarrier: wait cancelled");
                return Err(HinjError::Cancelled);
            }

            match listener.accept() {
                Ok((stream, _)) => {
                    if self.options.cancel.is_some()
                        && let Err(e) = stream.set_nonblocking(false)
                    {
                        warn!(error = %e, "SyncBarrier: failed to make peer stream blocking");
                    }
                    return Ok(stream);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(self.options.poll_interval),
                Err(e) => {
                    backoff = next_backoff(backoff, self.options.max_backoff);
                    warn!(error = %e, ?backoff, "SyncBarrier: accept() error, retrying");
                    if !backoff.is_zero() {
                        thread::sleep(backoff);
                    }
                }
            }
        }
    }
}

/// Double the previous delay, starting at 1ms and capped at `max`
pub(crate) fn next_backoff(previous: Duration, max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    (previous * 2).max(MIN_BACKOFF).min(max)
}

/// Create and bind the sync socket at `socket_path`
///
/// Any file already at the path is removed first. The backlog is fixed at
/// [`SYNC_BACKLOG`] so peers that run ahead queue instead of failing.
pub fn create_listener_at(socket_path: &Path, nonblocking: bool) -> Result<UnixListener> {
    debug!(?socket_path, "create_listener_at: creating sync socket");

    let fd = socket(AddressFamily::Unix, SockType::Stream, SockFlag::empty(), None).map_err(|e| {
        warn!(error = %e, "create_listener_at: socket() failed");
        HinjError::NoSocket
    })?;

    if let Err(e) = fs::remove_file(socket_path)
        && e.kind() != io::ErrorKind::NotFound
    {
        debug!(?socket_path, error = %e, "create_listener_at: could not remove stale socket");
    }

    let addr = UnixAddr::new(socket_path).map_err(|e| {
        warn!(?socket_path, error = %e, "create_listener_at: invalid socket path");
        HinjError::BadBind
    })?;
    bind(fd.as_raw_fd(), &addr).map_err(|e| {
        warn!(?socket_path, error = %e, "create_listener_at: bind() failed");
        HinjError::BadBind
    })?;

    let backlog = Backlog::new(SYNC_BACKLOG).map_err(|e| {
        warn!(error = %e, "create_listener_at: invalid backlog");
        HinjError::BadListen
    })?;
    listen(&fd, backlog).map_err(|e| {
        warn!(error = %e, "create_listener_at: listen() failed");
        HinjError::BadListen
    })?;

    let listener = UnixListener::from(fd);
    if nonblocking {
        listener.set_nonblocking(true).map_err(|e| {
            warn!(error = %e, "create_listener_at: failed to make listener non-blocking");
            HinjError::BadListen
        })?;
    }

    info!(?socket_path, "Sync socket listening");
    Ok(listener)
}
