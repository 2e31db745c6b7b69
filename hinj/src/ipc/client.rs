//! Sensor exchange client
//!
//! Each update opens a fresh connection to the simulator's message socket,
//! sends one packet, reads back one packet of the same layout and closes the
//! connection. No pooling, no retries: one call is one simulation tick.

use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use super::Endpoints;
use super::packets::{
    AccelPacket, BarometerPacket, BatteryPacket, CompassPacket, GpsFix, GpsPacket, GyroPacket, ModePacket, WirePacket,
};
use crate::error::{Ack, HinjError, Result};

/// Client for injecting sensor values into the simulator
#[derive(Debug, Clone)]
pub struct ExchangeClient {
    socket_path: PathBuf,
    timeout: Option<Duration>,
    strict_size: bool,
}

impl ExchangeClient {
    /// Create a client for the given message socket
    ///
    /// I/O blocks without a timeout until [`ExchangeClient::with_timeout`] says otherwise.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: None,
            strict_size: false,
        }
    }

    pub fn from_endpoints(endpoints: &Endpoints) -> Self {
        Self::new(endpoints.message.clone())
    }

    /// Create a client for `$HOME/.hardware_controller`
    pub fn from_env() -> Result<Self> {
        Endpoints::from_env().map(|endpoints| Self::from_endpoints(&endpoints))
    }

    /// Bound every send and receive; a zero duration disables the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Reject replies whose tag or `message_size` disagree with the request layout
    pub fn with_strict_size(mut self, strict: bool) -> Self {
        self.strict_size = strict;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Check if the simulator socket exists
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    pub fn update_gyro(&self, x: &mut f32, y: &mut f32, z: &mut f32, instance: u8) -> Result<Ack> {
        debug!(instance, "ExchangeClient::update_gyro: called");
        let reply = self.exchange(GyroPacket::new(instance, *x, *y, *z))?;
        *x = reply.x;
        *y = reply.y;
        *z = reply.z;
        Ok(ack(&reply))
    }

    pub fn update_accel(&self, x: &mut f32, y: &mut f32, z: &mut f32, instance: u8) -> Result<Ack> {
        debug!(instance, "ExchangeClient::update_accel: called");
        let reply = self.exchange(AccelPacket::new(instance, *x, *y, *z))?;
        *x = reply.accelx;
        *y = reply.accely;
        *z = reply.accelz;
        Ok(ack(&reply))
    }

    pub fn update_compass(&self, mag_0: &mut f32, mag_1: &mut f32, mag_2: &mut f32, instance: u8) -> Result<Ack> {
        debug!(instance, "ExchangeClient::update_compass: called");
        let reply = self.exchange(CompassPacket::new(instance, *mag_0, *mag_1, *mag_2))?;
        *mag_0 = reply.mag_0;
        *mag_1 = reply.mag_1;
        *mag_2 = reply.mag_2;
        Ok(ack(&reply))
    }

    pub fn update_barometer(&self, pressure: &mut f32, temperature: &mut f32, instance: u8) -> Result<Ack> {
        debug!(instance, "ExchangeClient::update_barometer: called");
        let reply = self.exchange(BarometerPacket::new(instance, *pressure, *temperature))?;
        *pressure = reply.pressure;
        *temperature = reply.temperature;
        Ok(ack(&reply))
    }

    /// Battery replies are always authoritative
    pub fn update_battery(&self, voltage: &mut f32, current: &mut f32, throttle: &mut f32) -> Result<Ack> {
        debug!("ExchangeClient::update_battery: called");
        let reply = self.exchange(BatteryPacket::new(*voltage, *current, *throttle))?;
        *voltage = reply.voltage;
        *current = reply.current;
        *throttle = reply.throttle;
        Ok(Ack::Applied)
    }

    pub fn update_gps(&self, fix: &mut GpsFix, instance: u8) -> Result<Ack> {
        debug!(instance, "ExchangeClient::update_gps: called");
        let reply = self.exchange(GpsPacket::new(instance, fix))?;
        *fix = reply.fix();
        Ok(ack(&reply))
    }

    /// Report the current flight mode; returns as soon as the packet is sent
    pub fn update_mode(&self, mode: u32) -> Result<()> {
        debug!(mode, "ExchangeClient::update_mode: called");
        let mut stream = self.connect()?;
        self.send(&mut stream, &ModePacket::new(mode))
    }

    /// Send one packet and wait for the reply of the same layout
    ///
    /// The connection is closed before returning on every path.
    pub fn exchange<P: WirePacket>(&self, request: P) -> Result<P> {
        let mut stream = self.connect()?;
        self.send(&mut stream, &request)?;

        let mut reply: P = bytemuck::Zeroable::zeroed();
        receive_once(&mut stream, bytemuck::bytes_of_mut(&mut reply)).map_err(|e| {
            warn!(error = %e, kind = ?P::MESSAGE_TYPE, "ExchangeClient: receive failed");
            HinjError::BadReceive
        })?;

        if self.strict_size && !reply.header_consistent() {
            warn!(
                tag = reply.tag(),
                message_size = reply.message_size(),
                expected = P::SIZE,
                "ExchangeClient: reply header does not match request layout"
            );
            return Err(HinjError::BadReceive);
        }

        debug!(kind = ?P::MESSAGE_TYPE, ignored = reply.ignored(), "ExchangeClient: received reply");
        Ok(reply)
    }

    fn connect(&self) -> Result<UnixStream> {
        let stream = UnixStream::connect(&self.socket_path).map_err(|e| {
            warn!(socket_path = ?self.socket_path, error = %e, "ExchangeClient: connect failed");
            HinjError::from_connect(&e)
        })?;

        stream
            .set_read_timeout(self.timeout)
            .and_then(|_| stream.set_write_timeout(self.timeout))
            .map_err(|e| {
                warn!(error = %e, "ExchangeClient: failed to set socket timeout");
                HinjError::NoSocket
            })?;

        Ok(stream)
    }

    fn send<P: WirePacket>(&self, stream: &mut UnixStream, packet: &P) -> Result<()> {
        debug!(socket_path = ?self.socket_path, ?packet, "ExchangeClient: sending packet");
        stream.write_all(packet.as_bytes()).map_err(|e| {
            warn!(error = %e, kind = ?P::MESSAGE_TYPE, "ExchangeClient: send failed");
            HinjError::BadSend
        })
    }
}

/// One receive into `buf`; anything short of a full buffer is an error
///
/// Only `EINTR` is retried. A peer that sends part of a reply never gets a
/// second read to finish it.
fn receive_once(stream: &mut impl Read, buf: &mut [u8]) -> std::io::Result<()> {
    loop {
        match stream.read(buf) {
            Ok(n) if n == buf.len() => return Ok(()),
            Ok(n) => {
                return Err(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("short reply: {} of {} bytes", n, buf.len()),
                ));
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

fn ack<P: WirePacket>(reply: &P) -> Ack {
    if reply.ignored() { Ack::Ignored } else { Ack::Applied }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::thread;
    use tempfile::TempDir;

    /// Accept one connection, read `size` bytes, answer with `respond(request)`
    fn mock_simulator<F>(listener: UnixListener, size: usize, respond: F) -> thread::JoinHandle<Vec<u8>>
    where
        F: FnOnce(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = vec![0u8; size];
            stream.read_exact(&mut request).unwrap();
            if let Some(reply) = respond(&request) {
                stream.write_all(&reply).unwrap();
            }
            request
        })
    }

    fn bound(temp: &TempDir) -> (UnixListener, PathBuf) {
        let path = temp.path().join("sim.sock");
        (UnixListener::bind(&path).unwrap(), path)
    }

    #[test]
    fn test_client_with_custom_path() {
        let client = ExchangeClient::new("/custom/path/.hardware_controller");
        assert_eq!(client.socket_path(), Path::new("/custom/path/.hardware_controller"));
        assert_eq!(client.timeout, None);
        assert!(!client.strict_size);
    }

    #[test]
    fn test_client_with_timeout() {
        let client = ExchangeClient::new("/x").with_timeout(Duration::from_secs(10));
        assert_eq!(client.timeout, Some(Duration::from_secs(10)));

        let client = client.with_timeout(Duration::ZERO);
        assert_eq!(client.timeout, None);
    }

    #[test]
    fn test_from_endpoints_uses_message_socket() {
        let endpoints = Endpoints::from_home("/home/pilot");
        let client = ExchangeClient::from_endpoints(&endpoints);
        assert_eq!(client.socket_path(), endpoints.message.as_path());
    }

    #[test]
    fn test_socket_exists_false() {
        let temp = TempDir::new().unwrap();
        let client = ExchangeClient::new(temp.path().join("nonexistent.sock"));
        assert!(!client.socket_exists());
    }

    #[test]
    fn test_no_listener_is_no_connection() {
        let temp = TempDir::new().unwrap();
        let client = ExchangeClient::new(temp.path().join("nonexistent.sock"));

        let (mut x, mut y, mut z) = (1.0, 2.0, 3.0);
        assert_eq!(client.update_gyro(&mut x, &mut y, &mut z, 0), Err(HinjError::NoConnection));
        assert_eq!((x, y, z), (1.0, 2.0, 3.0));
    }

    #[test]
    fn test_stale_socket_file_is_no_connection() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("stale.sock");
        drop(UnixListener::bind(&path).unwrap());

        let client = ExchangeClient::new(path);
        assert_eq!(client.update_mode(1), Err(HinjError::NoConnection));
    }

    #[test]
    fn test_echo_leaves_fields_unchanged() {
        let temp = TempDir::new().unwrap();
        let (listener, path) = bound(&temp);
        let sim = mock_simulator(listener, GyroPacket::SIZE, |req| Some(req.to_vec()));

        let client = ExchangeClient::new(path);
        let (mut x, mut y, mut z) = (0.1, -0.2, 9.81);
        let ack = client.update_gyro(&mut x, &mut y, &mut z, 2).unwrap();

        assert_eq!(ack, Ack::Applied);
        assert_eq!((x, y, z), (0.1, -0.2, 9.81));

        let request = GyroPacket::read_from(&sim.join().unwrap()).unwrap();
        assert_eq!(request, GyroPacket::new(2, 0.1, -0.2, 9.81));
    }

    #[test]
    fn test_ignored_reply_updates_fields() {
        let temp = TempDir::new().unwrap();
        let (listener, path) = bound(&temp);
        let _sim = mock_simulator(listener, BarometerPacket::SIZE, |req| {
            let mut pkt = BarometerPacket::read_from(req).unwrap();
            pkt.ignore = 1;
            pkt.pressure = 990.0;
            pkt.temperature = 15.0;
            Some(pkt.as_bytes().to_vec())
        });

        let client = ExchangeClient::new(path);
        let (mut pressure, mut temperature) = (1013.25, 20.0);
        let ack = client.update_barometer(&mut pressure, &mut temperature, 0).unwrap();

        assert_eq!(ack, Ack::Ignored);
        assert_eq!((pressure, temperature), (990.0, 15.0));
    }

    #[test]
    fn test_battery_reply_is_authoritative() {
        let temp = TempDir::new().unwrap();
        let (listener, path) = bound(&temp);
        let _sim = mock_simulator(listener, BatteryPacket::SIZE, |_| {
            Some(BatteryPacket::new(11.7, 8.0, 0.9).as_bytes().to_vec())
        });

        let client = ExchangeClient::new(path);
        let (mut voltage, mut current, mut throttle) = (12.6, 0.0, 0.0);
        let ack = client.update_battery(&mut voltage, &mut current, &mut throttle).unwrap();

        assert_eq!(ack, Ack::Applied);
        assert_eq!((voltage, current, throttle), (11.7, 8.0, 0.9));
    }

    #[test]
    fn test_peer_closing_before_reply_is_bad_receive() {
        let temp = TempDir::new().unwrap();
        let (listener, path) = bound(&temp);
        let sim = mock_simulator(listener, CompassPacket::SIZE, |_| None);

        let client = ExchangeClient::new(path);
        let (mut a, mut b, mut c) = (1.0, 2.0, 3.0);
        assert_eq!(
            client.update_compass(&mut a, &mut b, &mut c, 0),
            Err(HinjError::BadReceive)
        );
        assert_eq!((a, b, c), (1.0, 2.0, 3.0));
        sim.join().unwrap();
    }

    #[test]
    fn test_short_reply_is_bad_receive() {
        let temp = TempDir::new().unwrap();
        let (listener, path) = bound(&temp);
        let _sim = mock_simulator(listener, AccelPacket::SIZE, |req| Some(req[..7].to_vec()));

        let client = ExchangeClient::new(path);
        let (mut x, mut y, mut z) = (0.0, 0.0, -9.81);
        assert_eq!(client.update_accel(&mut x, &mut y, &mut z, 0), Err(HinjError::BadReceive));
    }

    /// Accept one connection, answer with `pieces` separated by `pause`, then hold the connection for `hold`
    fn stalling_simulator(
        listener: UnixListener,
        pieces: Vec<std::ops::Range<usize>>,
        pause: Duration,
        hold: Duration,
    ) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = vec![0u8; GyroPacket::SIZE];
            stream.read_exact(&mut request).unwrap();
            for (i, piece) in pieces.into_iter().enumerate() {
                if i > 0 {
                    thread::sleep(pause);
                }
                // The client may already have hung up
                let _ = stream.write_all(&request[piece]);
            }
            thread::sleep(hold);
        })
    }

    #[test]
    fn test_partial_reply_on_open_connection_fails_fast() {
        let temp = TempDir::new().unwrap();
        let (listener, path) = bound(&temp);
        let sim = stalling_simulator(listener, vec![0..7], Duration::ZERO, Duration::from_millis(1500));

        let client = ExchangeClient::new(path);
        let (mut x, mut y, mut z) = (1.0, 2.0, 3.0);
        let started = std::time::Instant::now();
        assert_eq!(client.update_gyro(&mut x, &mut y, &mut z, 0), Err(HinjError::BadReceive));
        assert!(started.elapsed() < Duration::from_millis(1000), "took {:?}", started.elapsed());
        assert_eq!((x, y, z), (1.0, 2.0, 3.0));
        sim.join().unwrap();
    }

    #[test]
    fn test_reply_split_across_writes_is_bad_receive() {
        let temp = TempDir::new().unwrap();
        let (listener, path) = bound(&temp);
        let sim = stalling_simulator(
            listener,
            vec![0..7, 7..GyroPacket::SIZE],
            Duration::from_millis(100),
            Duration::ZERO,
        );

        let client = ExchangeClient::new(path);
        let (mut x, mut y, mut z) = (1.0, 2.0, 3.0);
        assert_eq!(client.update_gyro(&mut x, &mut y, &mut z, 0), Err(HinjError::BadReceive));
        sim.join().unwrap();
    }

    #[test]
    fn test_receive_once_retries_interrupted() {
        struct Flaky {
            interrupted: bool,
            data: Vec<u8>,
        }

        impl Read for Flaky {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if !self.interrupted {
                    self.interrupted = true;
                    return Err(ErrorKind::Interrupted.into());
                }
                let n = self.data.len().min(buf.len());
                buf[..n].copy_from_slice(&self.data[..n]);
                Ok(n)
            }
        }

        let mut buf = [0u8; 4];
        let mut full = Flaky {
            interrupted: false,
            data: vec![1, 2, 3, 4],
        };
        receive_once(&mut full, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);

        let mut short = Flaky {
            interrupted: false,
            data: vec![9, 9],
        };
        let err = receive_once(&mut short, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_mode_needs_no_reader() {
        let temp = TempDir::new().unwrap();
        let (_listener, path) = bound(&temp);

        // Nobody accepts; the kernel queues the connection and buffers the bytes
        let client = ExchangeClient::new(path);
        assert_eq!(client.update_mode(0x0001_0203), Ok(()));
    }

    #[test]
    fn test_strict_size_rejects_mismatched_header() {
        let temp = TempDir::new().unwrap();
        let (listener, path) = bound(&temp);
        let _sim = mock_simulator(listener, GyroPacket::SIZE, |req| {
            let mut pkt = GyroPacket::read_from(req).unwrap();
            pkt.message_size = 4;
            Some(pkt.as_bytes().to_vec())
        });

        let client = ExchangeClient::new(path).with_strict_size(true);
        let (mut x, mut y, mut z) = (1.0, 1.0, 1.0);
        assert_eq!(client.update_gyro(&mut x, &mut y, &mut z, 0), Err(HinjError::BadReceive));
    }

    #[test]
    fn test_permissive_accepts_mismatched_header() {
        let temp = TempDir::new().unwrap();
        let (listener, path) = bound(&temp);
        let _sim = mock_simulator(listener, GyroPacket::SIZE, |req| {
            let mut pkt = GyroPacket::read_from(req).unwrap();
            pkt.message_size = 4;
            pkt.z = 5.0;
            Some(pkt.as_bytes().to_vec())
        });

        let client = ExchangeClient::new(path);
        let (mut x, mut y, mut z) = (1.0, 1.0, 1.0);
        assert_eq!(client.update_gyro(&mut x, &mut y, &mut z, 0), Ok(Ack::Applied));
        assert_eq!(z, 5.0);
    }

    #[test]
    fn test_timeout_unblocks_silent_simulator() {
        let temp = TempDir::new().unwrap();
        let (listener, path) = bound(&temp);
        let sim = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(500));
            drop(stream);
        });

        let client = ExchangeClient::new(path).with_timeout(Duration::from_millis(50));
        let mut fix = GpsFix::default();
        assert_eq!(client.update_gps(&mut fix, 0), Err(HinjError::BadReceive));
        sim.join().unwrap();
    }
}
