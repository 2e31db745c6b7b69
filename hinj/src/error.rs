//! Error codes shared by the exchange client and the sync barrier
//!
//! Every failure maps onto a small negative integer so callers that speak the
//! numeric protocol (framework glue, log scrapers) see the same values on both
//! sides. `IGNORE_SENSOR` is positive: the I/O succeeded but the simulator did
//! not apply the injected value.

use std::io;

use nix::errno::Errno;
use thiserror::Error;

pub const NO_PATH: i32 = -1;
pub const NO_SOCKET: i32 = -2;
pub const NO_CONNECTION: i32 = -3;
pub const BAD_RECEIVE: i32 = -4;
pub const BAD_SEND: i32 = -5;
pub const BAD_BIND: i32 = -6;
pub const BAD_LISTEN: i32 = -7;
pub const CANCELLED: i32 = -8;

/// Soft condition: the simulator echoed the packet with `ignore = 1`
pub const IGNORE_SENSOR: i32 = 1;

/// Errors that can occur while exchanging packets or synchronizing
///
/// Variants carry no payload so a failed barrier initialization can be cached
/// and handed back to every later caller. The underlying OS error is logged at
/// the point of failure instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HinjError {
    #[error("HINJ: no suitable message path")]
    NoPath,

    #[error("HINJ: socket() failed")]
    NoSocket,

    #[error("HINJ: connect() failed")]
    NoConnection,

    #[error("HINJ: recv() failed")]
    BadReceive,

    #[error("HINJ: send() failed")]
    BadSend,

    #[error("HINJ: bind() failed")]
    BadBind,

    #[error("HINJ: listen() failed")]
    BadListen,

    #[error("HINJ: wait cancelled")]
    Cancelled,
}

impl HinjError {
    /// Numeric code for this error
    pub fn code(self) -> i32 {
        match self {
            HinjError::NoPath => NO_PATH,
            HinjError::NoSocket => NO_SOCKET,
            HinjError::NoConnection => NO_CONNECTION,
            HinjError::BadReceive => BAD_RECEIVE,
            HinjError::BadSend => BAD_SEND,
            HinjError::BadBind => BAD_BIND,
            HinjError::BadListen => BAD_LISTEN,
            HinjError::Cancelled => CANCELLED,
        }
    }

    /// Map a numeric code back to an error, `None` for success, soft and unknown codes
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            NO_PATH => Some(HinjError::NoPath),
            NO_SOCKET => Some(HinjError::NoSocket),
            NO_CONNECTION => Some(HinjError::NoConnection),
            BAD_RECEIVE => Some(HinjError::BadReceive),
            BAD_SEND => Some(HinjError::BadSend),
            BAD_BIND => Some(HinjError::BadBind),
            BAD_LISTEN => Some(HinjError::BadListen),
            CANCELLED => Some(HinjError::Cancelled),
            _ => None,
        }
    }

    /// Classify a failed `UnixStream::connect`
    ///
    /// std folds socket() and connect() into one call, so the errno decides
    /// which half failed: resource and protocol errors can only come from
    /// socket(), everything else is the endpoint being unreachable.
    pub fn from_connect(err: &io::Error) -> Self {
        match err.raw_os_error().map(Errno::from_raw) {
            Some(Errno::EMFILE | Errno::ENFILE | Errno::ENOBUFS | Errno::ENOMEM)
            | Some(Errno::EAFNOSUPPORT | Errno::EPROTONOSUPPORT) => HinjError::NoSocket,
            _ => HinjError::NoConnection,
        }
    }
}

/// Outcome of an exchange that completed its round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// The simulator applied the injected value
    Applied,
    /// The simulator set the ignore flag; the echoed payload is what it used instead
    Ignored,
}

impl Ack {
    pub fn code(self) -> i32 {
        match self {
            Ack::Applied => 0,
            Ack::Ignored => IGNORE_SENSOR,
        }
    }

    pub fn is_ignored(self) -> bool {
        self == Ack::Ignored
    }
}

/// Render any code as a human-readable message
pub fn strerror(code: i32) -> &'static str {
    if code == IGNORE_SENSOR {
        return "HINJ: sensor value ignored";
    }
    match HinjError::from_code(code) {
        Some(HinjError::NoPath) => "HINJ: no suitable message path",
        Some(HinjError::NoSocket) => "HINJ: socket() failed",
        Some(HinjError::NoConnection) => "HINJ: connect() failed",
        Some(HinjError::BadReceive) => "HINJ: recv() failed",
        Some(HinjError::BadSend) => "HINJ: send() failed",
        Some(HinjError::BadBind) => "HINJ: bind() failed",
        Some(HinjError::BadListen) => "HINJ: listen() failed",
        Some(HinjError::Cancelled) => "HINJ: wait cancelled",
        None => "HINJ: unknown error",
    }
}

pub type Result<T> = std::result::Result<T, HinjError>;

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [HinjError; 8] = [
        HinjError::NoPath,
        HinjError::NoSocket,
        HinjError::NoConnection,
        HinjError::BadReceive,
        HinjError::BadSend,
        HinjError::BadBind,
        HinjError::BadListen,
        HinjError::Cancelled,
    ];

    #[test]
    fn test_numeric_codes() {
        assert_eq!(HinjError::NoPath.code(), -1);
        assert_eq!(HinjError::NoSocket.code(), -2);
        assert_eq!(HinjError::NoConnection.code(), -3);
        assert_eq!(HinjError::BadReceive.code(), -4);
        assert_eq!(HinjError::BadSend.code(), -5);
        assert_eq!(HinjError::BadBind.code(), -6);
        assert_eq!(HinjError::BadListen.code(), -7);
    }

    #[test]
    fn test_from_code_inverts_code() {
        for err in ALL {
            assert_eq!(HinjError::from_code(err.code()), Some(err));
        }
        assert_eq!(HinjError::from_code(0), None);
        assert_eq!(HinjError::from_code(IGNORE_SENSOR), None);
    }

    #[test]
    fn test_display_matches_strerror() {
        for err in ALL {
            assert_eq!(err.to_string(), strerror(err.code()));
        }
    }

    #[test]
    fn test_strerror_unknown() {
        assert_eq!(strerror(0), "HINJ: unknown error");
        assert_eq!(strerror(-42), "HINJ: unknown error");
        assert_eq!(strerror(i32::MAX), "HINJ: unknown error");
    }

    #[test]
    fn test_strerror_ignore_sensor() {
        assert_eq!(strerror(Ack::Ignored.code()), "HINJ: sensor value ignored");
    }

    #[test]
    fn test_ack_codes() {
        assert_eq!(Ack::Applied.code(), 0);
        assert_eq!(Ack::Ignored.code(), IGNORE_SENSOR);
        assert!(Ack::Ignored.is_ignored());
        assert!(!Ack::Applied.is_ignored());
    }

    #[test]
    fn test_from_connect_classification() {
        let refused = io::Error::from_raw_os_error(Errno::ECONNREFUSED as i32);
        assert_eq!(HinjError::from_connect(&refused), HinjError::NoConnection);

        let missing = io::Error::from_raw_os_error(Errno::ENOENT as i32);
        assert_eq!(HinjError::from_connect(&missing), HinjError::NoConnection);

        let exhausted = io::Error::from_raw_os_error(Errno::EMFILE as i32);
        assert_eq!(HinjError::from_connect(&exhausted), HinjError::NoSocket);

        let synthetic = io::Error::other("no errno");
        assert_eq!(HinjError::from_connect(&synthetic), HinjError::NoConnection);
    }
}
