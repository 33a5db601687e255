//! Readiness multiplexer seam.

use std::fmt;
use std::io;
use std::ops::{BitOr, Sub};

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

/// Readiness interest of one endpoint. Unlike [`mio::Interest`] it can be empty.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventMask(u8);

impl EventMask {
    /// No readiness of interest.
    pub const NONE: Self = Self(0);
    /// Readable readiness.
    pub const READ: Self = Self(0b01);
    /// Writable readiness.
    pub const WRITE: Self = Self(0b10);

    /// Returns `true` if no readiness is selected.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// The equivalent mio interest, `None` when empty.
    pub const fn to_interest(self) -> Option<Interest> {
        match (self.contains(Self::READ), self.contains(Self::WRITE)) {
            (true, true) => Some(Interest::READABLE.add(Interest::WRITABLE)),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

impl BitOr for EventMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl Sub for EventMask {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 & !rhs.0)
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.contains(Self::READ), self.contains(Self::WRITE)) {
            (true, true) => f.write_str("READ|WRITE"),
            (true, false) => f.write_str("READ"),
            (false, true) => f.write_str("WRITE"),
            (false, false) => f.write_str("NONE"),
        }
    }
}

/// Registration calls the endpoint issues against the readiness multiplexer.
///
/// Implemented for [`mio::Registry`]. Callers hold the iface lock for the
/// duration of every call.
pub trait Multiplexer: fmt::Debug + Send + Sync {
    /// Starts watching `stream`.
    fn register(&self, stream: &mut TcpStream, token: Token, interest: Interest)
    -> io::Result<()>;

    /// Replaces the interest of an already registered `stream`.
    fn modify(&self, stream: &mut TcpStream, token: Token, interest: Interest) -> io::Result<()>;

    /// Stops watching `stream`.
    fn deregister(&self, stream: &mut TcpStream) -> io::Result<()>;
}

impl Multiplexer for Registry {
    fn register(
        &self,
        stream: &mut TcpStream,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        Registry::register(self, stream, token, interest)
    }

    fn modify(&self, stream: &mut TcpStream, token: Token, interest: Interest) -> io::Result<()> {
        self.reregister(stream, token, interest)
    }

    fn deregister(&self, stream: &mut TcpStream) -> io::Result<()> {
        Registry::deregister(self, stream)
    }
}
