//! Time <-> IPv4 codec
//!
//! A Unix timestamp is truncated to a signed 32-bit integer and written
//! big-endian into the four octets of an IPv4 address.
//!
//! ## Range
//!
//! Only `i32` second counts survive a roundtrip (1901-12-13 to 2038-01-19).
//! Anything outside wraps by two's-complement truncation. This is the
//! same limit as a 32-bit `time_t` and is part of the wire format, so it is
//! not clamped or rejected here.

use chrono::{DateTime, Utc};
use std::fmt;
use std::net::Ipv4Addr;

/// Seconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn from_unix(secs: i64) -> Self {
        Self(secs)
    }

    /// Current wall-clock time, truncated to whole seconds
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub const fn unix(self) -> i64 {
        self.0
    }

    /// `None` only for values chrono cannot represent
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.0, 0)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "@{}", self.0),
        }
    }
}

/// Four bytes that are both a big-endian `i32` timestamp and an IPv4 address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncodedAddress([u8; 4]);

impl EncodedAddress {
    pub const fn from_octets(octets: [u8; 4]) -> Self {
        Self(octets)
    }

    pub const fn octets(&self) -> [u8; 4] {
        self.0
    }

    pub fn to_ipv4(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.0)
    }
}

impl From<Ipv4Addr> for EncodedAddress {
    fn from(ip: Ipv4Addr) -> Self {
        Self(ip.octets())
    }
}

impl From<EncodedAddress> for Ipv4Addr {
    fn from(addr: EncodedAddress) -> Self {
        addr.to_ipv4()
    }
}

/// Dotted-decimal form. This is also the signed message.
impl fmt::Display for EncodedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_ipv4(), f)
    }
}

/// Encode a timestamp as an address
///
/// Seconds outside the `i32` range wrap (Y2038 limitation).
pub fn encode(t: Timestamp) -> EncodedAddress {
    // Truncation is the documented wire behaviour
    let secs = t.unix() as i32;
    EncodedAddress(secs.to_be_bytes())
}

/// Decode an address back into a timestamp. Every input is valid.
pub fn decode(addr: EncodedAddress) -> Timestamp {
    Timestamp::from_unix(i64::from(i32::from_be_bytes(addr.0)))
}
