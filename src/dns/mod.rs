//! DNS Server Module
//!
//! Answers DNS queries with the current time.
//!
//! ## DNS Records
//!
//! - A record: the current Unix time packed big-endian into an IPv4 address
//! - TXT record (additional section): `"<ip> <base64 signature>"`
//!
//! Both records carry TTL 0 so resolvers never cache them.

mod handler;
mod server;

pub use handler::{DnsQueryResult, TimeDnsHandler, TimeSigner};
pub use server::{run_dns_server, serve};

/// DNS record types
pub const TYPE_A: u16 = 1;
pub const TYPE_TXT: u16 = 16;

/// Internet class
pub const CLASS_IN: u16 = 1;

/// Any class (QCLASS only)
pub const CLASS_ANY: u16 = 255;

/// TTL for every record we emit
pub const RECORD_TTL: u32 = 0;
