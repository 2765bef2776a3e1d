//! Signed time over DNS
//!
//! Answers every DNS `A` query with the current Unix time packed into an
//! IPv4 address, plus a TXT record `"<ip> <signature>"` signed with an
//! ECDSA P-256 key. Clients pin the public key and verify the TXT to get
//! an authenticated (but replayable) timestamp.
//!
//! ## Modules
//!
//! - [`timecodec`]: time <-> IPv4 address encoding
//! - [`crypto`]: key management, signing and verification
//! - [`answer`]: the `"<ip> <signature>"` TXT payload, server and client side
//! - [`dns`]: UDP listener and wire codec
//! - [`api`]: HTTP health, public key and metrics
//! - [`config`]: TOML configuration

pub mod answer;
pub mod api;
pub mod config;
pub mod crypto;
pub mod dns;
pub mod timecodec;

pub use answer::{Answer, AnswerError};
pub use crypto::{CryptoError, KeyManager, KeySource, SigningKey};
pub use timecodec::{decode, encode, EncodedAddress, Timestamp};
