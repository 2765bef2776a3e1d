//! Signed time answers
//!
//! An answer is the TXT payload `"<ip> <base64-signature>"`. The server
//! builds it with [`build`]; clients use [`Answer::parse`] and
//! [`Answer::verify`] to check it against a pinned public key.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::crypto::{self, CryptoError, Signature, SigningKey};
use crate::timecodec::{self, EncodedAddress, Timestamp};

/// Encoded time plus its detached signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    address: EncodedAddress,
    signature: Signature,
}

impl Answer {
    pub fn address(&self) -> EncodedAddress {
        self.address
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// The time carried by the address (unverified)
    pub fn timestamp(&self) -> Timestamp {
        timecodec::decode(self.address)
    }

    /// Parse `"<ip> <base64>"`. Exactly one space separates the two tokens.
    pub fn parse(text: &str) -> Result<Self, AnswerError> {
        let (ip, sig) = text.split_once(' ').ok_or(AnswerError::Malformed)?;
        if ip.is_empty() || sig.is_empty() || sig.contains(' ') {
            return Err(AnswerError::Malformed);
        }

        let ip = Ipv4Addr::from_str(ip)?;
        let sig = STANDARD.decode(sig)?;

        Ok(Self {
            address: EncodedAddress::from(ip),
            signature: Signature::from_bytes(sig),
        })
    }

    /// Check the signature and return the signed time
    pub fn verify(&self, public_key: &[u8]) -> Result<Timestamp, AnswerError> {
        crypto::verify_address(self.address, &self.signature, public_key)?;
        Ok(self.timestamp())
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.address, self.signature.to_base64())
    }
}

impl FromStr for Answer {
    type Err = AnswerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Encode `now`, sign it and assemble the answer
pub fn build(now: Timestamp, key: &SigningKey) -> Result<(EncodedAddress, Answer), CryptoError> {
    let address = timecodec::encode(now);
    let signature = crypto::sign(address, key)?;
    Ok((address, Answer { address, signature }))
}

#[derive(Debug, thiserror::Error)]
pub enum AnswerError {
    #[error("Answer must be \"<ip> <signature>\"")]
    Malformed,

    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] std::net::AddrParseError),

    #[error("Invalid signature encoding: {0}")]
    InvalidSignatureEncoding(#[from] base64::DecodeError),

    #[error("Verification failed: {0}")]
    Verification(#[from] CryptoError),
}
