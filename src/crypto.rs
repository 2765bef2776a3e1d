//! Signing key management and time signatures
//!
//! Uses ECDSA over NIST P-256 with SHA-256 (`ring`). Signatures are ASN.1 DER
//! encoded and use a fresh random nonce, so signing the same address twice
//! yields different bytes. Verifiers must verify, never compare.
//!
//! The signed message is the dotted-decimal text of the encoded address
//! (`"90.114.75.54"`), not its four raw bytes.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::digest;
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, UnparsedPublicKey, ECDSA_P256_SHA256_ASN1,
    ECDSA_P256_SHA256_ASN1_SIGNING,
};
use std::fmt;
use tracing::info;

use crate::timecodec::EncodedAddress;

/// Human-readable name of the signature scheme, published by the API
pub const SIGNATURE_ALGORITHM: &str = "ECDSA_P256_SHA256_ASN1";

/// Key encodings larger than this are rejected before parsing
const MAX_KEY_DER_LEN: usize = 1024;

/// `AlgorithmIdentifier { id-ecPublicKey, prime256v1 }`
const P256_ALGORITHM_ID: &[u8] = &[
    0x30, 0x13, // SEQUENCE
    0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, // 1.2.840.10045.2.1
    0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, // 1.2.840.10045.3.1.7
];

// =============================================================================
// SIGNING KEY
// =============================================================================

/// A P-256 key pair together with its PKCS#8 encoding
pub struct SigningKey {
    key_pair: EcdsaKeyPair,
    pkcs8: Vec<u8>,
    rng: SystemRandom,
}

impl SigningKey {
    /// Generate a fresh key pair from the system RNG
    pub fn generate() -> Result<Self, CryptoError> {
        let rng = SystemRandom::new();
        let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
            .map_err(|_| CryptoError::KeyGeneration)?;
        Self::from_pkcs8(document.as_ref())
    }

    /// Load from PKCS#8 `PrivateKeyInfo` DER
    pub fn from_pkcs8(der: &[u8]) -> Result<Self, CryptoError> {
        let rng = SystemRandom::new();
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, der, &rng)
            .map_err(|e| CryptoError::KeyRejected(e.to_string()))?;

        Ok(Self {
            key_pair,
            pkcs8: der.to_vec(),
            rng,
        })
    }

    /// Load from DER in either PKCS#8 or SEC1 (`EC PRIVATE KEY`) form
    ///
    /// SEC1 keys must carry their public key, which is what
    /// OpenSSL and Go's `x509.MarshalECPrivateKey` produce.
    pub fn from_der(der: &[u8]) -> Result<Self, CryptoError> {
        if der.len() > MAX_KEY_DER_LEN {
            return Err(CryptoError::KeyRejected(format!(
                "key encoding is {} bytes, limit is {}",
                der.len(),
                MAX_KEY_DER_LEN
            )));
        }

        match Self::from_pkcs8(der) {
            Ok(key) => Ok(key),
            Err(pkcs8_err) => {
                Self::from_pkcs8(&sec1_to_pkcs8(der)).map_err(|_| pkcs8_err)
            }
        }
    }

    /// Load from standard base64 of a DER key (see [`SigningKey::from_der`])
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let der = STANDARD.decode(encoded.trim())?;
        Self::from_der(&der)
    }

    /// PKCS#8 DER, the form accepted back by [`SigningKey::from_der`]
    pub fn pkcs8_der(&self) -> &[u8] {
        &self.pkcs8
    }

    /// Standard base64 of the PKCS#8 DER, suitable for `PRIVATE_KEY`
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.pkcs8)
    }

    /// Uncompressed SEC1 public point (65 bytes, leading `0x04`)
    pub fn public_key(&self) -> &[u8] {
        self.key_pair.public_key().as_ref()
    }

    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.public_key())
    }

    /// First 8 bytes of SHA-256 over the public key, hex encoded
    pub fn fingerprint(&self) -> String {
        let hash = digest::digest(&digest::SHA256, self.public_key());
        hex::encode(&hash.as_ref()[..8])
    }

    /// Sign arbitrary bytes
    pub fn sign(&self, message: &[u8]) -> Result<Signature, CryptoError> {
        let sig = self
            .key_pair
            .sign(&self.rng, message)
            .map_err(|_| CryptoError::SigningFailed)?;
        Ok(Signature(sig.as_ref().to_vec()))
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Wrap a SEC1 `ECPrivateKey` in a P-256 PKCS#8 v1 envelope
fn sec1_to_pkcs8(sec1: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(sec1.len() + 32);
    body.extend_from_slice(&[0x02, 0x01, 0x00]); // version 0
    body.extend_from_slice(P256_ALGORITHM_ID);
    body.push(0x04); // OCTET STRING
    push_der_length(&mut body, sec1.len());
    body.extend_from_slice(sec1);

    let mut out = Vec::with_capacity(body.len() + 4);
    out.push(0x30); // SEQUENCE
    push_der_length(&mut out, body.len());
    out.extend_from_slice(&body);
    out
}

/// DER definite length; inputs are bounded by `MAX_KEY_DER_LEN`
fn push_der_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xff {
        out.extend_from_slice(&[0x81, len as u8]);
    } else {
        out.extend_from_slice(&[0x82, (len >> 8) as u8, len as u8]);
    }
}

// =============================================================================
// KEY MANAGER
// =============================================================================

/// Where the process key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeySource {
    /// Decoded from an operator-supplied encoding
    Configured,
    /// Generated at startup; lost on exit unless the operator captures it
    Generated,
}

/// Owns the signing key for the lifetime of the process
///
/// Built once in `main` and shared by `Arc`. The key is immutable, so
/// concurrent readers need no locking.
#[derive(Debug)]
pub struct KeyManager {
    key: SigningKey,
    source: KeySource,
}

impl KeyManager {
    /// Decode `encoded` if present and non-empty, otherwise generate a key
    ///
    /// An error here is a configuration error and must stop startup.
    pub fn init(encoded: Option<&str>) -> Result<Self, CryptoError> {
        match encoded.map(str::trim).filter(|s| !s.is_empty()) {
            Some(encoded) => {
                let key = SigningKey::from_base64(encoded)?;
                info!("🔑 Loaded configured signing key {}", key.fingerprint());
                Ok(Self {
                    key,
                    source: KeySource::Configured,
                })
            }
            None => {
                let key = SigningKey::generate()?;
                info!("🔑 Generated ephemeral signing key {}", key.fingerprint());
                Ok(Self {
                    key,
                    source: KeySource::Generated,
                })
            }
        }
    }

    /// Wrap an already loaded key
    pub fn from_key(key: SigningKey) -> Self {
        Self {
            key,
            source: KeySource::Configured,
        }
    }

    pub fn current_key(&self) -> &SigningKey {
        &self.key
    }

    pub fn source(&self) -> KeySource {
        self.source
    }
}

// =============================================================================
// SIGNATURES
// =============================================================================

/// Detached ASN.1 DER ECDSA signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }
}

/// Sign the dotted-decimal text of `addr`
pub fn sign(addr: EncodedAddress, key: &SigningKey) -> Result<Signature, CryptoError> {
    key.sign(addr.to_string().as_bytes())
}

/// Verify a signature over `message` against an uncompressed P-256 public key
pub fn verify(message: &[u8], signature: &Signature, public_key: &[u8]) -> Result<(), CryptoError> {
    UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, public_key)
        .verify(message, signature.as_bytes())
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Verify a time signature produced by [`sign`]
pub fn verify_address(
    addr: EncodedAddress,
    signature: &Signature,
    public_key: &[u8],
) -> Result<(), CryptoError> {
    verify(addr.to_string().as_bytes(), signature, public_key)
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid key encoding: {0}")]
    InvalidKeyEncoding(#[from] base64::DecodeError),

    #[error("Key rejected: {0}")]
    KeyRejected(String),

    #[error("Key generation failed")]
    KeyGeneration,

    #[error("Signing failed")]
    SigningFailed,

    #[error("Invalid signature")]
    InvalidSignature,
}

// =============================================================================
// TESTS
// =============================================================================
