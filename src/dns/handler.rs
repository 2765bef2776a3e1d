//! DNS Request Handler
//!
//! Turns a parsed question into the records to send back.

use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::answer::{self, Answer};
use crate::api::Metrics;
use crate::crypto::{CryptoError, KeyManager};
use crate::dns::{CLASS_ANY, CLASS_IN, RECORD_TTL, TYPE_A};
use crate::timecodec::{self, EncodedAddress, Timestamp};

/// Source of signed time answers
pub trait TimeSigner: Send + Sync {
    fn sign_time(&self, now: Timestamp) -> Result<(EncodedAddress, Answer), CryptoError>;
}

impl TimeSigner for KeyManager {
    fn sign_time(&self, now: Timestamp) -> Result<(EncodedAddress, Answer), CryptoError> {
        answer::build(now, self.current_key())
    }
}

/// DNS query result
#[derive(Debug, Clone, Default)]
pub struct DnsQueryResult {
    /// Encoded time for the A record
    pub address: Option<Ipv4Addr>,

    /// Signed answer for the TXT record
    pub txt: Option<String>,

    /// TTL for records
    pub ttl: u32,
}

/// DNS handler for signed time queries
pub struct TimeDnsHandler {
    signer: Arc<dyn TimeSigner>,
    metrics: Arc<Metrics>,
}

impl TimeDnsHandler {
    /// Create a new DNS handler
    pub fn new(signer: Arc<dyn TimeSigner>, metrics: Arc<Metrics>) -> Self {
        Self { signer, metrics }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Answer a question of type `qtype` and class `qclass` at time `now`
    ///
    /// Only A queries in class IN (or ANY) get records. If signing fails the
    /// A record is still returned, without the TXT.
    pub fn query(&self, qname: &str, qtype: u16, qclass: u16, now: Timestamp) -> DnsQueryResult {
        self.metrics.inc_dns_queries();

        if qclass != CLASS_IN && qclass != CLASS_ANY {
            info!("Unhandled query class {} for {}", qclass, qname);
            self.metrics.inc_unsupported_queries();
            return DnsQueryResult {
                ttl: RECORD_TTL,
                ..Default::default()
            };
        }

        if qtype != TYPE_A {
            info!("Unhandled query type {} for {}", qtype, qname);
            self.metrics.inc_unsupported_queries();
            return DnsQueryResult {
                ttl: RECORD_TTL,
                ..Default::default()
            };
        }

        info!("⏱️  Inbound time query for {}", qname);

        match self.signer.sign_time(now) {
            Ok((address, answer)) => {
                self.metrics.inc_time_answers();
                DnsQueryResult {
                    address: Some(address.to_ipv4()),
                    txt: Some(answer.to_string()),
                    ttl: RECORD_TTL,
                }
            }
            Err(e) => {
                warn!("Failed to sign time for {}: {}", qname, e);
                self.metrics.inc_signing_failures();
                DnsQueryResult {
                    address: Some(timecodec::encode(now).to_ipv4()),
                    txt: None,
                    ttl: RECORD_TTL,
                }
            }
        }
    }
}
