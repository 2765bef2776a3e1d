//! Metrics Collection
//!
//! Counters for the DNS listener, exported by the HTTP API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metrics collector for the time server
#[derive(Default)]
pub struct Metrics {
    /// Start time for uptime calculation
    start_time: Option<Instant>,

    /// Well-formed DNS queries received
    pub dns_queries: AtomicU64,

    /// A queries answered with a signed time
    pub time_answers: AtomicU64,

    /// Queries for types other than A
    pub unsupported_queries: AtomicU64,

    /// Packets dropped because they did not parse
    pub malformed_packets: AtomicU64,

    /// A answers sent without a TXT record because signing failed
    pub signing_failures: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub fn inc_dns_queries(&self) {
        self.dns_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_time_answers(&self) {
        self.time_answers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_unsupported_queries(&self) {
        self.unsupported_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_malformed_packets(&self) {
        self.malformed_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_signing_failures(&self) {
        self.signing_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "# HELP timedns_uptime_seconds Server uptime in seconds\n\
             # TYPE timedns_uptime_seconds gauge\n\
             timedns_uptime_seconds {}\n\n",
            self.uptime_secs()
        ));

        let counters = [
            ("timedns_dns_queries_total", "DNS queries received", &self.dns_queries),
            ("timedns_time_answers_total", "Signed time answers sent", &self.time_answers),
            ("timedns_unsupported_queries_total", "Queries for unsupported record types", &self.unsupported_queries),
            ("timedns_malformed_packets_total", "Packets dropped as malformed", &self.malformed_packets),
            ("timedns_signing_failures_total", "Answers sent without a signature", &self.signing_failures),
        ];

        for (name, help, value) in counters {
            output.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n\n",
                value.load(Ordering::Relaxed)
            ));
        }

        output
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "uptime_secs": self.uptime_secs(),
            "dns": {
                "queries": self.dns_queries.load(Ordering::Relaxed),
                "time_answers": self.time_answers.load(Ordering::Relaxed),
                "unsupported": self.unsupported_queries.load(Ordering::Relaxed),
                "malformed": self.malformed_packets.load(Ordering::Relaxed),
            },
            "signing_failures": self.signing_failures.load(Ordering::Relaxed),
        })
    }
}
