//! Server Configuration
//!
//! Loaded from a TOML file, then overridden by CLI flags.
//! Missing fields fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

/// Smallest UDP payload every DNS client must accept (RFC 1035)
pub const MIN_UDP_PAYLOAD: usize = 512;

/// Upper bound for `max_packet_size`
pub const MAX_UDP_PAYLOAD: usize = 4096;

/// Main configuration for the time server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeDnsConfig {
    // === DNS ===

    /// Address the DNS listener binds to
    pub dns_bind_address: IpAddr,

    /// UDP port for DNS queries
    pub dns_port: u16,

    /// Receive buffer and response size limit (bytes)
    pub max_packet_size: usize,

    // === HTTP API ===

    /// Serve health, public key and metrics over HTTP
    pub api_enabled: bool,

    /// Address the HTTP API binds to
    pub api_bind_address: IpAddr,

    /// TCP port for the HTTP API
    pub api_port: u16,
}

impl Default for TimeDnsConfig {
    fn default() -> Self {
        Self {
            dns_bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dns_port: 5553,
            max_packet_size: MIN_UDP_PAYLOAD,

            api_enabled: true,
            api_bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            api_port: 8080,
        }
    }
}

impl TimeDnsConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    // Builder-style methods for CLI overrides

    pub fn with_dns_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.dns_port = port;
        }
        self
    }

    pub fn with_api_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.api_port = port;
        }
        self
    }

    pub fn with_api_enabled(mut self, enabled: bool) -> Self {
        self.api_enabled = enabled;
        self
    }

    pub fn dns_addr(&self) -> SocketAddr {
        SocketAddr::new(self.dns_bind_address, self.dns_port)
    }

    pub fn api_addr(&self) -> SocketAddr {
        SocketAddr::new(self.api_bind_address, self.api_port)
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.dns_port == 0 {
            anyhow::bail!("dns_port must not be 0");
        }

        if self.api_enabled && self.api_port == 0 {
            anyhow::bail!("api_port must not be 0 when the API is enabled");
        }

        if !(MIN_UDP_PAYLOAD..=MAX_UDP_PAYLOAD).contains(&self.max_packet_size) {
            anyhow::bail!(
                "max_packet_size ({}) must be between {} and {}",
                self.max_packet_size,
                MIN_UDP_PAYLOAD,
                MAX_UDP_PAYLOAD
            );
        }

        Ok(())
    }
}
