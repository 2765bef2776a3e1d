//! timedns server binary
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         TIMEDNS                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Key Manager              ←── PRIVATE_KEY or generated     │
//! │  DNS Server (5553/udp)    ←── A + signed TXT, TTL 0        │
//! │  HTTP API (8080)          ←── Health, public key, metrics  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use anyhow::Context;
use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use timedns::api::{self, Metrics};
use timedns::config::TimeDnsConfig;
use timedns::crypto::{KeyManager, KeySource, SigningKey};
use timedns::dns::{self, TimeDnsHandler};

/// timedns - authenticated time over DNS
#[derive(Parser, Debug)]
#[command(name = "timedns")]
#[command(version)]
#[command(about = "DNS server that answers A queries with the signed current time", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "timedns.toml")]
    config: PathBuf,

    /// DNS server port (overrides config)
    #[arg(long)]
    dns_port: Option<u16>,

    /// HTTP API port (overrides config)
    #[arg(long)]
    api_port: Option<u16>,

    /// Disable the HTTP API
    #[arg(long)]
    no_api: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Base64 DER P-256 private key (PKCS#8 or SEC1)
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    /// Generate a new signing key, print it and exit
    #[arg(long)]
    generate_key: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging. stdout is reserved for key output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with_writer(io::stderr)
        .init();

    info!("🕰️  timedns v{}", env!("CARGO_PKG_VERSION"));

    // Handle key generation
    if args.generate_key {
        return generate_key();
    }

    // Load configuration
    let config = if args.config.exists() {
        TimeDnsConfig::load(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?
    } else {
        warn!("Config file not found, using defaults");
        TimeDnsConfig::default()
    };

    // Override config with CLI args
    let api_enabled = config.api_enabled && !args.no_api;
    let config = config
        .with_dns_port(args.dns_port)
        .with_api_port(args.api_port)
        .with_api_enabled(api_enabled);

    config.validate()?;

    info!("⚙️  Configuration:");
    info!("   DNS: {}", config.dns_addr());
    if config.api_enabled {
        info!("   API: {}", config.api_addr());
    } else {
        info!("   API: disabled");
    }

    // A bad key is a configuration error: never start serving with it
    let keys = KeyManager::init(args.private_key.as_deref())
        .context("PRIVATE_KEY could not be loaded")?;

    if keys.source() == KeySource::Generated {
        warn!("PRIVATE_KEY not set, generated a new key; it is lost on exit");
        println!("New Key: {}", keys.current_key().to_base64());
    }
    info!("🔑 Public key: {}", keys.current_key().public_key_base64());

    let shared_config = Arc::new(config);
    let keys = Arc::new(keys);
    let metrics = Arc::new(Metrics::new());
    let handler = Arc::new(TimeDnsHandler::new(keys.clone(), metrics.clone()));

    let dns_handle = tokio::spawn(dns::run_dns_server(shared_config.clone(), handler));

    let api_handle = if shared_config.api_enabled {
        Some(tokio::spawn(api::run_api_server(
            shared_config.clone(),
            keys.clone(),
            metrics.clone(),
        )))
    } else {
        None
    };

    info!("✅ All services started");
    info!("   Press Ctrl+C to shutdown gracefully");

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received");
        }
        result = dns_handle => {
            error!("DNS server exited: {:?}", result);
        }
        result = async {
            match api_handle {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        } => {
            error!("HTTP API exited: {:?}", result);
        }
    }

    info!("👋 timedns shutting down");
    Ok(())
}

/// Generate a new signing key and print it for `PRIVATE_KEY`
fn generate_key() -> anyhow::Result<()> {
    let key = SigningKey::generate()?;

    info!("🔑 New key generated");
    info!("   Fingerprint: {}", key.fingerprint());
    info!("   Public key: {}", key.public_key_base64());
    info!("");
    info!("   Export the line on stdout as PRIVATE_KEY to keep this identity.");
    write_key(&mut io::stdout().lock(), &key)?;

    Ok(())
}

/// Write the key encoding as a single line, nothing else
fn write_key<W: Write>(out: &mut W, key: &SigningKey) -> io::Result<()> {
    writeln!(out, "{}", key.to_base64())?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_key_is_single_reloadable_line() {
        let key = SigningKey::generate().unwrap();
        let mut out = Vec::new();
        write_key(&mut out, &key).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.ends_with('\n'));

        // What a shell `$(timedns --generate-key)` capture would hold
        let captured = text.trim_end_matches('\n');
        let reloaded = SigningKey::from_base64(captured).unwrap();
        assert_eq!(reloaded.public_key(), key.public_key());
        assert!(KeyManager::init(Some(captured)).is_ok());
    }
}
