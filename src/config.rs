//! Command line and environment configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::TimeDelta;
use clap::{Args, Parser, Subcommand};

use crate::server::relay_server::{RelayConfig, DEFAULT_RELAY_TIMEOUT};
use crate::storage::code_store::{StoreConfig, DEFAULT_TTL_SECS};
use crate::storage::overflow_log::{OverflowConfig, DEFAULT_OVERFLOW_CAP_BYTES};

/// Upper bound for `--ttl-secs` (one year).
pub const MAX_TTL_SECS: i64 = 365 * 24 * 60 * 60;

/// mailotp - verification code capture service and webhook relay
#[derive(Parser, Debug)]
#[command(name = "mailotp")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log filter directives (same syntax as RUST_LOG)
    #[arg(long, env = "RUST_LOG", default_value = "mailotp=info,tower_http=info", global = true)]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept mail webhooks and store verification codes
    Serve(ServeArgs),
    /// Forward requests and their Authorization header to a fixed target
    Relay(RelayArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "MAILOTP_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// Path of the JSON code document
    #[arg(long, env = "MAILOTP_STORE_PATH", default_value = "visa_codes.json")]
    pub store_path: PathBuf,

    /// Path of the HTML overflow log
    #[arg(long, env = "MAILOTP_OVERFLOW_PATH", default_value = "other_emails.html")]
    pub overflow_path: PathBuf,

    /// Seconds a code stays valid
    #[arg(
        long,
        env = "MAILOTP_TTL_SECS",
        default_value_t = DEFAULT_TTL_SECS,
        value_parser = clap::value_parser!(i64).range(0..=MAX_TTL_SECS)
    )]
    pub ttl_secs: i64,

    /// Overflow log size that triggers a reset
    #[arg(long, env = "MAILOTP_OVERFLOW_CAP_BYTES", default_value_t = DEFAULT_OVERFLOW_CAP_BYTES)]
    pub overflow_cap_bytes: u64,

    /// Milliseconds to wait for the store lock
    #[arg(long, env = "MAILOTP_LOCK_TIMEOUT_MS", default_value_t = 10_000)]
    pub lock_timeout_ms: u64,
}

impl ServeArgs {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            path: self.store_path.clone(),
            ttl: TimeDelta::seconds(self.ttl_secs),
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
        }
    }

    pub fn overflow_config(&self) -> OverflowConfig {
        OverflowConfig {
            path: self.overflow_path.clone(),
            cap_bytes: self.overflow_cap_bytes,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RelayArgs {
    /// Address to listen on
    #[arg(long, env = "MAILOTP_RELAY_BIND", default_value = "0.0.0.0:8081")]
    pub bind: SocketAddr,

    /// Downstream URL every request is forwarded to
    #[arg(long, env = "MAILOTP_RELAY_TARGET")]
    pub target: String,

    /// Downstream request timeout in seconds
    #[arg(long, env = "MAILOTP_RELAY_TIMEOUT_SECS", default_value_t = DEFAULT_RELAY_TIMEOUT.as_secs())]
    pub timeout_secs: u64,
}

impl RelayArgs {
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            target: self.target.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}
