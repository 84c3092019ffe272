// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Server configuration.

use crate::error::ServerError;
use crate::subscriptions::REQUEST_TIMEOUT;
use std::net::Ipv4Addr;
use std::time::Duration;

#[cfg(feature = "config-file")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "config-file")]
use std::path::Path;

/// Default UDP port for the Cemuhook DSU protocol.
pub const DEFAULT_PORT: u16 = 26760;

/// Maximum number of device slots a single server may expose.
pub const SLOTS_PER_SERVER: u8 = 4;

/// How often the subscription table is swept for expired clients.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Server configuration.
///
/// The reference implementation binds IPv4 loopback only (see spec Non-goals);
/// `bind_address` exists for testability but is not exposed as a CLI flag.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "config-file",
    derive(Serialize, Deserialize),
    serde(default)
)]
pub struct ServerConfig {
    /// UDP port to bind (default 26760).
    pub port: u16,
    /// Address to bind to. Defaults to IPv4 loopback.
    pub bind_address: Ipv4Addr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: Ipv4Addr::LOCALHOST,
        }
    }
}

impl ServerConfig {
    /// Validate configuration, rejecting values the server cannot act on.
    ///
    /// Port `0` is accepted: it is the standard "let the OS pick an
    /// ephemeral port" idiom, used by tests that need a throwaway bind
    /// address.
    pub fn validate(&self) -> Result<(), ServerError> {
        Ok(())
    }

    /// Load configuration from a JSON file.
    #[cfg(feature = "config-file")]
    pub fn from_file(path: &Path) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| ServerError::Config(format!("parse error: {e}")))
    }
}
