//! Service configuration.
//!
//! Secrets and data locations come from a JSON file:
//!
//! ```json
//! {
//!   "master_key": "…",
//!   "api_tokens": [{ "organisation": "ooni", "token": "…" }],
//!   "sqlite_file": "/srv/bridgedb/bridgedist.db.sqlite",
//!   "extrainfo_file": "/srv/bridgedb/cached-extrainfo"
//! }
//! ```
//!
//! Runtime knobs (port, refresh interval, response size) come from the
//! command line or environment, see `main.rs`.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use rand::RngCore;
use serde::Deserialize;

use crate::distributor::DEFAULT_MAX_ENDPOINTS;
use crate::error::{Error, Result};

/// Default listening port.
pub const DEFAULT_PORT: u16 = 7000;

/// Default registry refresh interval (1 hour).
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 3600;

/// Size of a freshly generated authentication token, in bytes.
pub const AUTH_TOKEN_SIZE: usize = 32;

/// An organisation allowed to query the service.
#[derive(Clone, Deserialize)]
pub struct ApiToken {
    pub organisation: String,
    pub token: String,
}

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiToken")
            .field("organisation", &self.organisation)
            .finish_non_exhaustive()
    }
}

/// Contents of the JSON configuration file.
#[derive(Clone, Deserialize)]
pub struct ConfigFile {
    /// Key for deriving external endpoint identifiers.
    pub master_key: String,
    #[serde(default)]
    pub api_tokens: Vec<ApiToken>,
    /// BridgeDB's SQLite database.
    pub sqlite_file: PathBuf,
    /// Cached extra-info descriptors from the bridge authority.
    pub extrainfo_file: PathBuf,
}

impl std::fmt::Debug for ConfigFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigFile")
            .field("api_tokens", &self.api_tokens)
            .field("sqlite_file", &self.sqlite_file)
            .field("extrainfo_file", &self.extrainfo_file)
            .finish_non_exhaustive()
    }
}

impl ConfigFile {
    /// Read and validate the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: ConfigFile = serde_json::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.master_key.is_empty() {
            return Err(Error::Config("master_key must not be empty".to_string()));
        }
        if self.sqlite_file.as_os_str().is_empty() {
            return Err(Error::Config("sqlite_file must not be empty".to_string()));
        }
        if self.extrainfo_file.as_os_str().is_empty() {
            return Err(Error::Config("extrainfo_file must not be empty".to_string()));
        }
        if self.api_tokens.iter().any(|t| t.token.is_empty()) {
            return Err(Error::Config("api_tokens must not contain empty tokens".to_string()));
        }
        if self.api_tokens.is_empty() {
            tracing::warn!("No API tokens configured, every /bridges request will be rejected");
        }
        Ok(())
    }

    /// The token's owner, if `token` is on record.
    pub fn authorize(&self, token: &str) -> Option<&ApiToken> {
        self.api_tokens.iter().find(|t| t.token == token)
    }
}

/// Runtime settings.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address the HTTP listener binds.
    pub listen_addr: SocketAddr,
    pub refresh_interval: Duration,
    /// Maximum endpoints handed out per request.
    pub max_endpoints: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), DEFAULT_PORT),
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            max_endpoints: DEFAULT_MAX_ENDPOINTS,
        }
    }
}

/// Generate a new random authentication token (base64).
pub fn generate_token() -> String {
    let mut buf = [0u8; AUTH_TOKEN_SIZE];
    rand::thread_rng().fill_bytes(&mut buf);
    base64::engine::general_purpose::STANDARD.encode(buf)
}
