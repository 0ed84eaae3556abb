//! External endpoint identifiers.
//!
//! Clients never see fingerprints. Each endpoint is instead labelled with
//! HMAC-SHA256(master key, "address-port-protocol"), hex-encoded. A bridge
//! and its transports share a fingerprint but not a three-tuple, so their
//! identifiers can't be linked to each other.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::registry::ThreeTuple;

type HmacSha256 = Hmac<Sha256>;

/// Derives identifiers with the process-wide master key.
#[derive(Clone)]
pub struct IdDeriver {
    /// Keyed but never fed; cloned for every derivation.
    mac: HmacSha256,
}

impl std::fmt::Debug for IdDeriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdDeriver").finish_non_exhaustive()
    }
}

impl IdDeriver {
    pub fn new(master_key: &str) -> Result<Self> {
        let mac = HmacSha256::new_from_slice(master_key.as_bytes())
            .map_err(|e| Error::Config(format!("invalid master key: {}", e)))?;
        Ok(Self { mac })
    }

    /// Hex-encoded HMAC over the endpoint's three-tuple.
    pub fn derive(&self, tuple: &ThreeTuple) -> String {
        let mut mac = self.mac.clone();
        mac.update(tuple.to_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}
