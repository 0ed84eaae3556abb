//! Hands out bridges to measurement probes.
//!
//! Only bridges that BridgeDB hasn't allocated to a user-facing distributor
//! are eligible. For each picked bridge we prefer its first
//! probing-resistant transport and fall back to the bridge's own OR port.
//! Results are keyed by external identifier so repeated requests can't be
//! correlated with a relay fingerprint.

use std::collections::BTreeMap;
use std::net::IpAddr;

use rand::seq::SliceRandom;
use serde::Serialize;

use crate::identity::IdDeriver;
use crate::registry::{Bridge, Protocol, RegistryStore, Transport, BRIDGE_TYPE_VANILLA};

/// Default number of endpoints per response.
pub const DEFAULT_MAX_ENDPOINTS: usize = 3;

/// An authenticated probe's request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    /// Opaque client identifier; may be empty.
    pub id: String,
    /// Probe type, e.g. `ooni`.
    pub probe_type: String,
    /// Country the probe runs in.
    pub country_code: String,
}

// ── Response Types ───────────────────────────────────────────────────────────

/// Public view of a bridge's own listener.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeView {
    #[serde(rename = "type")]
    pub kind: String,
    pub protocol: Protocol,
    pub address: IpAddr,
    pub port: u16,
    pub fingerprint: String,
}

/// Public view of a pluggable transport.
#[derive(Debug, Clone, Serialize)]
pub struct TransportView {
    #[serde(rename = "type")]
    pub kind: String,
    pub protocol: Protocol,
    pub address: IpAddr,
    pub port: u16,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: BTreeMap<String, Vec<String>>,
}

/// A handed-out endpoint. Internal fields (distributor, timestamps,
/// blocking history) never make it in here.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Endpoint {
    Bridge(BridgeView),
    Transport(TransportView),
}

impl From<&Bridge> for Endpoint {
    fn from(bridge: &Bridge) -> Self {
        Endpoint::Bridge(BridgeView {
            kind: BRIDGE_TYPE_VANILLA.to_string(),
            protocol: bridge.protocol,
            address: bridge.address,
            port: bridge.port,
            fingerprint: bridge.fingerprint.clone(),
        })
    }
}

impl From<&Transport> for Endpoint {
    fn from(transport: &Transport) -> Self {
        Endpoint::Transport(TransportView {
            kind: transport.kind.clone(),
            protocol: transport.protocol,
            address: transport.address,
            port: transport.port,
            arguments: transport.arguments.clone(),
        })
    }
}

/// External identifier → endpoint.
pub type BridgeResponse = BTreeMap<String, Endpoint>;

// ── Distributor ──────────────────────────────────────────────────────────────

/// Picks endpoints from the published registry.
#[derive(Clone)]
pub struct BridgeDistributor {
    store: RegistryStore,
    deriver: IdDeriver,
    max_endpoints: usize,
}

impl BridgeDistributor {
    pub fn new(store: RegistryStore, deriver: IdDeriver, max_endpoints: usize) -> Self {
        Self {
            store,
            deriver,
            max_endpoints,
        }
    }

    pub fn max_endpoints(&self) -> usize {
        self.max_endpoints
    }

    /// Select up to `max_endpoints` endpoints for `request`.
    ///
    /// Eligible bridges are shuffled on every call, so consecutive requests
    /// see a rotating subset. The probe type and country are recorded but
    /// don't influence the choice yet.
    pub fn select(&self, request: &ClientRequest) -> BridgeResponse {
        let snapshot = self.store.snapshot();

        let mut eligible: Vec<&Bridge> = snapshot
            .registry
            .bridges()
            .filter(|b| b.is_probe_eligible())
            .collect();
        eligible.shuffle(&mut rand::thread_rng());

        let response: BridgeResponse = eligible
            .into_iter()
            .take(self.max_endpoints)
            .map(|bridge| match bridge.probing_resistant_transport() {
                Some(transport) => (
                    self.deriver.derive(&transport.three_tuple()),
                    Endpoint::from(transport),
                ),
                None => (self.deriver.derive(&bridge.three_tuple()), Endpoint::from(bridge)),
            })
            .collect();

        tracing::debug!(
            client_id = request.id.as_str(),
            probe_type = request.probe_type.as_str(),
            country_code = request.country_code.as_str(),
            generation = snapshot.generation,
            returned = response.len(),
            "Selected bridges for probe"
        );

        response
    }
}
