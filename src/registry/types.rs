//! Bridge registry data model.
//!
//! A [`Registry`] maps relay fingerprints to [`Bridge`]s. Each bridge may
//! carry any number of pluggable-transport listeners ([`Transport`]s). Both
//! are addressed externally by their [`ThreeTuple`], never by fingerprint.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Type label used in responses for a bridge's own listener.
pub const BRIDGE_TYPE_VANILLA: &str = "vanilla";

/// Transport types that are not trivially identifiable on the wire.
pub const PROBING_RESISTANT_TRANSPORTS: &[&str] =
    &["obfs4", "scramblesuit", "meek_lite", "snowflake", "webtunnel"];

// ── Wire Protocol ─────────────────────────────────────────────────────────────

/// Wire protocol an endpoint listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Distribution Group ────────────────────────────────────────────────────────

/// The channel through which BridgeDB hands a bridge out to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distributor {
    Moat,
    Https,
    Email,
    /// Not handed out to users yet; the only group we give to probes.
    Unallocated,
}

impl Distributor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distributor::Moat => "moat",
            Distributor::Https => "https",
            Distributor::Email => "email",
            Distributor::Unallocated => "unallocated",
        }
    }
}

impl fmt::Display for Distributor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Distributor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "moat" => Ok(Distributor::Moat),
            "https" => Ok(Distributor::Https),
            "email" => Ok(Distributor::Email),
            "unallocated" => Ok(Distributor::Unallocated),
            other => Err(Error::UnknownDistributor(other.to_string())),
        }
    }
}

// ── Three-Tuple ───────────────────────────────────────────────────────────────

/// (address, port, protocol): what makes an endpoint reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreeTuple {
    pub address: IpAddr,
    pub port: u16,
    pub protocol: Protocol,
}

impl fmt::Display for ThreeTuple {
    /// Canonical form fed to the identifier HMAC, e.g. `1.2.3.4-443-tcp`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.address, self.port, self.protocol)
    }
}

// ── Location ──────────────────────────────────────────────────────────────────

/// Where a bridge or transport was measured as blocked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    /// Upper-cased ISO 3166-1 alpha-2 country code.
    Country(String),
    /// Autonomous system number.
    Asn(u32),
}

impl Location {
    /// Parse `"ru"`, `"RU"` or `"AS12389"`. Returns `None` for anything else.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        // "AS" alone is American Samoa.
        if let Some(num) = s.strip_prefix("AS").or_else(|| s.strip_prefix("as")) {
            if !num.is_empty() {
                return num.parse().ok().map(Location::Asn);
            }
        }
        if s.len() == 2 && s.chars().all(|c| c.is_ascii_alphabetic()) {
            return Some(Location::Country(s.to_ascii_uppercase()));
        }
        None
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Country(cc) => f.write_str(cc),
            Location::Asn(asn) => write!(f, "AS{}", asn),
        }
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// A bridge's pluggable-transport listener.
#[derive(Debug, Clone)]
pub struct Transport {
    /// Transport type, e.g. `obfs4`.
    pub kind: String,
    pub protocol: Protocol,
    pub address: IpAddr,
    pub port: u16,
    /// Fingerprint of the owning bridge.
    pub fingerprint: String,
    /// Transport-specific arguments; a key may repeat.
    pub arguments: BTreeMap<String, Vec<String>>,
    pub blocked_in: Vec<Location>,
}

impl Transport {
    pub fn new(kind: impl Into<String>, address: IpAddr, port: u16, fingerprint: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            protocol: Protocol::Tcp,
            address,
            port,
            fingerprint: fingerprint.into(),
            arguments: BTreeMap::new(),
            blocked_in: Vec::new(),
        }
    }

    /// Append a value to an argument. Repeated keys accumulate.
    pub fn add_argument(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.arguments.entry(key.into()).or_default().push(value.into());
    }

    pub fn three_tuple(&self) -> ThreeTuple {
        ThreeTuple {
            address: self.address,
            port: self.port,
            protocol: self.protocol,
        }
    }

    /// Two transports are duplicates iff type, address, port, fingerprint and
    /// the complete argument mapping match.
    pub fn is_duplicate_of(&self, other: &Transport) -> bool {
        self.kind == other.kind
            && self.address == other.address
            && self.port == other.port
            && self.fingerprint == other.fingerprint
            && self.arguments == other.arguments
    }

    pub fn is_probing_resistant(&self) -> bool {
        PROBING_RESISTANT_TRANSPORTS.contains(&self.kind.as_str())
    }

    pub fn is_blocked_in(&self, location: &Location) -> bool {
        self.blocked_in.contains(location)
    }
}

impl fmt::Display for Transport {
    /// The descriptor line this transport would be parsed from, e.g.
    /// `transport obfs4 [2001:db8::1]:443 cert=XYZ,iat-mode=0`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self
            .arguments
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| format!("{}={}", k, v)))
            .collect();
        write!(
            f,
            "transport {} {}",
            self.kind,
            SocketAddr::new(self.address, self.port)
        )?;
        if !args.is_empty() {
            write!(f, " {}", args.join(","))?;
        }
        Ok(())
    }
}

// ── Bridge ────────────────────────────────────────────────────────────────────

/// A bridge relay.
#[derive(Debug, Clone)]
pub struct Bridge {
    pub fingerprint: String,
    pub address: IpAddr,
    pub port: u16,
    pub protocol: Protocol,
    /// Only the relational store knows the distribution group.
    pub distributor: Option<Distributor>,
    pub first_seen: Option<NaiveDateTime>,
    pub last_seen: Option<NaiveDateTime>,
    pub transports: Vec<Transport>,
    pub blocked_in: Vec<Location>,
}

impl Bridge {
    /// A bridge known only by fingerprint: unspecified address, port 0.
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            protocol: Protocol::Tcp,
            distributor: None,
            first_seen: None,
            last_seen: None,
            transports: Vec::new(),
            blocked_in: Vec::new(),
        }
    }

    /// Add a transport unless an identical one is already attached.
    /// Returns whether the transport was added.
    pub fn add_transport(&mut self, transport: Transport) -> bool {
        if self.transports.iter().any(|t| t.is_duplicate_of(&transport)) {
            return false;
        }
        self.transports.push(transport);
        true
    }

    pub fn three_tuple(&self) -> ThreeTuple {
        ThreeTuple {
            address: self.address,
            port: self.port,
            protocol: self.protocol,
        }
    }

    /// Whether this bridge may be handed out to automated probes.
    pub fn is_probe_eligible(&self) -> bool {
        self.distributor == Some(Distributor::Unallocated)
    }

    /// First transport that resists trivial fingerprinting, if any.
    pub fn probing_resistant_transport(&self) -> Option<&Transport> {
        self.transports.iter().find(|t| t.is_probing_resistant())
    }

    pub fn is_blocked_in(&self, location: &Location) -> bool {
        self.blocked_in.contains(location)
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Fingerprint → bridge.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    bridges: HashMap<String, Bridge>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a bridge, replacing any bridge with the same fingerprint.
    pub fn insert(&mut self, bridge: Bridge) -> Option<Bridge> {
        self.bridges.insert(bridge.fingerprint.clone(), bridge)
    }

    pub fn get(&self, fingerprint: &str) -> Option<&Bridge> {
        self.bridges.get(fingerprint)
    }

    pub(crate) fn get_mut(&mut self, fingerprint: &str) -> Option<&mut Bridge> {
        self.bridges.get_mut(fingerprint)
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.bridges.contains_key(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }

    /// Iterate over bridges in no particular order.
    pub fn bridges(&self) -> impl Iterator<Item = &Bridge> {
        self.bridges.values()
    }

    pub(crate) fn bridges_mut(&mut self) -> impl Iterator<Item = &mut Bridge> {
        self.bridges.values_mut()
    }

    /// Total number of transports across all bridges.
    pub fn transport_count(&self) -> usize {
        self.bridges.values().map(|b| b.transports.len()).sum()
    }
}
