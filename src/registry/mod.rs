//! Bridge registry.
//!
//! The registry is rebuilt from scratch on every refresh:
//!
//! 1. [`sql::load_database`] reads the latest round of bridges from
//!    BridgeDB's SQLite store (existence, address, distributor).
//! 2. [`extrainfo::parse_extrainfo`] reads the bridges' pluggable transports
//!    from the extra-info document.
//! 3. [`reconcile::reconcile`] merges the two by fingerprint.
//! 4. [`RegistryStore::replace`] publishes the result in one swap.

pub mod address;
pub mod extrainfo;
pub mod reconcile;
pub mod sql;
pub mod store;
pub mod types;

pub use store::{RegistryStore, Snapshot};
pub use types::*;
