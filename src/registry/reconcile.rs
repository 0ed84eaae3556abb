//! Merge the SQLite view of bridges with the extra-info view.
//!
//! The SQLite store decides which bridges exist and carries their metadata;
//! the extra-info document decides which transports they run.

use super::types::Registry;

/// Replace the transports of every bridge in `relational` that also appears
/// in `parsed`. Bridges only present in `parsed` are dropped.
pub fn reconcile(mut relational: Registry, parsed: &Registry) -> Registry {
    let mut matched = 0usize;

    for bridge in relational.bridges_mut() {
        if let Some(described) = parsed.get(&bridge.fingerprint) {
            bridge.transports = described.transports.clone();
            matched += 1;
        }
    }

    let dropped = parsed.len().saturating_sub(matched);
    if dropped > 0 {
        tracing::debug!(
            dropped = dropped,
            "Ignoring extra-info descriptors for bridges not in the latest round"
        );
    }

    relational
}
