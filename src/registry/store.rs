//! The published registry.
//!
//! Readers take an `Arc` of the current [`Snapshot`] under a read lock and
//! release the lock right away. The refresh task builds a complete new
//! registry off to the side and swaps the `Arc` under the write lock, so a
//! reader sees either the old registry or the new one, never a mix.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::types::Registry;

/// One published generation of the registry.
#[derive(Debug)]
pub struct Snapshot {
    /// 0 until the first refresh succeeds, then incremented on every swap.
    pub generation: u64,
    pub published_at: DateTime<Utc>,
    pub registry: Registry,
}

/// Shared handle to the published registry.
#[derive(Clone)]
pub struct RegistryStore {
    current: Arc<RwLock<Arc<Snapshot>>>,
}

impl Default for RegistryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryStore {
    /// Create a store holding an empty generation-0 registry.
    pub fn new() -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(Snapshot {
                generation: 0,
                published_at: Utc::now(),
                registry: Registry::new(),
            }))),
        }
    }

    /// Publish `registry`, discarding the previous one. Returns the new
    /// generation number.
    pub fn replace(&self, registry: Registry) -> u64 {
        let bridges = registry.len();
        let transports = registry.transport_count();
        let mut next = Snapshot {
            generation: 0,
            published_at: Utc::now(),
            registry,
        };

        let previous = {
            let mut current = self.current.write();
            next.generation = current.generation + 1;
            std::mem::replace(&mut *current, Arc::new(next))
        };
        let generation = previous.generation + 1;
        // Free the old registry after the write lock is released.
        drop(previous);

        tracing::info!(
            generation = generation,
            bridges = bridges,
            transports = transports,
            "Published bridge registry"
        );
        generation
    }

    /// The current snapshot. Holding it keeps that generation alive and
    /// unchanged regardless of later `replace` calls.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    /// Whether at least one refresh has been published.
    pub fn is_ready(&self) -> bool {
        self.generation() > 0
    }

    /// Number of bridges in the current registry.
    pub fn len(&self) -> usize {
        self.current.read().registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
