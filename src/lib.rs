//! # Wolpertinger
//!
//! Tor bridge registry and distributor for censorship measurement probes.
//!
//! ## Module Hierarchy
//!
//! - [`registry`] - Bridge/transport model, BridgeDB and extra-info loaders,
//!   reconciliation and the published snapshot store
//! - [`identity`] - HMAC-derived external identifiers
//! - [`distributor`] - Bridge selection for probe requests
//! - [`refresh`] - Scheduled registry rebuilds with a readiness signal
//! - [`api`] - HTTP handlers and router
//! - [`config`] - Configuration file and runtime settings
//! - [`error`] - Error types for the whole crate

pub mod api;
pub mod config;
pub mod distributor;
pub mod error;
pub mod identity;
pub mod refresh;
pub mod registry;

pub use error::{Error, Result};
