#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # Stratus
//!
//! Declarative reconciliation of cloud resources.
//!
//! This package holds the process-level pieces: configuration and the
//! offline simulator. The engine lives in the workspace crates, re-exported
//! here for convenience.

pub mod config;
pub mod simulate;

pub use stratus_cluster;
pub use stratus_core;
pub use stratus_dependency;
pub use stratus_networking;
pub use stratus_reconciler;

pub use config::{ConfigError, StratusConfig};
pub use simulate::{parse_manifests, simulate, Manifest, SimulateError, SimulationReport};
