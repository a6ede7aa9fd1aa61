//! Cluster side of Stratus.
//!
//! - [`ClusterClient`], [`FieldIndexer`] and [`WatchSource`]: the contract
//!   the engine needs from a cluster API and its cache
//! - [`InMemoryCluster`]: a process-local implementation with live field
//!   indexes, field-owned finalizers and watch broadcast
//! - [`WorkQueue`]: per-key debouncing queue with exponential backoff
//! - [`Manager`]: runs controllers on a bounded worker pool

pub mod client;
pub mod manager;
pub mod memory;
pub mod queue;

pub use client::{
    decode, object_meta, ClusterClient, ClusterClientExt, EventType, FieldIndexer, IndexFn,
    WatchEvent, WatchSource,
};
pub use manager::{Manager, ManagerConfig, Reconcile, Watch, WatchMapper};
pub use memory::InMemoryCluster;
pub use queue::{RetryPolicy, WorkQueue};
