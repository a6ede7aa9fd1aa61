//! Shared controller context and configuration.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use stratus_cluster::{ClusterClient, FieldIndexer};
use stratus_core::{Error, Result};
use stratus_dependency::DeletionGuardRegistry;

/// Timing of controller passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Requeue delay while waiting on dependencies or the remote system
    pub poll_interval: Duration,
    /// Refresh period of imported resources
    pub resync_period: Duration,
    /// Deadline of every remote call
    pub operation_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            resync_period: Duration::from_secs(600),
            operation_timeout: Duration::from_secs(30),
        }
    }
}

impl ControllerConfig {
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub const fn with_operation_timeout(mut self, operation_timeout: Duration) -> Self {
        self.operation_timeout = operation_timeout;
        self
    }
}

/// Handles shared by every controller of a process.
#[derive(Clone)]
pub struct ControllerContext {
    pub cluster: Arc<dyn ClusterClient>,
    pub indexer: Arc<dyn FieldIndexer>,
    pub registry: Arc<DeletionGuardRegistry>,
    pub config: ControllerConfig,
}

impl ControllerContext {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        indexer: Arc<dyn FieldIndexer>,
        registry: Arc<DeletionGuardRegistry>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            cluster,
            indexer,
            registry,
            config,
        }
    }

    /// Run a remote call under the configured deadline.
    pub async fn remote<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        with_timeout(self.config.operation_timeout, operation, call).await
    }
}

/// Run `call` with a deadline. Expiry is a (retryable) cancellation.
pub async fn with_timeout<T>(
    timeout: Duration,
    operation: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| Error::cancelled(format!("{operation} exceeded {}ms", timeout.as_millis())))?
}
