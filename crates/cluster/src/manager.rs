//! Controller manager: pumps watch events into per-controller queues and
//! runs a bounded pool of workers for each controller.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use stratus_core::{ObjectKey, Requeue, Result};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{object_meta, ClusterClient, WatchEvent, WatchSource};
use crate::queue::{RetryPolicy, WorkQueue};

/// One controller, driven by the manager.
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Controller name, used in logs.
    fn name(&self) -> &str;

    /// Primary kind: every event on it enqueues the object.
    fn kind(&self) -> &str;

    async fn reconcile(&self, key: &ObjectKey) -> Requeue;
}

/// Maps an event on a secondary kind to primary keys to enqueue.
pub type WatchMapper = Arc<dyn Fn(WatchEvent) -> BoxFuture<'static, Vec<ObjectKey>> + Send + Sync>;

/// A secondary watch of a controller.
#[derive(Clone)]
pub struct Watch {
    pub kind: String,
    pub mapper: WatchMapper,
}

impl Watch {
    pub fn new(kind: impl Into<String>, mapper: WatchMapper) -> Self {
        Self {
            kind: kind.into(),
            mapper,
        }
    }
}

impl std::fmt::Debug for Watch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch").field("kind", &self.kind).finish_non_exhaustive()
    }
}

/// Manager configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Concurrent workers per controller
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_workers() -> usize {
    2
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retry: RetryPolicy::default(),
        }
    }
}

struct Registration {
    reconciler: Arc<dyn Reconcile>,
    watches: Vec<Watch>,
    queue: Arc<WorkQueue>,
}

pub struct Manager {
    cluster: Arc<dyn ClusterClient>,
    watch_source: Arc<dyn WatchSource>,
    config: ManagerConfig,
    controllers: Vec<Registration>,
}

impl Manager {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        watch_source: Arc<dyn WatchSource>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            cluster,
            watch_source,
            config,
            controllers: Vec::new(),
        }
    }

    /// Register a controller with its secondary watches.
    pub fn add_controller(&mut self, reconciler: Arc<dyn Reconcile>, watches: Vec<Watch>) {
        info!(
            controller = reconciler.name(),
            kind = reconciler.kind(),
            watches = watches.len(),
            "Registered controller"
        );
        self.controllers.push(Registration {
            reconciler,
            watches,
            queue: WorkQueue::new(self.config.retry.clone()),
        });
    }

    /// Run until `stop` flips to `true`.
    pub async fn run(self, mut stop: watch::Receiver<bool>) -> Result<()> {
        let mut events = self.watch_source.subscribe();
        self.enqueue_all().await?;

        let workers = self.config.workers.max(1);
        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        for registration in &self.controllers {
            for _ in 0..workers {
                handles.push(tokio::spawn(worker(
                    Arc::clone(&registration.reconciler),
                    Arc::clone(&registration.queue),
                )));
            }
        }
        info!(controllers = self.controllers.len(), workers, "Manager started");

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Ok(event) => self.dispatch(event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Watch lagged, re-enqueueing everything");
                        self.enqueue_all().await?;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        for registration in &self.controllers {
            registration.queue.shutdown().await;
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker task failed");
            }
        }
        info!("Manager stopped");
        Ok(())
    }

    async fn enqueue_all(&self) -> Result<()> {
        for registration in &self.controllers {
            for object in self.cluster.list(registration.reconciler.kind(), None).await? {
                registration.queue.add(object_meta(&object)?.key()).await;
            }
        }
        Ok(())
    }

    async fn dispatch(&self, event: WatchEvent) {
        for registration in &self.controllers {
            if registration.reconciler.kind() == event.kind {
                registration.queue.add(event.key.clone()).await;
            }
            for watch in registration.watches.iter().filter(|w| w.kind == event.kind) {
                for key in (watch.mapper)(event.clone()).await {
                    registration.queue.add(key).await;
                }
            }
        }
    }
}

async fn worker(reconciler: Arc<dyn Reconcile>, queue: Arc<WorkQueue>) {
    while let Some(key) = queue.get().await {
        let requeue = reconciler.reconcile(&key).await;
        debug!(controller = reconciler.name(), object = %key, ?requeue, "Pass finished");
        match requeue {
            Requeue::Done => queue.forget(&key).await,
            Requeue::After(delay) => {
                queue.forget(&key).await;
                queue.add_after(key.clone(), delay).await;
            }
            Requeue::Backoff => queue.add_rate_limited(key.clone()).await,
        }
        queue.done(&key).await;
    }
}
