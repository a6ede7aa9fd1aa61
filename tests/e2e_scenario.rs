//! The manager running every networking controller, driven only by watches
//! and requeues.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use stratus::stratus_cluster::{
    ClusterClient, ClusterClientExt, InMemoryCluster, Manager, ManagerConfig, RetryPolicy,
};
use stratus::stratus_core::{Error, HasStatus, ObjectKey, Result};
use stratus::stratus_dependency::DeletionGuardRegistry;
use stratus::stratus_networking::{
    setup_controllers, FakeNetworkClient, FakeScopeFactory, Port, Trunk,
};
use stratus::stratus_reconciler::{ControllerConfig, ControllerContext};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const NAMESPACE: &str = "default";
const SETTLE: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(20);

struct Running {
    cluster: Arc<InMemoryCluster>,
    network: Arc<FakeNetworkClient>,
    stop: watch::Sender<bool>,
    handle: JoinHandle<Result<()>>,
}

impl Running {
    async fn start() -> Self {
        let cluster = InMemoryCluster::new_arc();
        let network = Arc::new(FakeNetworkClient::new());
        let scopes = FakeScopeFactory::new(Arc::clone(&network));
        let ctx = ControllerContext::new(
            cluster.clone(),
            cluster.clone(),
            DeletionGuardRegistry::new_arc(),
            ControllerConfig::default().with_poll_interval(Duration::from_millis(50)),
        );
        let mut manager = Manager::new(
            cluster.clone(),
            cluster.clone(),
            ManagerConfig {
                workers: 2,
                retry: RetryPolicy::new(10, 200),
            },
        );
        assert!(setup_controllers(&mut manager, &ctx, &scopes).await.is_ok());

        let (stop, stopped) = watch::channel(false);
        let handle = tokio::spawn(manager.run(stopped));
        Self {
            cluster,
            network,
            stop,
            handle,
        }
    }

    async fn shutdown(self) {
        assert!(self.stop.send(true).is_ok());
        let stopped = self.handle.await;
        assert!(matches!(stopped, Ok(Ok(()))));
    }

    async fn create(&self, kind: &str, name: &str, body: Value) {
        let mut object = body;
        if let Value::Object(map) = &mut object {
            map.insert(
                "metadata".to_string(),
                json!({ "name": name, "namespace": NAMESPACE }),
            );
        }
        assert!(self.cluster.create(kind, object).await.is_ok());
    }

    async fn delete(&self, kind: &str, name: &str) {
        assert!(self.cluster.delete(kind, &key(name)).await.is_ok());
    }

    async fn exists(&self, kind: &str, name: &str) -> bool {
        self.cluster
            .get(kind, &key(name))
            .await
            .is_ok_and(|o| o.is_some())
    }

    async fn available<T: HasStatus>(&self, name: &str) -> bool {
        self.cluster
            .get_typed::<T>(&key(name))
            .await
            .ok()
            .flatten()
            .is_some_and(|o| o.is_available())
    }

    async fn becomes_available<T: HasStatus>(&self, name: &str) -> bool {
        let deadline = tokio::time::Instant::now() + SETTLE;
        while tokio::time::Instant::now() < deadline {
            if self.available::<T>(name).await {
                return true;
            }
            tokio::time::sleep(POLL).await;
        }
        false
    }

    async fn disappears(&self, kind: &str, name: &str) -> bool {
        let deadline = tokio::time::Instant::now() + SETTLE;
        while tokio::time::Instant::now() < deadline {
            if !self.exists(kind, name).await {
                return true;
            }
            tokio::time::sleep(POLL).await;
        }
        false
    }
}

fn key(name: &str) -> ObjectKey {
    ObjectKey::new(NAMESPACE, name)
}

fn managed(resource: Value) -> Value {
    json!({
        "spec": {
            "resource": resource,
            "cloudCredentialsRef": { "secretName": "cloud-config", "cloudName": "devstack" }
        }
    })
}

async fn with_network(running: &Running) {
    running
        .create(
            "Secret",
            "cloud-config",
            json!({ "data": { "clouds.yaml": "clouds:\n  devstack:\n    auth: {}\n" } }),
        )
        .await;
    running.create("Port", "parent", managed(json!({}))).await;
    running.create("Port", "sub1", managed(json!({}))).await;
    running
        .create(
            "Trunk",
            "trunk",
            managed(json!({
                "portRef": "parent",
                "subports": [{ "portRef": "sub1", "segmentationType": "vlan", "segmentationID": 101 }]
            })),
        )
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn trunk_converges_and_teardown_honours_deletion_guards() {
    let running = Running::start().await;
    with_network(&running).await;

    assert!(running.becomes_available::<Trunk>("trunk").await);
    let trunks = running.network.trunks().await;
    assert!(trunks
        .first()
        .is_some_and(|t| t.status == "ACTIVE" && t.subports.len() == 1));

    // A port named by a trunk outlives its deletion request.
    running.delete("Port", "sub1").await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(running.exists("Port", "sub1").await);
    assert_eq!(running.network.calls("delete_port").await, 0);

    running.delete("Trunk", "trunk").await;
    assert!(running.disappears("Trunk", "trunk").await);
    assert!(running.disappears("Port", "sub1").await);
    assert_eq!(running.network.calls("delete_port").await, 1);
    assert!(running.network.trunks().await.is_empty());
    assert_eq!(running.network.ports().await.len(), 1);

    running.delete("Port", "parent").await;
    assert!(running.disappears("Port", "parent").await);
    assert!(running.network.ports().await.is_empty());

    // Nothing references the credentials any more.
    running.delete("Secret", "cloud-config").await;
    assert!(running.disappears("Secret", "cloud-config").await);

    running.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn secret_created_late_unblocks_waiting_ports() {
    let running = Running::start().await;
    running.create("Port", "web", managed(json!({}))).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(running.network.calls("create_port").await, 0);

    running
        .create(
            "Secret",
            "cloud-config",
            json!({ "data": { "clouds.yaml": "clouds:\n  devstack: {}\n" } }),
        )
        .await;
    assert!(running.becomes_available::<Port>("web").await);
    assert_eq!(running.network.calls("create_port").await, 1);

    running.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transient_failures_are_retried_with_backoff() {
    let running = Running::start().await;
    running
        .network
        .fail_next("create_port", Error::remote("create_port", "503"))
        .await;
    running
        .network
        .fail_next("create_port", Error::cancelled("timed out"))
        .await;
    running
        .create(
            "Secret",
            "cloud-config",
            json!({ "data": { "clouds.yaml": "clouds:\n  devstack: {}\n" } }),
        )
        .await;
    running.create("Port", "web", managed(json!({}))).await;

    assert!(running.becomes_available::<Port>("web").await);
    assert_eq!(running.network.calls("create_port").await, 3);
    assert_eq!(running.network.ports().await.len(), 1);

    running.shutdown().await;
}
