#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use stratus_cluster::{ClusterClient, ClusterClientExt, InMemoryCluster, Manager, ManagerConfig};
use stratus_core::{Condition, ConditionType, HasStatus, ObjectKey, Resource};
use stratus_dependency::DeletionGuardRegistry;
use stratus_networking::port::{PortActuatorFactory, PortStatusWriter, PORT_CONTROLLER, PORT_FINALIZER};
use stratus_networking::project::{
    ProjectActuatorFactory, ProjectStatusWriter, PROJECT_CONTROLLER, PROJECT_FINALIZER,
};
use stratus_networking::trunk::{
    TrunkActuatorFactory, TrunkStatusWriter, TRUNK_CONTROLLER, TRUNK_FINALIZER,
};
use stratus_networking::{FakeNetworkClient, FakeScopeFactory, Project};
use stratus_reconciler::{ControllerConfig, ControllerContext, GenericController};

pub const NAMESPACE: &str = "default";
pub const SECRET: &str = "cloud-config";
pub const CLOUD: &str = "devstack";

pub type PortController = GenericController<PortActuatorFactory<FakeScopeFactory>, PortStatusWriter>;
pub type TrunkController =
    GenericController<TrunkActuatorFactory<FakeScopeFactory>, TrunkStatusWriter>;
pub type ProjectController =
    GenericController<ProjectActuatorFactory<FakeScopeFactory>, ProjectStatusWriter>;

/// Controllers registered on a manager that is never run, so tests drive
/// single passes themselves.
pub struct Harness {
    pub cluster: Arc<InMemoryCluster>,
    pub network: Arc<FakeNetworkClient>,
    pub ctx: ControllerContext,
    pub project: Arc<ProjectController>,
    pub port: Arc<PortController>,
    pub trunk: Arc<TrunkController>,
    _manager: Manager,
}

impl Harness {
    pub async fn new() -> Self {
        let cluster = InMemoryCluster::new_arc();
        let network = Arc::new(FakeNetworkClient::new());
        let scopes = FakeScopeFactory::new(Arc::clone(&network));
        let ctx = ControllerContext::new(
            cluster.clone(),
            cluster.clone(),
            DeletionGuardRegistry::new_arc(),
            ControllerConfig::default().with_poll_interval(Duration::from_millis(20)),
        );
        let mut manager = Manager::new(cluster.clone(), cluster.clone(), ManagerConfig::default());

        let project = Arc::new(GenericController::new(
            PROJECT_CONTROLLER,
            PROJECT_FINALIZER,
            ctx.clone(),
            ProjectActuatorFactory::new(scopes.clone()),
            ProjectStatusWriter,
        ));
        let port = Arc::new(GenericController::new(
            PORT_CONTROLLER,
            PORT_FINALIZER,
            ctx.clone(),
            PortActuatorFactory::new(scopes.clone()),
            PortStatusWriter,
        ));
        let trunk = Arc::new(GenericController::new(
            TRUNK_CONTROLLER,
            TRUNK_FINALIZER,
            ctx.clone(),
            TrunkActuatorFactory::new(scopes),
            TrunkStatusWriter,
        ));
        assert!(Arc::clone(&project).register(&mut manager).await.is_ok());
        assert!(Arc::clone(&port).register(&mut manager).await.is_ok());
        assert!(Arc::clone(&trunk).register(&mut manager).await.is_ok());

        Self {
            cluster,
            network,
            ctx,
            project,
            port,
            trunk,
            _manager: manager,
        }
    }

    /// A harness with the credentials secret already stored.
    pub async fn with_credentials() -> Self {
        let harness = Self::new().await;
        harness.create_secret(SECRET, true).await;
        harness
    }

    pub async fn create_secret(&self, name: &str, with_clouds_yaml: bool) {
        let data = if with_clouds_yaml {
            json!({ "clouds.yaml": format!("clouds:\n  {CLOUD}:\n    auth:\n      username: admin\n") })
        } else {
            json!({})
        };
        self.create(
            "Secret",
            json!({ "metadata": { "name": name, "namespace": NAMESPACE }, "data": data }),
        )
        .await;
    }

    pub async fn create(&self, kind: &str, object: Value) {
        let created = self.cluster.create(kind, object).await;
        assert!(created.is_ok(), "create {kind}: {created:?}");
    }

    pub async fn create_port(&self, name: &str, resource: Value) {
        self.create("Port", managed(name, json!({ "resource": resource })))
            .await;
    }

    pub async fn create_trunk(&self, name: &str, resource: Value) {
        self.create("Trunk", managed(name, json!({ "resource": resource })))
            .await;
    }

    /// A managed project reconciled until available; returns its remote ID.
    pub async fn ready_project(&self, name: &str) -> String {
        self.create("Project", managed(name, json!({ "resource": {} })))
            .await;
        let status = self.project.reconcile_object(&key(name)).await;
        assert!(status.is_ok(), "{name}: {status}");
        self.get::<Project>(name)
            .await
            .and_then(|p| p.status.id)
            .unwrap_or_default()
    }

    pub async fn get<T: Resource>(&self, name: &str) -> Option<T> {
        self.cluster
            .get_typed::<T>(&key(name))
            .await
            .ok()
            .flatten()
    }

    pub async fn update_spec(&self, kind: &str, name: &str, spec: Value) {
        let updated = self.cluster.update_spec(kind, &key(name), spec).await;
        assert!(updated.is_ok(), "update {kind}: {updated:?}");
    }

    pub async fn delete(&self, kind: &str, name: &str) {
        let deleted = self.cluster.delete(kind, &key(name)).await;
        assert!(deleted.is_ok(), "delete {kind}: {deleted:?}");
    }

    pub async fn finalizers(&self, kind: &str, name: &str) -> Vec<String> {
        self.cluster
            .get(kind, &key(name))
            .await
            .ok()
            .flatten()
            .and_then(|o| o.pointer("/metadata/finalizers").cloned())
            .and_then(|f| serde_json::from_value(f).ok())
            .unwrap_or_default()
    }
}

pub fn key(name: &str) -> ObjectKey {
    ObjectKey::new(NAMESPACE, name)
}

/// A managed object manifest with the default credentials reference.
pub fn managed(name: &str, spec: Value) -> Value {
    json!({ "metadata": { "name": name, "namespace": NAMESPACE }, "spec": with_credentials(spec) })
}

pub fn with_credentials(mut spec: Value) -> Value {
    if let Value::Object(map) = &mut spec {
        map.insert(
            "cloudCredentialsRef".to_string(),
            json!({ "secretName": SECRET, "cloudName": CLOUD }),
        );
    }
    spec
}

pub fn condition<T: HasStatus>(obj: &T, type_: ConditionType) -> Option<Condition> {
    obj.status().condition(type_).cloned()
}
