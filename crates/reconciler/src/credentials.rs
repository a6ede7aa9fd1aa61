//! Cloud credentials: the secret kind, the reference to it, and its
//! resolution into a remote client scope.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stratus_cluster::{ClusterClient, ClusterClientExt};
use stratus_core::{ObjectKey, ObjectMeta, Resource, Result};
use stratus_dependency::Dependency;
use stratus_progress::{Outcome, ReconcileStatus, WaitingReason};

use crate::error::SpecError;
use crate::interfaces::ManagedObject;

/// Key of the secret entry holding the cloud configuration.
pub const CLOUDS_YAML_KEY: &str = "clouds.yaml";

/// Field indexed on every managed kind for its credentials secret.
pub const CREDENTIALS_FIELD: &str = "spec.cloudCredentialsRef.secretName";

/// Opaque key/value data, stored as strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Resource for Secret {
    const KIND: &'static str = "Secret";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudCredentialsRef {
    pub secret_name: String,
    pub cloud_name: String,
}

fn credentials_secret<O: ManagedObject>(obj: &O) -> Vec<String> {
    vec![obj.credentials_ref().secret_name.clone()]
}

/// Deletion-guarded dependency on the credentials secret of `O`.
pub fn credentials_dependency<O: ManagedObject>(
    finalizer: &str,
    field_owner: &str,
) -> Dependency<O, Secret> {
    Dependency::deletion_guard(
        CREDENTIALS_FIELD,
        credentials_secret::<O>,
        finalizer,
        format!("{field_owner}/credentials"),
    )
}

/// Turns a resolved credentials secret into a remote client scope.
#[async_trait]
pub trait ScopeFactory: Send + Sync {
    type Scope: Send + Sync;

    /// `clouds_yaml` is the content of the secret's [`CLOUDS_YAML_KEY`].
    async fn new_scope(&self, clouds_yaml: &str, cloud_name: &str) -> Result<Self::Scope>;
}

fn clouds_yaml(secret: &Secret) -> Outcome<&str> {
    secret
        .data
        .get(CLOUDS_YAML_KEY)
        .map(String::as_str)
        .ok_or_else(|| {
            ReconcileStatus::wrap_error(
                SpecError::InvalidCredentials {
                    secret: secret.metadata.name.clone(),
                    reason: format!("missing key {CLOUDS_YAML_KEY}"),
                }
                .into(),
            )
        })
}

/// Resolve the credentials of `obj` for a normal pass.
///
/// The secret is deletion-guarded: the finalizer is ensured before any
/// remote call is made with it.
pub async fn resolve_scope<O: ManagedObject, S: ScopeFactory>(
    cluster: &dyn ClusterClient,
    dependency: &Dependency<O, Secret>,
    scopes: &S,
    obj: &O,
) -> Outcome<S::Scope> {
    let credentials = obj.credentials_ref();
    if credentials.secret_name.is_empty() {
        return Err(ReconcileStatus::wrap_error(SpecError::MissingCredentials.into()));
    }
    let secret = dependency
        .get_dependency(cluster, obj, |_: &Secret| true)
        .await?
        .ok_or_else(|| ReconcileStatus::wrap_error(SpecError::MissingCredentials.into()))?;

    scopes
        .new_scope(clouds_yaml(&secret)?, &credentials.cloud_name)
        .await
        .map_err(ReconcileStatus::wrap_error)
}

/// Resolve the credentials of `obj` while it is being deleted.
///
/// The secret may itself be deleting (its guard keeps it stored until
/// `obj` is gone), so no readiness is required and no finalizer is added.
pub async fn resolve_scope_for_deletion<O: ManagedObject, S: ScopeFactory>(
    cluster: &dyn ClusterClient,
    scopes: &S,
    obj: &O,
) -> Outcome<S::Scope> {
    let credentials = obj.credentials_ref();
    if credentials.secret_name.is_empty() {
        return Err(ReconcileStatus::wrap_error(SpecError::MissingCredentials.into()));
    }
    let key = ObjectKey::new(&obj.meta().namespace, &credentials.secret_name);
    let secret = cluster
        .get_typed::<Secret>(&key)
        .await
        .map_err(ReconcileStatus::wrap_error)?
        .ok_or_else(|| {
            ReconcileStatus::waiting_on_object(
                Secret::KIND,
                &credentials.secret_name,
                WaitingReason::Creation,
            )
        })?;

    scopes
        .new_scope(clouds_yaml(&secret)?, &credentials.cloud_name)
        .await
        .map_err(ReconcileStatus::wrap_error)
}
