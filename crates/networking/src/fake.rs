//! In-memory networking API.
//!
//! Behaves like the real API where the controllers can observe it:
//! generated IDs, trunks provisioning through `BUILD`, ports refusing
//! deletion while a trunk uses them, and revision numbers bumping on every
//! change. Failures can be injected per operation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::{stream, StreamExt};
use stratus_core::{Error, Result};
use stratus_reconciler::RemoteStream;
use tokio::sync::Mutex;
use tracing::debug;
use ulid::Ulid;

use crate::client::{
    ListOpts, NetworkClient, PortCreateOpts, ProjectCreateOpts, RemotePort, RemoteProject,
    RemoteSubport, RemoteTrunk, TagCollection, TagFilter, TrunkCreateOpts, UpdateOpts,
    STATUS_ACTIVE, STATUS_BUILD, STATUS_DOWN,
};

#[derive(Default)]
struct FakeState {
    ports: BTreeMap<String, RemotePort>,
    trunks: BTreeMap<String, RemoteTrunk>,
    projects: BTreeMap<String, RemoteProject>,
    calls: HashMap<String, usize>,
    failures: HashMap<String, VecDeque<Error>>,
}

impl FakeState {
    /// Count a call and hand back an injected failure, if any.
    fn record(&mut self, operation: &str) -> Result<()> {
        *self.calls.entry(operation.to_string()).or_default() += 1;
        match self
            .failures
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            Some(err) => {
                debug!(operation, error = %err, "Injected failure");
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn port_in_use(&self, port_id: &str) -> Option<&str> {
        self.trunks
            .values()
            .find(|t| t.port_id == port_id || t.subports.iter().any(|s| s.port_id == port_id))
            .map(|t| t.id.as_str())
    }
}

/// Shared in-memory networking API. Clones see the same state.
#[derive(Clone, Default)]
pub struct FakeNetworkClient {
    state: Arc<Mutex<FakeState>>,
}

impl FakeNetworkClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls made to `operation`, e.g. `"delete_trunk"`.
    pub async fn calls(&self, operation: &str) -> usize {
        self.state
            .lock()
            .await
            .calls
            .get(operation)
            .copied()
            .unwrap_or_default()
    }

    /// Fail the next call to `operation` with `err`.
    pub async fn fail_next(&self, operation: &str, err: Error) {
        self.state
            .lock()
            .await
            .failures
            .entry(operation.to_string())
            .or_default()
            .push_back(err);
    }

    pub async fn port(&self, id: &str) -> Option<RemotePort> {
        self.state.lock().await.ports.get(id).cloned()
    }

    pub async fn trunk(&self, id: &str) -> Option<RemoteTrunk> {
        self.state.lock().await.trunks.get(id).cloned()
    }

    pub async fn ports(&self) -> Vec<RemotePort> {
        self.state.lock().await.ports.values().cloned().collect()
    }

    pub async fn trunks(&self) -> Vec<RemoteTrunk> {
        self.state.lock().await.trunks.values().cloned().collect()
    }

    pub async fn projects(&self) -> Vec<RemoteProject> {
        self.state.lock().await.projects.values().cloned().collect()
    }

    /// Create a project outside of any controller, as an administrator would.
    pub async fn seed_project(&self, name: &str) -> RemoteProject {
        let project = RemoteProject {
            id: new_id(),
            name: name.to_string(),
            description: String::new(),
            enabled: true,
            tags: Vec::new(),
        };
        self.state
            .lock()
            .await
            .projects
            .insert(project.id.clone(), project.clone());
        project
    }

    /// Create a port outside of any controller.
    pub async fn seed_port(&self, name: &str, tags: &[&str]) -> RemotePort {
        let now = Utc::now();
        let port = RemotePort {
            id: new_id(),
            name: name.to_string(),
            description: String::new(),
            project_id: String::new(),
            status: STATUS_DOWN.to_string(),
            admin_state_up: true,
            tags: tags.iter().map(ToString::to_string).collect(),
            revision_number: 1,
            created_at: now,
            updated_at: now,
        };
        self.state
            .lock()
            .await
            .ports
            .insert(port.id.clone(), port.clone());
        port
    }
}

fn new_id() -> String {
    Ulid::new().to_string().to_lowercase()
}

fn matches_common(
    opts: &ListOpts,
    name: &str,
    description: &str,
    project_id: &str,
    status: &str,
    admin_state_up: bool,
    tags: &[String],
) -> bool {
    opts.name.as_deref().unset_or_eq(name)
        && opts.description.as_deref().unset_or_eq(description)
        && opts.project_id.as_deref().unset_or_eq(project_id)
        && opts.status.as_deref().unset_or_eq(status)
        && opts.admin_state_up.map_or(true, |a| a == admin_state_up)
        && opts.tags.matches(tags)
}

/// List option semantics: an unset or empty option matches anything.
trait OptionalMatch {
    fn unset_or_eq(self, actual: &str) -> bool;
}

impl OptionalMatch for Option<&str> {
    fn unset_or_eq(self, actual: &str) -> bool {
        self.map_or(true, |wanted| wanted.is_empty() || wanted == actual)
    }
}

fn port_matches(opts: &ListOpts, port: &RemotePort) -> bool {
    matches_common(
        opts,
        &port.name,
        &port.description,
        &port.project_id,
        &port.status,
        port.admin_state_up,
        &port.tags,
    )
}

fn trunk_matches(opts: &ListOpts, trunk: &RemoteTrunk) -> bool {
    opts.port_id.as_deref().unset_or_eq(&trunk.port_id)
        && matches_common(
            opts,
            &trunk.name,
            &trunk.description,
            &trunk.project_id,
            &trunk.status,
            trunk.admin_state_up,
            &trunk.tags,
        )
}

#[async_trait]
impl NetworkClient for FakeNetworkClient {
    async fn get_port(&self, id: &str) -> Result<RemotePort> {
        let mut state = self.state.lock().await;
        state.record("get_port")?;
        state
            .ports
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("port", id))
    }

    fn list_ports(&self, opts: ListOpts) -> RemoteStream<RemotePort> {
        let state = Arc::clone(&self.state);
        stream::once(async move {
            let mut state = state.lock().await;
            let listed: Vec<Result<RemotePort>> = match state.record("list_ports") {
                Ok(()) => state
                    .ports
                    .values()
                    .filter(|p| port_matches(&opts, p))
                    .cloned()
                    .map(Ok)
                    .collect(),
                Err(e) => vec![Err(e)],
            };
            stream::iter(listed)
        })
        .flatten()
        .boxed()
    }

    async fn create_port(&self, opts: PortCreateOpts) -> Result<RemotePort> {
        let mut state = self.state.lock().await;
        state.record("create_port")?;
        if let Some(project_id) = &opts.project_id {
            if !state.projects.contains_key(project_id) {
                return Err(Error::remote_rejected(
                    "create_port",
                    format!("project {project_id} does not exist"),
                ));
            }
        }
        let now = Utc::now();
        let port = RemotePort {
            id: new_id(),
            name: opts.name,
            description: opts.description,
            project_id: opts.project_id.unwrap_or_default(),
            status: STATUS_DOWN.to_string(),
            admin_state_up: opts.admin_state_up.unwrap_or(true),
            tags: Vec::new(),
            revision_number: 1,
            created_at: now,
            updated_at: now,
        };
        state.ports.insert(port.id.clone(), port.clone());
        Ok(port)
    }

    async fn update_port(&self, id: &str, opts: UpdateOpts) -> Result<RemotePort> {
        let mut state = self.state.lock().await;
        state.record("update_port")?;
        let port = state
            .ports
            .get_mut(id)
            .ok_or_else(|| Error::not_found("port", id))?;
        if let Some(name) = opts.name {
            port.name = name;
        }
        if let Some(description) = opts.description {
            port.description = description;
        }
        if let Some(admin_state_up) = opts.admin_state_up {
            port.admin_state_up = admin_state_up;
        }
        port.revision_number += 1;
        port.updated_at = Utc::now();
        Ok(port.clone())
    }

    async fn delete_port(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record("delete_port")?;
        if let Some(trunk_id) = state.port_in_use(id) {
            return Err(Error::conflict(format!("port {id} is in use by trunk {trunk_id}")));
        }
        state
            .ports
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("port", id))
    }

    async fn get_trunk(&self, id: &str) -> Result<RemoteTrunk> {
        let mut state = self.state.lock().await;
        state.record("get_trunk")?;
        let trunk = state
            .trunks
            .get_mut(id)
            .ok_or_else(|| Error::not_found("trunk", id))?;
        // Provisioning completes by the time anyone looks again.
        if trunk.status == STATUS_BUILD {
            trunk.status = STATUS_ACTIVE.to_string();
        }
        Ok(trunk.clone())
    }

    fn list_trunks(&self, opts: ListOpts) -> RemoteStream<RemoteTrunk> {
        let state = Arc::clone(&self.state);
        stream::once(async move {
            let mut state = state.lock().await;
            let listed: Vec<Result<RemoteTrunk>> = match state.record("list_trunks") {
                Ok(()) => state
                    .trunks
                    .values()
                    .filter(|t| trunk_matches(&opts, t))
                    .cloned()
                    .map(Ok)
                    .collect(),
                Err(e) => vec![Err(e)],
            };
            stream::iter(listed)
        })
        .flatten()
        .boxed()
    }

    async fn create_trunk(&self, opts: TrunkCreateOpts) -> Result<RemoteTrunk> {
        let mut state = self.state.lock().await;
        state.record("create_trunk")?;
        if !state.ports.contains_key(&opts.port_id) {
            return Err(Error::remote_rejected(
                "create_trunk",
                format!("port {} does not exist", opts.port_id),
            ));
        }
        if let Some(trunk_id) = state.port_in_use(&opts.port_id) {
            return Err(Error::conflict(format!(
                "port {} is already in use by trunk {trunk_id}",
                opts.port_id
            )));
        }
        let now = Utc::now();
        let trunk = RemoteTrunk {
            id: new_id(),
            name: opts.name,
            description: opts.description,
            port_id: opts.port_id,
            project_id: opts.project_id.unwrap_or_default(),
            status: STATUS_BUILD.to_string(),
            admin_state_up: opts.admin_state_up.unwrap_or(true),
            tags: Vec::new(),
            subports: Vec::new(),
            revision_number: 1,
            created_at: now,
            updated_at: now,
        };
        state.trunks.insert(trunk.id.clone(), trunk.clone());
        Ok(trunk)
    }

    async fn update_trunk(&self, id: &str, opts: UpdateOpts) -> Result<RemoteTrunk> {
        let mut state = self.state.lock().await;
        state.record("update_trunk")?;
        let trunk = state
            .trunks
            .get_mut(id)
            .ok_or_else(|| Error::not_found("trunk", id))?;
        if let Some(name) = opts.name {
            trunk.name = name;
        }
        if let Some(description) = opts.description {
            trunk.description = description;
        }
        if let Some(admin_state_up) = opts.admin_state_up {
            trunk.admin_state_up = admin_state_up;
        }
        trunk.revision_number += 1;
        trunk.updated_at = Utc::now();
        Ok(trunk.clone())
    }

    async fn delete_trunk(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record("delete_trunk")?;
        state
            .trunks
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("trunk", id))
    }

    async fn list_subports(&self, trunk_id: &str) -> Result<Vec<RemoteSubport>> {
        let mut state = self.state.lock().await;
        state.record("list_subports")?;
        state
            .trunks
            .get(trunk_id)
            .map(|t| t.subports.clone())
            .ok_or_else(|| Error::not_found("trunk", trunk_id))
    }

    async fn add_subports(&self, trunk_id: &str, subports: Vec<RemoteSubport>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record("add_subports")?;
        if !state.trunks.contains_key(trunk_id) {
            return Err(Error::not_found("trunk", trunk_id));
        }
        for subport in &subports {
            if !state.ports.contains_key(&subport.port_id) {
                return Err(Error::remote_rejected(
                    "add_subports",
                    format!("port {} does not exist", subport.port_id),
                ));
            }
            if let Some(owner) = state.port_in_use(&subport.port_id) {
                return Err(Error::conflict(format!(
                    "port {} is already in use by trunk {owner}",
                    subport.port_id
                )));
            }
        }
        let trunk = state
            .trunks
            .get_mut(trunk_id)
            .ok_or_else(|| Error::not_found("trunk", trunk_id))?;
        trunk.subports.extend(subports);
        trunk.revision_number += 1;
        trunk.updated_at = Utc::now();
        Ok(())
    }

    async fn remove_subports(&self, trunk_id: &str, port_ids: Vec<String>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record("remove_subports")?;
        let trunk = state
            .trunks
            .get_mut(trunk_id)
            .ok_or_else(|| Error::not_found("trunk", trunk_id))?;
        trunk.subports.retain(|s| !port_ids.contains(&s.port_id));
        trunk.revision_number += 1;
        trunk.updated_at = Utc::now();
        Ok(())
    }

    async fn get_project(&self, id: &str) -> Result<RemoteProject> {
        let mut state = self.state.lock().await;
        state.record("get_project")?;
        state
            .projects
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("project", id))
    }

    fn list_projects(&self, name: Option<String>, tags: TagFilter) -> RemoteStream<RemoteProject> {
        let state = Arc::clone(&self.state);
        stream::once(async move {
            let mut state = state.lock().await;
            let listed: Vec<Result<RemoteProject>> = match state.record("list_projects") {
                Ok(()) => state
                    .projects
                    .values()
                    .filter(|p| name.as_deref().unset_or_eq(&p.name) && tags.matches(&p.tags))
                    .cloned()
                    .map(Ok)
                    .collect(),
                Err(e) => vec![Err(e)],
            };
            stream::iter(listed)
        })
        .flatten()
        .boxed()
    }

    async fn create_project(&self, opts: ProjectCreateOpts) -> Result<RemoteProject> {
        let mut state = self.state.lock().await;
        state.record("create_project")?;
        if state.projects.values().any(|p| p.name == opts.name) {
            return Err(Error::conflict(format!("project name {} is taken", opts.name)));
        }
        let project = RemoteProject {
            id: new_id(),
            name: opts.name,
            description: opts.description,
            enabled: opts.enabled.unwrap_or(true),
            tags: Vec::new(),
        };
        state.projects.insert(project.id.clone(), project.clone());
        Ok(project)
    }

    async fn delete_project(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record("delete_project")?;
        state
            .projects
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("project", id))
    }

    async fn replace_all_tags(
        &self,
        collection: TagCollection,
        id: &str,
        tags: Vec<String>,
    ) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        state.record("replace_all_tags")?;
        let now = Utc::now();
        match collection {
            TagCollection::Ports => {
                let port = state
                    .ports
                    .get_mut(id)
                    .ok_or_else(|| Error::not_found("port", id))?;
                port.tags.clone_from(&tags);
                port.revision_number += 1;
                port.updated_at = now;
            }
            TagCollection::Trunks => {
                let trunk = state
                    .trunks
                    .get_mut(id)
                    .ok_or_else(|| Error::not_found("trunk", id))?;
                trunk.tags.clone_from(&tags);
                trunk.revision_number += 1;
                trunk.updated_at = now;
            }
            TagCollection::Projects => {
                let project = state
                    .projects
                    .get_mut(id)
                    .ok_or_else(|| Error::not_found("project", id))?;
                project.tags.clone_from(&tags);
            }
        }
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;

    #[tokio::test]
    async fn test_trunk_provisions_on_next_get() {
        let client = FakeNetworkClient::new();
        let port = client.seed_port("parent", &[]).await;
        let created = client
            .create_trunk(TrunkCreateOpts {
                name: "t".to_string(),
                port_id: port.id,
                ..TrunkCreateOpts::default()
            })
            .await;
        assert!(created.as_ref().is_ok_and(|t| t.status == STATUS_BUILD));

        let Ok(created) = created else { return };
        let fetched = client.get_trunk(&created.id).await;
        assert!(fetched.is_ok_and(|t| t.status == STATUS_ACTIVE));
    }

    #[tokio::test]
    async fn test_port_in_use_cannot_be_deleted() {
        let client = FakeNetworkClient::new();
        let parent = client.seed_port("parent", &[]).await;
        let _ = client
            .create_trunk(TrunkCreateOpts {
                name: "t".to_string(),
                port_id: parent.id.clone(),
                ..TrunkCreateOpts::default()
            })
            .await;

        let result = client.delete_port(&parent.id).await;
        assert!(result.is_err_and(|e| e.is_conflict()));
    }

    #[tokio::test]
    async fn test_list_filters_and_counts_calls() {
        let client = FakeNetworkClient::new();
        client.seed_port("a", &["blue"]).await;
        client.seed_port("b", &["red"]).await;

        let listed: Result<Vec<RemotePort>> = client
            .list_ports(ListOpts {
                tags: TagFilter {
                    tags: vec!["blue".to_string()],
                    ..TagFilter::default()
                },
                ..ListOpts::default()
            })
            .try_collect()
            .await;
        assert!(listed.is_ok_and(|ports| ports.len() == 1 && ports[0].name == "a"));
        assert_eq!(client.calls("list_ports").await, 1);
    }

    #[tokio::test]
    async fn test_injected_failure_is_returned_once() {
        let client = FakeNetworkClient::new();
        client
            .fail_next("get_port", Error::remote("get_port", "connection reset"))
            .await;

        assert!(client.get_port("x").await.is_err_and(|e| e.is_retryable()));
        assert!(client.get_port("x").await.is_err_and(|e| e.is_not_found()));
        assert_eq!(client.calls("get_port").await, 2);
    }
}
