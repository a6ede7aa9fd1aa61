//! Remote networking API contract.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratus_core::Result;
use stratus_reconciler::RemoteStream;

/// Remote status of a port or trunk that can carry traffic.
pub const STATUS_ACTIVE: &str = "ACTIVE";
/// Remote status of a healthy port or trunk with no bound device.
pub const STATUS_DOWN: &str = "DOWN";
/// Remote status of a trunk still being provisioned.
pub const STATUS_BUILD: &str = "BUILD";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePort {
    pub id: String,
    pub name: String,
    pub description: String,
    pub project_id: String,
    pub status: String,
    pub admin_state_up: bool,
    pub tags: Vec<String>,
    pub revision_number: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSubport {
    pub port_id: String,
    pub segmentation_type: String,
    pub segmentation_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTrunk {
    pub id: String,
    pub name: String,
    pub description: String,
    pub port_id: String,
    pub project_id: String,
    pub status: String,
    pub admin_state_up: bool,
    pub tags: Vec<String>,
    pub subports: Vec<RemoteSubport>,
    pub revision_number: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteProject {
    pub id: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub tags: Vec<String>,
}

/// Tag filters shared by every list call. Empty fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    /// Every tag must be present.
    pub tags: Vec<String>,
    /// At least one tag must be present.
    pub tags_any: Vec<String>,
    /// Not all of these may be present.
    pub not_tags: Vec<String>,
    /// None of these may be present.
    pub not_tags_any: Vec<String>,
}

impl TagFilter {
    pub fn matches(&self, tags: &[String]) -> bool {
        let has = |t: &String| tags.contains(t);
        self.tags.iter().all(has)
            && (self.tags_any.is_empty() || self.tags_any.iter().any(has))
            && (self.not_tags.is_empty() || !self.not_tags.iter().all(has))
            && !self.not_tags_any.iter().any(has)
    }
}

/// Port and trunk list options. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOpts {
    pub name: Option<String>,
    pub description: Option<String>,
    pub project_id: Option<String>,
    /// Parent port of a trunk; ignored when listing ports.
    pub port_id: Option<String>,
    pub status: Option<String>,
    pub admin_state_up: Option<bool>,
    pub tags: TagFilter,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortCreateOpts {
    pub name: String,
    pub description: String,
    pub project_id: Option<String>,
    pub admin_state_up: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrunkCreateOpts {
    pub name: String,
    pub description: String,
    pub port_id: String,
    pub project_id: Option<String>,
    pub admin_state_up: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectCreateOpts {
    pub name: String,
    pub description: String,
    pub enabled: Option<bool>,
}

/// Attribute changes. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOpts {
    pub name: Option<String>,
    pub description: Option<String>,
    pub admin_state_up: Option<bool>,
}

impl UpdateOpts {
    pub const fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.admin_state_up.is_none()
    }
}

/// Collections supporting whole-set tag replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagCollection {
    Ports,
    Trunks,
    Projects,
}

impl fmt::Display for TagCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ports => "ports",
            Self::Trunks => "trunks",
            Self::Projects => "projects",
        };
        f.write_str(s)
    }
}

/// Networking API of one cloud, scoped to one set of credentials.
///
/// Missing resources are reported as not-found errors, uniqueness
/// violations as conflicts.
#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn get_port(&self, id: &str) -> Result<RemotePort>;
    fn list_ports(&self, opts: ListOpts) -> RemoteStream<RemotePort>;
    async fn create_port(&self, opts: PortCreateOpts) -> Result<RemotePort>;
    async fn update_port(&self, id: &str, opts: UpdateOpts) -> Result<RemotePort>;
    async fn delete_port(&self, id: &str) -> Result<()>;

    async fn get_trunk(&self, id: &str) -> Result<RemoteTrunk>;
    fn list_trunks(&self, opts: ListOpts) -> RemoteStream<RemoteTrunk>;
    async fn create_trunk(&self, opts: TrunkCreateOpts) -> Result<RemoteTrunk>;
    async fn update_trunk(&self, id: &str, opts: UpdateOpts) -> Result<RemoteTrunk>;
    async fn delete_trunk(&self, id: &str) -> Result<()>;
    async fn list_subports(&self, trunk_id: &str) -> Result<Vec<RemoteSubport>>;
    async fn add_subports(&self, trunk_id: &str, subports: Vec<RemoteSubport>) -> Result<()>;
    async fn remove_subports(&self, trunk_id: &str, port_ids: Vec<String>) -> Result<()>;

    async fn get_project(&self, id: &str) -> Result<RemoteProject>;
    fn list_projects(&self, name: Option<String>, tags: TagFilter) -> RemoteStream<RemoteProject>;
    async fn create_project(&self, opts: ProjectCreateOpts) -> Result<RemoteProject>;
    async fn delete_project(&self, id: &str) -> Result<()>;

    /// Replace every tag on a resource.
    async fn replace_all_tags(
        &self,
        collection: TagCollection,
        id: &str,
        tags: Vec<String>,
    ) -> Result<Vec<String>>;
}

/// A client bound to one set of credentials.
pub type NetworkScope = Arc<dyn NetworkClient>;
