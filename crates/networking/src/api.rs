//! Cluster object schemas for ports, trunks and projects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratus_core::{HasStatus, ImportSpec, ManagedStatus, ObjectMeta, Resource};
use stratus_reconciler::{CloudCredentialsRef, ManagedObject};

/// Spec shared by every managed kind: exactly one of `resource` or
/// `import`, plus the credentials to reach the cloud with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedSpec<R, F> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<R>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import: Option<ImportSpec<F>>,
    #[serde(default)]
    pub cloud_credentials_ref: CloudCredentialsRef,
}

macro_rules! managed_kind {
    ($(#[$doc:meta])* $kind:ident, $resource:ty, $filter:ty, $status:ty) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct $kind {
            pub metadata: ObjectMeta,
            #[serde(default)]
            pub spec: ManagedSpec<$resource, $filter>,
            #[serde(default)]
            pub status: ManagedStatus<$status>,
        }

        impl Resource for $kind {
            const KIND: &'static str = stringify!($kind);

            fn meta(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }

        impl HasStatus for $kind {
            type ResourceStatus = $status;

            fn status(&self) -> &ManagedStatus<$status> {
                &self.status
            }
        }

        impl ManagedObject for $kind {
            type ResourceSpec = $resource;
            type Filter = $filter;

            fn resource_spec(&self) -> Option<&$resource> {
                self.spec.resource.as_ref()
            }

            fn import_spec(&self) -> Option<&ImportSpec<$filter>> {
                self.spec.import.as_ref()
            }

            fn credentials_ref(&self) -> &CloudCredentialsRef {
                &self.spec.cloud_credentials_ref
            }
        }
    };
}

managed_kind!(
    /// A network port.
    Port,
    PortResourceSpec,
    PortFilter,
    PortResourceStatus
);

managed_kind!(
    /// A trunk: a parent port carrying tagged traffic for its subports.
    Trunk,
    TrunkResourceSpec,
    TrunkFilter,
    TrunkResourceStatus
);

managed_kind!(
    /// A project (tenant) owning networking resources.
    Project,
    ProjectResourceSpec,
    ProjectFilter,
    ProjectResourceStatus
);

/// Tag filters accepted by import filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterByTags {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags_any: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_tags_any: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortResourceSpec {
    /// Remote name. Defaults to the object name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Defaults to `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_state_up: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_ref: Option<String>,
    #[serde(flatten)]
    pub tags: FilterByTags,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortResourceStatus {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project_id: String,
    pub status: String,
    pub admin_state_up: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub revision_number: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A port attached to a trunk with its VLAN parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subport {
    pub port_ref: String,
    pub segmentation_type: String,
    #[serde(rename = "segmentationID")]
    pub segmentation_id: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrunkResourceSpec {
    /// Remote name. Defaults to the object name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The parent port.
    pub port_ref: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Defaults to `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_state_up: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subports: Vec<Subport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrunkFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_state_up: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_ref: Option<String>,
    #[serde(flatten)]
    pub tags: FilterByTags,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubportStatus {
    #[serde(rename = "portID")]
    pub port_id: String,
    pub segmentation_type: String,
    #[serde(rename = "segmentationID")]
    pub segmentation_id: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrunkResourceStatus {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "portID")]
    pub port_id: String,
    #[serde(default, rename = "projectID", skip_serializing_if = "String::is_empty")]
    pub project_id: String,
    pub status: String,
    pub admin_state_up: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subports: Vec<SubportStatus>,
    pub revision_number: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectResourceSpec {
    /// Remote name. Defaults to the object name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub tags: FilterByTags,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectResourceStatus {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Remote name of an object: the spec's name if set, else the object name.
pub fn resource_name<O: Resource>(obj: &O, name: Option<&String>) -> String {
    name.cloned().unwrap_or_else(|| obj.name().to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_trunk_manifest_decodes() {
        let trunk: Result<Trunk, _> = serde_json::from_value(json!({
            "metadata": { "name": "trunk-a", "namespace": "default" },
            "spec": {
                "cloudCredentialsRef": { "secretName": "cloud", "cloudName": "devstack" },
                "resource": {
                    "portRef": "parent",
                    "subports": [
                        { "portRef": "child", "segmentationType": "vlan", "segmentationID": 100 }
                    ]
                }
            }
        }));
        assert!(trunk.as_ref().is_ok());
        let Ok(trunk) = trunk else { return };

        let resource = trunk.resource_spec();
        assert!(resource.is_some_and(|r| r.port_ref == "parent" && r.subports.len() == 1));
        assert_eq!(trunk.credentials_ref().cloud_name, "devstack");
        assert!(trunk.status_id().is_none());
        assert_eq!(Trunk::KIND, "Trunk");
    }

    #[test]
    fn test_import_filter_flattens_tags() {
        let port: Result<Port, _> = serde_json::from_value(json!({
            "metadata": { "name": "p", "namespace": "default" },
            "spec": { "import": { "filter": { "name": "shared", "tagsAny": ["a", "b"] } } }
        }));
        let filter = port
            .ok()
            .and_then(|p| p.spec.import.and_then(|i| i.filter));
        assert!(filter.is_some_and(|f| f.name.as_deref() == Some("shared") && f.tags.tags_any.len() == 2));
    }

    #[test]
    fn test_default_name_is_object_name() {
        let port = Port {
            metadata: ObjectMeta::new("default", "web"),
            spec: ManagedSpec::default(),
            status: ManagedStatus::default(),
        };
        assert_eq!(resource_name(&port, None), "web");
        assert_eq!(resource_name(&port, Some(&"custom".to_string())), "custom");
    }
}
