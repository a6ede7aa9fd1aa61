//! Client scopes built from a `clouds.yaml` document.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use stratus_core::{ConditionReason, Error, Result};
use stratus_reconciler::ScopeFactory;

use crate::client::NetworkScope;
use crate::fake::FakeNetworkClient;

/// The subset of `clouds.yaml` needed to pick a cloud.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudsYaml {
    pub clouds: BTreeMap<String, CloudEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloudEntry {
    #[serde(default)]
    pub region_name: Option<String>,
    #[serde(default)]
    pub auth: BTreeMap<String, serde_yaml::Value>,
}

impl CloudsYaml {
    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| {
            Error::terminal(
                ConditionReason::InvalidConfiguration,
                format!("clouds.yaml is not valid: {e}"),
            )
        })
    }

    pub fn cloud(&self, name: &str) -> Result<&CloudEntry> {
        self.clouds.get(name).ok_or_else(|| {
            Error::terminal(
                ConditionReason::InvalidConfiguration,
                format!("cloud '{name}' is not defined in clouds.yaml"),
            )
        })
    }
}

/// Hands out the shared in-memory API to every well-formed credential.
#[derive(Clone)]
pub struct FakeScopeFactory {
    network: Arc<FakeNetworkClient>,
}

impl FakeScopeFactory {
    pub const fn new(network: Arc<FakeNetworkClient>) -> Self {
        Self { network }
    }
}

#[async_trait]
impl ScopeFactory for FakeScopeFactory {
    type Scope = NetworkScope;

    async fn new_scope(&self, clouds_yaml: &str, cloud_name: &str) -> Result<NetworkScope> {
        CloudsYaml::parse(clouds_yaml)?.cloud(cloud_name)?;
        Ok(Arc::clone(&self.network) as NetworkScope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLOUDS: &str = r"
clouds:
  devstack:
    region_name: RegionOne
    auth:
      auth_url: http://keystone:5000/v3
      username: admin
";

    #[test]
    fn test_parse_clouds_yaml() {
        let parsed = CloudsYaml::parse(CLOUDS);
        assert!(parsed.as_ref().is_ok_and(|c| c.cloud("devstack").is_ok()));
        let region = parsed
            .ok()
            .and_then(|c| c.clouds.get("devstack").and_then(|e| e.region_name.clone()));
        assert_eq!(region.as_deref(), Some("RegionOne"));
    }

    #[tokio::test]
    async fn test_unknown_cloud_is_terminal() {
        let factory = FakeScopeFactory::new(Arc::new(FakeNetworkClient::new()));
        let result = factory.new_scope(CLOUDS, "production").await;
        assert!(result.is_err_and(|e| e.terminal_reason() == Some(ConditionReason::InvalidConfiguration)));
    }

    #[tokio::test]
    async fn test_malformed_yaml_is_terminal() {
        let factory = FakeScopeFactory::new(Arc::new(FakeNetworkClient::new()));
        let result = factory.new_scope("clouds: [", "devstack").await;
        assert!(result.is_err_and(|e| e.is_terminal()));
    }
}
