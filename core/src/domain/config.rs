// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Top-level Kubernetes-style manifest for broker configuration. Loaded once
/// at process start and threaded through the composition root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfigManifest {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ManifestMetadata,
    pub spec: BrokerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// The broker's runtime configuration (spec ambient stack §"Configuration").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub storage: StorageConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    InMemory,
    Postgres { connection_string: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Per-source compile time budget before it contributes a warning and
    /// zero tools to the build (step 3, default 20s).
    #[serde(with = "humantime_serde", default = "default_source_budget")]
    pub source_build_budget: Duration,
    #[serde(default = "default_true")]
    pub include_base_tools: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            source_build_budget: default_source_budget(),
            include_base_tools: true,
        }
    }
}

fn default_source_budget() -> Duration {
    Duration::from_secs(20)
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Poll interval when no notify-on-write change feed is available
    /// (spec §4.8, default 500ms).
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    Environment,
    Vault {
        address: String,
        mount: String,
        #[serde(default)]
        options: HashMap<String, String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_a_minimal_manifest() {
        let yaml = r#"
apiVersion: conduit.systems/v1
kind: BrokerConfig
metadata:
  name: local-dev
spec:
  storage:
    backend: in_memory
"#;
        let manifest: BrokerConfigManifest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(manifest.kind, "BrokerConfig");
        assert!(matches!(manifest.spec.storage, StorageConfig::InMemory));
        assert_eq!(manifest.spec.registry.source_build_budget, Duration::from_secs(20));
    }

    #[test]
    fn postgres_storage_requires_a_connection_string() {
        let yaml = r#"
apiVersion: conduit.systems/v1
kind: BrokerConfig
metadata:
  name: prod
spec:
  storage:
    backend: postgres
    connection_string: postgres://localhost/conduit
  approval:
    poll_interval: 250ms
"#;
        let manifest: BrokerConfigManifest = serde_yaml::from_str(yaml).unwrap();
        match manifest.spec.storage {
            StorageConfig::Postgres { connection_string } => {
                assert_eq!(connection_string, "postgres://localhost/conduit");
            }
            _ => panic!("expected postgres storage"),
        }
        assert_eq!(manifest.spec.approval.poll_interval, Duration::from_millis(250));
    }
}
