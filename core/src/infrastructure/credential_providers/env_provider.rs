// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::credential::Credential;
use crate::infrastructure::credential_providers::{CredentialProvider, ProviderError};

/// Treats `secretJson` as an inline `map<string,string>` and passes it
/// straight through — the Phase 1 workaround described by the teacher's
/// `secrets_manager.rs` ("Phase 1 uses environment variables only"), made
/// concrete: values are expected to already be resolved into the task's
/// environment by whatever populated `secretJson`.
pub struct EnvironmentProvider;

#[async_trait]
impl CredentialProvider for EnvironmentProvider {
    async fn decrypt(&self, credential: &Credential) -> Result<HashMap<String, String>, ProviderError> {
        let object = credential
            .secret_json
            .as_object()
            .ok_or_else(|| ProviderError::MalformedPayload("secret_json is not an object".into()))?;

        object
            .iter()
            .map(|(k, v)| {
                let value = v
                    .as_str()
                    .ok_or_else(|| ProviderError::MalformedPayload(format!("field {k} is not a string")))?;
                Ok((k.clone(), value.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn decrypts_a_flat_string_map() {
        let credential = Credential {
            id: crate::domain::ids::CredentialId::new(),
            workspace_id: crate::domain::ids::WorkspaceId::new(),
            source_key: "github".into(),
            scope: crate::domain::credential::CredentialScope::Workspace,
            actor_id: None,
            provider: "environment".into(),
            secret_json: json!({"token": "gh-secret-1"}),
            overrides_json: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        let map = EnvironmentProvider.decrypt(&credential).await.unwrap();
        assert_eq!(map.get("token"), Some(&"gh-secret-1".to_string()));
    }
}
