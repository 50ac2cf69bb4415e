// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

//! Turns a `ToolCredentialSpec` plus task context into an HTTP header set
//!. Storage (`CredentialRepository`) and decryption
//! (`ProviderRegistry`) are kept separate.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;

use crate::domain::credential::{AuthType, CredentialScope, ToolCredentialSpec};
use crate::domain::errors::ToolInvocationError;
use crate::domain::ids::{ActorId, WorkspaceId};
use crate::domain::repository::CredentialRepository;
use crate::infrastructure::credential_providers::ProviderRegistry;

#[derive(Clone)]
pub struct CredentialResolver {
    repository: Arc<dyn CredentialRepository>,
    providers: Arc<ProviderRegistry>,
}

impl CredentialResolver {
    pub fn new(repository: Arc<dyn CredentialRepository>, providers: Arc<ProviderRegistry>) -> Self {
        Self { repository, providers }
    }

    /// Resolve one `ToolCredentialSpec` into headers (algorithm).
    /// `overrides` are `overridesJson.headers`, applied last and winning
    /// over anything derived from `authType`.
    pub async fn resolve(
        &self,
        spec: &ToolCredentialSpec,
        workspace_id: WorkspaceId,
        actor_id: Option<&ActorId>,
    ) -> Result<Option<HashMap<String, String>>, ToolInvocationError> {
        let scope_actor = match spec.scope {
            CredentialScope::Workspace => None,
            CredentialScope::Actor => actor_id,
        };

        let credential = self
            .repository
            .resolve_credential(workspace_id, &spec.source_key, spec.scope, scope_actor)
            .await
            .map_err(|e| ToolInvocationError::ToolExecutionError(e.to_string()))?
            .ok_or_else(|| ToolInvocationError::MissingCredential {
                source_key: spec.source_key.clone(),
                mode: scope_str(spec.scope).to_string(),
            })?;

        let payload = self
            .providers
            .decrypt(&credential)
            .await
            .map_err(|e| ToolInvocationError::ToolExecutionError(e.to_string()))?;

        let mut headers = HashMap::new();
        match spec.auth_type {
            AuthType::Bearer => {
                if let Some(token) = payload.get("token") {
                    headers.insert("authorization".to_string(), format!("Bearer {}", token.trim()));
                }
            }
            AuthType::ApiKey => {
                let header_name = spec
                    .header_name
                    .clone()
                    .or_else(|| payload.get("headerName").cloned())
                    .unwrap_or_else(|| "x-api-key".to_string());
                if let Some(value) = payload.get("value").or_else(|| payload.get("token")) {
                    headers.insert(header_name, value.clone());
                }
            }
            AuthType::Basic => {
                if let (Some(user), Some(pass)) = (payload.get("username"), payload.get("password")) {
                    let encoded = BASE64_STANDARD.encode(format!("{user}:{pass}"));
                    headers.insert("authorization".to_string(), format!("Basic {encoded}"));
                }
            }
        }

        if let Some(overrides) = credential
            .overrides_json
            .as_ref()
            .and_then(|v| v.get("headers"))
            .and_then(|v| v.as_object())
        {
            for (k, v) in overrides {
                if let Some(value) = v.as_str() {
                    headers.insert(k.clone(), value.to_string());
                }
            }
        }

        if headers.is_empty() {
            Ok(None)
        } else {
            Ok(Some(headers))
        }
    }
}

fn scope_str(scope: CredentialScope) -> &'static str {
    match scope {
        CredentialScope::Workspace => "workspace",
        CredentialScope::Actor => "actor",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::credential::Credential;
    use crate::domain::ids::CredentialId;
    use crate::infrastructure::credential_providers::EnvironmentProvider;
    use crate::infrastructure::repositories::in_memory::InMemoryCredentialRepository;
    use serde_json::json;

    fn spec(auth_type: AuthType) -> ToolCredentialSpec {
        ToolCredentialSpec {
            source_key: "github".into(),
            scope: CredentialScope::Workspace,
            auth_type,
            header_name: None,
        }
    }

    #[tokio::test]
    async fn bearer_credential_produces_an_authorization_header() {
        let workspace_id = WorkspaceId::new();
        let repo = InMemoryCredentialRepository::new();
        repo.insert(Credential {
            id: CredentialId::new(),
            workspace_id,
            source_key: "github".into(),
            scope: CredentialScope::Workspace,
            actor_id: None,
            provider: "environment".into(),
            secret_json: json!({"token": "abc123"}),
            overrides_json: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        });

        let mut providers = crate::infrastructure::credential_providers::ProviderRegistry::new();
        providers.register("environment", Arc::new(EnvironmentProvider));

        let resolver = CredentialResolver::new(Arc::new(repo), Arc::new(providers));
        let headers = resolver.resolve(&spec(AuthType::Bearer), workspace_id, None).await.unwrap().unwrap();
        assert_eq!(headers.get("authorization"), Some(&"Bearer abc123".to_string()));
    }

    #[tokio::test]
    async fn missing_credential_record_is_a_missing_credential_error() {
        let repo = InMemoryCredentialRepository::new();
        let providers = crate::infrastructure::credential_providers::ProviderRegistry::new();
        let resolver = CredentialResolver::new(Arc::new(repo), Arc::new(providers));
        let err = resolver.resolve(&spec(AuthType::Bearer), WorkspaceId::new(), None).await.unwrap_err();
        assert!(matches!(err, ToolInvocationError::MissingCredential { .. }));
    }
}
