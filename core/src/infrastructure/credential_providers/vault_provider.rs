// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

use std::collections::HashMap;

use async_trait::async_trait;
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::kv2;

use crate::domain::credential::Credential;
use crate::infrastructure::credential_providers::{CredentialProvider, ProviderError};

/// Reads credentials from a HashiCorp Vault / OpenBao KV v2 mount, the
/// production path the teacher's `secrets_manager.rs` deferred (ADR-034).
/// `secretJson` carries only the coordinates (`path`); the actual secret
/// material is fetched live, never persisted in the core's storage.
pub struct VaultProvider {
    client: VaultClient,
    mount: String,
}

impl VaultProvider {
    pub fn new(address: &str, token: &str, mount: impl Into<String>) -> Result<Self, ProviderError> {
        let settings = VaultClientSettingsBuilder::default()
            .address(address)
            .token(token)
            .build()
            .map_err(|e| ProviderError::Io(e.to_string()))?;
        let client = VaultClient::new(settings).map_err(|e| ProviderError::Io(e.to_string()))?;
        Ok(Self { client, mount: mount.into() })
    }
}

#[async_trait]
impl CredentialProvider for VaultProvider {
    async fn decrypt(&self, credential: &Credential) -> Result<HashMap<String, String>, ProviderError> {
        let path = credential
            .secret_json
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::MalformedPayload("secret_json.path is required for the vault provider".into()))?;

        let secret: HashMap<String, String> = kv2::read(&self.client, &self.mount, path)
            .await
            .map_err(|e| ProviderError::Io(e.to_string()))?;
        Ok(secret)
    }
}
