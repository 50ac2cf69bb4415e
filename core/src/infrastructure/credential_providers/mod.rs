// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

//! Credential decryption providers (step 2, §9 "separate
//! `CredentialStore` from `CredentialProvider` registry"). The core only
//! knows `Decrypt(record) -> map<string,string>`; how a provider turns
//! `secretJson` into that map — inline, or by reaching out to a vault — is
//! the provider's concern.

mod env_provider;
mod vault_provider;

pub use env_provider::EnvironmentProvider;
pub use vault_provider::VaultProvider;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::credential::Credential;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown credential provider: {0}")]
    UnknownProvider(String),

    #[error("provider I/O error: {0}")]
    Io(String),

    #[error("malformed secret payload: {0}")]
    MalformedPayload(String),
}

/// One named decryption backend. Registered by `provider`
/// key, matching `Credential::provider`.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn decrypt(&self, credential: &Credential) -> Result<HashMap<String, String>, ProviderError>;
}

/// Lookup table handed to the Credential Resolver. Mirrors the teacher's
/// `llm::registry` pattern of a name-keyed `Arc<dyn Trait>` map.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn CredentialProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn CredentialProvider>) {
        self.providers.insert(name.into(), provider);
    }

    pub async fn decrypt(&self, credential: &Credential) -> Result<HashMap<String, String>, ProviderError> {
        let provider = self
            .providers
            .get(&credential.provider)
            .ok_or_else(|| ProviderError::UnknownProvider(credential.provider.clone()))?;
        provider.decrypt(credential).await
    }
}
