//! Storage contract implemented by an integrating application.
//!
//! This core never persists tenants, provider configurations, or forge
//! credentials itself. Callers supply an implementation of [`Storage`];
//! the bundled [`InMemoryStorage`] exists for composition roots and tests
//! only.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use crate::provider::ProviderConfig;

/// Ownership boundary under which machines, providers, and forge
/// configuration are scoped.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tenant {
    /// Opaque unique identifier.
    pub id: String,
    /// Human readable name.
    pub name: String,
}

/// Git-forge configuration for a tenant. Opaque to this core; consumed by
/// the (out of scope) runner registration flow.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ForgeConfig {
    /// Forge family, for example `github`.
    pub forge: String,
    /// Base URL of the forge.
    pub url: String,
    /// Credential used to register runners.
    pub token: String,
}

/// Errors raised by storage lookups.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StorageError {
    /// Raised when no tenant exists with the given id.
    #[error("tenant {tenant_id} not found")]
    TenantNotFound {
        /// Tenant id that was looked up.
        tenant_id: String,
    },
    /// Raised when no provider configuration exists with the given id.
    #[error("provider configuration {provider_id} not found")]
    ProviderNotFound {
        /// Provider configuration id that was looked up.
        provider_id: String,
    },
    /// Raised when a tenant has no forge configuration.
    #[error("no forge configuration for tenant {tenant_id}")]
    ForgeConfigNotFound {
        /// Tenant id that was looked up.
        tenant_id: String,
    },
}

/// Future returned by storage operations.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Lookup interface supplied by the integrating application.
pub trait Storage: Send + Sync {
    /// Fetches a tenant by id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TenantNotFound`] when the id is unknown.
    fn get_tenant<'a>(&'a self, tenant_id: &'a str) -> StorageFuture<'a, Tenant>;

    /// Lists the provider configurations owned by a tenant.
    ///
    /// # Errors
    ///
    /// Implementations may fail for backend-specific reasons; an unknown
    /// tenant yields an empty list rather than an error.
    fn list_tenant_providers<'a>(
        &'a self,
        tenant_id: &'a str,
    ) -> StorageFuture<'a, Vec<ProviderConfig>>;

    /// Fetches a provider configuration by id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ProviderNotFound`] when the id is unknown.
    fn get_provider<'a>(&'a self, provider_id: &'a str) -> StorageFuture<'a, ProviderConfig>;

    /// Fetches the forge configuration for a tenant.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ForgeConfigNotFound`] when the tenant has
    /// none.
    fn get_tenant_forge_config<'a>(&'a self, tenant_id: &'a str)
    -> StorageFuture<'a, ForgeConfig>;
}

/// Map-backed storage for composition roots and tests.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    tenants: Mutex<BTreeMap<String, Tenant>>,
    providers: Mutex<BTreeMap<String, ProviderConfig>>,
    forge_configs: Mutex<BTreeMap<String, ForgeConfig>>,
}

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a tenant.
    pub fn insert_tenant(&self, tenant: Tenant) {
        locked(&self.tenants).insert(tenant.id.clone(), tenant);
    }

    /// Inserts a provider configuration.
    pub fn insert_provider(&self, config: ProviderConfig) {
        locked(&self.providers).insert(config.id.clone(), config);
    }

    /// Inserts a forge configuration for a tenant.
    pub fn insert_forge_config(&self, tenant_id: impl Into<String>, config: ForgeConfig) {
        locked(&self.forge_configs).insert(tenant_id.into(), config);
    }
}

impl Storage for InMemoryStorage {
    fn get_tenant<'a>(&'a self, tenant_id: &'a str) -> StorageFuture<'a, Tenant> {
        let found = locked(&self.tenants).get(tenant_id).cloned();
        Box::pin(async move {
            found.ok_or_else(|| StorageError::TenantNotFound {
                tenant_id: tenant_id.to_owned(),
            })
        })
    }

    fn list_tenant_providers<'a>(
        &'a self,
        tenant_id: &'a str,
    ) -> StorageFuture<'a, Vec<ProviderConfig>> {
        let matching = locked(&self.providers)
            .values()
            .filter(|config| config.tenant_id == tenant_id)
            .cloned()
            .collect();
        Box::pin(async move { Ok(matching) })
    }

    fn get_provider<'a>(&'a self, provider_id: &'a str) -> StorageFuture<'a, ProviderConfig> {
        let found = locked(&self.providers).get(provider_id).cloned();
        Box::pin(async move {
            found.ok_or_else(|| StorageError::ProviderNotFound {
                provider_id: provider_id.to_owned(),
            })
        })
    }

    fn get_tenant_forge_config<'a>(
        &'a self,
        tenant_id: &'a str,
    ) -> StorageFuture<'a, ForgeConfig> {
        let found = locked(&self.forge_configs).get(tenant_id).cloned();
        Box::pin(async move {
            found.ok_or_else(|| StorageError::ForgeConfigNotFound {
                tenant_id: tenant_id.to_owned(),
            })
        })
    }
}
