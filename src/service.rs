//! Ownership-checked entry points over storage and provider backends.
//!
//! Every operation takes the caller's tenant and verifies ownership before
//! any provider dispatch happens. Dependencies are explicit: the service
//! owns the storage implementation, the provider registry, and the
//! telemetry sink it was constructed with; there are no process-wide
//! lookups.
//!
//! A bare machine id carries no pointer back to its owning provider
//! configuration, so every query takes the provider id explicitly rather
//! than inferring it.

use thiserror::Error;

use crate::machine::Machine;
use crate::provider::{ProviderConfig, ProviderError, ProviderRegistry, ProvisionSpec};
use crate::storage::{Storage, StorageError};
use crate::telemetry::{metadata, span, TelemetryCategory, TelemetrySink};

/// Errors raised by the machine service.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ServiceError {
    /// Raised when a lookup in the storage contract fails.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Raised when a provider configuration belongs to a different tenant.
    /// Checked before any provider dispatch.
    #[error("provider {provider_id} is not owned by tenant {tenant_id}")]
    ProviderNotOwned {
        /// Tenant that made the request.
        tenant_id: String,
        /// Provider configuration that was requested.
        provider_id: String,
    },
    /// Raised when a machine belongs to a different tenant. Checked before
    /// any provider dispatch.
    #[error("machine {machine_id} is not owned by tenant {tenant_id}")]
    MachineNotOwned {
        /// Tenant that made the request.
        tenant_id: String,
        /// Machine that was requested.
        machine_id: String,
    },
    /// Raised by the dispatched provider backend.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Entry points tying storage, the provider registry, and telemetry
/// together.
pub struct MachineService<S: Storage, T: TelemetrySink> {
    storage: S,
    registry: ProviderRegistry,
    sink: T,
}

impl<S, T> MachineService<S, T>
where
    S: Storage,
    T: TelemetrySink,
{
    /// Creates a service over explicit dependencies.
    #[must_use]
    pub const fn new(storage: S, registry: ProviderRegistry, sink: T) -> Self {
        Self {
            storage,
            registry,
            sink,
        }
    }

    /// Provisions a machine under the tenant's provider configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::ProviderNotOwned`] before any provider call
    /// when the configuration belongs to another tenant, and otherwise any
    /// storage or provider error.
    pub async fn provision(
        &self,
        tenant_id: &str,
        provider_id: &str,
        spec: &ProvisionSpec,
    ) -> Result<Machine, ServiceError> {
        let config = self.owned_provider(tenant_id, provider_id).await?;
        let backend = self.registry.backend(config.kind);
        let machine = span(
            &self.sink,
            TelemetryCategory::Provider,
            "machine_provision",
            metadata([
                ("tenant_id", Some(tenant_id.to_owned())),
                ("provider_type", Some(config.kind.as_str().to_owned())),
            ]),
            backend.provision(&config, spec),
        )
        .await?;
        Ok(machine)
    }

    /// Terminates a machine, gated on the backend's termination check.
    ///
    /// # Errors
    ///
    /// Returns ownership errors before any provider call, the
    /// [`ProviderError::MinimumAllocationPeriod`] gate verdict without
    /// invoking `terminate`, and otherwise any storage or provider error.
    pub async fn terminate(&self, tenant_id: &str, machine: &Machine) -> Result<(), ServiceError> {
        self.check_machine_ownership(tenant_id, machine)?;
        let config = self.owned_provider(tenant_id, &machine.provider_id).await?;
        let backend = self.registry.backend(config.kind);
        backend.can_terminate(machine)?;
        span(
            &self.sink,
            TelemetryCategory::Provider,
            "machine_terminate",
            metadata([
                ("tenant_id", Some(tenant_id.to_owned())),
                ("machine_id", Some(machine.id.clone())),
                ("provider_type", Some(config.kind.as_str().to_owned())),
            ]),
            backend.terminate(&config, machine),
        )
        .await?;
        Ok(())
    }

    /// Fetches one machine through the backend's discovery mechanism.
    ///
    /// # Errors
    ///
    /// Returns ownership errors (including when the discovered machine
    /// belongs to another tenant) and any storage or provider error.
    pub async fn get_machine(
        &self,
        tenant_id: &str,
        provider_id: &str,
        machine_id: &str,
    ) -> Result<Machine, ServiceError> {
        let config = self.owned_provider(tenant_id, provider_id).await?;
        let backend = self.registry.backend(config.kind);
        let machine = backend.get_machine(&config, machine_id).await?;
        self.check_machine_ownership(tenant_id, &machine)?;
        Ok(machine)
    }

    /// Lists the machines the backend can discover for the tenant.
    ///
    /// # Errors
    ///
    /// Returns ownership errors and any storage or provider error.
    pub async fn list_machines(
        &self,
        tenant_id: &str,
        provider_id: &str,
    ) -> Result<Vec<Machine>, ServiceError> {
        let config = self.owned_provider(tenant_id, provider_id).await?;
        let backend = self.registry.backend(config.kind);
        let machines = backend.list_machines(&config, tenant_id).await?;
        Ok(machines)
    }

    async fn owned_provider(
        &self,
        tenant_id: &str,
        provider_id: &str,
    ) -> Result<ProviderConfig, ServiceError> {
        let config = self.storage.get_provider(provider_id).await?;
        if config.tenant_id != tenant_id {
            return Err(ServiceError::ProviderNotOwned {
                tenant_id: tenant_id.to_owned(),
                provider_id: provider_id.to_owned(),
            });
        }
        Ok(config)
    }

    fn check_machine_ownership(
        &self,
        tenant_id: &str,
        machine: &Machine,
    ) -> Result<(), ServiceError> {
        if machine.tenant_id != tenant_id {
            return Err(ServiceError::MachineNotOwned {
                tenant_id: tenant_id.to_owned(),
                machine_id: machine.id.clone(),
            });
        }
        Ok(())
    }
}
