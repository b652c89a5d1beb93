//! Placeholder backends for cloud providers.
//!
//! Every operation fails with [`ProviderError::BackendUnavailable`]: a
//! deliberate, explicit placeholder rather than a silent no-op, so callers
//! and tests can tell "not yet built" from "failed at runtime".

use crate::machine::Machine;

use super::{Provider, ProviderConfig, ProviderError, ProviderFuture, ProviderKind, ProvisionSpec};

/// Backend stub for a cloud provider that has no driver yet.
#[derive(Clone, Copy, Debug)]
pub struct CloudPlaceholder {
    kind: ProviderKind,
}

impl CloudPlaceholder {
    /// Creates a placeholder for the given backend kind.
    #[must_use]
    pub const fn new(kind: ProviderKind) -> Self {
        Self { kind }
    }

    const fn unavailable(&self) -> ProviderError {
        ProviderError::BackendUnavailable { kind: self.kind }
    }
}

impl Provider for CloudPlaceholder {
    fn provision<'a>(
        &'a self,
        _config: &'a ProviderConfig,
        _spec: &'a ProvisionSpec,
    ) -> ProviderFuture<'a, Machine> {
        Box::pin(async move { Err(self.unavailable()) })
    }

    fn terminate<'a>(
        &'a self,
        _config: &'a ProviderConfig,
        _machine: &'a Machine,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move { Err(self.unavailable()) })
    }

    fn can_terminate(&self, _machine: &Machine) -> Result<(), ProviderError> {
        Err(self.unavailable())
    }

    fn list_machines<'a>(
        &'a self,
        _config: &'a ProviderConfig,
        _tenant_id: &'a str,
    ) -> ProviderFuture<'a, Vec<Machine>> {
        Box::pin(async move { Err(self.unavailable()) })
    }

    fn get_machine<'a>(
        &'a self,
        _config: &'a ProviderConfig,
        _machine_id: &'a str,
    ) -> ProviderFuture<'a, Machine> {
        Box::pin(async move { Err(self.unavailable()) })
    }
}
