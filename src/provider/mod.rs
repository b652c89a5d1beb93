//! Provider capability contract and backend dispatch.
//!
//! Backends are polymorphic variants selected by the configuration's
//! [`ProviderKind`] discriminator. The local backend is a full reference
//! implementation; the cloud backends are explicit placeholders. Dispatch
//! goes through a [`ProviderRegistry`] lookup table; requesting an
//! unregistered discriminator is a fatal configuration error, not a
//! recoverable result.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::machine::{Arch, ImageKind, Machine, MachineError, Os};
use crate::setup::SetupError;

mod cloud;
mod config;
mod local;

pub use cloud::CloudPlaceholder;
pub use config::{ProviderConfig, ProviderKind, ProviderKindError};
pub use local::LocalProvider;

/// Requested shape of a new machine.
///
/// `os` and `arch` are optional: the local backend detects them from the
/// host, while remote backends require them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProvisionSpec {
    /// Operating system to provision, when not host-detected.
    pub os: Option<Os>,
    /// Architecture to provision, when not host-detected.
    pub arch: Option<Arch>,
    /// Scheduling labels applied to the machine.
    pub labels: Vec<String>,
    /// SSH public key to install on the machine.
    pub ssh_public_key: Option<String>,
    /// Identifier of the software image to install, when any.
    pub image_id: Option<String>,
    /// Kind of the software image to install, when any.
    pub image_kind: Option<ImageKind>,
    /// Shell snippet run on the machine after tool installation.
    pub setup_script: Option<String>,
}

impl ProvisionSpec {
    /// Starts a builder for a [`ProvisionSpec`].
    #[must_use]
    pub fn builder() -> ProvisionSpecBuilder {
        ProvisionSpecBuilder::default()
    }

    /// Validates the spec, returning a descriptive error when a provided
    /// field is blank.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Validation`] when a label or the SSH key
    /// is present but empty.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.labels.iter().any(|label| label.trim().is_empty()) {
            return Err(ProviderError::Validation("labels".to_owned()));
        }
        if self
            .ssh_public_key
            .as_deref()
            .is_some_and(|key| key.trim().is_empty())
        {
            return Err(ProviderError::Validation("ssh_public_key".to_owned()));
        }
        Ok(())
    }
}

/// Builder for [`ProvisionSpec`].
#[derive(Clone, Debug, Default)]
pub struct ProvisionSpecBuilder {
    spec: ProvisionSpec,
}

impl ProvisionSpecBuilder {
    /// Sets the operating system.
    #[must_use]
    pub const fn os(mut self, value: Os) -> Self {
        self.spec.os = Some(value);
        self
    }

    /// Sets the architecture.
    #[must_use]
    pub const fn arch(mut self, value: Arch) -> Self {
        self.spec.arch = Some(value);
        self
    }

    /// Sets the scheduling labels.
    #[must_use]
    pub fn labels(mut self, value: impl IntoIterator<Item = String>) -> Self {
        self.spec.labels = value.into_iter().collect();
        self
    }

    /// Sets the SSH public key.
    #[must_use]
    pub fn ssh_public_key(mut self, value: impl Into<String>) -> Self {
        self.spec.ssh_public_key = Some(value.into());
        self
    }

    /// Sets the software image to install.
    #[must_use]
    pub fn image(mut self, id: impl Into<String>, kind: ImageKind) -> Self {
        self.spec.image_id = Some(id.into());
        self.spec.image_kind = Some(kind);
        self
    }

    /// Sets the post-setup shell snippet.
    #[must_use]
    pub fn setup_script(mut self, value: impl Into<String>) -> Self {
        self.spec.setup_script = Some(value.into());
        self
    }

    /// Builds and validates the [`ProvisionSpec`].
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Validation`] when a provided field is
    /// blank.
    pub fn build(self) -> Result<ProvisionSpec, ProviderError> {
        self.spec.validate()?;
        Ok(self.spec)
    }
}

/// Errors raised by provider backends.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// Raised when a request or machine record is missing a required
    /// field.
    #[error("missing or empty field: {0}")]
    Validation(String),
    /// Raised when a backend rejects its configuration slice.
    #[error("provider configuration error: {0}")]
    Config(String),
    /// Raised by placeholder backends that are not yet implemented.
    #[error("provider backend `{kind}` is not available yet")]
    BackendUnavailable {
        /// Backend that was requested.
        kind: ProviderKind,
    },
    /// Raised when a machine cannot be found by the backend's discovery
    /// mechanism.
    #[error("machine {machine_id} not found")]
    MachineNotFound {
        /// Machine id that was looked up.
        machine_id: String,
    },
    /// Raised when a billing constraint forbids termination for now.
    #[error("minimum allocation period not reached: {hours_remaining}h remaining")]
    MinimumAllocationPeriod {
        /// Whole hours until termination becomes permissible.
        hours_remaining: u32,
    },
    /// Raised when machine setup fails after resources were allocated.
    #[error(transparent)]
    Setup(#[from] SetupError),
}

impl From<MachineError> for ProviderError {
    fn from(value: MachineError) -> Self {
        match value {
            MachineError::Validation(field) => Self::Validation(field),
            other => Self::Validation(other.to_string()),
        }
    }
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Capability contract implemented by every backend variant.
pub trait Provider: Send + Sync {
    /// Allocates resources for a new machine and returns it minimally in
    /// the `Provisioning` state. The local backend additionally runs the
    /// full setup orchestrator before returning, collapsing straight to
    /// `Ready`.
    fn provision<'a>(
        &'a self,
        config: &'a ProviderConfig,
        spec: &'a ProvisionSpec,
    ) -> ProviderFuture<'a, Machine>;

    /// Destroys the machine's resources. Callers must consult
    /// [`Provider::can_terminate`] first; backends with billing
    /// constraints enforce it independently as a safety net.
    fn terminate<'a>(
        &'a self,
        config: &'a ProviderConfig,
        machine: &'a Machine,
    ) -> ProviderFuture<'a, ()>;

    /// Checks whether the machine may be terminated now.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::MinimumAllocationPeriod`] carrying the
    /// hours remaining when a billing constraint forbids termination.
    fn can_terminate(&self, machine: &Machine) -> Result<(), ProviderError>;

    /// Lists the machines the backend can discover for a tenant. No local
    /// registry is kept; the backend's own discovery mechanism is the
    /// source of truth.
    fn list_machines<'a>(
        &'a self,
        config: &'a ProviderConfig,
        tenant_id: &'a str,
    ) -> ProviderFuture<'a, Vec<Machine>>;

    /// Fetches one machine by id through the backend's discovery
    /// mechanism.
    fn get_machine<'a>(
        &'a self,
        config: &'a ProviderConfig,
        machine_id: &'a str,
    ) -> ProviderFuture<'a, Machine>;
}

/// Lookup table mapping discriminators to backend implementations.
#[derive(Default)]
pub struct ProviderRegistry {
    backends: BTreeMap<ProviderKind, Box<dyn Provider>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the given local backend plus placeholder
    /// entries for every cloud kind.
    #[must_use]
    pub fn with_local_backend(local: Box<dyn Provider>) -> Self {
        let mut registry = Self::new();
        registry.register(ProviderKind::Local, local);
        for kind in [
            ProviderKind::Aws,
            ProviderKind::Hetzner,
            ProviderKind::Gcp,
            ProviderKind::Azure,
        ] {
            registry.register(kind, Box::new(CloudPlaceholder::new(kind)));
        }
        registry
    }

    /// Registers (or replaces) the backend for a discriminator.
    pub fn register(&mut self, kind: ProviderKind, backend: Box<dyn Provider>) {
        self.backends.insert(kind, backend);
    }

    /// Returns `true` when a backend is registered for the discriminator.
    #[must_use]
    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.backends.contains_key(&kind)
    }

    /// Returns the backend registered for a discriminator.
    ///
    /// # Panics
    ///
    /// Panics when no backend is registered for `kind`: a configuration
    /// referencing an unregistered backend is a deployment mistake that
    /// must fail fast rather than surface as a recoverable result.
    #[must_use]
    pub fn backend(&self, kind: ProviderKind) -> &dyn Provider {
        self.backends
            .get(&kind)
            .unwrap_or_else(|| panic!("no provider backend registered for kind `{kind}`"))
            .as_ref()
    }
}
