//! Local backend: machines on the calling host.
//!
//! The reference implementation of the provider contract. Provisioning
//! creates the machine record, then runs the full setup orchestrator
//! synchronously before returning, so a successful provision yields a
//! machine already in the `Ready` state. Local machines are not externally
//! discoverable: there is no registry to list from or fetch by id.

use tracing::info;
use uuid::Uuid;

use crate::config::{ConfigError, NimbusConfig};
use crate::connection::{Executor, ProcessExecutor};
use crate::machine::{Arch, ImageState, Machine, MachineImage, MachineState, Os};
use crate::release::{GithubReleases, ReleaseSource};
use crate::setup::SetupOrchestrator;
use crate::telemetry::{TelemetrySink, TracingSink};

use super::{Provider, ProviderConfig, ProviderError, ProviderFuture, ProviderKind, ProvisionSpec};

/// Typed view of the local backend's slice of the opaque configuration
/// bags. Parsed immediately on receipt; the bags never travel deeper.
struct LocalBackendConfig;

impl LocalBackendConfig {
    fn parse(config: &ProviderConfig) -> Result<Self, ProviderError> {
        if config.kind != ProviderKind::Local {
            return Err(ProviderError::Config(format!(
                "local backend dispatched for kind `{}`",
                config.kind
            )));
        }
        if !config.credentials.is_empty() {
            return Err(ProviderError::Config(
                "local backend takes no credentials".to_owned(),
            ));
        }
        Ok(Self)
    }
}

/// Backend that provisions machines on the calling host.
#[derive(Clone, Debug)]
pub struct LocalProvider<E: Executor, R: ReleaseSource, S: TelemetrySink> {
    orchestrator: SetupOrchestrator<E, R, S>,
}

impl LocalProvider<ProcessExecutor, GithubReleases, TracingSink> {
    /// Builds the real local backend from process configuration, with the
    /// configured command and HTTP bounds applied to its orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration fails validation.
    pub fn from_config(config: &NimbusConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(SetupOrchestrator::from_config(config)?))
    }
}

impl<E, R, S> LocalProvider<E, R, S>
where
    E: Executor,
    R: ReleaseSource,
    S: TelemetrySink,
{
    /// Creates a local backend driving the given setup orchestrator.
    #[must_use]
    pub const fn new(orchestrator: SetupOrchestrator<E, R, S>) -> Self {
        Self { orchestrator }
    }

    fn detect_platform(spec: &ProvisionSpec) -> Result<(Os, Arch), ProviderError> {
        let os = spec
            .os
            .or_else(Os::host)
            .ok_or_else(|| ProviderError::Validation("os".to_owned()))?;
        let arch = spec
            .arch
            .or_else(Arch::host)
            .ok_or_else(|| ProviderError::Validation("arch".to_owned()))?;
        Ok((os, arch))
    }

    fn build_machine(
        config: &ProviderConfig,
        spec: &ProvisionSpec,
        os: Os,
        arch: Arch,
    ) -> Result<Machine, ProviderError> {
        let image = spec.image_kind.map(|kind| MachineImage {
            id: spec.image_id.clone(),
            kind,
            state: ImageState::Provisioning,
            installed_at: None,
        });
        let machine = Machine::builder()
            .id(format!("local-{}", Uuid::new_v4().simple()))
            .tenant_id(config.tenant_id.clone())
            .provider_id(config.id.clone())
            .os(os)
            .arch(arch)
            .state(MachineState::Provisioning)
            .ssh_public_key(spec.ssh_public_key.clone())
            .labels(spec.labels.iter().cloned())
            .image(image)
            .metadata("type", serde_json::Value::String("local".to_owned()))
            .build()?;
        Ok(machine)
    }
}

impl<E, R, S> Provider for LocalProvider<E, R, S>
where
    E: Executor,
    R: ReleaseSource,
    S: TelemetrySink,
{
    fn provision<'a>(
        &'a self,
        config: &'a ProviderConfig,
        spec: &'a ProvisionSpec,
    ) -> ProviderFuture<'a, Machine> {
        Box::pin(async move {
            LocalBackendConfig::parse(config)?;
            spec.validate()?;
            let (os, arch) = Self::detect_platform(spec)?;
            let machine = Self::build_machine(config, spec, os, arch)?;
            info!(
                machine_id = %machine.id,
                os = os.as_str(),
                arch = arch.as_str(),
                "provisioning local machine"
            );
            let ready = self
                .orchestrator
                .run(machine, spec.setup_script.as_deref())
                .await?;
            Ok(ready)
        })
    }

    fn terminate<'a>(
        &'a self,
        config: &'a ProviderConfig,
        machine: &'a Machine,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            LocalBackendConfig::parse(config)?;
            info!(machine_id = %machine.id, "terminating local machine (no-op)");
            Ok(())
        })
    }

    fn can_terminate(&self, _machine: &Machine) -> Result<(), ProviderError> {
        // No billing constraint: local machines may always be terminated.
        Ok(())
    }

    fn list_machines<'a>(
        &'a self,
        config: &'a ProviderConfig,
        _tenant_id: &'a str,
    ) -> ProviderFuture<'a, Vec<Machine>> {
        Box::pin(async move {
            LocalBackendConfig::parse(config)?;
            Ok(Vec::new())
        })
    }

    fn get_machine<'a>(
        &'a self,
        config: &'a ProviderConfig,
        machine_id: &'a str,
    ) -> ProviderFuture<'a, Machine> {
        Box::pin(async move {
            LocalBackendConfig::parse(config)?;
            Err(ProviderError::MachineNotFound {
                machine_id: machine_id.to_owned(),
            })
        })
    }
}
