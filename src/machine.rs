//! Machine entity: the unit of compute under management.
//!
//! A [`Machine`] describes one CI runner instance and its lifecycle state.
//! The type is a pure value: constructing, inspecting, and advancing it
//! performs no I/O. A machine is exclusively owned by the provider backend
//! that created it; the setup orchestrator borrows it by value and returns
//! an updated copy.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operating system a machine runs.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Os {
    /// Apple macOS hosts.
    MacOs,
    /// Linux hosts.
    Linux,
}

impl Os {
    /// Returns the canonical lowercase name for the operating system.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MacOs => "macos",
            Self::Linux => "linux",
        }
    }

    /// Detects the operating system of the calling host.
    ///
    /// Hosts that are neither macOS nor Linux report `None`; the local
    /// backend treats that as a validation failure rather than guessing.
    #[must_use]
    pub const fn host() -> Option<Self> {
        if cfg!(target_os = "macos") {
            Some(Self::MacOs)
        } else if cfg!(target_os = "linux") {
            Some(Self::Linux)
        } else {
            None
        }
    }
}

impl FromStr for Os {
    type Err = MachineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "macos" => Ok(Self::MacOs),
            "linux" => Ok(Self::Linux),
            other => Err(MachineError::UnknownOs(other.to_owned())),
        }
    }
}

/// CPU architecture of a machine.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    /// 64-bit ARM.
    Arm64,
    /// 64-bit x86.
    X86_64,
}

impl Arch {
    /// Returns the canonical lowercase name for the architecture.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Arm64 => "arm64",
            Self::X86_64 => "x86_64",
        }
    }

    /// Detects the architecture of the calling host.
    #[must_use]
    pub const fn host() -> Option<Self> {
        if cfg!(target_arch = "aarch64") {
            Some(Self::Arm64)
        } else if cfg!(target_arch = "x86_64") {
            Some(Self::X86_64)
        } else {
            None
        }
    }
}

impl FromStr for Arch {
    type Err = MachineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "arm64" | "aarch64" => Ok(Self::Arm64),
            "x86_64" | "amd64" => Ok(Self::X86_64),
            other => Err(MachineError::UnknownArch(other.to_owned())),
        }
    }
}

/// Lifecycle state of a machine. Progression is linear; `ImageInstalling`
/// is only entered when a machine requires an image/tool install phase.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    /// Resources are being allocated by the provider backend.
    Provisioning,
    /// Software images and tools are being installed.
    ImageInstalling,
    /// Setup finished; the machine can accept work.
    Ready,
    /// The machine is executing a job.
    Running,
    /// Teardown has been requested; the machine is no longer reusable.
    Stopping,
    /// The machine is gone.
    Terminated,
}

/// Kind of software image tracked on a machine.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    /// Cloud machine image (for example an AWS AMI).
    Ami,
    /// Container image.
    Docker,
    /// No image payload.
    None,
}

/// Readiness of a machine's software image.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageState {
    /// The image is still being installed.
    Provisioning,
    /// The image is installed and usable.
    Ready,
}

/// Software-image record tracked independently of the machine state.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MachineImage {
    /// Provider or registry identifier of the image, when known.
    pub id: Option<String>,
    /// Kind of image payload.
    pub kind: ImageKind,
    /// Readiness of the image.
    pub state: ImageState,
    /// When installation completed, if it has.
    pub installed_at: Option<DateTime<Utc>>,
}

/// One provisioned runner instance.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Machine {
    /// Opaque unique identifier.
    pub id: String,
    /// Tenant that owns the machine.
    pub tenant_id: String,
    /// Provider configuration that created the machine.
    pub provider_id: String,
    /// Operating system, immutable once provisioned.
    pub os: Os,
    /// CPU architecture, immutable once provisioned.
    pub arch: Arch,
    /// Current lifecycle state.
    pub state: MachineState,
    /// Public address, populated once known.
    pub ip_address: Option<IpAddr>,
    /// SSH public key installed on the machine, populated once known.
    pub ssh_public_key: Option<String>,
    /// Free-form tags used for scheduling and matching.
    pub labels: Vec<String>,
    /// Software-image record, when the machine carries one.
    pub image: Option<MachineImage>,
    /// Set once at provisioning; never mutated.
    pub created_at: DateTime<Utc>,
    /// Backend-specific handles. This is the only place provider-specific
    /// state lives; it is never interpreted generically.
    pub provider_metadata: BTreeMap<String, serde_json::Value>,
}

impl Machine {
    /// Starts a builder for a [`Machine`].
    #[must_use]
    pub fn builder() -> MachineBuilder {
        MachineBuilder::new()
    }

    /// Returns `true` when the machine has completed setup, including while
    /// it is running a job.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self.state, MachineState::Ready | MachineState::Running)
    }

    /// Returns `true` only while the machine is executing a job.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self.state, MachineState::Running)
    }

    /// Returns `true` once the machine is bound for or has reached
    /// termination. Both `Stopping` and `Terminated` are non-reusable.
    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        matches!(self.state, MachineState::Stopping | MachineState::Terminated)
    }

    /// Returns an updated copy with the lifecycle state advanced.
    ///
    /// Only the provider backend that created the machine (and the setup
    /// orchestrator acting on its behalf) may call this.
    #[must_use]
    pub fn with_state(mut self, state: MachineState) -> Self {
        self.state = state;
        self
    }

    /// Looks up a string value in the provider metadata bag.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.provider_metadata.get(key).and_then(|value| value.as_str())
    }
}

/// Builder for [`Machine`] that defers trimming and validation to
/// construction. Optional fields default to empty/absent.
#[derive(Clone, Debug, Default)]
pub struct MachineBuilder {
    id: String,
    tenant_id: String,
    provider_id: String,
    os: Option<Os>,
    arch: Option<Arch>,
    state: Option<MachineState>,
    ip_address: Option<IpAddr>,
    ssh_public_key: Option<String>,
    labels: Vec<String>,
    image: Option<MachineImage>,
    created_at: Option<DateTime<Utc>>,
    provider_metadata: BTreeMap<String, serde_json::Value>,
}

impl MachineBuilder {
    /// Creates an empty builder; identity fields must be populated before
    /// build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the machine identifier.
    #[must_use]
    pub fn id(mut self, value: impl Into<String>) -> Self {
        self.id = value.into();
        self
    }

    /// Sets the owning tenant.
    #[must_use]
    pub fn tenant_id(mut self, value: impl Into<String>) -> Self {
        self.tenant_id = value.into();
        self
    }

    /// Sets the owning provider configuration.
    #[must_use]
    pub fn provider_id(mut self, value: impl Into<String>) -> Self {
        self.provider_id = value.into();
        self
    }

    /// Sets the operating system.
    #[must_use]
    pub const fn os(mut self, value: Os) -> Self {
        self.os = Some(value);
        self
    }

    /// Sets the architecture.
    #[must_use]
    pub const fn arch(mut self, value: Arch) -> Self {
        self.arch = Some(value);
        self
    }

    /// Sets the initial lifecycle state.
    #[must_use]
    pub const fn state(mut self, value: MachineState) -> Self {
        self.state = Some(value);
        self
    }

    /// Sets the public address.
    #[must_use]
    pub const fn ip_address(mut self, value: Option<IpAddr>) -> Self {
        self.ip_address = value;
        self
    }

    /// Sets the SSH public key.
    #[must_use]
    pub fn ssh_public_key(mut self, value: Option<String>) -> Self {
        self.ssh_public_key = value;
        self
    }

    /// Sets the scheduling labels.
    #[must_use]
    pub fn labels(mut self, value: impl IntoIterator<Item = String>) -> Self {
        self.labels = value.into_iter().collect();
        self
    }

    /// Sets the software-image record.
    #[must_use]
    pub fn image(mut self, value: Option<MachineImage>) -> Self {
        self.image = value;
        self
    }

    /// Sets the creation timestamp. Defaults to now.
    #[must_use]
    pub const fn created_at(mut self, value: DateTime<Utc>) -> Self {
        self.created_at = Some(value);
        self
    }

    /// Inserts one provider metadata entry.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.provider_metadata.insert(key.into(), value);
        self
    }

    /// Builds and validates the [`Machine`], trimming string identity
    /// fields.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::Validation`] when any required identity
    /// field (id, tenant, provider, os, arch, state) is missing or empty.
    pub fn build(self) -> Result<Machine, MachineError> {
        let id = self.id.trim().to_owned();
        if id.is_empty() {
            return Err(MachineError::Validation("id".to_owned()));
        }
        let tenant_id = self.tenant_id.trim().to_owned();
        if tenant_id.is_empty() {
            return Err(MachineError::Validation("tenant_id".to_owned()));
        }
        let provider_id = self.provider_id.trim().to_owned();
        if provider_id.is_empty() {
            return Err(MachineError::Validation("provider_id".to_owned()));
        }
        let os = self.os.ok_or_else(|| MachineError::Validation("os".to_owned()))?;
        let arch = self
            .arch
            .ok_or_else(|| MachineError::Validation("arch".to_owned()))?;
        let state = self
            .state
            .ok_or_else(|| MachineError::Validation("state".to_owned()))?;

        Ok(Machine {
            id,
            tenant_id,
            provider_id,
            os,
            arch,
            state,
            ip_address: self.ip_address,
            ssh_public_key: self.ssh_public_key,
            labels: self.labels,
            image: self.image,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            provider_metadata: self.provider_metadata,
        })
    }
}

/// Errors raised while constructing or parsing machine values.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MachineError {
    /// Raised when a required identity field is missing or empty.
    #[error("missing or empty field: {0}")]
    Validation(String),
    /// Raised when an operating system name is not recognised.
    #[error("unknown operating system: {0}")]
    UnknownOs(String),
    /// Raised when an architecture name is not recognised.
    #[error("unknown architecture: {0}")]
    UnknownArch(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn machine_in(state: MachineState) -> Machine {
        Machine::builder()
            .id("m-1")
            .tenant_id("t-1")
            .provider_id("p-1")
            .os(Os::Linux)
            .arch(Arch::X86_64)
            .state(state)
            .build()
            .expect("identity fields are populated")
    }

    #[rstest]
    #[case(MachineState::Provisioning, false, false, false)]
    #[case(MachineState::ImageInstalling, false, false, false)]
    #[case(MachineState::Ready, true, false, false)]
    #[case(MachineState::Running, true, true, false)]
    #[case(MachineState::Stopping, false, false, true)]
    #[case(MachineState::Terminated, false, false, true)]
    fn predicates_are_total_functions_of_state(
        #[case] state: MachineState,
        #[case] ready: bool,
        #[case] running: bool,
        #[case] terminated: bool,
    ) {
        let machine = machine_in(state);
        assert_eq!(machine.is_ready(), ready, "ready? for {state:?}");
        assert_eq!(machine.is_running(), running, "running? for {state:?}");
        assert_eq!(machine.is_terminated(), terminated, "terminated? for {state:?}");
    }

    #[rstest]
    fn running_implies_ready_and_excludes_terminated() {
        let machine = machine_in(MachineState::Running);
        assert!(machine.is_ready());
        assert!(!machine.is_terminated());
    }

    #[rstest]
    #[case("", "t", "p", "id")]
    #[case("m", "  ", "p", "tenant_id")]
    #[case("m", "t", "", "provider_id")]
    fn builder_rejects_blank_identity_fields(
        #[case] id: &str,
        #[case] tenant: &str,
        #[case] provider: &str,
        #[case] field: &str,
    ) {
        let error = Machine::builder()
            .id(id)
            .tenant_id(tenant)
            .provider_id(provider)
            .os(Os::Linux)
            .arch(Arch::Arm64)
            .state(MachineState::Provisioning)
            .build()
            .expect_err("blank identity field should fail validation");
        assert_eq!(error, MachineError::Validation(field.to_owned()));
    }

    #[rstest]
    fn builder_rejects_missing_platform() {
        let error = Machine::builder()
            .id("m")
            .tenant_id("t")
            .provider_id("p")
            .state(MachineState::Provisioning)
            .build()
            .expect_err("missing os should fail validation");
        assert_eq!(error, MachineError::Validation("os".to_owned()));
    }

    #[rstest]
    fn builder_fills_optional_fields_with_absent_defaults() {
        let machine = machine_in(MachineState::Provisioning);
        assert!(machine.ip_address.is_none());
        assert!(machine.ssh_public_key.is_none());
        assert!(machine.labels.is_empty());
        assert!(machine.image.is_none());
        assert!(machine.provider_metadata.is_empty());
    }

    #[rstest]
    #[case("macos", Os::MacOs)]
    #[case("linux", Os::Linux)]
    fn os_round_trips_through_strings(#[case] text: &str, #[case] os: Os) {
        assert_eq!(text.parse::<Os>().expect("known os"), os);
        assert_eq!(os.as_str(), text);
    }

    #[rstest]
    #[case("arm64", Arch::Arm64)]
    #[case("amd64", Arch::X86_64)]
    #[case("x86_64", Arch::X86_64)]
    fn arch_accepts_common_aliases(#[case] text: &str, #[case] arch: Arch) {
        assert_eq!(text.parse::<Arch>().expect("known arch"), arch);
    }

    #[rstest]
    fn metadata_str_reads_only_string_values() {
        let machine = Machine::builder()
            .id("m")
            .tenant_id("t")
            .provider_id("p")
            .os(Os::MacOs)
            .arch(Arch::Arm64)
            .state(MachineState::Provisioning)
            .metadata("type", serde_json::json!("local"))
            .metadata("port", serde_json::json!(22))
            .build()
            .expect("identity fields are populated");
        assert_eq!(machine.metadata_str("type"), Some("local"));
        assert_eq!(machine.metadata_str("port"), None);
        assert_eq!(machine.metadata_str("absent"), None);
    }
}
