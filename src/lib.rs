//! Core library for the Nimbus CI-runner provisioning system.
//!
//! The crate provisions and configures ephemeral compute machines that
//! serve as CI runners. It exposes a provider capability contract with a
//! local reference backend, a connection abstraction that runs the same
//! setup logic over different execution transports, an idempotent
//! versioned-tool installer pattern, and a structured telemetry emission
//! contract. Persistent storage, concrete cloud drivers, and the remote
//! shell transport are external collaborators.

pub mod config;
pub mod connection;
pub mod install;
pub mod machine;
pub mod provider;
pub mod release;
pub mod service;
pub mod setup;
pub mod storage;
pub mod telemetry;
pub mod test_support;

pub use config::{ConfigError, NimbusConfig};
pub use connection::{
    Connection, ConnectionError, ExecOptions, Executor, ProcessExecutor, Transport,
};
pub use install::{InstallError, Packaging, ToolCatalog, ToolSpec, install_tool};
pub use machine::{
    Arch, ImageKind, ImageState, Machine, MachineBuilder, MachineError, MachineImage,
    MachineState, Os,
};
pub use provider::{
    CloudPlaceholder, LocalProvider, Provider, ProviderConfig, ProviderError, ProviderKind,
    ProviderRegistry, ProvisionSpec, ProvisionSpecBuilder,
};
pub use release::{GithubReleases, Release, ReleaseAsset, ReleaseError, ReleaseSource};
pub use service::{MachineService, ServiceError};
pub use setup::{SetupError, SetupOrchestrator};
pub use storage::{ForgeConfig, InMemoryStorage, Storage, StorageError, Tenant};
pub use telemetry::{
    OperationSpan, TelemetryCategory, TelemetryEvent, TelemetrySink, TracingSink,
};
