//! Machine setup orchestration.
//!
//! Sequences directory preparation and the installers applicable to a
//! machine's operating system, producing a machine in the `Ready` state.
//! Steps run strictly in order and short-circuit on the first failure;
//! installer steps are never run concurrently because they share the
//! download cache and install directories.
//!
//! There is no locking on those shared directories: setup is assumed to
//! run once, sequentially, per machine. Concurrent setup of the same
//! machine from two callers is unsupported and would race on directory
//! creation and file writes.

use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::Utc;
use thiserror::Error;
use tracing::info;

use crate::config::{ConfigError, NimbusConfig};
use crate::connection::{Connection, ConnectionError, ExecOptions, Executor, ProcessExecutor};
use crate::install::{install_tool, InstallError, ToolCatalog};
use crate::machine::{ImageState, Machine, MachineState, Os};
use crate::release::{GithubReleases, ReleaseSource};
use crate::telemetry::{TelemetrySink, TracingSink};

/// Provider metadata key recording where the runner agent was installed.
pub const RUNNER_INSTALL_PATH_KEY: &str = "runner_install_path";
/// Provider metadata key recording where the VM manager was installed.
pub const CURIE_INSTALL_PATH_KEY: &str = "curie_install_path";
/// Provider metadata key recording where the image puller was installed.
pub const GERANOS_INSTALL_PATH_KEY: &str = "geranos_install_path";

/// Errors surfaced during setup. Each variant is transparent: the
/// originating error's identity is preserved for callers that
/// pattern-match on it.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SetupError {
    /// A connection-level step (directory preparation, setup script)
    /// failed.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// A tool installer failed.
    #[error(transparent)]
    Install(#[from] InstallError),
}

/// Sequences directory preparation and tool installation for one machine.
#[derive(Clone, Debug)]
pub struct SetupOrchestrator<E: Executor, R: ReleaseSource, S: TelemetrySink> {
    connection: Connection<E>,
    releases: R,
    sink: S,
    tools: ToolCatalog,
}

impl SetupOrchestrator<ProcessExecutor, GithubReleases, TracingSink> {
    /// Builds the real orchestrator stack from process configuration:
    /// local process execution bounded by `command_timeout_secs`, the
    /// GitHub release source bounded by `http_timeout_secs`, and
    /// tracing-backed telemetry.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration fails validation.
    pub fn from_config(config: &NimbusConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let connection = Connection::with_process_executor()
            .with_command_timeout(Duration::from_secs(config.command_timeout_secs));
        let releases =
            GithubReleases::new().with_timeout(Duration::from_secs(config.http_timeout_secs));
        Ok(Self::new(
            connection,
            releases,
            TracingSink,
            ToolCatalog::from_config(config),
        ))
    }
}

impl<E, R, S> SetupOrchestrator<E, R, S>
where
    E: Executor,
    R: ReleaseSource,
    S: TelemetrySink,
{
    /// Creates an orchestrator over the given connection, release source,
    /// telemetry sink, and tool catalog.
    #[must_use]
    pub const fn new(connection: Connection<E>, releases: R, sink: S, tools: ToolCatalog) -> Self {
        Self {
            connection,
            releases,
            sink,
            tools,
        }
    }

    /// Returns the connection the orchestrator drives.
    #[must_use]
    pub const fn connection(&self) -> &Connection<E> {
        &self.connection
    }

    /// Returns the release source the orchestrator downloads from.
    #[must_use]
    pub const fn releases(&self) -> &R {
        &self.releases
    }

    /// Runs the full setup sequence and returns the machine advanced to
    /// `Ready`.
    ///
    /// The sequence is fixed: XDG home preparation, the runner agent, then
    /// on macOS the VM manager followed by the image puller, then the
    /// optional setup script. The image-puller ordering after the VM
    /// manager is not a dependency; it keeps telemetry ordering
    /// deterministic.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's [`SetupError`] unmodified; later
    /// steps are not attempted.
    pub async fn run(
        &self,
        mut machine: Machine,
        setup_script: Option<&str>,
    ) -> Result<Machine, SetupError> {
        self.prepare_directories(&machine).await?;

        let runner_path =
            install_tool(&self.connection, &self.releases, &self.sink, &machine, &self.tools.runner)
                .await?;
        record_install_path(&mut machine, RUNNER_INSTALL_PATH_KEY, &runner_path);

        if machine.os == Os::MacOs {
            machine = machine.with_state(MachineState::ImageInstalling);
            let curie_path = install_tool(
                &self.connection,
                &self.releases,
                &self.sink,
                &machine,
                &self.tools.curie,
            )
            .await?;
            record_install_path(&mut machine, CURIE_INSTALL_PATH_KEY, &curie_path);

            let geranos_path = install_tool(
                &self.connection,
                &self.releases,
                &self.sink,
                &machine,
                &self.tools.geranos,
            )
            .await?;
            record_install_path(&mut machine, GERANOS_INSTALL_PATH_KEY, &geranos_path);
        }

        if let Some(script) = setup_script {
            self.connection
                .exec(&machine, script, ExecOptions::default())
                .await?;
        }

        if let Some(image) = machine.image.as_mut() {
            image.state = ImageState::Ready;
            image.installed_at = Some(Utc::now());
        }

        info!(machine_id = %machine.id, os = machine.os.as_str(), "machine setup complete");
        Ok(machine.with_state(MachineState::Ready))
    }

    /// Resolves and creates the three XDG homes on the target.
    async fn prepare_directories(&self, machine: &Machine) -> Result<(), SetupError> {
        let data = self.connection.xdg_data_home(machine, None).await?;
        self.connection.mkdir_p(machine, &data).await?;
        let cache = self.connection.xdg_cache_home(machine, None).await?;
        self.connection.mkdir_p(machine, &cache).await?;
        let state = self.connection.xdg_state_home(machine, None).await?;
        self.connection.mkdir_p(machine, &state).await?;
        Ok(())
    }
}

fn record_install_path(machine: &mut Machine, key: &str, path: &Utf8PathBuf) {
    machine
        .provider_metadata
        .insert(key.to_owned(), serde_json::Value::String(path.to_string()));
}
