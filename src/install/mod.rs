//! Idempotent installation of versioned external tools onto a machine.
//!
//! Every tool follows the same sequence against a pinned release tag:
//! applicability gate, install directory resolution, idempotency probe,
//! release asset selection, download, format-specific materialisation with
//! unconditional cleanup, and a final chmod plus self-verification. The
//! concrete tools (runner agent, VM manager, image puller) are thin
//! [`ToolSpec`] instances over one engine.

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::config::NimbusConfig;
use crate::connection::{quoted, Connection, ConnectionError, ExecOptions, Executor};
use crate::machine::{Machine, Os};
use crate::release::{select_asset, ReleaseError, ReleaseSource};
use crate::telemetry::{metadata, OperationSpan, TelemetryCategory, TelemetrySink};

pub mod curie;
pub mod geranos;
pub mod runner;

/// Subdirectory of the XDG cache home holding downloaded artifacts.
pub const DOWNLOAD_CACHE_DIR: &str = "downloads";

/// Packaging format a tool ships in, driving materialisation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Packaging {
    /// Gzipped tarball unpacked wholesale into the install directory.
    Tarball {
        /// File inside the install directory whose presence marks the tool
        /// as installed.
        probe: &'static str,
        /// Files to mark executable after extraction.
        executables: &'static [&'static str],
    },
    /// macOS installer package whose payload is expanded into a scratch
    /// directory and searched for the tool binary.
    MacPkg {
        /// Binary name to locate in the payload and place under `bin/`.
        binary: &'static str,
    },
    /// Raw executable downloaded straight into `bin/`.
    Binary {
        /// Binary name under `bin/`.
        binary: &'static str,
    },
}

/// Description of one installable tool at a pinned version.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ToolSpec {
    /// Short tool name used in telemetry and errors.
    pub name: &'static str,
    /// Install directory under the XDG data home.
    pub dir: &'static str,
    /// Upstream repository in `owner/name` form.
    pub repo: String,
    /// Pinned release tag.
    pub version: String,
    /// Operating systems the tool supports.
    pub supported: &'static [Os],
    /// Platform token an asset name must contain, per operating system.
    pub platform_tokens: &'static [(Os, &'static str)],
    /// Packaging format of the release asset.
    pub packaging: Packaging,
    /// Flag passed to the installed binary to verify it runs.
    pub verify_flag: &'static str,
    /// When `true`, an idempotency hit elides only the download: the
    /// binary is re-marked executable and re-verified on every invocation.
    pub reverify_on_hit: bool,
}

impl ToolSpec {
    /// Returns `true` when the tool supports the operating system.
    #[must_use]
    pub fn is_supported(&self, os: Os) -> bool {
        self.supported.contains(&os)
    }

    /// Returns the asset-name token for the operating system, when the
    /// tool supports it.
    #[must_use]
    pub fn platform_token(&self, os: Os) -> Option<&'static str> {
        self.platform_tokens
            .iter()
            .find(|(candidate, _)| *candidate == os)
            .map(|(_, token)| *token)
    }
}

/// The three tools this core installs, built from process configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ToolCatalog {
    /// Runner agent, installed on every platform.
    pub runner: ToolSpec,
    /// VM manager, macOS only.
    pub curie: ToolSpec,
    /// Image puller, macOS only.
    pub geranos: ToolSpec,
}

impl ToolCatalog {
    /// Builds the catalog from the pinned repositories and versions in
    /// configuration.
    #[must_use]
    pub fn from_config(config: &NimbusConfig) -> Self {
        Self {
            runner: runner::spec(&config.runner_repo, &config.runner_version),
            curie: curie::spec(&config.curie_repo, &config.curie_version),
            geranos: geranos::spec(&config.geranos_repo, &config.geranos_version),
        }
    }
}

/// Errors raised while installing a tool.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum InstallError {
    /// Raised when the machine's operating system does not match the
    /// tool's supported platforms. A logic branch, not a failure to alarm
    /// on; no I/O has happened when it is returned.
    #[error("{tool} is not applicable on {os}", os = .os.as_str())]
    NotApplicable {
        /// Tool that was skipped.
        tool: String,
        /// Operating system of the machine.
        os: Os,
    },
    /// Transport-level failure executing commands on the machine.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// Failure resolving or retrieving the release artifact.
    #[error(transparent)]
    Release(#[from] ReleaseError),
    /// Raised when unpacking a downloaded artifact fails. Distinct from
    /// download errors so operators can tell "never arrived" from
    /// "arrived broken".
    #[error("failed to extract {tool} artifact (status {status:?}): {stderr}")]
    Extraction {
        /// Tool being installed.
        tool: String,
        /// Exit status of the extraction command.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// Raised when an installer package payload does not contain the
    /// expected binary.
    #[error("{tool} package payload does not contain {binary}")]
    PayloadMissing {
        /// Tool being installed.
        tool: String,
        /// Binary that was searched for.
        binary: String,
    },
    /// Raised when the installed binary exits non-zero during
    /// self-verification. Distinct from download errors.
    #[error("{tool} failed verification (status {status:?}): {stderr}")]
    Verification {
        /// Tool that failed verification.
        tool: String,
        /// Exit status of the verification command.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
}

struct InstallLayout {
    install_dir: Utf8PathBuf,
    /// Path probed for idempotency; also the verification entry point.
    probe_path: Utf8PathBuf,
    /// Path reported to callers on success.
    install_path: Utf8PathBuf,
}

/// Installs one tool onto a machine, wrapped in a telemetry span carrying
/// the machine id, platform, and outcome.
///
/// # Errors
///
/// Returns [`InstallError::NotApplicable`] when the machine's operating
/// system is unsupported, and otherwise any transport, release,
/// extraction, or verification error from the sequence.
pub async fn install_tool<E, R, S>(
    connection: &Connection<E>,
    releases: &R,
    sink: &S,
    machine: &Machine,
    tool: &ToolSpec,
) -> Result<Utf8PathBuf, InstallError>
where
    E: Executor,
    R: ReleaseSource,
    S: TelemetrySink,
{
    let span_metadata = metadata([
        ("tenant_id", Some(machine.tenant_id.clone())),
        ("machine_id", Some(machine.id.clone())),
        ("os", Some(machine.os.as_str().to_owned())),
        ("arch", Some(machine.arch.as_str().to_owned())),
    ]);
    let span = OperationSpan::start(
        sink,
        TelemetryCategory::Machine,
        format!("install_{}", tool.name),
        span_metadata,
    );
    match run(connection, releases, machine, tool).await {
        Ok(install_path) => {
            span.success([("install_path".to_owned(), install_path.to_string())]);
            Ok(install_path)
        }
        Err(error) => {
            span.failure(&error);
            Err(error)
        }
    }
}

async fn run<E, R>(
    connection: &Connection<E>,
    releases: &R,
    machine: &Machine,
    tool: &ToolSpec,
) -> Result<Utf8PathBuf, InstallError>
where
    E: Executor,
    R: ReleaseSource,
{
    if !tool.is_supported(machine.os) {
        return Err(InstallError::NotApplicable {
            tool: tool.name.to_owned(),
            os: machine.os,
        });
    }

    let layout = resolve_layout(connection, machine, tool).await?;
    let already_installed = connection.file_exists(machine, &layout.probe_path).await?;
    if already_installed {
        debug!(tool = tool.name, path = %layout.probe_path, "already installed");
        if !tool.reverify_on_hit {
            return Ok(layout.install_path);
        }
    } else {
        download_and_materialize(connection, releases, machine, tool, &layout).await?;
    }

    mark_executable(connection, machine, tool, &layout).await?;
    verify(connection, machine, tool, &layout.probe_path).await?;
    Ok(layout.install_path)
}

async fn resolve_layout<E: Executor>(
    connection: &Connection<E>,
    machine: &Machine,
    tool: &ToolSpec,
) -> Result<InstallLayout, InstallError> {
    let install_dir = connection
        .xdg_data_home(machine, Some(Utf8Path::new(tool.dir)))
        .await?;
    connection.mkdir_p(machine, &install_dir).await?;

    let layout = match &tool.packaging {
        Packaging::Tarball { probe, .. } => InstallLayout {
            probe_path: install_dir.join(probe),
            install_path: install_dir.clone(),
            install_dir,
        },
        Packaging::MacPkg { binary } | Packaging::Binary { binary } => {
            let bin_dir = install_dir.join("bin");
            connection.mkdir_p(machine, &bin_dir).await?;
            let target = bin_dir.join(binary);
            InstallLayout {
                probe_path: target.clone(),
                install_path: target,
                install_dir,
            }
        }
    };
    Ok(layout)
}

async fn download_and_materialize<E, R>(
    connection: &Connection<E>,
    releases: &R,
    machine: &Machine,
    tool: &ToolSpec,
    layout: &InstallLayout,
) -> Result<(), InstallError>
where
    E: Executor,
    R: ReleaseSource,
{
    let token = tool
        .platform_token(machine.os)
        .ok_or_else(|| InstallError::NotApplicable {
            tool: tool.name.to_owned(),
            os: machine.os,
        })?;
    let release = releases.fetch_release(&tool.repo, &tool.version).await?;
    let asset = select_asset(&release, tool.name, token, machine.arch)?.clone();

    let cache_dir = connection
        .xdg_cache_home(machine, Some(Utf8Path::new(DOWNLOAD_CACHE_DIR)))
        .await?;
    connection.mkdir_p(machine, &cache_dir).await?;
    let artifact = cache_dir.join(&asset.name);
    releases.download(&asset.browser_download_url, &artifact).await?;
    debug!(tool = tool.name, asset = %asset.name, "artifact downloaded");

    match &tool.packaging {
        Packaging::Tarball { .. } => {
            unpack_tarball(connection, machine, tool, &artifact, &layout.install_dir).await
        }
        Packaging::MacPkg { binary } => {
            install_pkg_payload(
                connection,
                machine,
                tool,
                binary,
                &artifact,
                &cache_dir,
                &layout.install_path,
            )
            .await
        }
        Packaging::Binary { .. } => {
            place_binary(connection, machine, &artifact, &layout.install_path).await
        }
    }
}

/// Unpacks a tarball into the install directory. The downloaded archive is
/// removed afterwards whether or not extraction succeeded.
async fn unpack_tarball<E: Executor>(
    connection: &Connection<E>,
    machine: &Machine,
    tool: &ToolSpec,
    artifact: &Utf8Path,
    install_dir: &Utf8Path,
) -> Result<(), InstallError> {
    let extract = format!("tar -xzf {} -C {}", quoted(artifact), quoted(install_dir));
    let extracted = connection.exec(machine, &extract, ExecOptions::default()).await;
    let removed = remove_paths(connection, machine, &[artifact]).await;
    extracted.map_err(|error| as_extraction_error(tool, error))?;
    removed?;
    Ok(())
}

/// Expands a macOS installer package, copies the tool binary out of its
/// payload, and removes the scratch directory and archive regardless of
/// the outcome.
async fn install_pkg_payload<E: Executor>(
    connection: &Connection<E>,
    machine: &Machine,
    tool: &ToolSpec,
    binary: &str,
    artifact: &Utf8Path,
    cache_dir: &Utf8Path,
    target: &Utf8Path,
) -> Result<(), InstallError> {
    let scratch = cache_dir.join(format!("{}-pkg", tool.name));
    let expanded =
        expand_and_copy(connection, machine, tool, binary, artifact, &scratch, target).await;
    let removed = remove_paths(connection, machine, &[scratch.as_path(), artifact]).await;
    expanded?;
    removed?;
    Ok(())
}

async fn expand_and_copy<E: Executor>(
    connection: &Connection<E>,
    machine: &Machine,
    tool: &ToolSpec,
    binary: &str,
    artifact: &Utf8Path,
    scratch: &Utf8Path,
    target: &Utf8Path,
) -> Result<(), InstallError> {
    let expand = format!(
        "pkgutil --expand-full {} {}",
        quoted(artifact),
        quoted(scratch)
    );
    connection
        .exec(machine, &expand, ExecOptions::default())
        .await
        .map_err(|error| as_extraction_error(tool, error))?;

    let locate = format!(
        "find {} -type f -name {} -print",
        quoted(scratch),
        quoted(Utf8Path::new(binary))
    );
    let listing = connection.exec(machine, &locate, ExecOptions::default()).await?;
    let payload = listing
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| InstallError::PayloadMissing {
            tool: tool.name.to_owned(),
            binary: binary.to_owned(),
        })?;

    let copy = format!("cp {} {}", quoted(Utf8Path::new(payload)), quoted(target));
    connection.exec(machine, &copy, ExecOptions::default()).await?;
    Ok(())
}

/// Moves a raw binary from the download cache into place. The cached copy
/// is removed afterwards whether or not placement succeeded.
async fn place_binary<E: Executor>(
    connection: &Connection<E>,
    machine: &Machine,
    artifact: &Utf8Path,
    target: &Utf8Path,
) -> Result<(), InstallError> {
    let copy = format!("cp {} {}", quoted(artifact), quoted(target));
    let copied = connection.exec(machine, &copy, ExecOptions::default()).await;
    let removed = remove_paths(connection, machine, &[artifact]).await;
    copied?;
    removed?;
    Ok(())
}

/// Removes files or directories on the target. Joined with `;` so every
/// removal is attempted even when an earlier one fails.
async fn remove_paths<E: Executor>(
    connection: &Connection<E>,
    machine: &Machine,
    paths: &[&Utf8Path],
) -> Result<(), InstallError> {
    let command = paths
        .iter()
        .map(|path| format!("rm -rf {}", quoted(path)))
        .collect::<Vec<_>>()
        .join("; ");
    connection.exec(machine, &command, ExecOptions::default()).await?;
    Ok(())
}

async fn mark_executable<E: Executor>(
    connection: &Connection<E>,
    machine: &Machine,
    tool: &ToolSpec,
    layout: &InstallLayout,
) -> Result<(), InstallError> {
    let targets: Vec<Utf8PathBuf> = match &tool.packaging {
        Packaging::Tarball { executables, .. } => executables
            .iter()
            .map(|entry| layout.install_dir.join(entry))
            .collect(),
        Packaging::MacPkg { .. } | Packaging::Binary { .. } => {
            vec![layout.install_path.clone()]
        }
    };
    let rendered = targets
        .iter()
        .map(|path| quoted(path))
        .collect::<Vec<_>>()
        .join(" ");
    let command = format!("chmod +x {rendered}");
    connection.exec(machine, &command, ExecOptions::default()).await?;
    Ok(())
}

async fn verify<E: Executor>(
    connection: &Connection<E>,
    machine: &Machine,
    tool: &ToolSpec,
    entry_point: &Utf8Path,
) -> Result<(), InstallError> {
    let command = format!("{} {}", quoted(entry_point), tool.verify_flag);
    match connection.exec(machine, &command, ExecOptions::default()).await {
        Ok(_) => Ok(()),
        Err(ConnectionError::CommandFailed { status, stderr, .. }) => {
            Err(InstallError::Verification {
                tool: tool.name.to_owned(),
                status,
                stderr,
            })
        }
        Err(other) => Err(other.into()),
    }
}

fn as_extraction_error(tool: &ToolSpec, error: ConnectionError) -> InstallError {
    match error {
        ConnectionError::CommandFailed { status, stderr, .. } => InstallError::Extraction {
            tool: tool.name.to_owned(),
            status,
            stderr,
        },
        other => other.into(),
    }
}
