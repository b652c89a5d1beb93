//! Uniform command execution and path resolution over a machine.
//!
//! A [`Connection`] presents one execution interface regardless of how the
//! target machine is reached. Dispatch inspects the machine's provider
//! metadata: the local backend executes child processes on this host, while
//! remote backends route to a remote-shell transport that is reserved but
//! not yet implemented. Path arguments are shell-escaped before they are
//! interpolated into any command, on every transport.

use std::borrow::Cow;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;
use thiserror::Error;

use crate::machine::Machine;

mod types;

pub use types::{CommandOutput, ExecFuture, Executor, ProcessExecutor};

/// Namespace appended to every XDG base directory resolved on a target.
pub const XDG_NAMESPACE: &str = "nimbus";

/// Default bound applied to command execution when the caller does not
/// override it.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

const METADATA_TYPE_KEY: &str = "type";
const LOCAL_BACKEND_TYPE: &str = "local";
const TRANSPORT_KEY: &str = "transport";
const REMOTE_BACKEND_TYPES: &[&str] = &["aws", "hetzner", "gcp", "azure"];

const FILE_PRESENT: &str = "nimbus-file-present";
const FILE_ABSENT: &str = "nimbus-file-absent";

/// Transport selected for a machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Transport {
    /// Child processes on the calling host.
    LocalProcess,
    /// Remote shell. Reserved; executing over it fails with
    /// [`ConnectionError::RemoteTransportUnimplemented`].
    RemoteShell,
}

/// Per-call execution options.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ExecOptions {
    /// Overrides the connection's default command timeout.
    pub timeout: Option<Duration>,
}

/// Errors raised by the connection layer. No retries happen here; retry
/// policy, if any, belongs to the caller.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConnectionError {
    /// Raised when the shell process cannot be started.
    #[error("failed to spawn shell: {message}")]
    Spawn {
        /// Operating system error message.
        message: String,
    },
    /// Raised when a command exceeds its execution bound.
    #[error("command timed out after {seconds}s")]
    Timeout {
        /// The bound that elapsed, in seconds.
        seconds: u64,
    },
    /// Raised when a command exits with a non-zero status.
    #[error("command `{command}` exited with status {status:?}: {stderr}")]
    CommandFailed {
        /// The command that was executed.
        command: String,
        /// Exit status, when the shell reported one.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// Raised when a machine routes to the remote-shell transport, which is
    /// reserved but not built. Distinct from runtime failures so call sites
    /// can tell "not yet implemented" from "failed".
    #[error("remote shell transport is not implemented (machine {machine_id})")]
    RemoteTransportUnimplemented {
        /// Machine that requested the remote transport.
        machine_id: String,
    },
    /// Raised when provider metadata carries no recognised transport route.
    #[error("machine {machine_id} has no routable transport metadata")]
    UnroutableMachine {
        /// Machine whose metadata could not be routed.
        machine_id: String,
    },
    /// Raised when an existence probe prints something other than its
    /// sentinel tokens.
    #[error("unexpected probe output: {output}")]
    ProbeOutput {
        /// Trimmed output the probe returned.
        output: String,
    },
    /// Raised when an XDG base directory resolves to an empty path.
    #[error("{variable} resolved to an empty path on the target")]
    EmptyPathResolution {
        /// Environment variable that was being resolved.
        variable: String,
    },
}

/// Uniform execution interface over a target machine.
#[derive(Clone, Debug)]
pub struct Connection<E: Executor> {
    executor: E,
    command_timeout: Duration,
}

impl Connection<ProcessExecutor> {
    /// Convenience constructor that wires the real process executor.
    #[must_use]
    pub const fn with_process_executor() -> Self {
        Self::new(ProcessExecutor)
    }
}

impl<E: Executor> Connection<E> {
    /// Creates a connection using the provided executor and the default
    /// command timeout.
    #[must_use]
    pub const fn new(executor: E) -> Self {
        Self {
            executor,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Overrides the default command timeout.
    #[must_use]
    pub const fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Returns the default bound applied to command execution.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Determines the transport a machine's metadata routes to.
    ///
    /// A `local` type discriminator routes to local process execution. An
    /// explicit `transport` sub-map, or any recognised remote backend type,
    /// routes to the remote shell.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::UnroutableMachine`] when the metadata
    /// matches neither route.
    pub fn transport_for(machine: &Machine) -> Result<Transport, ConnectionError> {
        let has_transport_map = machine
            .provider_metadata
            .get(TRANSPORT_KEY)
            .is_some_and(serde_json::Value::is_object);
        if has_transport_map {
            return Ok(Transport::RemoteShell);
        }
        match machine.metadata_str(METADATA_TYPE_KEY) {
            Some(LOCAL_BACKEND_TYPE) => Ok(Transport::LocalProcess),
            Some(backend) if REMOTE_BACKEND_TYPES.contains(&backend) => Ok(Transport::RemoteShell),
            _ => Err(ConnectionError::UnroutableMachine {
                machine_id: machine.id.clone(),
            }),
        }
    }

    /// Executes `command` on the target machine and returns its stdout.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::CommandFailed`] on any non-zero exit,
    /// [`ConnectionError::RemoteTransportUnimplemented`] for machines that
    /// route to the reserved remote transport, and the executor's spawn or
    /// timeout errors otherwise.
    pub async fn exec(
        &self,
        machine: &Machine,
        command: &str,
        options: ExecOptions,
    ) -> Result<String, ConnectionError> {
        match Self::transport_for(machine)? {
            Transport::RemoteShell => Err(ConnectionError::RemoteTransportUnimplemented {
                machine_id: machine.id.clone(),
            }),
            Transport::LocalProcess => {
                let timeout = options.timeout.unwrap_or(self.command_timeout);
                let output = self.executor.run(command, timeout).await?;
                if output.is_success() {
                    Ok(output.stdout)
                } else {
                    Err(ConnectionError::CommandFailed {
                        command: command.to_owned(),
                        status: output.code,
                        stderr: output.stderr,
                    })
                }
            }
        }
    }

    /// Probes whether a regular file exists on the target.
    ///
    /// The probe prints an explicit sentinel from each conditional branch
    /// rather than relying on `&&`/`||` short-circuiting, so it holds on
    /// any POSIX `sh`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::ProbeOutput`] when the output matches
    /// neither sentinel, or any execution error from [`Connection::exec`].
    pub async fn file_exists(
        &self,
        machine: &Machine,
        path: &Utf8Path,
    ) -> Result<bool, ConnectionError> {
        self.probe(machine, "-f", path).await
    }

    /// Probes whether a directory exists on the target.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::file_exists`].
    pub async fn dir_exists(
        &self,
        machine: &Machine,
        path: &Utf8Path,
    ) -> Result<bool, ConnectionError> {
        self.probe(machine, "-d", path).await
    }

    async fn probe(
        &self,
        machine: &Machine,
        test_flag: &str,
        path: &Utf8Path,
    ) -> Result<bool, ConnectionError> {
        let command = format!(
            "if test {test_flag} {path}; then printf '{FILE_PRESENT}'; else printf '{FILE_ABSENT}'; fi",
            path = quoted(path),
        );
        let output = self.exec(machine, &command, ExecOptions::default()).await?;
        match output.trim() {
            FILE_PRESENT => Ok(true),
            FILE_ABSENT => Ok(false),
            other => Err(ConnectionError::ProbeOutput {
                output: other.to_owned(),
            }),
        }
    }

    /// Creates a directory (and any missing parents) on the target.
    ///
    /// # Errors
    ///
    /// Propagates any non-zero exit as [`ConnectionError::CommandFailed`].
    pub async fn mkdir_p(&self, machine: &Machine, path: &Utf8Path) -> Result<(), ConnectionError> {
        let command = format!("mkdir -p {}", quoted(path));
        self.exec(machine, &command, ExecOptions::default()).await?;
        Ok(())
    }

    /// Resolves the target machine's XDG data home under the `nimbus`
    /// namespace, joining `subpath` after resolution.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::EmptyPathResolution`] when the expansion
    /// yields an empty line, or any execution error from
    /// [`Connection::exec`].
    pub async fn xdg_data_home(
        &self,
        machine: &Machine,
        subpath: Option<&Utf8Path>,
    ) -> Result<Utf8PathBuf, ConnectionError> {
        self.xdg_home(machine, "XDG_DATA_HOME", ".local/share", subpath)
            .await
    }

    /// Resolves the target machine's XDG cache home under the `nimbus`
    /// namespace.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::xdg_data_home`].
    pub async fn xdg_cache_home(
        &self,
        machine: &Machine,
        subpath: Option<&Utf8Path>,
    ) -> Result<Utf8PathBuf, ConnectionError> {
        self.xdg_home(machine, "XDG_CACHE_HOME", ".cache", subpath)
            .await
    }

    /// Resolves the target machine's XDG state home under the `nimbus`
    /// namespace.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::xdg_data_home`].
    pub async fn xdg_state_home(
        &self,
        machine: &Machine,
        subpath: Option<&Utf8Path>,
    ) -> Result<Utf8PathBuf, ConnectionError> {
        self.xdg_home(machine, "XDG_STATE_HOME", ".local/state", subpath)
            .await
    }

    /// Resolves one XDG base directory on the target, not the calling
    /// process: local and remote targets may have different home
    /// directories and environments, so the expansion must run where the
    /// files will live.
    async fn xdg_home(
        &self,
        machine: &Machine,
        variable: &str,
        fallback: &str,
        subpath: Option<&Utf8Path>,
    ) -> Result<Utf8PathBuf, ConnectionError> {
        let command =
            format!("printf '%s' \"${{{variable}:-$HOME/{fallback}}}/{XDG_NAMESPACE}\"");
        let output = self.exec(machine, &command, ExecOptions::default()).await?;
        let resolved = output.trim();
        if resolved.is_empty() || resolved == format!("/{XDG_NAMESPACE}") {
            return Err(ConnectionError::EmptyPathResolution {
                variable: variable.to_owned(),
            });
        }
        let mut home = Utf8PathBuf::from(resolved);
        if let Some(extra) = subpath {
            home.push(extra);
        }
        Ok(home)
    }
}

/// Shell-escapes a path for interpolation into a command line.
#[must_use]
pub fn quoted(path: &Utf8Path) -> String {
    escape(Cow::from(path.as_str())).into_owned()
}

#[cfg(test)]
mod tests;
