//! Command execution primitives backing the connection layer.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use super::ConnectionError;

/// Result of running a command on a target machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the shell, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Future returned by executor operations.
pub type ExecFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ConnectionError>> + Send + 'a>>;

/// Abstraction over shell execution to support fakes in tests and, later,
/// a remote transport.
pub trait Executor: Send + Sync {
    /// Runs `command` through `sh -c`, capturing stdout and stderr, bounded
    /// by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Spawn`] when the shell cannot be started
    /// and [`ConnectionError::Timeout`] when the bound elapses first. A
    /// non-zero exit is not an error at this level; it is reported through
    /// [`CommandOutput::code`].
    fn run<'a>(&'a self, command: &'a str, timeout: Duration) -> ExecFuture<'a, CommandOutput>;
}

/// Real executor that runs commands as local child processes.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessExecutor;

impl Executor for ProcessExecutor {
    fn run<'a>(&'a self, command: &'a str, timeout: Duration) -> ExecFuture<'a, CommandOutput> {
        Box::pin(async move {
            let output = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .stdin(Stdio::null())
                .output();
            match tokio::time::timeout(timeout, output).await {
                Err(_) => Err(ConnectionError::Timeout {
                    seconds: timeout.as_secs(),
                }),
                Ok(Err(err)) => Err(ConnectionError::Spawn {
                    message: err.to_string(),
                }),
                Ok(Ok(done)) => Ok(CommandOutput {
                    code: done.status.code(),
                    stdout: String::from_utf8_lossy(&done.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&done.stderr).into_owned(),
                }),
            }
        })
    }
}
