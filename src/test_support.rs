//! Test support utilities shared across unit and integration tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};

use crate::connection::{CommandOutput, ConnectionError, ExecFuture, Executor};
use crate::release::{Release, ReleaseAsset, ReleaseError, ReleaseFuture, ReleaseSource};
use crate::telemetry::{TelemetryEvent, TelemetrySink};

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Response rule for [`ScriptedExecutor`]: the first rule whose needle is
/// contained in the command supplies the output.
#[derive(Clone, Debug)]
struct ScriptedRule {
    needle: String,
    output: CommandOutput,
}

/// Scripted executor that answers commands by substring matching.
///
/// Commands with no matching rule succeed with empty output, so tests only
/// script the commands they care about. Every invocation is recorded for
/// assertions on ordering and shape.
#[derive(Clone, Debug, Default)]
pub struct ScriptedExecutor {
    rules: Arc<Mutex<Vec<ScriptedRule>>>,
    invocations: Arc<Mutex<Vec<String>>>,
    timeouts: Arc<Mutex<Vec<Duration>>>,
}

impl ScriptedExecutor {
    /// Creates an executor with no rules; everything succeeds silently.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule answering matching commands with a zero exit and the
    /// given stdout.
    pub fn respond_stdout(&self, needle: impl Into<String>, stdout: impl Into<String>) {
        self.respond(
            needle,
            CommandOutput {
                code: Some(0),
                stdout: stdout.into(),
                stderr: String::new(),
            },
        );
    }

    /// Adds a rule answering matching commands with a failing exit code
    /// and stderr text.
    pub fn respond_failure(&self, needle: impl Into<String>, code: i32, stderr: impl Into<String>) {
        self.respond(
            needle,
            CommandOutput {
                code: Some(code),
                stdout: String::new(),
                stderr: stderr.into(),
            },
        );
    }

    /// Adds an explicit response rule.
    pub fn respond(&self, needle: impl Into<String>, output: CommandOutput) {
        locked(&self.rules).push(ScriptedRule {
            needle: needle.into(),
            output,
        });
    }

    /// Returns every command executed so far, in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<String> {
        locked(&self.invocations).clone()
    }

    /// Returns the commands containing `needle`, in order.
    #[must_use]
    pub fn invocations_matching(&self, needle: &str) -> Vec<String> {
        self.invocations()
            .into_iter()
            .filter(|command| command.contains(needle))
            .collect()
    }

    /// Returns the timeout bound each command ran with, in order.
    #[must_use]
    pub fn timeouts(&self) -> Vec<Duration> {
        locked(&self.timeouts).clone()
    }
}

impl Executor for ScriptedExecutor {
    fn run<'a>(&'a self, command: &'a str, timeout: Duration) -> ExecFuture<'a, CommandOutput> {
        locked(&self.invocations).push(command.to_owned());
        locked(&self.timeouts).push(timeout);
        let output = locked(&self.rules)
            .iter()
            .find(|rule| command.contains(&rule.needle))
            .map_or_else(
                || CommandOutput {
                    code: Some(0),
                    stdout: String::new(),
                    stderr: String::new(),
                },
                |rule| rule.output.clone(),
            );
        Box::pin(async move { Ok(output) })
    }
}

/// Executor whose every command fails to spawn, for degraded-transport
/// scenarios.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailingExecutor;

impl Executor for FailingExecutor {
    fn run<'a>(&'a self, _command: &'a str, _timeout: Duration) -> ExecFuture<'a, CommandOutput> {
        Box::pin(async move {
            Err(ConnectionError::Spawn {
                message: "scripted spawn failure".to_owned(),
            })
        })
    }
}

/// Scripted release source with canned metadata and downloadable payloads.
#[derive(Clone, Debug, Default)]
pub struct ScriptedReleases {
    releases: Arc<Mutex<BTreeMap<(String, String), Release>>>,
    payloads: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    fetches: Arc<Mutex<Vec<(String, String)>>>,
    downloads: Arc<Mutex<Vec<(String, Utf8PathBuf)>>>,
}

impl ScriptedReleases {
    /// Creates a source with no canned releases; every fetch is a 404.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers release metadata for a repo/tag pair.
    pub fn add_release(
        &self,
        repo: impl Into<String>,
        tag: impl Into<String>,
        assets: Vec<ReleaseAsset>,
    ) {
        locked(&self.releases).insert((repo.into(), tag.into()), Release { assets });
    }

    /// Registers the bytes served for a download URL. Unregistered URLs
    /// download as empty files.
    pub fn add_payload(&self, url: impl Into<String>, bytes: Vec<u8>) {
        locked(&self.payloads).insert(url.into(), bytes);
    }

    /// Returns every `(repo, tag)` fetched so far, in order.
    #[must_use]
    pub fn fetches(&self) -> Vec<(String, String)> {
        locked(&self.fetches).clone()
    }

    /// Returns every `(url, destination)` downloaded so far, in order.
    #[must_use]
    pub fn downloads(&self) -> Vec<(String, Utf8PathBuf)> {
        locked(&self.downloads).clone()
    }
}

impl ReleaseSource for ScriptedReleases {
    fn fetch_release<'a>(&'a self, repo: &'a str, tag: &'a str) -> ReleaseFuture<'a, Release> {
        locked(&self.fetches).push((repo.to_owned(), tag.to_owned()));
        let found = locked(&self.releases)
            .get(&(repo.to_owned(), tag.to_owned()))
            .cloned();
        Box::pin(async move { found.ok_or(ReleaseError::HttpStatus { status: 404 }) })
    }

    fn download<'a>(&'a self, url: &'a str, dest: &'a Utf8Path) -> ReleaseFuture<'a, ()> {
        locked(&self.downloads).push((url.to_owned(), dest.to_path_buf()));
        let body = locked(&self.payloads).get(url).cloned().unwrap_or_default();
        Box::pin(async move {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|err| ReleaseError::Io {
                    path: dest.to_path_buf(),
                    message: err.to_string(),
                })?;
            }
            std::fs::write(dest, &body).map_err(|err| ReleaseError::Io {
                path: dest.to_path_buf(),
                message: err.to_string(),
            })
        })
    }
}

/// Telemetry sink that records events in emission order.
#[derive(Clone, Debug, Default)]
pub struct CapturingSink {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl CapturingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every event emitted so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<TelemetryEvent> {
        locked(&self.events).clone()
    }

    /// Returns the emitted event names, in order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.events().into_iter().map(|event| event.name).collect()
    }

    /// Returns the emitted event names containing `needle`, in order.
    #[must_use]
    pub fn names_matching(&self, needle: &str) -> Vec<String> {
        self.names()
            .into_iter()
            .filter(|name| name.contains(needle))
            .collect()
    }
}

impl TelemetrySink for CapturingSink {
    fn emit(&self, event: &TelemetryEvent) {
        locked(&self.events).push(event.clone());
    }
}
