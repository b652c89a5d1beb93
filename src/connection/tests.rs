//! Tests for transport routing, probes, and path resolution.

use std::time::Duration;

use camino::Utf8Path;
use rstest::{fixture, rstest};

use super::*;
use crate::machine::{Arch, Machine, MachineState, Os};
use crate::test_support::{FailingExecutor, ScriptedExecutor};

fn machine_with_metadata(entries: &[(&str, serde_json::Value)]) -> Machine {
    let mut builder = Machine::builder()
        .id("m-1")
        .tenant_id("t-1")
        .provider_id("p-1")
        .os(Os::Linux)
        .arch(Arch::X86_64)
        .state(MachineState::Provisioning);
    for (key, value) in entries {
        builder = builder.metadata(*key, value.clone());
    }
    builder.build().expect("identity fields are populated")
}

#[fixture]
fn local_machine() -> Machine {
    machine_with_metadata(&[("type", serde_json::json!("local"))])
}

#[rstest]
#[tokio::test]
async fn exec_routes_local_machines_to_the_executor(local_machine: Machine) {
    let executor = ScriptedExecutor::new();
    executor.respond_stdout("uname", "Linux\n");
    let connection = Connection::new(executor.clone());

    let stdout = connection
        .exec(&local_machine, "uname -s", ExecOptions::default())
        .await
        .expect("scripted command succeeds");

    assert_eq!(stdout, "Linux\n");
    assert_eq!(executor.invocations(), vec!["uname -s".to_owned()]);
}

#[rstest]
#[tokio::test]
async fn exec_surfaces_nonzero_exits_with_status_and_stderr(local_machine: Machine) {
    let executor = ScriptedExecutor::new();
    executor.respond_failure("false", 3, "boom");
    let connection = Connection::new(executor);

    let error = connection
        .exec(&local_machine, "false", ExecOptions::default())
        .await
        .expect_err("non-zero exit is an error");

    assert_eq!(
        error,
        ConnectionError::CommandFailed {
            command: "false".to_owned(),
            status: Some(3),
            stderr: "boom".to_owned(),
        }
    );
}

#[rstest]
#[case::remote_backend_type(&[("type", serde_json::json!("aws"))])]
#[case::explicit_transport_map(&[
    ("type", serde_json::json!("local")),
    ("transport", serde_json::json!({"host": "203.0.113.7"})),
])]
#[tokio::test]
async fn remote_routes_fail_with_the_unimplemented_variant(
    #[case] entries: &[(&str, serde_json::Value)],
) {
    let machine = machine_with_metadata(entries);
    let connection = Connection::new(ScriptedExecutor::new());

    let error = connection
        .exec(&machine, "true", ExecOptions::default())
        .await
        .expect_err("remote transport is not built");

    assert_eq!(
        error,
        ConnectionError::RemoteTransportUnimplemented {
            machine_id: "m-1".to_owned(),
        }
    );
}

#[rstest]
#[tokio::test]
async fn the_configured_command_bound_reaches_the_executor(local_machine: Machine) {
    let executor = ScriptedExecutor::new();
    let connection =
        Connection::new(executor.clone()).with_command_timeout(Duration::from_secs(7));
    assert_eq!(connection.command_timeout(), Duration::from_secs(7));

    connection
        .exec(&local_machine, "true", ExecOptions::default())
        .await
        .expect("scripted command succeeds");

    assert_eq!(executor.timeouts(), vec![Duration::from_secs(7)]);
}

#[rstest]
#[tokio::test]
async fn per_call_options_override_the_default_bound(local_machine: Machine) {
    let executor = ScriptedExecutor::new();
    let connection = Connection::new(executor.clone());

    connection
        .exec(
            &local_machine,
            "true",
            ExecOptions {
                timeout: Some(Duration::from_secs(3)),
            },
        )
        .await
        .expect("scripted command succeeds");

    assert_eq!(executor.timeouts(), vec![Duration::from_secs(3)]);
}

#[rstest]
#[tokio::test]
async fn spawn_failures_propagate_without_retries(local_machine: Machine) {
    let connection = Connection::new(FailingExecutor);

    let error = connection
        .exec(&local_machine, "true", ExecOptions::default())
        .await
        .expect_err("the executor cannot spawn");

    assert_eq!(
        error,
        ConnectionError::Spawn {
            message: "scripted spawn failure".to_owned(),
        }
    );
}

#[rstest]
fn machines_without_routable_metadata_are_rejected() {
    let machine = machine_with_metadata(&[]);
    let error = Connection::<ScriptedExecutor>::transport_for(&machine)
        .expect_err("no transport metadata");
    assert_eq!(
        error,
        ConnectionError::UnroutableMachine {
            machine_id: "m-1".to_owned(),
        }
    );
}

#[rstest]
#[case("nimbus-file-present", true)]
#[case("nimbus-file-absent", false)]
#[tokio::test]
async fn file_exists_parses_the_probe_sentinels(
    local_machine: Machine,
    #[case] sentinel: &str,
    #[case] expected: bool,
) {
    let executor = ScriptedExecutor::new();
    executor.respond_stdout("test -f", sentinel);
    let connection = Connection::new(executor.clone());

    let exists = connection
        .file_exists(&local_machine, Utf8Path::new("/opt/tool"))
        .await
        .expect("probe output is a sentinel");

    assert_eq!(exists, expected);
    let probes = executor.invocations_matching("test -f");
    let probe = probes.first().expect("one probe ran");
    assert!(
        probe.contains("if test -f /opt/tool; then"),
        "probe should use explicit conditionals, got: {probe}"
    );
    assert!(
        !probe.contains("&&"),
        "probe must not rely on shell short-circuiting, got: {probe}"
    );
}

#[rstest]
#[tokio::test]
async fn probe_rejects_unexpected_output(local_machine: Machine) {
    let executor = ScriptedExecutor::new();
    executor.respond_stdout("test -d", "maybe?");
    let connection = Connection::new(executor);

    let error = connection
        .dir_exists(&local_machine, Utf8Path::new("/opt"))
        .await
        .expect_err("garbage probe output is an error");

    assert_eq!(
        error,
        ConnectionError::ProbeOutput {
            output: "maybe?".to_owned(),
        }
    );
}

#[rstest]
#[tokio::test]
async fn mkdir_p_escapes_paths_with_spaces(local_machine: Machine) {
    let executor = ScriptedExecutor::new();
    let connection = Connection::new(executor.clone());

    connection
        .mkdir_p(&local_machine, Utf8Path::new("/data/install dir"))
        .await
        .expect("mkdir succeeds");

    let commands = executor.invocations_matching("mkdir -p");
    let command = commands.first().expect("one mkdir ran");
    assert_eq!(command, "mkdir -p '/data/install dir'");
}

#[rstest]
#[tokio::test]
async fn xdg_data_home_resolves_on_the_target_and_joins_subpaths(local_machine: Machine) {
    let executor = ScriptedExecutor::new();
    executor.respond_stdout("XDG_DATA_HOME", "/home/ci/.local/share/nimbus\n");
    let connection = Connection::new(executor.clone());

    let resolved = connection
        .xdg_data_home(&local_machine, Some(Utf8Path::new("github-runner")))
        .await
        .expect("resolution succeeds");

    assert_eq!(resolved, Utf8Path::new("/home/ci/.local/share/nimbus/github-runner"));
    let commands = executor.invocations_matching("XDG_DATA_HOME");
    let command = commands.first().expect("one resolution ran");
    assert!(
        command.contains("${XDG_DATA_HOME:-$HOME/.local/share}/nimbus"),
        "expansion must carry the POSIX fallback, got: {command}"
    );
}

#[rstest]
#[case::cache("XDG_CACHE_HOME", ".cache")]
#[case::state("XDG_STATE_HOME", ".local/state")]
#[tokio::test]
async fn cache_and_state_homes_use_their_own_fallbacks(
    local_machine: Machine,
    #[case] variable: &str,
    #[case] fallback: &str,
) {
    let executor = ScriptedExecutor::new();
    executor.respond_stdout(variable, "/home/ci/x/nimbus");
    let connection = Connection::new(executor.clone());

    let resolved = match variable {
        "XDG_CACHE_HOME" => connection.xdg_cache_home(&local_machine, None).await,
        _ => connection.xdg_state_home(&local_machine, None).await,
    }
    .expect("resolution succeeds");

    assert_eq!(resolved, Utf8Path::new("/home/ci/x/nimbus"));
    let commands = executor.invocations_matching(variable);
    let command = commands.first().expect("one resolution ran");
    assert!(
        command.contains(&format!("$HOME/{fallback}")),
        "expected fallback {fallback}, got: {command}"
    );
}

#[rstest]
#[tokio::test]
async fn empty_xdg_resolution_is_an_error(local_machine: Machine) {
    let executor = ScriptedExecutor::new();
    executor.respond_stdout("XDG_STATE_HOME", "/nimbus");
    let connection = Connection::new(executor);

    let error = connection
        .xdg_state_home(&local_machine, None)
        .await
        .expect_err("an empty expansion cannot be used");

    assert_eq!(
        error,
        ConnectionError::EmptyPathResolution {
            variable: "XDG_STATE_HOME".to_owned(),
        }
    );
}

#[rstest]
#[case("/plain/path", "/plain/path")]
#[case("/path with space", "'/path with space'")]
#[case("/it's", r#"'/it'\''s'"#)]
fn quoted_wraps_unsafe_paths_in_single_quotes(#[case] path: &str, #[case] expected: &str) {
    assert_eq!(quoted(Utf8Path::new(path)), expected);
}

mod process_executor {
    use super::*;

    #[rstest]
    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let output = ProcessExecutor
            .run("printf hello; exit 0", Duration::from_secs(5))
            .await
            .expect("shell is available");
        assert_eq!(output.code, Some(0));
        assert_eq!(output.stdout, "hello");
        assert!(output.is_success());
    }

    #[rstest]
    #[tokio::test]
    async fn reports_nonzero_exit_codes_without_erroring() {
        let output = ProcessExecutor
            .run("exit 7", Duration::from_secs(5))
            .await
            .expect("shell is available");
        assert_eq!(output.code, Some(7));
        assert!(!output.is_success());
    }

    #[rstest]
    #[tokio::test]
    async fn enforces_the_execution_bound() {
        let error = ProcessExecutor
            .run("sleep 5", Duration::from_millis(50))
            .await
            .expect_err("sleep outlives the bound");
        assert_eq!(error, ConnectionError::Timeout { seconds: 0 });
    }
}
