//! End-to-end local provisioning scenarios through the machine service.

use camino::Utf8PathBuf;
use rstest::rstest;
use tempfile::TempDir;

use nimbus::install::ToolCatalog;
use nimbus::release::ReleaseAsset;
use nimbus::setup::{
    CURIE_INSTALL_PATH_KEY, GERANOS_INSTALL_PATH_KEY, RUNNER_INSTALL_PATH_KEY, SetupOrchestrator,
};
use nimbus::test_support::{CapturingSink, ScriptedExecutor, ScriptedReleases};
use nimbus::{
    Arch, Connection, InstallError, LocalProvider, MachineService, MachineState, NimbusConfig,
    Os, ProviderConfig, ProviderError, ProviderKind, ProviderRegistry, ProvisionSpec,
    ReleaseError, ServiceError, SetupError, Tenant,
};
use nimbus::storage::InMemoryStorage;

const TENANT: &str = "t-1";
const PROVIDER: &str = "p-local";

struct Stack {
    service: MachineService<InMemoryStorage, CapturingSink>,
    executor: ScriptedExecutor,
    releases: ScriptedReleases,
    sink: CapturingSink,
    data: Utf8PathBuf,
    _tmp: TempDir,
}

fn pinned_config() -> NimbusConfig {
    NimbusConfig {
        runner_repo: String::from("actions/runner"),
        runner_version: String::from("v2.319.1"),
        curie_repo: String::from("macvmio/curie"),
        curie_version: String::from("v0.12.0"),
        geranos_repo: String::from("macvmio/geranos"),
        geranos_version: String::from("v0.7.1"),
        command_timeout_secs: 120,
        http_timeout_secs: 30,
    }
}

fn stack() -> Stack {
    let tmp = TempDir::new().expect("create temp directory");
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .expect("temp path should be valid UTF-8");
    let executor = ScriptedExecutor::new();
    executor.respond_stdout("XDG_DATA_HOME", root.join("data/nimbus").as_str());
    executor.respond_stdout("XDG_CACHE_HOME", root.join("cache/nimbus").as_str());
    executor.respond_stdout("XDG_STATE_HOME", root.join("state/nimbus").as_str());
    executor.respond_stdout("if test -f", "nimbus-file-absent");

    let releases = ScriptedReleases::new();
    let sink = CapturingSink::new();
    let catalog = ToolCatalog::from_config(&pinned_config());
    let orchestrator = SetupOrchestrator::new(
        Connection::new(executor.clone()),
        releases.clone(),
        sink.clone(),
        catalog,
    );
    let local = LocalProvider::new(orchestrator);
    let registry = ProviderRegistry::with_local_backend(Box::new(local));

    let storage = InMemoryStorage::new();
    storage.insert_tenant(Tenant {
        id: TENANT.to_owned(),
        name: String::from("acme"),
    });
    storage.insert_provider(ProviderConfig::new(PROVIDER, TENANT, ProviderKind::Local));

    Stack {
        service: MachineService::new(storage, registry, sink.clone()),
        executor,
        releases,
        sink,
        data: root.join("data/nimbus"),
        _tmp: tmp,
    }
}

fn add_linux_releases(releases: &ScriptedReleases) {
    releases.add_release(
        "actions/runner",
        "v2.319.1",
        vec![ReleaseAsset {
            name: "actions-runner-linux-x86_64-2.319.1.tar.gz".to_owned(),
            browser_download_url: "https://example.invalid/runner-linux.tar.gz".to_owned(),
        }],
    );
}

fn add_macos_releases(releases: &ScriptedReleases) {
    releases.add_release(
        "actions/runner",
        "v2.319.1",
        vec![ReleaseAsset {
            name: "actions-runner-osx-arm64-2.319.1.tar.gz".to_owned(),
            browser_download_url: "https://example.invalid/runner-osx.tar.gz".to_owned(),
        }],
    );
    releases.add_release(
        "macvmio/curie",
        "v0.12.0",
        vec![ReleaseAsset {
            name: "curie-darwin-arm64.pkg".to_owned(),
            browser_download_url: "https://example.invalid/curie.pkg".to_owned(),
        }],
    );
    releases.add_release(
        "macvmio/geranos",
        "v0.7.1",
        vec![ReleaseAsset {
            name: "geranos-darwin-arm64".to_owned(),
            browser_download_url: "https://example.invalid/geranos".to_owned(),
        }],
    );
}

#[rstest]
#[tokio::test]
async fn linux_request_yields_a_ready_machine_with_a_runner_install() {
    let rig = stack();
    add_linux_releases(&rig.releases);
    let spec = ProvisionSpec::builder()
        .os(Os::Linux)
        .arch(Arch::X86_64)
        .labels([String::from("linux"), String::from("x86_64")])
        .build()
        .expect("spec validates");

    let machine = rig
        .service
        .provision(TENANT, PROVIDER, &spec)
        .await
        .expect("local provisioning succeeds");

    assert_eq!(machine.state, MachineState::Ready);
    assert!(machine.is_ready());
    assert!(machine.image.is_none(), "no image was requested");
    assert_eq!(
        machine.metadata_str(RUNNER_INSTALL_PATH_KEY),
        Some(rig.data.join("github-runner").as_str()),
        "the runner agent install path is discoverable on the machine"
    );
    assert_eq!(machine.metadata_str(CURIE_INSTALL_PATH_KEY), None);
    assert_eq!(machine.metadata_str(GERANOS_INSTALL_PATH_KEY), None);

    let names = rig.sink.names();
    assert_eq!(
        names.first().map(String::as_str),
        Some("machine_provision_start")
    );
    assert_eq!(
        names.last().map(String::as_str),
        Some("machine_provision_success")
    );
    assert_eq!(
        rig.sink.names_matching("install_"),
        vec![
            "install_runner_start".to_owned(),
            "install_runner_success".to_owned(),
        ],
        "only the runner agent installs on linux"
    );
}

#[rstest]
#[tokio::test]
async fn macos_request_additionally_installs_the_vm_tooling_in_order() {
    let rig = stack();
    add_macos_releases(&rig.releases);
    rig.executor
        .respond_stdout("find ", "/scratch/Payload/usr/local/bin/curie\n");
    let spec = ProvisionSpec::builder()
        .os(Os::MacOs)
        .arch(Arch::Arm64)
        .labels([String::from("macos")])
        .build()
        .expect("spec validates");

    let machine = rig
        .service
        .provision(TENANT, PROVIDER, &spec)
        .await
        .expect("local provisioning succeeds");

    assert_eq!(machine.state, MachineState::Ready);
    assert_eq!(
        machine.metadata_str(RUNNER_INSTALL_PATH_KEY),
        Some(rig.data.join("github-runner").as_str())
    );
    assert_eq!(
        machine.metadata_str(CURIE_INSTALL_PATH_KEY),
        Some(rig.data.join("curie/bin/curie").as_str())
    );
    assert_eq!(
        machine.metadata_str(GERANOS_INSTALL_PATH_KEY),
        Some(rig.data.join("geranos/bin/geranos").as_str())
    );
    assert_eq!(
        rig.sink.names_matching("install_"),
        vec![
            "install_runner_start".to_owned(),
            "install_runner_success".to_owned(),
            "install_curie_start".to_owned(),
            "install_curie_success".to_owned(),
            "install_geranos_start".to_owned(),
            "install_geranos_success".to_owned(),
        ],
        "installer spans appear in the fixed order runner, curie, geranos"
    );
}

#[rstest]
#[tokio::test]
async fn setup_failures_keep_the_originating_error_identity() {
    let rig = stack();
    // No releases registered: the runner fetch fails with a 404.
    let spec = ProvisionSpec::builder()
        .os(Os::Linux)
        .arch(Arch::X86_64)
        .build()
        .expect("spec validates");

    let error = rig
        .service
        .provision(TENANT, PROVIDER, &spec)
        .await
        .expect_err("setup fails without release metadata");

    assert_eq!(
        error,
        ServiceError::Provider(ProviderError::Setup(SetupError::Install(
            InstallError::Release(ReleaseError::HttpStatus { status: 404 })
        ))),
        "the failure is propagated unmodified through every layer"
    );
    assert_eq!(
        rig.sink.names_matching("machine_provision"),
        vec![
            "machine_provision_start".to_owned(),
            "machine_provision_failure".to_owned(),
        ],
        "telemetry records the failure as a side effect of propagation"
    );
}

#[rstest]
#[tokio::test]
async fn provisioned_machines_run_the_requested_setup_script() {
    let rig = stack();
    add_linux_releases(&rig.releases);
    let spec = ProvisionSpec::builder()
        .os(Os::Linux)
        .arch(Arch::X86_64)
        .setup_script("git config --global user.name ci")
        .build()
        .expect("spec validates");

    rig.service
        .provision(TENANT, PROVIDER, &spec)
        .await
        .expect("local provisioning succeeds");

    assert_eq!(
        rig.executor.invocations_matching("git config").len(),
        1,
        "the setup script runs on the machine exactly once"
    );
}
