//! Runner agent installer.
//!
//! The agent ships as a gzipped tarball whose contents (`config.sh`,
//! `run.sh`, and supporting files) are unpacked wholesale into
//! `{data_home}/github-runner`. It is the one tool installed on every
//! platform.

use crate::machine::Os;

use super::{Packaging, ToolSpec};

/// Install directory under the XDG data home.
pub const INSTALL_DIR: &str = "github-runner";

const PROBE: &str = "config.sh";
const EXECUTABLES: &[&str] = &["config.sh", "run.sh"];
const PLATFORM_TOKENS: &[(Os, &str)] = &[(Os::MacOs, "osx"), (Os::Linux, "linux")];
const SUPPORTED: &[Os] = &[Os::MacOs, Os::Linux];

/// Builds the runner agent tool description for a pinned release.
#[must_use]
pub fn spec(repo: impl Into<String>, version: impl Into<String>) -> ToolSpec {
    ToolSpec {
        name: "runner",
        dir: INSTALL_DIR,
        repo: repo.into(),
        version: version.into(),
        supported: SUPPORTED,
        platform_tokens: PLATFORM_TOKENS,
        packaging: Packaging::Tarball {
            probe: PROBE,
            executables: EXECUTABLES,
        },
        verify_flag: "--help",
        reverify_on_hit: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn runner_is_installed_on_every_platform() {
        let tool = spec("actions/runner", "v2.319.1");
        assert!(tool.is_supported(Os::Linux));
        assert!(tool.is_supported(Os::MacOs));
    }

    #[rstest]
    #[case(Os::MacOs, "osx")]
    #[case(Os::Linux, "linux")]
    fn asset_names_use_per_os_tokens(#[case] os: Os, #[case] token: &str) {
        let tool = spec("actions/runner", "v2.319.1");
        assert_eq!(tool.platform_token(os), Some(token));
    }
}
