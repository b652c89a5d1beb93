//! Image puller installer.
//!
//! Geranos ships as a raw executable downloaded to
//! `{data_home}/geranos/bin/geranos`. Its idempotency hit elides only the
//! download: the binary is re-marked executable and re-verified on every
//! invocation, so a present-but-broken binary is caught the next time
//! setup runs.

use crate::machine::Os;

use super::{Packaging, ToolSpec};

/// Install directory under the XDG data home.
pub const INSTALL_DIR: &str = "geranos";

const BINARY: &str = "geranos";
const PLATFORM_TOKENS: &[(Os, &str)] = &[(Os::MacOs, "darwin")];
const SUPPORTED: &[Os] = &[Os::MacOs];

/// Builds the image puller tool description for a pinned release.
#[must_use]
pub fn spec(repo: impl Into<String>, version: impl Into<String>) -> ToolSpec {
    ToolSpec {
        name: "geranos",
        dir: INSTALL_DIR,
        repo: repo.into(),
        version: version.into(),
        supported: SUPPORTED,
        platform_tokens: PLATFORM_TOKENS,
        packaging: Packaging::Binary { binary: BINARY },
        verify_flag: "--help",
        reverify_on_hit: true,
    }
}
