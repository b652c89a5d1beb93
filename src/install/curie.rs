//! VM manager installer.
//!
//! Curie ships as a signed macOS installer package. The payload is
//! expanded with `pkgutil` into a scratch directory under the download
//! cache, the `curie` binary is copied to `{data_home}/curie/bin/curie`,
//! and the scratch directory is removed whether or not the expansion
//! succeeded.

use crate::machine::Os;

use super::{Packaging, ToolSpec};

/// Install directory under the XDG data home.
pub const INSTALL_DIR: &str = "curie";

const BINARY: &str = "curie";
const PLATFORM_TOKENS: &[(Os, &str)] = &[(Os::MacOs, "darwin")];
const SUPPORTED: &[Os] = &[Os::MacOs];

/// Builds the VM manager tool description for a pinned release.
#[must_use]
pub fn spec(repo: impl Into<String>, version: impl Into<String>) -> ToolSpec {
    ToolSpec {
        name: "curie",
        dir: INSTALL_DIR,
        repo: repo.into(),
        version: version.into(),
        supported: SUPPORTED,
        platform_tokens: PLATFORM_TOKENS,
        packaging: Packaging::MacPkg { binary: BINARY },
        verify_flag: "--version",
        reverify_on_hit: false,
    }
}
