// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

/// Environment variable overriding the `xcrun` executable used to reach
/// Apple's notary and stapling tools.
pub const XCRUN_PATH_ENV_VARIABLE: &str = "APPLE_NOTARIZE_XCRUN_EXE";

/// Find the `xcrun` executable to invoke Apple tools through.
///
/// Resolution order: the [XCRUN_PATH_ENV_VARIABLE] environment variable,
/// then `$PATH`, then the bare name (letting the OS report a launch
/// failure at invocation time).
pub fn find_xcrun_exe() -> PathBuf {
    if let Some(path) = std::env::var_os(XCRUN_PATH_ENV_VARIABLE) {
        PathBuf::from(path)
    } else if let Ok(path) = which::which("xcrun") {
        path
    } else {
        PathBuf::from("xcrun")
    }
}

/// Which notary CLI tool to drive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NotarizationTool {
    /// The legacy `altool` workflow.
    Altool,

    /// The modern `notarytool` workflow.
    Notarytool,
}

/// Pre-resolved settings for talking to the notary service.
///
/// Credential and keychain management happens upstream; this crate only
/// consumes the resulting strings. `notary_password` may be a raw secret
/// or a `@keychain:`/`@env:` reference, which the backends forward or
/// translate according to each tool's own conventions.
#[derive(Clone, Debug)]
pub struct NotarizationConfig {
    pub notarization_tool: NotarizationTool,

    /// Apple ID performing the notarization.
    pub notary_user: String,

    /// Password or password reference for `notary_user`.
    pub notary_password: String,

    /// App Store Connect provider short name, for accounts belonging to
    /// multiple teams. Only consulted by the legacy tool.
    pub notary_asc_provider: Option<String>,

    /// Team identifier. Required by the modern tool.
    pub notary_team_id: Option<String>,

    /// Primary bundle identifier attached to legacy submissions.
    pub primary_bundle_id: String,
}
