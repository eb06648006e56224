// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! External process invocation.

Every interaction with the notary service and the stapling tool happens
by shelling out. This module centralizes how commands are run: stderr is
folded into stdout (Apple's tools interleave diagnostics across both),
the combined output is captured, and a non-zero exit becomes a
structured [NotarizationError::CommandFailed] carrying the exit code and
the raw output for later classification.
*/

use {
    crate::NotarizationError,
    log::info,
    std::path::Path,
};

/// Runs external commands and captures their combined output.
///
/// Implemented by [ProcessRunner] for real invocations; tests substitute
/// recording or scripted implementations.
pub trait CommandRunner {
    /// Run `exe` with `args`, returning combined stdout/stderr on success.
    ///
    /// `label` is a short human-readable name for the operation, used in
    /// diagnostics.
    fn run_command_output(
        &self,
        label: &str,
        exe: &Path,
        args: &[String],
    ) -> Result<Vec<u8>, NotarizationError>;
}

/// [CommandRunner] that spawns real processes.
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run_command_output(
        &self,
        label: &str,
        exe: &Path,
        args: &[String],
    ) -> Result<Vec<u8>, NotarizationError> {
        info!("invoking {} with args: {:?}", exe.display(), args);

        let output = duct::cmd(exe, args)
            .stderr_to_stdout()
            .stdout_capture()
            .unchecked()
            .run()?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            // Terminated-by-signal has no exit code; -1 keeps the
            // classification sets from matching it.
            let code = output.status.code().unwrap_or(-1);

            Err(NotarizationError::CommandFailed {
                label: label.to_string(),
                code,
                output: String::from_utf8_lossy(&output.stdout).into_owned(),
            })
        }
    }
}
