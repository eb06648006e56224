// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The notary backend contract.

Two generations of Apple notary tooling exist, with different
command-line shapes and response formats but the same two-operation
contract: upload an artifact and get back an opaque request ID, then ask
about that ID until the service reaches a verdict. Backends collapse all
tool-specific status vocabulary into the three-state [Status] before
anything else sees it.
*/

use {
    crate::{AltoolBackend, NotarizationConfig, NotarizationError, NotarizationTool, NotarytoolBackend},
    std::{
        path::{Path, PathBuf},
        time::SystemTime,
    },
};

/// Outcome of a single poll of an outstanding notarization request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    /// The service has not reached a verdict. The only non-terminal state.
    InProgress,

    /// The artifact was notarized and a ticket is available.
    Success,

    /// The service rejected the submission.
    Error,
}

/// A freshly polled view of a notarization request.
///
/// Created anew on every poll and never persisted; the coordinator
/// decides whether to keep polling from the status alone.
#[derive(Clone, Debug)]
pub struct NotarizationResult {
    pub status: Status,

    /// The backend's raw status text, informational only.
    pub status_string: Option<String>,

    /// Raw tool output, backend-specific format.
    pub output: Option<String>,

    /// URL of or content from a detailed failure log, when one could be
    /// obtained.
    pub log_file: Option<String>,
}

impl NotarizationResult {
    /// A result with no diagnostics, used when a transient condition is
    /// being treated as still-running.
    pub fn in_progress() -> Self {
        Self {
            status: Status::InProgress,
            status_string: None,
            output: None,
            log_file: None,
        }
    }
}

/// Record of one accepted submission.
#[derive(Clone, Debug)]
pub struct NotarizationRequest {
    /// Opaque identifier assigned by the notary service.
    pub request_id: String,

    /// The artifact that was uploaded.
    pub artifact_path: PathBuf,

    pub submitted_at: SystemTime,
}

/// Common contract over the legacy and modern notary tools.
pub trait NotaryBackend {
    /// Upload `path` for notarization, returning the service-assigned
    /// request ID.
    fn submit(&self, path: &Path) -> Result<String, NotarizationError>;

    /// Query the service for the named request.
    ///
    /// Transient service hiccups with documented signatures are folded
    /// into [Status::InProgress] rather than surfaced as errors.
    fn poll(&self, request_id: &str) -> Result<NotarizationResult, NotarizationError>;
}

/// Construct the backend selected by the configuration.
pub fn backend_for_config(config: NotarizationConfig) -> Box<dyn NotaryBackend> {
    match config.notarization_tool {
        NotarizationTool::Altool => Box::new(AltoolBackend::new(config)),
        NotarizationTool::Notarytool => Box::new(NotarytoolBackend::new(config)),
    }
}
