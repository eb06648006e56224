// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Unified error type for notarization operations.
#[derive(Debug, Error)]
pub enum NotarizationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An external tool exited non-zero.
    ///
    /// `output` holds the combined stdout/stderr of the invocation so
    /// callers can inspect the tool's structured payload.
    #[error("{label} exited {code}")]
    CommandFailed {
        label: String,
        code: i32,
        output: String,
    },

    #[error("error parsing {0} response plist: {1}")]
    PlistParse(&'static str, plist::Error),

    #[error("malformed {0} response: missing {1}")]
    ResponseMissingKey(&'static str, &'static str),

    #[error("notarization request {request_id} failed with status \"{status}\"")]
    RequestFailed {
        request_id: String,
        status: String,
        output: String,
        log_file: Option<String>,
    },

    #[error("timed out waiting for notarization requests: {0:?}")]
    WaitTimeout(Vec<String>),
}
