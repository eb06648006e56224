// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Legacy notary backend driving `altool`.

`altool` reports results as property lists on stdout and signals many of
its failure modes through exit codes alone. Submission is retried on the
exit codes known to be flaky; polling instead coerces a handful of
documented transient signatures into [Status::InProgress] and lets the
coordinator's own loop try again.
*/

use {
    crate::{
        find_xcrun_exe, CommandRunner, NotarizationConfig, NotarizationError, NotarizationResult,
        NotaryBackend, ProcessRunner, RetryPolicy, RetryableRunner, Status,
    },
    log::{info, warn},
    std::{
        io::Cursor,
        path::{Path, PathBuf},
    },
};

/// `altool` exit codes retried at submission time.
///
/// 1 - general failure
/// 13 - A server with the specified hostname could not be found.
/// 176 - Unable to find requested file(s): metadata.xml (1057)
/// 236 - Exception occurred when creating MZContentProviderUpload for provider. (1004)
/// 240 - SIGSEGV in the Java Runtime Environment
/// 250 - Unable to process upload done request at this time due to a general error (1018)
pub const ALTOOL_SUBMIT_RETRY_CODES: [i32; 6] = [1, 13, 176, 236, 240, 250];

/// Exit code for iTunes Connect operation errors, whose plist payload
/// carries a `product-errors` array with the real failure code.
const OPERATION_ERROR_EXIT_CODE: i32 = 239;

/// A server with the specified hostname could not be found.
const HOST_NOT_FOUND_EXIT_CODE: i32 = 13;

/// General failure with no further detail.
const GENERAL_FAILURE_EXIT_CODE: i32 = 1;

/// `product-errors` code reported when a request is not found, which
/// happens transiently right after submission while the request
/// propagates through Apple's systems.
const REQUEST_NOT_FOUND_PRODUCT_ERROR: i64 = 1519;

/// [NotaryBackend] implementation for the legacy `altool` workflow.
pub struct AltoolBackend {
    config: NotarizationConfig,
    xcrun_exe: PathBuf,
    runner: Box<dyn CommandRunner>,
}

impl AltoolBackend {
    pub fn new(config: NotarizationConfig) -> Self {
        Self {
            config,
            xcrun_exe: find_xcrun_exe(),
            runner: Box::new(ProcessRunner),
        }
    }

    /// Replace the command runner.
    pub fn set_runner(&mut self, runner: Box<dyn CommandRunner>) {
        self.runner = runner;
    }

    /// Credential arguments shared by submission and polling.
    ///
    /// The password is forwarded verbatim: `altool` itself resolves
    /// `@keychain:` and `@env:` references.
    fn notary_args(&self) -> Vec<String> {
        let mut args = vec![
            "--username".to_string(),
            self.config.notary_user.clone(),
            "--password".to_string(),
            self.config.notary_password.clone(),
        ];

        if let Some(provider) = &self.config.notary_asc_provider {
            args.push("--asc-provider".to_string());
            args.push(provider.clone());
        }

        args
    }
}

impl NotaryBackend for AltoolBackend {
    fn submit(&self, path: &Path) -> Result<String, NotarizationError> {
        let mut args = vec![
            "altool".to_string(),
            "--notarize-app".to_string(),
            "--file".to_string(),
            path.display().to_string(),
            "--primary-bundle-id".to_string(),
            self.config.primary_bundle_id.clone(),
        ];
        args.extend(self.notary_args());
        args.push("--output-format".to_string());
        args.push("xml".to_string());

        let retry = RetryableRunner::new(RetryPolicy::new(ALTOOL_SUBMIT_RETRY_CODES));
        let output = retry.run("altool --notarize-app", || {
            self.runner
                .run_command_output("altool --notarize-app", &self.xcrun_exe, &args)
        })?;

        let request_id = parse_submit_response(&output)?;
        info!("submitted {} as request {}", path.display(), request_id);

        Ok(request_id)
    }

    fn poll(&self, request_id: &str) -> Result<NotarizationResult, NotarizationError> {
        let mut args = vec![
            "altool".to_string(),
            "--notarization-info".to_string(),
            request_id.to_string(),
        ];
        args.extend(self.notary_args());
        args.push("--output-format".to_string());
        args.push("xml".to_string());

        match self
            .runner
            .run_command_output("altool --notarization-info", &self.xcrun_exe, &args)
        {
            Ok(output) => parse_poll_response(&output),
            Err(err) => match classify_poll_failure(&err) {
                Some(result) => {
                    warn!("treating altool poll failure as still in progress: {}", err);
                    Ok(result)
                }
                None => Err(err),
            },
        }
    }
}

/// Extract the request UUID from a submission response plist.
///
/// Reads the fixed key path `notarization-upload.RequestUUID`.
fn parse_submit_response(data: &[u8]) -> Result<String, NotarizationError> {
    let value = plist::Value::from_reader(Cursor::new(data))
        .map_err(|e| NotarizationError::PlistParse("altool", e))?;

    value
        .as_dictionary()
        .and_then(|d| d.get("notarization-upload"))
        .and_then(|v| v.as_dictionary())
        .and_then(|d| d.get("RequestUUID"))
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
        .ok_or(NotarizationError::ResponseMissingKey(
            "altool",
            "notarization-upload.RequestUUID",
        ))
}

/// Map a `--notarization-info` response plist onto the three-state model.
fn parse_poll_response(data: &[u8]) -> Result<NotarizationResult, NotarizationError> {
    let value = plist::Value::from_reader(Cursor::new(data))
        .map_err(|e| NotarizationError::PlistParse("altool", e))?;

    let info = value
        .as_dictionary()
        .and_then(|d| d.get("notarization-info"))
        .and_then(|v| v.as_dictionary())
        .ok_or(NotarizationError::ResponseMissingKey(
            "altool",
            "notarization-info",
        ))?;

    let status = info
        .get("Status")
        .and_then(|v| v.as_string())
        .ok_or(NotarizationError::ResponseMissingKey(
            "altool",
            "notarization-info.Status",
        ))?;

    let output = String::from_utf8_lossy(data).into_owned();

    let result = match status {
        "in progress" => NotarizationResult {
            status: Status::InProgress,
            status_string: Some(status.to_string()),
            output: None,
            log_file: None,
        },
        "success" => NotarizationResult {
            status: Status::Success,
            status_string: Some(status.to_string()),
            output: Some(output),
            log_file: None,
        },
        _ => NotarizationResult {
            status: Status::Error,
            status_string: Some(status.to_string()),
            output: Some(output),
            log_file: info
                .get("LogFileURL")
                .and_then(|v| v.as_string())
                .map(|s| s.to_string()),
        },
    };

    Ok(result)
}

/// Decide whether a failed poll invocation is one of the documented
/// transient signatures that should read as still-in-progress.
///
/// Covered signatures:
/// - exit 239 with `product-errors[0].code == 1519`: the request is not
///   visible yet right after submission (eventual consistency, not a
///   submission failure);
/// - exit 13: hostname lookup failure;
/// - exit 1: ambiguous general failure, where retrying beats failing the
///   whole batch.
fn classify_poll_failure(err: &NotarizationError) -> Option<NotarizationResult> {
    let NotarizationError::CommandFailed { code, output, .. } = err else {
        return None;
    };

    match *code {
        OPERATION_ERROR_EXIT_CODE => {
            let product_error = plist::Value::from_reader(Cursor::new(output.as_bytes())).ok()?;
            let first_code = product_error
                .as_dictionary()?
                .get("product-errors")?
                .as_array()?
                .first()?
                .as_dictionary()?
                .get("code")?
                .as_signed_integer()?;

            (first_code == REQUEST_NOT_FOUND_PRODUCT_ERROR).then(NotarizationResult::in_progress)
        }
        HOST_NOT_FOUND_EXIT_CODE | GENERAL_FAILURE_EXIT_CODE => {
            Some(NotarizationResult::in_progress())
        }
        _ => None,
    }
}
