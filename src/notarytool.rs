// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Modern notary backend driving `notarytool`.

`notarytool` responses are flat plists, and the tool takes credentials as
first-class flags instead of the reference strings `altool` resolves
itself. Poll responses carry no log URL; on a failed verdict the backend
issues one extra `notarytool log` call, best effort.
*/

use {
    crate::{
        find_xcrun_exe, CommandRunner, NotarizationConfig, NotarizationError, NotarizationResult,
        NotaryBackend, ProcessRunner, Status,
    },
    log::{error, info},
    serde::Deserialize,
    std::{
        io::Cursor,
        path::{Path, PathBuf},
    },
};

/// Password references of this form name a keychain profile created with
/// `notarytool store-credentials`.
const KEYCHAIN_REFERENCE_PREFIX: &str = "@keychain:";

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    status: String,
}

/// [NotaryBackend] implementation for the modern `notarytool` workflow.
pub struct NotarytoolBackend {
    config: NotarizationConfig,
    xcrun_exe: PathBuf,
    runner: Box<dyn CommandRunner>,
}

impl NotarytoolBackend {
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

    fn notary_args(&self) -> Vec<String> {
        notary_args(&self.config)
    }

    /// Fetch the detailed log for a failed request.
    ///
    /// Failures here never escalate: the verdict already is an error, and
    /// a missing log only degrades diagnostics.
    fn fetch_log(&self, request_id: &str) -> Option<String> {
        let mut args = vec![
            "notarytool".to_string(),
            "log".to_string(),
            request_id.to_string(),
        ];
        args.extend(self.notary_args());

        match self
            .runner
            .run_command_output("notarytool log", &self.xcrun_exe, &args)
        {
            Ok(output) => Some(String::from_utf8_lossy(&output).into_owned()),
            Err(err) => {
                error!("unable to fetch notarization log for {}: {}", request_id, err);
                None
            }
        }
    }
}

impl NotaryBackend for NotarytoolBackend {
    fn submit(&self, path: &Path) -> Result<String, NotarizationError> {
        let mut args = vec![
            "notarytool".to_string(),
            "submit".to_string(),
            path.display().to_string(),
            "--no-wait".to_string(),
            "--output-format".to_string(),
            "plist".to_string(),
        ];
        args.extend(self.notary_args());

        // TODO: route submission through RetryableRunner once notarytool's
        // transient failure modes are cataloged the way altool's are.
        let output = self
            .runner
            .run_command_output("notarytool submit", &self.xcrun_exe, &args)?;

        let response: SubmitResponse = plist::from_reader(Cursor::new(&output))
            .map_err(|e| NotarizationError::PlistParse("notarytool", e))?;

        info!("submitted {} as request {}", path.display(), response.id);

        Ok(response.id)
    }

    fn poll(&self, request_id: &str) -> Result<NotarizationResult, NotarizationError> {
        let mut args = vec![
            "notarytool".to_string(),
            "info".to_string(),
            request_id.to_string(),
            "--output-format".to_string(),
            "plist".to_string(),
        ];
        args.extend(self.notary_args());

        let output = self
            .runner
            .run_command_output("notarytool info", &self.xcrun_exe, &args)?;

        let response: InfoResponse = plist::from_reader(Cursor::new(&output))
            .map_err(|e| NotarizationError::PlistParse("notarytool", e))?;

        let raw = String::from_utf8_lossy(&output).into_owned();

        let result = match response.status.as_str() {
            "In Progress" => NotarizationResult {
                status: Status::InProgress,
                status_string: Some(response.status),
                output: Some(raw),
                log_file: None,
            },
            "Accepted" => NotarizationResult {
                status: Status::Success,
                status_string: Some(response.status),
                output: Some(raw),
                log_file: None,
            },
            _ => NotarizationResult {
                status: Status::Error,
                status_string: Some(response.status),
                output: Some(raw),
                log_file: self.fetch_log(request_id),
            },
        };

        Ok(result)
    }
}

/// Credential arguments for `notarytool` subcommands.
///
/// `@keychain:profile` becomes `--keychain-profile profile`;
/// `@keychain:keychain:profile` additionally passes `--keychain`.
/// Anything else (including `@env:` references, which this workflow no
/// longer resolves) is passed through as `--password`.
fn notary_args(config: &NotarizationConfig) -> Vec<String> {
    let mut args = vec!["--apple-id".to_string(), config.notary_user.clone()];

    match config.notary_password.strip_prefix(KEYCHAIN_REFERENCE_PREFIX) {
        Some(reference) => match reference.split_once(':') {
            Some((keychain, profile)) => {
                args.push("--keychain".to_string());
                args.push(keychain.to_string());
                args.push("--keychain-profile".to_string());
                args.push(profile.to_string());
            }
            None => {
                args.push("--keychain-profile".to_string());
                args.push(reference.to_string());
            }
        },
        None => {
            args.push("--password".to_string());
            args.push(config.notary_password.clone());
        }
    }

    if let Some(team_id) = &config.notary_team_id {
        args.push("--team-id".to_string());
        args.push(team_id.clone());
    }

    args
}
