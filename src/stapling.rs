// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Attach notarization tickets to signed bundle trees.

Stapling writes the Apple-issued ticket into each bundle so Gatekeeper
can verify it offline. An artifact tree typically holds nested bundles
(an `.app` containing `.xpc` services); nested bundles are stapled
before their containers so a container's staple never observes an
unstapled child.
*/

use {
    crate::{
        find_xcrun_exe, CommandRunner, NotarizationError, ProcessRunner, RetryPolicy,
        RetryableRunner,
    },
    log::warn,
    std::path::{Path, PathBuf},
};

/// `stapler` exit codes known to be transient.
///
/// 65 - CloudKit query failed due to "(null)"
/// 68 - A server with the specified hostname could not be found.
pub const STAPLE_RETRY_CODES: [i32; 2] = [65, 68];

/// What a signed part is, derived from its file extension.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PartKind {
    App,
    XpcService,
    FlatPackage,
    Other,
}

/// A signed part of an artifact tree, identified by its path relative to
/// the working directory.
#[derive(Clone, Debug)]
pub struct BundlePart {
    pub path: PathBuf,
}

impl BundlePart {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn kind(&self) -> PartKind {
        match self.path.extension().and_then(|e| e.to_str()) {
            Some("app") => PartKind::App,
            Some("xpc") => PartKind::XpcService,
            Some("pkg") => PartKind::FlatPackage,
            _ => PartKind::Other,
        }
    }

    /// Whether this part is stapled when stapling a bundle tree.
    ///
    /// Flat packages are stapled standalone via [Stapler::staple], not
    /// as part of a tree; other parts (bare binaries, frameworks) never
    /// carry their own ticket.
    pub fn is_staple_target(&self) -> bool {
        matches!(self.kind(), PartKind::App | PartKind::XpcService)
    }
}

/// Filter and order parts for stapling.
///
/// Paths sort reverse-lexicographically, which places nested bundles
/// ahead of their containers for typical layouts (`A.app/Contents/...`
/// sorts after, thus staples before, `A.app`). This is a heuristic over
/// path strings, not a containment-graph sort; a shorter path that is
/// not actually an ancestor can defeat it.
pub fn staple_order(parts: &[BundlePart]) -> Vec<&BundlePart> {
    let mut targets = parts
        .iter()
        .filter(|part| part.is_staple_target())
        .collect::<Vec<_>>();

    targets.sort_by(|a, b| b.path.as_os_str().cmp(a.path.as_os_str()));

    targets
}

/// Staples notarization tickets via the `stapler` tool.
pub struct Stapler {
    xcrun_exe: PathBuf,
    runner: Box<dyn CommandRunner>,
    retry: RetryableRunner,
}

impl Stapler {
    pub fn new() -> Self {
        Self {
            xcrun_exe: find_xcrun_exe(),
            runner: Box::new(ProcessRunner),
            // Staple failures tend to be time-dependent (the ticket may
            // not have propagated yet), so retries pause first.
            retry: RetryableRunner::new(RetryPolicy::new(STAPLE_RETRY_CODES).sleep_before_retry()),
        }
    }

    /// Replace the command runner.
    pub fn set_runner(&mut self, runner: Box<dyn CommandRunner>) {
        self.runner = runner;
    }

    /// Replace the retry runner wrapping each staple invocation.
    pub fn set_retry(&mut self, retry: RetryableRunner) {
        self.retry = retry;
    }

    /// Staple every stapleable part of an artifact tree rooted at
    /// `work_dir`, nested bundles first.
    ///
    /// The first unretryable failure propagates; there is no partial
    /// success to report since the caller treats the tree as one unit.
    pub fn staple_bundled_parts(
        &self,
        parts: &[BundlePart],
        work_dir: &Path,
    ) -> Result<(), NotarizationError> {
        for part in staple_order(parts) {
            self.staple(&work_dir.join(&part.path))?;
        }

        Ok(())
    }

    /// Staple a single entity at a filesystem path.
    pub fn staple(&self, path: &Path) -> Result<(), NotarizationError> {
        warn!("stapling {}", path.display());

        let args = vec![
            "stapler".to_string(),
            "staple".to_string(),
            "-v".to_string(),
            path.display().to_string(),
        ];

        self.retry.run("staple", || {
            self.runner
                .run_command_output("stapler staple", &self.xcrun_exe, &args)
                .map(|_| ())
        })
    }
}

impl Default for Stapler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        std::{cell::RefCell, collections::VecDeque, rc::Rc},
    };

    /// Records every argument vector; responses scripted, defaulting to
    /// success once the script runs dry.
    struct RecordingRunner {
        responses: RefCell<VecDeque<Result<Vec<u8>, NotarizationError>>>,
        calls: Rc<RefCell<Vec<Vec<String>>>>,
    }

    impl RecordingRunner {
        fn new(
            responses: impl IntoIterator<Item = Result<Vec<u8>, NotarizationError>>,
        ) -> Self {
            Self {
                responses: RefCell::new(responses.into_iter().collect()),
                calls: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn call_log(&self) -> Rc<RefCell<Vec<Vec<String>>>> {
            self.calls.clone()
        }
    }

    impl CommandRunner for RecordingRunner {
        fn run_command_output(
            &self,
            _label: &str,
            _exe: &Path,
            args: &[String],
        ) -> Result<Vec<u8>, NotarizationError> {
            self.calls.borrow_mut().push(args.to_vec());
            self.responses
                .borrow_mut()
                .pop_front()
                .unwrap_or(Ok(Vec::new()))
        }
    }

    fn command_failed(code: i32) -> NotarizationError {
        NotarizationError::CommandFailed {
            label: "stapler staple".to_string(),
            code,
            output: "output".to_string(),
        }
    }

    fn quiet_retry() -> RetryableRunner {
        let mut retry =
            RetryableRunner::new(RetryPolicy::new(STAPLE_RETRY_CODES).sleep_before_retry());
        retry.set_sleeper(Box::new(|_| {}));
        retry
    }

    fn parts(paths: &[&str]) -> Vec<BundlePart> {
        paths.iter().map(|path| BundlePart::new(*path)).collect()
    }

    #[test]
    fn kind_from_extension() {
        assert_eq!(BundlePart::new("A.app").kind(), PartKind::App);
        assert_eq!(
            BundlePart::new("A.app/Contents/XPCServices/B.xpc").kind(),
            PartKind::XpcService
        );
        assert_eq!(BundlePart::new("Installer.pkg").kind(), PartKind::FlatPackage);
        assert_eq!(
            BundlePart::new("A.app/Contents/MacOS/helper").kind(),
            PartKind::Other
        );
    }

    #[test]
    fn nested_bundles_order_before_containers() {
        let parts = parts(&[
            "A.app",
            "A.app/Contents/XPCServices/B.xpc",
            "A.app/Contents/Plugins/C.xpc",
        ]);

        let ordered = staple_order(&parts)
            .into_iter()
            .map(|part| part.path.display().to_string())
            .collect::<Vec<_>>();

        // Reverse-lexicographic, so both children precede the container.
        assert_eq!(
            ordered,
            vec![
                "A.app/Contents/XPCServices/B.xpc",
                "A.app/Contents/Plugins/C.xpc",
                "A.app",
            ]
        );
        assert_eq!(ordered.last().map(String::as_str), Some("A.app"));
    }

    #[test]
    fn non_bundle_parts_are_skipped() {
        let parts = parts(&[
            "A.app",
            "Installer.pkg",
            "A.app/Contents/MacOS/helper",
            "A.app/Contents/XPCServices/B.xpc",
        ]);

        let ordered = staple_order(&parts);

        assert_eq!(ordered.len(), 2);
        assert!(ordered.iter().all(|part| part.is_staple_target()));
    }

    #[test]
    fn staples_tree_deepest_first() -> Result<(), NotarizationError> {
        let runner = RecordingRunner::new([]);
        let calls = runner.call_log();

        let mut stapler = Stapler::new();
        stapler.set_runner(Box::new(runner));

        stapler.staple_bundled_parts(
            &parts(&["A.app", "A.app/Contents/XPCServices/B.xpc"]),
            Path::new("/work"),
        )?;

        let calls = calls.borrow();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0],
            vec![
                "stapler",
                "staple",
                "-v",
                "/work/A.app/Contents/XPCServices/B.xpc",
            ]
        );
        assert_eq!(calls[1], vec!["stapler", "staple", "-v", "/work/A.app"]);

        Ok(())
    }

    #[test]
    fn transient_staple_failures_are_retried() -> Result<(), NotarizationError> {
        let runner = RecordingRunner::new([
            Err(command_failed(65)),
            Err(command_failed(68)),
            Ok(Vec::new()),
        ]);
        let calls = runner.call_log();

        let mut stapler = Stapler::new();
        stapler.set_runner(Box::new(runner));
        stapler.set_retry(quiet_retry());

        stapler.staple(Path::new("/work/A.app"))?;

        assert_eq!(calls.borrow().len(), 3);

        Ok(())
    }

    #[test]
    fn unknown_staple_failure_propagates_immediately() {
        let runner = RecordingRunner::new([Err(command_failed(1))]);
        let calls = runner.call_log();

        let mut stapler = Stapler::new();
        stapler.set_runner(Box::new(runner));
        stapler.set_retry(quiet_retry());

        let err = stapler.staple(Path::new("/work/A.app")).unwrap_err();

        assert!(matches!(
            err,
            NotarizationError::CommandFailed { code: 1, .. }
        ));
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn tree_staple_stops_on_first_failure() {
        let runner = RecordingRunner::new([
            Ok(Vec::new()),
            Err(command_failed(1)),
        ]);
        let calls = runner.call_log();

        let mut stapler = Stapler::new();
        stapler.set_runner(Box::new(runner));
        stapler.set_retry(quiet_retry());

        let err = stapler
            .staple_bundled_parts(
                &parts(&[
                    "A.app",
                    "A.app/Contents/XPCServices/B.xpc",
                    "A.app/Contents/Plugins/C.xpc",
                ]),
                Path::new("/work"),
            )
            .unwrap_err();

        assert!(matches!(err, NotarizationError::CommandFailed { .. }));
        // The deepest part stapled, the second failed, the container was
        // never attempted.
        assert_eq!(calls.borrow().len(), 2);
    }
}
