// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Bounded retries for flaky notary service interactions.

Apple's notary tooling fails transiently in well-known ways, each with a
documented exit code. Operations that are safe to repeat are wrapped in a
[RetryableRunner] configured with the exit codes known to be flaky for
that specific operation. Anything outside the allow-list propagates
immediately and unchanged.
*/

use {
    crate::NotarizationError,
    log::warn,
    std::{collections::BTreeSet, time::Duration},
};

/// Total attempts made for a retryable operation.
pub const NOTARY_SERVICE_MAX_RETRIES: u32 = 3;

/// Fixed delay applied before a retry when [RetryPolicy::sleep_before_retry] is set.
pub const RETRY_SLEEP: Duration = Duration::from_secs(30);

/// Which failures of an operation are worth retrying, and how.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Cap on total attempts, including the first.
    pub max_attempts: u32,

    /// Exit codes known to indicate a transient failure of this operation.
    pub known_bad_returncodes: BTreeSet<i32>,

    /// Whether to pause for [RETRY_SLEEP] before each retry.
    pub sleep_before_retry: bool,
}

impl RetryPolicy {
    pub fn new(known_bad_returncodes: impl IntoIterator<Item = i32>) -> Self {
        Self {
            max_attempts: NOTARY_SERVICE_MAX_RETRIES,
            known_bad_returncodes: known_bad_returncodes.into_iter().collect(),
            sleep_before_retry: false,
        }
    }

    pub fn sleep_before_retry(mut self) -> Self {
        self.sleep_before_retry = true;
        self
    }
}

/// Executes an operation, retrying known-transient process failures.
pub struct RetryableRunner {
    policy: RetryPolicy,
    sleeper: Box<dyn Fn(Duration)>,
}

impl RetryableRunner {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            sleeper: Box::new(std::thread::sleep),
        }
    }

    /// Replace the sleep implementation.
    pub fn set_sleeper(&mut self, sleeper: Box<dyn Fn(Duration)>) {
        self.sleeper = sleeper;
    }

    /// Run `operation` until it succeeds, fails unretryably, or the
    /// attempt cap is reached.
    ///
    /// Only [NotarizationError::CommandFailed] with an exit code in the
    /// policy's allow-list is retried. The final error is propagated
    /// exactly as the operation raised it; successful output is returned
    /// untouched.
    pub fn run<T>(
        &self,
        label: &str,
        mut operation: impl FnMut() -> Result<T, NotarizationError>,
    ) -> Result<T, NotarizationError> {
        let mut attempt = 0;

        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;

                    match &err {
                        NotarizationError::CommandFailed { code, output, .. }
                            if attempt < self.policy.max_attempts
                                && self.policy.known_bad_returncodes.contains(code) =>
                        {
                            warn!("retrying {}, exited {}, output: {}", label, code, output);

                            if self.policy.sleep_before_retry {
                                (self.sleeper)(RETRY_SLEEP);
                            }
                        }
                        _ => return Err(err),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        std::{cell::RefCell, rc::Rc},
    };

    fn failure(code: i32) -> NotarizationError {
        NotarizationError::CommandFailed {
            label: "op".to_string(),
            code,
            output: "output".to_string(),
        }
    }

    #[test]
    fn known_bad_code_exhausts_attempts() {
        let runner = RetryableRunner::new(RetryPolicy::new([42]));

        let mut calls = 0;
        let err = runner
            .run("op", || -> Result<(), NotarizationError> {
                calls += 1;
                Err(failure(42))
            })
            .unwrap_err();

        assert_eq!(calls, 3);
        assert!(matches!(
            err,
            NotarizationError::CommandFailed { code: 42, .. }
        ));
    }

    #[test]
    fn unknown_code_is_not_retried() {
        let runner = RetryableRunner::new(RetryPolicy::new([42]));

        let mut calls = 0;
        let err = runner
            .run("op", || -> Result<(), NotarizationError> {
                calls += 1;
                Err(failure(7))
            })
            .unwrap_err();

        assert_eq!(calls, 1);
        assert!(matches!(
            err,
            NotarizationError::CommandFailed { code: 7, .. }
        ));
    }

    #[test]
    fn non_process_error_is_not_retried() {
        let runner = RetryableRunner::new(RetryPolicy::new([42]));

        let mut calls = 0;
        let err = runner
            .run("op", || -> Result<(), NotarizationError> {
                calls += 1;
                Err(NotarizationError::ResponseMissingKey("tool", "key"))
            })
            .unwrap_err();

        assert_eq!(calls, 1);
        assert!(matches!(err, NotarizationError::ResponseMissingKey(_, _)));
    }

    #[test]
    fn success_value_passes_through() -> Result<(), NotarizationError> {
        let runner = RetryableRunner::new(RetryPolicy::new([42]));

        let mut calls = 0;
        let value = runner.run("op", || {
            calls += 1;
            if calls < 3 {
                Err(failure(42))
            } else {
                Ok("done")
            }
        })?;

        assert_eq!(calls, 3);
        assert_eq!(value, "done");

        Ok(())
    }

    #[test]
    fn sleeps_before_each_retry_when_configured() {
        let mut runner = RetryableRunner::new(RetryPolicy::new([65]).sleep_before_retry());

        let sleeps = Rc::new(RefCell::new(Vec::new()));
        let recorded = sleeps.clone();
        runner.set_sleeper(Box::new(move |d| recorded.borrow_mut().push(d)));

        let mut calls = 0;
        runner
            .run("op", || -> Result<(), NotarizationError> {
                calls += 1;
                Err(failure(65))
            })
            .unwrap_err();

        assert_eq!(calls, 3);
        assert_eq!(*sleeps.borrow(), vec![RETRY_SLEEP, RETRY_SLEEP]);
    }

    #[test]
    fn no_sleep_by_default() {
        let mut runner = RetryableRunner::new(RetryPolicy::new([65]));

        let sleeps = Rc::new(RefCell::new(Vec::new()));
        let recorded = sleeps.clone();
        runner.set_sleeper(Box::new(move |d| recorded.borrow_mut().push(d)));

        runner
            .run("op", || -> Result<(), NotarizationError> { Err(failure(65)) })
            .unwrap_err();

        assert!(sleeps.borrow().is_empty());
    }
}
