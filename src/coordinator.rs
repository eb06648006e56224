// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Driving a batch of notarization requests to completion.

Notarization is asynchronous on Apple's side: a submission returns an
opaque request ID and the verdict arrives whenever their scanners get to
it, typically minutes later. The coordinator submits a batch of
artifacts and then polls every outstanding request in rounds, backing
off between rounds, until everything resolves or a global wait budget is
exhausted.

Everything here is synchronous and single-threaded. Requests are polled
sequentially within a round; the only blocking waits are the tool
invocations themselves and the inter-round sleeps.
*/

use {
    crate::{
        backend_for_config, NotarizationConfig, NotarizationError, NotarizationRequest,
        NotaryBackend, Status,
    },
    log::{error, info},
    std::{
        collections::VecDeque,
        path::Path,
        time::{Duration, SystemTime},
    },
};

/// Delay before the second polling round. Doubles each round.
pub const INITIAL_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Cap on the inter-round delay.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Cumulative sleep budget for one wait. Exceeding it fails the batch.
pub const MAX_TOTAL_WAIT: Duration = Duration::from_secs(60 * 60);

/// Submits artifacts and waits on their notarization verdicts.
pub struct NotarizationCoordinator {
    backend: Box<dyn NotaryBackend>,
    sleeper: Box<dyn Fn(Duration)>,
}

impl NotarizationCoordinator {
    pub fn new(backend: Box<dyn NotaryBackend>) -> Self {
        Self {
            backend,
            sleeper: Box::new(std::thread::sleep),
        }
    }

    /// Construct with the backend selected by `config`.
    pub fn for_config(config: NotarizationConfig) -> Self {
        Self::new(backend_for_config(config))
    }

    /// Replace the inter-round sleep implementation.
    pub fn set_sleeper(&mut self, sleeper: Box<dyn Fn(Duration)>) {
        self.sleeper = sleeper;
    }

    /// Submit every artifact, returning the accepted requests in
    /// submission order.
    ///
    /// The first submission failure aborts the batch.
    pub fn submit_all(
        &self,
        paths: impl IntoIterator<Item = impl AsRef<Path>>,
    ) -> Result<Vec<NotarizationRequest>, NotarizationError> {
        let mut requests = Vec::new();

        for path in paths {
            let path = path.as_ref();
            let request_id = self.backend.submit(path)?;

            requests.push(NotarizationRequest {
                request_id,
                artifact_path: path.to_path_buf(),
                submitted_at: SystemTime::now(),
            });
        }

        Ok(requests)
    }

    /// Wait for every request to resolve, streaming request IDs as they
    /// succeed.
    ///
    /// The returned iterator yields `Ok(request_id)` for each request
    /// the service accepts. Any request resolving to an error verdict
    /// produces a single `Err` item and ends iteration; successes
    /// resolved in the same polling round as the failure are not
    /// surfaced, while successes from earlier rounds have already been
    /// yielded (consumer-visible partial results; a failed batch does
    /// not un-notarize siblings). Exhausting the cumulative
    /// [MAX_TOTAL_WAIT] sleep budget produces `Err` naming the
    /// still-outstanding IDs.
    ///
    /// # Panics
    ///
    /// Panics if `request_ids` is empty; waiting on nothing is a caller
    /// bug, not a trivially successful wait.
    pub fn wait_for_results(&self, request_ids: &[String]) -> WaitForResults<'_> {
        assert!(
            !request_ids.is_empty(),
            "wait_for_results called with no outstanding requests"
        );

        WaitForResults {
            backend: self.backend.as_ref(),
            sleeper: self.sleeper.as_ref(),
            wait_set: request_ids.to_vec(),
            ready: VecDeque::new(),
            sleep: INITIAL_POLL_INTERVAL,
            total_slept: Duration::ZERO,
            first_round: true,
            finished: false,
        }
    }
}

/// Iterator returned by [NotarizationCoordinator::wait_for_results].
pub struct WaitForResults<'a> {
    backend: &'a dyn NotaryBackend,
    sleeper: &'a dyn Fn(Duration),
    wait_set: Vec<String>,
    ready: VecDeque<String>,
    sleep: Duration,
    total_slept: Duration,
    first_round: bool,
    finished: bool,
}

impl Iterator for WaitForResults<'_> {
    type Item = Result<String, NotarizationError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(request_id) = self.ready.pop_front() {
                return Some(Ok(request_id));
            }

            if self.finished || self.wait_set.is_empty() {
                self.finished = true;
                return None;
            }

            if !self.first_round {
                if self.total_slept >= MAX_TOTAL_WAIT {
                    self.finished = true;
                    return Some(Err(NotarizationError::WaitTimeout(std::mem::take(
                        &mut self.wait_set,
                    ))));
                }

                (self.sleeper)(self.sleep);
                self.total_slept += self.sleep;
                self.sleep = std::cmp::min(self.sleep * 2, MAX_POLL_INTERVAL);
            }
            self.first_round = false;

            // One polling round over the outstanding requests, in
            // insertion order.
            for request_id in self.wait_set.clone() {
                let result = match self.backend.poll(&request_id) {
                    Ok(result) => result,
                    Err(err) => {
                        self.finished = true;
                        self.ready.clear();
                        return Some(Err(err));
                    }
                };

                match result.status {
                    Status::InProgress => {}
                    Status::Success => {
                        info!("successfully notarized request {}", request_id);
                        self.wait_set.retain(|id| id != &request_id);
                        self.ready.push_back(request_id);
                    }
                    Status::Error => {
                        error!("failed to notarize request {}", request_id);
                        if let Some(output) = &result.output {
                            error!("output: {}", output);
                        }
                        if let Some(log_file) = &result.log_file {
                            error!("log: {}", log_file);
                        }

                        self.finished = true;
                        // Successes resolved in this same round are
                        // dropped: the batch has already failed.
                        self.ready.clear();

                        return Some(Err(NotarizationError::RequestFailed {
                            request_id,
                            status: result.status_string.unwrap_or_default(),
                            output: result.output.unwrap_or_default(),
                            log_file: result.log_file,
                        }));
                    }
                }
            }
        }
    }
}
