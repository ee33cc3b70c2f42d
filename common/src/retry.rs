// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-interval retry policies for calls to external collaborators
//!
//! External calls fail in two different ways and the policy treats them
//! differently: transport/availability failures
//! ([`Error::retryable`] is true) are retried up to the attempt bound with a
//! fixed delay between attempts; structured rejections are surfaced
//! immediately, since retrying a request the collaborator has rejected
//! cannot succeed.

use crate::error::Error;
use slog::Logger;
use std::future::Future;
use std::time::Duration;

/// A bounded number of attempts with a fixed delay between them
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// total attempts, including the first one
    pub max_attempts: u32,
    /// fixed delay between consecutive attempts
    pub delay: Duration,
}

/// Policy for configuration convergence runs: one initial attempt plus two
/// retries, 120 seconds apart.
pub fn ansible_run_policy() -> RetryPolicy {
    RetryPolicy { max_attempts: 3, delay: Duration::from_secs(120) }
}

/// Policy for VM control API calls on the provisioning path: retry every five
/// minutes for roughly 24 hours, riding out prolonged control-API outages.
pub fn vm_api_policy() -> RetryPolicy {
    RetryPolicy { max_attempts: 289, delay: Duration::from_secs(5 * 60) }
}

/// Policy for VM control API calls on teardown paths.  Teardown callers
/// (site purge, clone replacement) are themselves re-run periodically, so
/// there is no point holding one of their activations open for a day.
pub fn vm_teardown_policy() -> RetryPolicy {
    RetryPolicy { max_attempts: 3, delay: Duration::from_secs(60) }
}

impl RetryPolicy {
    /// Runs `call` under this policy, returning the first success, the first
    /// non-retryable error, or the last error once attempts are exhausted.
    ///
    /// Every failed attempt is logged with the operation name and attempt
    /// number so that an exhausted policy leaves a usable trail.
    pub async fn run<T, F, Fut>(
        &self,
        log: &Logger,
        operation: &str,
        mut call: F,
    ) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(error)
                    if error.retryable() && attempt < self.max_attempts =>
                {
                    slog::warn!(
                        log,
                        "external call failed; will retry";
                        "operation" => operation,
                        "attempt" => attempt,
                        "max_attempts" => self.max_attempts,
                        "retry_delay_secs" => self.delay.as_secs(),
                        "error" => %error,
                    );
                    attempt += 1;
                    tokio::time::sleep(self.delay).await;
                }
                Err(error) => {
                    slog::error!(
                        log,
                        "external call failed";
                        "operation" => operation,
                        "attempt" => attempt,
                        "error" => %error,
                    );
                    return Err(error);
                }
            }
        }
    }
}
