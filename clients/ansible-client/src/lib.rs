// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client for the configuration convergence runner
//!
//! The runner brings a host's installed state in line with its declared
//! configuration (packages, vhosts, users, TLS).  It is invoked once per VM
//! hostname with an operation tag and operation-specific parameters; zero
//! exit is success.  Runner operations are idempotent — the orchestration
//! core retries whole runs on that assumption.

pub mod command;
pub mod mock;

use async_trait::async_trait;
use mws_common::params::AnsibleOperation;
use mws_common::Error;

/// The convergence runner, reached per VM hostname
#[async_trait]
pub trait AnsibleRunner: Send + Sync {
    /// Run one operation against one host.  Failures map to
    /// `ServiceUnavailable` (the runner is retried by policy at the call
    /// site, not here).
    async fn run(
        &self,
        host: &str,
        operation: &AnsibleOperation,
    ) -> Result<(), Error>;
}
