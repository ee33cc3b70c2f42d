// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client for the external VM control API
//!
//! The control API creates, destroys, clones, and power-cycles virtual
//! machines.  The panel reaches it through the [`VmController`] trait so the
//! backend is selected once at startup and injected: the command-line
//! implementation in [`command`] for real deployments, the mock in [`mock`]
//! for tests and local development.

pub mod command;
pub mod mock;

use async_trait::async_trait;
use mws_common::params::NetconfParams;
use mws_common::params::VmCreateParams;
use mws_common::states::PowerAction;
use mws_common::Error;
use serde::Deserialize;

/// A response from the VM control API
///
/// Every operation answers with JSON; `vmid` (when present) is the external
/// identifier for the VM the operation touched or created.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct VmApiResponse {
    pub vmid: Option<String>,
}

/// Operations of the external VM control API
///
/// Errors follow the control plane taxonomy: an unreachable API or non-zero
/// exit maps to `ServiceUnavailable` (retryable), while a structured failure
/// response maps to `InvalidRequest` (fatal) — retrying a request the API
/// has rejected cannot succeed.
#[async_trait]
pub trait VmController: Send + Sync {
    /// Create a VM.  The request carries the network identity, resource
    /// sizing, and the post-install callback descriptor.
    async fn create_vm(
        &self,
        params: &VmCreateParams,
    ) -> Result<VmApiResponse, Error>;

    /// Destroy the VM with the given external identifier.
    async fn delete_vm(&self, vmid: &str) -> Result<(), Error>;

    /// Press a power button on the VM with the given external identifier.
    async fn button(&self, vmid: &str, action: PowerAction)
        -> Result<(), Error>;

    /// Clone an existing VM onto a new network identity.
    async fn clone_vm(
        &self,
        source_vmid: &str,
        netconf: &NetconfParams,
    ) -> Result<VmApiResponse, Error>;
}
