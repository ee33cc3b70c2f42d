// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Enumerated states used across the control plane
//!
//! The serialized form of each variant matches the strings persisted by the
//! panel's store, which external scripts (inventory export, monitoring) key
//! off of.  Changing a label is a compatibility break.

use crate::error::Error;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// Provisioning status of a [`Service`]
///
/// The provisioning path is ordered and monotonic:
///
/// ```text
/// requested -> installing -> postinstall -> ansible <-> ansible_queued
///                                              |
///                                              v
///                                            ready
/// ```
///
/// with two sanctioned back-edges: `ready -> ansible` (a new convergence run
/// on a settled service) and `ansible <-> ansible_queued` (coalescing a run
/// requested while one is in flight).  `requested -> ready` is the clone
/// completion path, where the external clone replaces the install phase.
/// `accepted` and `denied` are reserved for approval flows and take no part
/// in provisioning.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    JsonSchema,
    PartialEq,
    Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Requested,
    Installing,
    Postinstall,
    Ansible,
    AnsibleQueued,
    Ready,
    Accepted,
    Denied,
}

impl ServiceStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ServiceStatus::Requested => "requested",
            ServiceStatus::Installing => "installing",
            ServiceStatus::Postinstall => "postinstall",
            ServiceStatus::Ansible => "ansible",
            ServiceStatus::AnsibleQueued => "ansible_queued",
            ServiceStatus::Ready => "ready",
            ServiceStatus::Accepted => "accepted",
            ServiceStatus::Denied => "denied",
        }
    }

    /// Returns whether `self -> next` is a documented edge of the
    /// provisioning state machine.
    pub fn can_transition_to(&self, next: ServiceStatus) -> bool {
        use ServiceStatus::*;
        matches!(
            (self, next),
            (Requested, Installing)
                | (Requested, Ready)
                | (Installing, Postinstall)
                | (Postinstall, Ansible)
                | (Ansible, AnsibleQueued)
                | (AnsibleQueued, Ansible)
                | (Ansible, Ready)
                | (AnsibleQueued, Ready)
                | (Ready, Ansible)
        )
    }

    /// Validates `from -> to`, rejecting anything outside the documented
    /// edges.
    pub fn validate_transition(
        from: ServiceStatus,
        to: ServiceStatus,
    ) -> Result<(), Error> {
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(Error::UnexpectedVmStatus { found: from })
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl TryFrom<&str> for ServiceStatus {
    type Error = String;

    fn try_from(variant: &str) -> Result<Self, Self::Error> {
        let r = match variant {
            "requested" => ServiceStatus::Requested,
            "installing" => ServiceStatus::Installing,
            "postinstall" => ServiceStatus::Postinstall,
            "ansible" => ServiceStatus::Ansible,
            "ansible_queued" => ServiceStatus::AnsibleQueued,
            "ready" => ServiceStatus::Ready,
            "accepted" => ServiceStatus::Accepted,
            "denied" => ServiceStatus::Denied,
            _ => return Err(format!("Unexpected service status: {}", variant)),
        };
        Ok(r)
    }
}

/// Which deployable unit of a site a service is
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Production,
    Test,
}

impl ServiceKind {
    pub fn label(&self) -> &'static str {
        match self {
            ServiceKind::Production => "production",
            ServiceKind::Test => "test",
        }
    }

    /// The other unit of the pair (clone and switch operate across the two).
    pub fn other(&self) -> ServiceKind {
        match self {
            ServiceKind::Production => ServiceKind::Test,
            ServiceKind::Test => ServiceKind::Production,
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Status of a domain name request
///
/// `requested` is the only pending state; `denied` keeps the request visible
/// with its rejection reason; the remaining states are settled
/// classifications.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DomainStatus {
    Requested,
    Accepted,
    Denied,
    External,
    Private,
    Global,
    Special,
    Deleted,
}

impl DomainStatus {
    pub fn label(&self) -> &'static str {
        match self {
            DomainStatus::Requested => "requested",
            DomainStatus::Accepted => "accepted",
            DomainStatus::Denied => "denied",
            DomainStatus::External => "external",
            DomainStatus::Private => "private",
            DomainStatus::Global => "global",
            DomainStatus::Special => "special",
            DomainStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Pool type tag of a [`NetworkConfig`] entry
///
/// Services consume `ipvxpub` entries; VM hosts consume `ipv4priv`.  The
/// labels are the persisted pool tags.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
pub enum NetworkConfigKind {
    #[serde(rename = "ipv4pub")]
    Ipv4Pub,
    #[serde(rename = "ipv4priv")]
    Ipv4Priv,
    #[serde(rename = "ipvxpub")]
    IpvxPub,
    #[serde(rename = "ipvxpriv")]
    IpvxPriv,
    #[serde(rename = "ipv6")]
    Ipv6,
}

impl NetworkConfigKind {
    pub fn label(&self) -> &'static str {
        match self {
            NetworkConfigKind::Ipv4Pub => "ipv4pub",
            NetworkConfigKind::Ipv4Priv => "ipv4priv",
            NetworkConfigKind::IpvxPub => "ipvxpub",
            NetworkConfigKind::IpvxPriv => "ipvxpriv",
            NetworkConfigKind::Ipv6 => "ipv6",
        }
    }
}

impl fmt::Display for NetworkConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Power actions accepted by the VM control API's `button` operation
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
pub enum PowerAction {
    #[serde(rename = "poweron")]
    PowerOn,
    #[serde(rename = "poweroff")]
    PowerOff,
    #[serde(rename = "reboot")]
    Reboot,
}

impl PowerAction {
    pub fn label(&self) -> &'static str {
        match self {
            PowerAction::PowerOn => "poweron",
            PowerAction::PowerOff => "poweroff",
            PowerAction::Reboot => "reboot",
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}
