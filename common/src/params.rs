// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Parameter types exchanged with the VM control API and the configuration
//! convergence runner
//!
//! The serialized field names here are wire contract: the VM control API
//! expects `IPv4`/`IPv6`/`hostname` keys in `netconf` objects and a
//! `callback` descriptor carrying the shared secret for the post-install
//! callback.

use chrono::NaiveDate;
use serde::Deserialize;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use uuid::Uuid;

/// Network parameters sent with `create` and `clone` requests
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct NetconfParams {
    #[serde(rename = "IPv4")]
    pub ipv4: Ipv4Addr,
    #[serde(rename = "IPv6")]
    pub ipv6: Ipv6Addr,
    pub hostname: String,
}

/// Callback descriptor sent with `create` requests
///
/// The external installer presents `(vm_id, secret)` back to the panel when
/// the OS installation finishes; the secret is the VM's one-time token.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CallbackParams {
    pub endpoint: String,
    pub vm_id: Uuid,
    pub secret: String,
}

/// Body of a VM control API `create` request
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct VmCreateParams {
    #[serde(rename = "site-id")]
    pub site_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    pub netconf: NetconfParams,
    pub callback: CallbackParams,
}

/// Target of a snapshot restore: a daily automatic backup (by date) or a
/// custom snapshot (by name).
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreTarget {
    Date(NaiveDate),
    Named(String),
}

/// One operation of the configuration convergence runner, invoked per VM
/// hostname.  `tag()` is the operation tag on the runner's command line.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnsibleOperation {
    /// Bring the host in line with its declared configuration.
    DefaultRun {
        /// Skip host-key verification; used for the first run after an OS
        /// install, before the new host key has been recorded.
        ignore_host_key: bool,
    },
    CreateCustomSnapshot {
        name: String,
    },
    DeleteSnapshot {
        name: String,
    },
    RestoreSnapshot {
        target: RestoreTarget,
    },
    ChangeMysqlRootPwd,
    DeleteVhost {
        name: String,
        webapp: Option<String>,
    },
}

impl AnsibleOperation {
    pub fn tag(&self) -> &'static str {
        match self {
            AnsibleOperation::DefaultRun { .. } => "default run",
            AnsibleOperation::CreateCustomSnapshot { .. } => {
                "create_custom_snapshot"
            }
            AnsibleOperation::DeleteSnapshot { .. } => "delete_snapshot",
            AnsibleOperation::RestoreSnapshot { .. } => "restore_snapshot",
            AnsibleOperation::ChangeMysqlRootPwd => "change_mysql_root_pwd",
            AnsibleOperation::DeleteVhost { .. } => "delete_vhost",
        }
    }
}
