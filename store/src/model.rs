// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Record types held by the [`DataStore`](crate::DataStore)
//!
//! These are plain data carriers; invariants (uniqueness, allocation,
//! status transitions) are enforced by the store operations, and workflow
//! rules (snapshot quota, restore windows) by the orchestration core.

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use mws_common::states::DomainStatus;
use mws_common::states::NetworkConfigKind;
use mws_common::states::ServiceKind;
use mws_common::states::ServiceStatus;
use serde::Deserialize;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use uuid::Uuid;

/// A purchased (or pre-allocated) hosting account
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Site {
    pub id: Uuid,
    /// unique short name
    pub name: String,
    pub description: String,
    /// owning-institution reference
    pub institution: String,
    pub start_date: NaiveDate,
    /// None while the site is active; set when the site is cancelled
    pub end_date: Option<NaiveDate>,
    pub disabled: bool,
    pub preallocated: bool,
    pub subscription: bool,
    /// webmaster email
    pub email: Option<String>,
    pub server_type: Uuid,
    /// administrator usernames
    pub users: Vec<String>,
    pub ssh_users: Vec<String>,
    /// grace counter for the admin-loss watchdog
    pub days_without_admin: u32,
}

impl Site {
    /// Whether the site is operable: not cancelled and not disabled.
    pub fn is_active(&self) -> bool {
        self.end_date.is_none() && !self.disabled
    }

    pub fn is_cancelled(&self) -> bool {
        self.end_date.is_some()
    }
}

/// One deployable unit (production or test) of a site
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Service {
    pub id: Uuid,
    /// None only while pre-allocated and unassigned
    pub site: Option<Uuid>,
    pub kind: ServiceKind,
    pub status: ServiceStatus,
    pub quarantined: bool,
    pub network_config: Uuid,
}

/// The compute instance backing a service
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct VirtualMachine {
    pub id: Uuid,
    pub service: Uuid,
    /// external VM identifier; None until the control plane assigns one
    pub name: Option<String>,
    /// one-time shared secret for the post-install callback
    pub token: Uuid,
    pub numcpu: u32,
    pub sizeram_gb: u32,
    pub network_config: Uuid,
}

/// A pool entry of network identity: addresses plus hostname
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NetworkConfig {
    pub id: Uuid,
    pub kind: NetworkConfigKind,
    pub ipv4: Ipv4Addr,
    pub ipv6: Ipv6Addr,
    /// fully-qualified hostname; globally unique
    pub name: String,
}

/// A named virtual host under a service
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Vhost {
    pub id: Uuid,
    pub service: Uuid,
    pub name: String,
    /// main domain; cleared when the referenced domain name is deleted
    pub main_domain: Option<Uuid>,
    pub csr: Option<String>,
    pub certificate: Option<String>,
    pub certificate_chain: Option<String>,
    pub tls_key_hash: Option<String>,
    pub tls_enabled: bool,
    pub webapp: Option<String>,
}

/// A hostname request attached to a vhost
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DomainName {
    pub id: Uuid,
    pub vhost: Uuid,
    /// globally unique
    pub name: String,
    pub status: DomainStatus,
    pub reject_reason: Option<String>,
    pub requested_by: Option<String>,
    pub authorised_by: Option<String>,
    /// opaque confirmation token
    pub token: Uuid,
    pub requested_at: DateTime<Utc>,
}

/// A named point-in-time backup of a service
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub service: Uuid,
    /// unique per service; must not look like an ISO date (reserved for the
    /// daily automatic backups)
    pub name: String,
    /// stamped when the external snapshot operation completes
    pub date: Option<DateTime<Utc>>,
    /// marks an in-flight asynchronous deletion
    pub pending_delete: bool,
}

/// A unix group provisioned on a service's hosts
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UnixGroup {
    pub id: Uuid,
    pub service: Uuid,
    pub name: String,
    pub users: Vec<String>,
    pub to_be_deleted: bool,
}

/// Purchase-order details for a site
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Billing {
    pub id: Uuid,
    pub site: Uuid,
    pub purchase_order_number: String,
    pub group: String,
    pub date_sent_to_finance: Option<NaiveDate>,
}

/// An administrative suspension of a site
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Suspension {
    pub id: Uuid,
    pub site: Uuid,
    pub reason: String,
    pub active: bool,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

/// A server tier: resource sizing copied onto new VMs
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ServerType {
    pub id: Uuid,
    pub name: String,
    pub numcpu: u32,
    pub sizeram_gb: u32,
    pub sizedisk_gb: u32,
    /// annual price in whole currency units; consumed by billing surfaces
    pub price: u32,
}
