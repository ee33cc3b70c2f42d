// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ansible inventory export
//!
//! The convergence runner resolves hosts against an inventory produced by
//! the panel: a document keyed by VM hostname carrying everything the
//! playbooks need (addresses, site users, OS, vhosts with their domains,
//! unix groups).  The document shape follows ansible's dynamic-inventory
//! convention: a host group plus a `_meta.hostvars` map.

use mws_common::states::ServiceKind;
use mws_common::states::ServiceStatus;
use mws_common::Error;
use mws_store::DataStore;
use schemars::JsonSchema;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use uuid::Uuid;

#[derive(Clone, Debug, JsonSchema, Serialize)]
pub struct VhostVars {
    pub name: String,
    pub webapp: Option<String>,
    pub tls_enabled: bool,
    pub main_domain: Option<String>,
    pub domains: Vec<String>,
}

#[derive(Clone, Debug, JsonSchema, Serialize)]
pub struct UnixGroupVars {
    pub name: String,
    pub users: Vec<String>,
}

/// Per-host variables exported to the convergence runner
#[derive(Clone, Debug, JsonSchema, Serialize)]
pub struct HostVars {
    pub hostname: String,
    pub ipv4: Ipv4Addr,
    pub ipv6: Ipv6Addr,
    pub service_fqdn: String,
    pub service_kind: ServiceKind,
    pub status: ServiceStatus,
    pub site_id: Option<Uuid>,
    pub site_name: Option<String>,
    pub users: Vec<String>,
    pub ssh_users: Vec<String>,
    pub os: Option<String>,
    pub vhosts: Vec<VhostVars>,
    pub unix_groups: Vec<UnixGroupVars>,
}

/// The full inventory document (`--list` shape)
pub fn build_inventory(
    datastore: &DataStore,
) -> Result<serde_json::Value, Error> {
    let mut hostvars = BTreeMap::new();
    for vm in datastore.vm_list()? {
        if let Some(vars) = host_vars_for_vm(datastore, vm.id)? {
            hostvars.insert(vars.hostname.clone(), vars);
        }
    }
    let hosts: Vec<&String> = hostvars.keys().collect();
    Ok(serde_json::json!({
        "mws_servers": { "hosts": hosts },
        "_meta": { "hostvars": hostvars },
    }))
}

/// Variables for a single host (`--host` shape), None when no VM uses the
/// hostname.
pub fn host_vars(
    datastore: &DataStore,
    host: &str,
) -> Result<Option<HostVars>, Error> {
    for vm in datastore.vm_list()? {
        let netconf = datastore.network_config_fetch(vm.network_config)?;
        if netconf.name == host {
            return host_vars_for_vm(datastore, vm.id);
        }
    }
    Ok(None)
}

fn host_vars_for_vm(
    datastore: &DataStore,
    vm_id: Uuid,
) -> Result<Option<HostVars>, Error> {
    let vm = datastore.vm_fetch(vm_id)?;
    let netconf = datastore.network_config_fetch(vm.network_config)?;
    let service = datastore.service_fetch(vm.service)?;
    let service_netconf =
        datastore.network_config_fetch(service.network_config)?;

    let (site_id, site_name, users, ssh_users) = match service.site {
        Some(site_id) => {
            let site = datastore.site_fetch(site_id)?;
            (Some(site.id), Some(site.name), site.users, site.ssh_users)
        }
        None => (None, None, Vec::new(), Vec::new()),
    };

    let mut vhosts = Vec::new();
    for vhost in datastore.vhosts_for_service(service.id)? {
        let main_domain = match vhost.main_domain {
            Some(domain_id) => {
                Some(datastore.domain_fetch(domain_id)?.name)
            }
            None => None,
        };
        let domains = datastore
            .domains_for_vhost(vhost.id)?
            .into_iter()
            .filter(|d| {
                d.status == mws_common::states::DomainStatus::Accepted
            })
            .map(|d| d.name)
            .collect();
        vhosts.push(VhostVars {
            name: vhost.name,
            webapp: vhost.webapp,
            tls_enabled: vhost.tls_enabled,
            main_domain,
            domains,
        });
    }

    let unix_groups = datastore
        .unix_groups_for_service(service.id)?
        .into_iter()
        .map(|g| UnixGroupVars { name: g.name, users: g.users })
        .collect();

    Ok(Some(HostVars {
        hostname: netconf.name,
        ipv4: netconf.ipv4,
        ipv6: netconf.ipv6,
        service_fqdn: service_netconf.name,
        service_kind: service.kind,
        status: service.status,
        site_id,
        site_name,
        users,
        ssh_users,
        os: datastore.ansible_configuration_get(service.id, "os")?,
        vhosts,
        unix_groups,
    }))
}
