// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The data store: record CRUD plus the handful of operations the
//! orchestration core needs to be atomic
//!
//! All operations execute under one lock, which is what makes the contracts
//! here hold: `service_update_status_if` is a true compare-and-set,
//! `network_config_allocate` never hands the same free pool entry to two
//! racing allocators, and `service_switch_swap` is a single atomic
//! multi-record transaction.

use crate::model::Billing;
use crate::model::DomainName;
use crate::model::NetworkConfig;
use crate::model::ServerType;
use crate::model::Service;
use crate::model::Site;
use crate::model::Snapshot;
use crate::model::Suspension;
use crate::model::UnixGroup;
use crate::model::VirtualMachine;
use crate::model::Vhost;
use chrono::NaiveDate;
use chrono::Utc;
use mws_common::error::LookupType;
use mws_common::states::DomainStatus;
use mws_common::states::NetworkConfigKind;
use mws_common::states::ServiceKind;
use mws_common::states::ServiceStatus;
use mws_common::CreateResult;
use mws_common::DeleteResult;
use mws_common::Error;
use mws_common::ListResultVec;
use mws_common::LookupResult;
use mws_common::ResourceType;
use mws_common::UpdateResult;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use std::sync::Mutex;
use std::sync::MutexGuard;
use uuid::Uuid;

/// Parameters for creating a [`Site`]
#[derive(Clone, Debug)]
pub struct SiteCreate {
    pub name: String,
    pub description: String,
    pub institution: String,
    pub start_date: NaiveDate,
    pub email: Option<String>,
    pub server_type: Uuid,
    pub users: Vec<String>,
    pub ssh_users: Vec<String>,
    pub preallocated: bool,
    pub subscription: bool,
}

/// Parameters for creating a [`Service`]
#[derive(Clone, Debug)]
pub struct ServiceCreate {
    pub site: Option<Uuid>,
    pub kind: ServiceKind,
    pub network_config: Uuid,
    pub status: ServiceStatus,
}

/// Parameters for creating a [`VirtualMachine`]
#[derive(Clone, Debug)]
pub struct VmCreate {
    pub service: Uuid,
    pub token: Uuid,
    pub numcpu: u32,
    pub sizeram_gb: u32,
    pub network_config: Uuid,
}

#[derive(Default)]
struct Inner {
    sites: BTreeMap<Uuid, Site>,
    services: BTreeMap<Uuid, Service>,
    vms: BTreeMap<Uuid, VirtualMachine>,
    network_configs: BTreeMap<Uuid, NetworkConfig>,
    vhosts: BTreeMap<Uuid, Vhost>,
    domains: BTreeMap<Uuid, DomainName>,
    snapshots: BTreeMap<Uuid, Snapshot>,
    unix_groups: BTreeMap<Uuid, UnixGroup>,
    billings: BTreeMap<Uuid, Billing>,
    suspensions: BTreeMap<Uuid, Suspension>,
    server_types: BTreeMap<Uuid, ServerType>,
    /// per-service key/value configuration entries
    ansible_configuration: BTreeMap<(Uuid, String), String>,
}

impl Inner {
    /// Whether a network config is referenced by any service or VM.
    fn network_config_in_use(&self, id: Uuid) -> bool {
        self.services.values().any(|s| s.network_config == id)
            || self.vms.values().any(|vm| vm.network_config == id)
    }

    fn delete_vhost_records(&mut self, vhost_id: Uuid) {
        let domain_ids: Vec<Uuid> = self
            .domains
            .values()
            .filter(|d| d.vhost == vhost_id)
            .map(|d| d.id)
            .collect();
        for domain_id in domain_ids {
            self.delete_domain_records(domain_id);
        }
        self.vhosts.remove(&vhost_id);
    }

    fn delete_domain_records(&mut self, domain_id: Uuid) {
        self.domains.remove(&domain_id);
        // ON DELETE SET NULL for vhost main domains
        for vhost in self.vhosts.values_mut() {
            if vhost.main_domain == Some(domain_id) {
                vhost.main_domain = None;
            }
        }
    }

    fn delete_service_records(&mut self, service_id: Uuid) {
        let vhost_ids: Vec<Uuid> = self
            .vhosts
            .values()
            .filter(|v| v.service == service_id)
            .map(|v| v.id)
            .collect();
        for vhost_id in vhost_ids {
            self.delete_vhost_records(vhost_id);
        }
        self.unix_groups.retain(|_, g| g.service != service_id);
        self.snapshots.retain(|_, s| s.service != service_id);
        self.ansible_configuration.retain(|(s, _), _| *s != service_id);
        self.vms.retain(|_, vm| vm.service != service_id);
        self.services.remove(&service_id);
    }
}

/// The store interface used by the orchestration core
pub struct DataStore {
    inner: Mutex<Inner>,
}

impl DataStore {
    pub fn new() -> DataStore {
        DataStore { inner: Mutex::new(Inner::default()) }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /*
     * Sites
     */

    pub fn site_create(&self, params: SiteCreate) -> CreateResult<Site> {
        let mut inner = self.lock();
        if inner.sites.values().any(|s| s.name == params.name) {
            return Err(Error::ObjectAlreadyExists {
                type_name: ResourceType::Site,
                object_name: params.name,
            });
        }
        if !inner.server_types.contains_key(&params.server_type) {
            return Err(Error::not_found_by_id(
                ResourceType::ServerType,
                &params.server_type,
            ));
        }
        let site = Site {
            id: Uuid::new_v4(),
            name: params.name,
            description: params.description,
            institution: params.institution,
            start_date: params.start_date,
            end_date: None,
            disabled: false,
            preallocated: params.preallocated,
            subscription: params.subscription,
            email: params.email,
            server_type: params.server_type,
            users: params.users,
            ssh_users: params.ssh_users,
            days_without_admin: 0,
        };
        inner.sites.insert(site.id, site.clone());
        Ok(site)
    }

    pub fn site_fetch(&self, id: Uuid) -> LookupResult<Site> {
        self.lock()
            .sites
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found_by_id(ResourceType::Site, &id))
    }

    pub fn site_list(&self) -> ListResultVec<Site> {
        Ok(self.lock().sites.values().cloned().collect())
    }

    pub fn site_update(&self, site: &Site) -> UpdateResult<Site> {
        let mut inner = self.lock();
        if !inner.sites.contains_key(&site.id) {
            return Err(Error::not_found_by_id(ResourceType::Site, &site.id));
        }
        inner.sites.insert(site.id, site.clone());
        Ok(site.clone())
    }

    /// Hard-deletes a site and everything under it.  Callers are responsible
    /// for having destroyed the external VMs first (the external identifiers
    /// are only reachable through the records being deleted here).
    pub fn site_delete(&self, id: Uuid) -> DeleteResult {
        let mut inner = self.lock();
        if !inner.sites.contains_key(&id) {
            return Err(Error::not_found_by_id(ResourceType::Site, &id));
        }
        let service_ids: Vec<Uuid> = inner
            .services
            .values()
            .filter(|s| s.site == Some(id))
            .map(|s| s.id)
            .collect();
        for service_id in service_ids {
            inner.delete_service_records(service_id);
        }
        inner.billings.retain(|_, b| b.site != id);
        inner.suspensions.retain(|_, s| s.site != id);
        inner.sites.remove(&id);
        Ok(())
    }

    /*
     * Services
     */

    pub fn service_create(
        &self,
        params: ServiceCreate,
    ) -> CreateResult<Service> {
        let mut inner = self.lock();
        if let Some(site_id) = params.site {
            if !inner.sites.contains_key(&site_id) {
                return Err(Error::not_found_by_id(
                    ResourceType::Site,
                    &site_id,
                ));
            }
            // at most one service per (site, kind)
            if inner
                .services
                .values()
                .any(|s| s.site == Some(site_id) && s.kind == params.kind)
            {
                return Err(Error::ObjectAlreadyExists {
                    type_name: ResourceType::Service,
                    object_name: format!("{} service", params.kind),
                });
            }
        }
        if !inner.network_configs.contains_key(&params.network_config) {
            return Err(Error::not_found_by_id(
                ResourceType::NetworkConfig,
                &params.network_config,
            ));
        }
        if inner.network_config_in_use(params.network_config) {
            return Err(Error::ObjectAlreadyExists {
                type_name: ResourceType::NetworkConfig,
                object_name: params.network_config.to_string(),
            });
        }
        let service = Service {
            id: Uuid::new_v4(),
            site: params.site,
            kind: params.kind,
            status: params.status,
            quarantined: false,
            network_config: params.network_config,
        };
        inner.services.insert(service.id, service.clone());
        Ok(service)
    }

    pub fn service_fetch(&self, id: Uuid) -> LookupResult<Service> {
        self.lock()
            .services
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found_by_id(ResourceType::Service, &id))
    }

    pub fn service_list(&self) -> ListResultVec<Service> {
        Ok(self.lock().services.values().cloned().collect())
    }

    pub fn services_for_site(&self, site: Uuid) -> ListResultVec<Service> {
        Ok(self
            .lock()
            .services
            .values()
            .filter(|s| s.site == Some(site))
            .cloned()
            .collect())
    }

    pub fn service_for_site(
        &self,
        site: Uuid,
        kind: ServiceKind,
    ) -> LookupResult<Option<Service>> {
        Ok(self
            .lock()
            .services
            .values()
            .find(|s| s.site == Some(site) && s.kind == kind)
            .cloned())
    }

    /// Unconditionally sets a service's status.  Reserved for failure
    /// handlers resetting a wedged service back to `ready`; everything on
    /// the provisioning path uses [`DataStore::service_update_status_if`].
    pub fn service_set_status(
        &self,
        id: Uuid,
        status: ServiceStatus,
    ) -> UpdateResult<Service> {
        let mut inner = self.lock();
        let service = inner
            .services
            .get_mut(&id)
            .ok_or_else(|| Error::not_found_by_id(ResourceType::Service, &id))?;
        service.status = status;
        Ok(service.clone())
    }

    /// Atomically moves a service from `expected` to `next`, returning
    /// whether the update was applied.  A `false` return means the service
    /// was observed in some other status; the caller re-reads and decides.
    ///
    /// `expected -> next` must be a documented edge of the state machine;
    /// anything else is an invariant violation and fails loudly.
    pub fn service_update_status_if(
        &self,
        id: Uuid,
        expected: ServiceStatus,
        next: ServiceStatus,
    ) -> Result<bool, Error> {
        ServiceStatus::validate_transition(expected, next)?;
        let mut inner = self.lock();
        let service = inner
            .services
            .get_mut(&id)
            .ok_or_else(|| Error::not_found_by_id(ResourceType::Service, &id))?;
        if service.status != expected {
            return Ok(false);
        }
        service.status = next;
        Ok(true)
    }

    /// Deletes a service and all records under it.  As with
    /// [`DataStore::site_delete`], external VM destruction happens first,
    /// in the orchestration layer.
    pub fn service_delete(&self, id: Uuid) -> DeleteResult {
        let mut inner = self.lock();
        if !inner.services.contains_key(&id) {
            return Err(Error::not_found_by_id(ResourceType::Service, &id));
        }
        inner.delete_service_records(id);
        Ok(())
    }

    /// The production/test switch: one atomic multi-record swap.
    ///
    /// Network configurations, vhost ownership, and unix-group ownership are
    /// exchanged between the two services and their kind fields flipped, so
    /// the promoted unit takes over the production identity (addresses,
    /// domains, TLS) while keeping its own VM.  The service that is test
    /// after the swap gets a `backup_first_date` marker: backup history
    /// under its hostname from before the swap belongs to the other
    /// identity.
    pub fn service_switch_swap(
        &self,
        production: Uuid,
        test: Uuid,
        backup_first_date: NaiveDate,
    ) -> Result<(), Error> {
        let mut inner = self.lock();
        {
            let prod = inner.services.get(&production).ok_or_else(|| {
                Error::not_found_by_id(ResourceType::Service, &production)
            })?;
            let tst = inner.services.get(&test).ok_or_else(|| {
                Error::not_found_by_id(ResourceType::Service, &test)
            })?;
            if prod.kind != ServiceKind::Production
                || tst.kind != ServiceKind::Test
            {
                return Err(Error::invalid_request(
                    "switch requires one production and one test service",
                ));
            }
        }

        for vhost in inner.vhosts.values_mut() {
            if vhost.service == production {
                vhost.service = test;
            } else if vhost.service == test {
                vhost.service = production;
            }
        }
        for group in inner.unix_groups.values_mut() {
            if group.service == production {
                group.service = test;
            } else if group.service == test {
                group.service = production;
            }
        }

        let prod_netconf = inner.services[&production].network_config;
        let test_netconf = inner.services[&test].network_config;
        {
            let prod = inner.services.get_mut(&production).unwrap();
            prod.network_config = test_netconf;
            prod.kind = ServiceKind::Test;
        }
        {
            let tst = inner.services.get_mut(&test).unwrap();
            tst.network_config = prod_netconf;
            tst.kind = ServiceKind::Production;
        }

        // `production` is the test service from here on.
        inner.ansible_configuration.insert(
            (production, "backup_first_date".to_string()),
            backup_first_date.to_string(),
        );
        Ok(())
    }

    /*
     * Virtual machines
     */

    pub fn vm_create(&self, params: VmCreate) -> CreateResult<VirtualMachine> {
        let mut inner = self.lock();
        if !inner.services.contains_key(&params.service) {
            return Err(Error::not_found_by_id(
                ResourceType::Service,
                &params.service,
            ));
        }
        if !inner.network_configs.contains_key(&params.network_config) {
            return Err(Error::not_found_by_id(
                ResourceType::NetworkConfig,
                &params.network_config,
            ));
        }
        if inner.network_config_in_use(params.network_config) {
            return Err(Error::ObjectAlreadyExists {
                type_name: ResourceType::NetworkConfig,
                object_name: params.network_config.to_string(),
            });
        }
        let vm = VirtualMachine {
            id: Uuid::new_v4(),
            service: params.service,
            name: None,
            token: params.token,
            numcpu: params.numcpu,
            sizeram_gb: params.sizeram_gb,
            network_config: params.network_config,
        };
        inner.vms.insert(vm.id, vm.clone());
        Ok(vm)
    }

    pub fn vm_fetch(&self, id: Uuid) -> LookupResult<VirtualMachine> {
        self.lock().vms.get(&id).cloned().ok_or_else(|| {
            Error::not_found_by_id(ResourceType::VirtualMachine, &id)
        })
    }

    pub fn vm_list(&self) -> ListResultVec<VirtualMachine> {
        Ok(self.lock().vms.values().cloned().collect())
    }

    pub fn vms_for_service(
        &self,
        service: Uuid,
    ) -> ListResultVec<VirtualMachine> {
        Ok(self
            .lock()
            .vms
            .values()
            .filter(|vm| vm.service == service)
            .cloned()
            .collect())
    }

    pub fn vm_set_name(
        &self,
        id: Uuid,
        name: String,
    ) -> UpdateResult<VirtualMachine> {
        let mut inner = self.lock();
        let vm = inner.vms.get_mut(&id).ok_or_else(|| {
            Error::not_found_by_id(ResourceType::VirtualMachine, &id)
        })?;
        vm.name = Some(name);
        Ok(vm.clone())
    }

    /// Removes the VM record, freeing its network configuration.  The
    /// orchestration layer has already issued the external delete by the
    /// time this is called.
    pub fn vm_delete(&self, id: Uuid) -> DeleteResult {
        let mut inner = self.lock();
        if inner.vms.remove(&id).is_none() {
            return Err(Error::not_found_by_id(
                ResourceType::VirtualMachine,
                &id,
            ));
        }
        Ok(())
    }

    /*
     * Network configuration pool
     */

    pub fn network_config_create(
        &self,
        kind: NetworkConfigKind,
        ipv4: Ipv4Addr,
        ipv6: Ipv6Addr,
        name: String,
    ) -> CreateResult<NetworkConfig> {
        let mut inner = self.lock();
        if inner
            .network_configs
            .values()
            .any(|nc| nc.ipv4 == ipv4 || nc.ipv6 == ipv6 || nc.name == name)
        {
            return Err(Error::ObjectAlreadyExists {
                type_name: ResourceType::NetworkConfig,
                object_name: name,
            });
        }
        let config =
            NetworkConfig { id: Uuid::new_v4(), kind, ipv4, ipv6, name };
        inner.network_configs.insert(config.id, config.clone());
        Ok(config)
    }

    pub fn network_config_fetch(
        &self,
        id: Uuid,
    ) -> LookupResult<NetworkConfig> {
        self.lock().network_configs.get(&id).cloned().ok_or_else(|| {
            Error::not_found_by_id(ResourceType::NetworkConfig, &id)
        })
    }

    /// Allocates the first free pool entry of the requested kind.  "Free"
    /// means referenced by no service and no VM; entries become free again
    /// when the consuming record is deleted.  Exhaustion is an explicit,
    /// retryable-by-the-user failure, not a panic: under concurrent site
    /// creation the second allocator of the last entry sees this error.
    pub fn network_config_allocate(
        &self,
        kind: NetworkConfigKind,
    ) -> Result<NetworkConfig, Error> {
        let inner = self.lock();
        let mut candidates: Vec<&NetworkConfig> = inner
            .network_configs
            .values()
            .filter(|nc| {
                nc.kind == kind && !inner.network_config_in_use(nc.id)
            })
            .collect();
        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        candidates.first().map(|nc| (*nc).clone()).ok_or_else(|| {
            Error::unavail(&format!(
                "no free network configuration of type {}",
                kind
            ))
        })
    }

    pub fn network_config_free_count(
        &self,
        kind: NetworkConfigKind,
    ) -> Result<usize, Error> {
        let inner = self.lock();
        Ok(inner
            .network_configs
            .values()
            .filter(|nc| {
                nc.kind == kind && !inner.network_config_in_use(nc.id)
            })
            .count())
    }

    /*
     * Vhosts
     */

    pub fn vhost_create(
        &self,
        service: Uuid,
        name: &str,
        webapp: Option<String>,
    ) -> CreateResult<Vhost> {
        let mut inner = self.lock();
        if !inner.services.contains_key(&service) {
            return Err(Error::not_found_by_id(
                ResourceType::Service,
                &service,
            ));
        }
        if inner
            .vhosts
            .values()
            .any(|v| v.service == service && v.name == name)
        {
            return Err(Error::ObjectAlreadyExists {
                type_name: ResourceType::Vhost,
                object_name: name.to_string(),
            });
        }
        let vhost = Vhost {
            id: Uuid::new_v4(),
            service,
            name: name.to_string(),
            main_domain: None,
            csr: None,
            certificate: None,
            certificate_chain: None,
            tls_key_hash: None,
            tls_enabled: false,
            webapp,
        };
        inner.vhosts.insert(vhost.id, vhost.clone());
        Ok(vhost)
    }

    pub fn vhost_fetch(&self, id: Uuid) -> LookupResult<Vhost> {
        self.lock()
            .vhosts
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found_by_id(ResourceType::Vhost, &id))
    }

    pub fn vhosts_for_service(&self, service: Uuid) -> ListResultVec<Vhost> {
        Ok(self
            .lock()
            .vhosts
            .values()
            .filter(|v| v.service == service)
            .cloned()
            .collect())
    }

    pub fn vhost_update(&self, vhost: &Vhost) -> UpdateResult<Vhost> {
        let mut inner = self.lock();
        if !inner.vhosts.contains_key(&vhost.id) {
            return Err(Error::not_found_by_id(
                ResourceType::Vhost,
                &vhost.id,
            ));
        }
        inner.vhosts.insert(vhost.id, vhost.clone());
        Ok(vhost.clone())
    }

    /// Deletes a vhost and its domain names.  The `default` vhost is
    /// load-bearing (it carries the service FQDN) and cannot be deleted.
    pub fn vhost_delete(&self, id: Uuid) -> DeleteResult {
        let mut inner = self.lock();
        let vhost = inner
            .vhosts
            .get(&id)
            .ok_or_else(|| Error::not_found_by_id(ResourceType::Vhost, &id))?;
        if vhost.name == "default" {
            return Err(Error::invalid_request(
                "the default vhost cannot be deleted",
            ));
        }
        inner.delete_vhost_records(id);
        Ok(())
    }

    /*
     * Domain names
     */

    pub fn domain_create(
        &self,
        vhost: Uuid,
        name: &str,
        status: DomainStatus,
        requested_by: Option<String>,
    ) -> CreateResult<DomainName> {
        let mut inner = self.lock();
        if !inner.vhosts.contains_key(&vhost) {
            return Err(Error::not_found_by_id(ResourceType::Vhost, &vhost));
        }
        if inner.domains.values().any(|d| d.name == name) {
            return Err(Error::ObjectAlreadyExists {
                type_name: ResourceType::DomainName,
                object_name: name.to_string(),
            });
        }
        let domain = DomainName {
            id: Uuid::new_v4(),
            vhost,
            name: name.to_string(),
            status,
            reject_reason: None,
            requested_by,
            authorised_by: None,
            token: Uuid::new_v4(),
            requested_at: Utc::now(),
        };
        inner.domains.insert(domain.id, domain.clone());
        Ok(domain)
    }

    pub fn domain_fetch(&self, id: Uuid) -> LookupResult<DomainName> {
        self.lock().domains.get(&id).cloned().ok_or_else(|| {
            Error::not_found_by_id(ResourceType::DomainName, &id)
        })
    }

    pub fn domain_update(
        &self,
        domain: &DomainName,
    ) -> UpdateResult<DomainName> {
        let mut inner = self.lock();
        if !inner.domains.contains_key(&domain.id) {
            return Err(Error::not_found_by_id(
                ResourceType::DomainName,
                &domain.id,
            ));
        }
        inner.domains.insert(domain.id, domain.clone());
        Ok(domain.clone())
    }

    pub fn domains_for_vhost(
        &self,
        vhost: Uuid,
    ) -> ListResultVec<DomainName> {
        Ok(self
            .lock()
            .domains
            .values()
            .filter(|d| d.vhost == vhost)
            .cloned()
            .collect())
    }

    pub fn domains_with_status(
        &self,
        status: DomainStatus,
    ) -> ListResultVec<DomainName> {
        Ok(self
            .lock()
            .domains
            .values()
            .filter(|d| d.status == status)
            .cloned()
            .collect())
    }

    pub fn domain_delete(&self, id: Uuid) -> DeleteResult {
        let mut inner = self.lock();
        if !inner.domains.contains_key(&id) {
            return Err(Error::not_found_by_id(ResourceType::DomainName, &id));
        }
        inner.delete_domain_records(id);
        Ok(())
    }

    /*
     * Snapshots
     */

    pub fn snapshot_create(
        &self,
        service: Uuid,
        name: &str,
    ) -> CreateResult<Snapshot> {
        let mut inner = self.lock();
        if !inner.services.contains_key(&service) {
            return Err(Error::not_found_by_id(
                ResourceType::Service,
                &service,
            ));
        }
        if inner
            .snapshots
            .values()
            .any(|s| s.service == service && s.name == name)
        {
            return Err(Error::ObjectAlreadyExists {
                type_name: ResourceType::Snapshot,
                object_name: name.to_string(),
            });
        }
        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            service,
            name: name.to_string(),
            date: None,
            pending_delete: false,
        };
        inner.snapshots.insert(snapshot.id, snapshot.clone());
        Ok(snapshot)
    }

    pub fn snapshot_fetch(&self, id: Uuid) -> LookupResult<Snapshot> {
        self.lock()
            .snapshots
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found_by_id(ResourceType::Snapshot, &id))
    }

    pub fn snapshot_fetch_by_name(
        &self,
        service: Uuid,
        name: &str,
    ) -> LookupResult<Snapshot> {
        self.lock()
            .snapshots
            .values()
            .find(|s| s.service == service && s.name == name)
            .cloned()
            .ok_or_else(|| {
                LookupType::ByCompositeId(format!(
                    "snapshot {} of service {}",
                    name, service
                ))
                .into_not_found(ResourceType::Snapshot)
            })
    }

    pub fn snapshots_for_service(
        &self,
        service: Uuid,
    ) -> ListResultVec<Snapshot> {
        Ok(self
            .lock()
            .snapshots
            .values()
            .filter(|s| s.service == service)
            .cloned()
            .collect())
    }

    pub fn snapshot_update(
        &self,
        snapshot: &Snapshot,
    ) -> UpdateResult<Snapshot> {
        let mut inner = self.lock();
        if !inner.snapshots.contains_key(&snapshot.id) {
            return Err(Error::not_found_by_id(
                ResourceType::Snapshot,
                &snapshot.id,
            ));
        }
        inner.snapshots.insert(snapshot.id, snapshot.clone());
        Ok(snapshot.clone())
    }

    pub fn snapshot_delete(&self, id: Uuid) -> DeleteResult {
        let mut inner = self.lock();
        if inner.snapshots.remove(&id).is_none() {
            return Err(Error::not_found_by_id(ResourceType::Snapshot, &id));
        }
        Ok(())
    }

    /*
     * Unix groups
     */

    pub fn unix_group_create(
        &self,
        service: Uuid,
        name: &str,
        users: Vec<String>,
    ) -> CreateResult<UnixGroup> {
        let mut inner = self.lock();
        if !inner.services.contains_key(&service) {
            return Err(Error::not_found_by_id(
                ResourceType::Service,
                &service,
            ));
        }
        if inner
            .unix_groups
            .values()
            .any(|g| g.service == service && g.name == name)
        {
            return Err(Error::ObjectAlreadyExists {
                type_name: ResourceType::UnixGroup,
                object_name: name.to_string(),
            });
        }
        let group = UnixGroup {
            id: Uuid::new_v4(),
            service,
            name: name.to_string(),
            users,
            to_be_deleted: false,
        };
        inner.unix_groups.insert(group.id, group.clone());
        Ok(group)
    }

    pub fn unix_groups_for_service(
        &self,
        service: Uuid,
    ) -> ListResultVec<UnixGroup> {
        Ok(self
            .lock()
            .unix_groups
            .values()
            .filter(|g| g.service == service)
            .cloned()
            .collect())
    }

    /*
     * Billing, suspensions, server types
     */

    pub fn billing_create(
        &self,
        site: Uuid,
        purchase_order_number: &str,
        group: &str,
    ) -> CreateResult<Billing> {
        let mut inner = self.lock();
        if !inner.sites.contains_key(&site) {
            return Err(Error::not_found_by_id(ResourceType::Site, &site));
        }
        if inner.billings.values().any(|b| b.site == site) {
            return Err(Error::ObjectAlreadyExists {
                type_name: ResourceType::Billing,
                object_name: site.to_string(),
            });
        }
        let billing = Billing {
            id: Uuid::new_v4(),
            site,
            purchase_order_number: purchase_order_number.to_string(),
            group: group.to_string(),
            date_sent_to_finance: None,
        };
        inner.billings.insert(billing.id, billing.clone());
        Ok(billing)
    }

    pub fn billing_for_site(
        &self,
        site: Uuid,
    ) -> LookupResult<Option<Billing>> {
        Ok(self.lock().billings.values().find(|b| b.site == site).cloned())
    }

    pub fn suspension_create(
        &self,
        site: Uuid,
        reason: &str,
        start_date: NaiveDate,
    ) -> CreateResult<Suspension> {
        let mut inner = self.lock();
        if !inner.sites.contains_key(&site) {
            return Err(Error::not_found_by_id(ResourceType::Site, &site));
        }
        let suspension = Suspension {
            id: Uuid::new_v4(),
            site,
            reason: reason.to_string(),
            active: true,
            start_date,
            end_date: None,
        };
        inner.suspensions.insert(suspension.id, suspension.clone());
        Ok(suspension)
    }

    pub fn site_has_active_suspension(&self, site: Uuid) -> Result<bool, Error> {
        Ok(self
            .lock()
            .suspensions
            .values()
            .any(|s| s.site == site && s.active))
    }

    pub fn server_type_create(
        &self,
        name: &str,
        numcpu: u32,
        sizeram_gb: u32,
        sizedisk_gb: u32,
        price: u32,
    ) -> CreateResult<ServerType> {
        let mut inner = self.lock();
        if inner.server_types.values().any(|t| t.name == name) {
            return Err(Error::ObjectAlreadyExists {
                type_name: ResourceType::ServerType,
                object_name: name.to_string(),
            });
        }
        let server_type = ServerType {
            id: Uuid::new_v4(),
            name: name.to_string(),
            numcpu,
            sizeram_gb,
            sizedisk_gb,
            price,
        };
        inner.server_types.insert(server_type.id, server_type.clone());
        Ok(server_type)
    }

    pub fn server_type_fetch(&self, id: Uuid) -> LookupResult<ServerType> {
        self.lock().server_types.get(&id).cloned().ok_or_else(|| {
            Error::not_found_by_id(ResourceType::ServerType, &id)
        })
    }

    /// Server types ordered by price, cheapest first.
    pub fn server_type_list(&self) -> ListResultVec<ServerType> {
        let mut types: Vec<ServerType> =
            self.lock().server_types.values().cloned().collect();
        types.sort_by_key(|t| t.price);
        Ok(types)
    }

    /*
     * Ansible configuration entries
     */

    pub fn ansible_configuration_set(
        &self,
        service: Uuid,
        key: &str,
        value: &str,
    ) -> Result<(), Error> {
        let mut inner = self.lock();
        if !inner.services.contains_key(&service) {
            return Err(Error::not_found_by_id(
                ResourceType::Service,
                &service,
            ));
        }
        inner
            .ansible_configuration
            .insert((service, key.to_string()), value.to_string());
        Ok(())
    }

    pub fn ansible_configuration_get(
        &self,
        service: Uuid,
        key: &str,
    ) -> Result<Option<String>, Error> {
        Ok(self
            .lock()
            .ansible_configuration
            .get(&(service, key.to_string()))
            .cloned())
    }

    pub fn ansible_configuration_list(
        &self,
        service: Uuid,
    ) -> Result<Vec<(String, String)>, Error> {
        Ok(self
            .lock()
            .ansible_configuration
            .iter()
            .filter(|((s, _), _)| *s == service)
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect())
    }
}
