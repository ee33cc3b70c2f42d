// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The panel, the orchestration core of the control plane
//!
//! A [`Panel`] owns handles to the store and the external collaborators (VM
//! control API, convergence runner, notifier) and exposes the orchestration
//! operations: provisioning, convergence, clone/switch, snapshots, and the
//! site lifecycle.  All collaborators are injected at construction; nothing
//! here reaches for global state.

pub mod background;
mod clone;
mod convergence;
mod provision;
mod snapshot;
#[cfg(test)]
pub(crate) mod test_helpers;

use crate::config::PanelSettings;
use crate::notify::Notifier;
use ansible_client::AnsibleRunner;
use chrono::Utc;
use mws_common::error::LookupType;
use mws_common::states::DomainStatus;
use mws_common::states::NetworkConfigKind;
use mws_common::states::PowerAction;
use mws_common::states::ServiceKind;
use mws_common::states::ServiceStatus;
use mws_common::Error;
use mws_common::ResourceType;
use mws_store::model::Site;
use mws_store::DataStore;
use mws_store::ServiceCreate;
use mws_store::SiteCreate;
use slog::Logger;
use std::sync::Arc;
use uuid::Uuid;
use vm_control_client::VmController;

/// Parameters for creating a site through the panel
#[derive(Clone, Debug)]
pub struct SiteCreateParams {
    pub name: String,
    pub description: String,
    pub institution: String,
    pub email: Option<String>,
    pub server_type: Uuid,
    pub users: Vec<String>,
    pub preallocated: bool,
    pub subscription: bool,
}

pub struct Panel {
    log: Logger,
    datastore: Arc<DataStore>,
    vm_controller: Arc<dyn VmController>,
    ansible: Arc<dyn AnsibleRunner>,
    notifier: Arc<dyn Notifier>,
    settings: PanelSettings,
}

impl Panel {
    pub fn new(
        log: Logger,
        datastore: Arc<DataStore>,
        vm_controller: Arc<dyn VmController>,
        ansible: Arc<dyn AnsibleRunner>,
        notifier: Arc<dyn Notifier>,
        settings: PanelSettings,
    ) -> Arc<Panel> {
        Arc::new(Panel {
            log,
            datastore,
            vm_controller,
            ansible,
            notifier,
            settings,
        })
    }

    pub fn datastore(&self) -> &Arc<DataStore> {
        &self.datastore
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    pub(crate) fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub(crate) fn settings(&self) -> &PanelSettings {
        &self.settings
    }

    /// Creates a site with its production service and kicks off VM
    /// provisioning.
    ///
    /// The production service reserves a public network configuration and
    /// gets a `default` vhost carrying the service FQDN as an accepted
    /// domain.  If any step after the site row fails, the site row is
    /// removed again rather than left half-built.
    pub async fn site_create(
        self: &Arc<Self>,
        params: SiteCreateParams,
    ) -> Result<Site, Error> {
        let site = self.datastore.site_create(SiteCreate {
            name: params.name,
            description: params.description,
            institution: params.institution,
            start_date: Utc::now().date_naive(),
            email: params.email,
            server_type: params.server_type,
            users: params.users,
            ssh_users: Vec::new(),
            preallocated: params.preallocated,
            subscription: params.subscription,
        })?;

        match self.site_create_service(site.id).await {
            Ok(()) => Ok(site),
            Err(error) => {
                warn!(
                    self.log,
                    "site creation failed; removing partial site";
                    "site_id" => %site.id,
                    "error" => %error,
                );
                if let Err(cleanup_error) = self.datastore.site_delete(site.id)
                {
                    error!(
                        self.log,
                        "failed to remove partially-created site";
                        "site_id" => %site.id,
                        "error" => %cleanup_error,
                    );
                }
                Err(error)
            }
        }
    }

    async fn site_create_service(
        self: &Arc<Self>,
        site_id: Uuid,
    ) -> Result<(), Error> {
        let netconf =
            self.datastore.network_config_allocate(NetworkConfigKind::IpvxPub)?;
        let service = self.datastore.service_create(ServiceCreate {
            site: Some(site_id),
            kind: ServiceKind::Production,
            network_config: netconf.id,
            status: ServiceStatus::Requested,
        })?;

        // Default vhost with the service FQDN as its main domain.  The FQDN
        // is ours, so the domain is born accepted.
        let vhost =
            self.datastore.vhost_create(service.id, "default", None)?;
        let domain = self.datastore.domain_create(
            vhost.id,
            &netconf.name,
            DomainStatus::Accepted,
            None,
        )?;
        let mut vhost = self.datastore.vhost_fetch(vhost.id)?;
        vhost.main_domain = Some(domain.id);
        self.datastore.vhost_update(&vhost)?;

        self.service_provision(service.id)?;
        Ok(())
    }

    /// Cancels a site: the end date is set, user associations are cleared,
    /// and every VM is powered off.  The records remain until the purge
    /// sweep removes them eight weeks later.
    pub async fn site_cancel(self: &Arc<Self>, site_id: Uuid) -> Result<(), Error> {
        let mut site = self.datastore.site_fetch(site_id)?;
        if site.end_date.is_some() {
            return Ok(());
        }
        site.end_date = Some(Utc::now().date_naive());
        site.users.clear();
        site.ssh_users.clear();
        self.datastore.site_update(&site)?;
        info!(self.log, "site cancelled"; "site_id" => %site_id);
        self.site_power_off(site_id)?;
        Ok(())
    }

    pub async fn site_disable(
        self: &Arc<Self>,
        site_id: Uuid,
    ) -> Result<(), Error> {
        let mut site = self.datastore.site_fetch(site_id)?;
        site.disabled = true;
        self.datastore.site_update(&site)?;
        self.site_power_off(site_id)?;
        Ok(())
    }

    pub async fn site_enable(
        self: &Arc<Self>,
        site_id: Uuid,
    ) -> Result<(), Error> {
        let mut site = self.datastore.site_fetch(site_id)?;
        site.disabled = false;
        self.datastore.site_update(&site)?;
        for service in self.datastore.services_for_site(site_id)? {
            for vm in self.datastore.vms_for_service(service.id)? {
                if vm.name.is_some() {
                    self.vm_power(
                        vm.id,
                        PowerAction::PowerOn,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn site_power_off(self: &Arc<Self>, site_id: Uuid) -> Result<(), Error> {
        for service in self.datastore.services_for_site(site_id)? {
            for vm in self.datastore.vms_for_service(service.id)? {
                if vm.name.is_some() {
                    self.vm_power(
                        vm.id,
                        PowerAction::PowerOff,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Tears down a service: external VMs are destroyed first, then the
    /// records (and their network reservations) go.
    pub async fn service_teardown(
        self: &Arc<Self>,
        service_id: Uuid,
    ) -> Result<(), Error> {
        for vm in self.datastore.vms_for_service(service_id)? {
            self.vm_delete(vm.id).await?;
        }
        self.datastore.service_delete(service_id)
    }

    /// Hard-deletes a site and everything under it, destroying the external
    /// VMs first.
    pub async fn site_delete(
        self: &Arc<Self>,
        site_id: Uuid,
    ) -> Result<(), Error> {
        for service in self.datastore.services_for_site(site_id)? {
            for vm in self.datastore.vms_for_service(service.id)? {
                self.vm_delete(vm.id).await?;
            }
        }
        self.datastore.site_delete(site_id)
    }

    /// Looks up the service of the given kind for a site, failing with
    /// `ObjectNotFound` when the site does not have one.
    pub(crate) fn service_for_site_required(
        &self,
        site_id: Uuid,
        kind: ServiceKind,
    ) -> Result<mws_store::model::Service, Error> {
        self.datastore.service_for_site(site_id, kind)?.ok_or_else(|| {
            LookupType::ByCompositeId(format!(
                "{} service of site {}",
                kind, site_id
            ))
            .into_not_found(ResourceType::Service)
        })
    }
}
