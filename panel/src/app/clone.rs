// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cloning a service onto its sibling and the production/test switch

use crate::app::Panel;
use chrono::Utc;
use mws_common::params::NetconfParams;
use mws_common::retry::vm_api_policy;
use mws_common::states::NetworkConfigKind;
use mws_common::states::ServiceKind;
use mws_common::states::ServiceStatus;
use mws_common::Error;
use mws_store::model::Service;
use mws_store::ServiceCreate;
use mws_store::VmCreate;
use std::sync::Arc;
use uuid::Uuid;

impl Panel {
    /// Clones a site's service of `source_kind` onto the sibling service.
    ///
    /// Any existing sibling is torn down (external VM included) and
    /// replaced by a fresh service reusing the sibling's public network
    /// reservation, with a new VM record (fresh token, new host network
    /// configuration).  The external clone then runs asynchronously; on its
    /// success the source's unix groups, configuration entries, and vhosts
    /// are copied over and the destination marked `ready`.
    pub async fn service_clone(
        self: &Arc<Self>,
        site_id: Uuid,
        source_kind: ServiceKind,
    ) -> Result<Service, Error> {
        let source = self.service_for_site_required(site_id, source_kind)?;
        if !self
            .datastore()
            .vms_for_service(source.id)?
            .iter()
            .any(|vm| vm.name.is_some())
        {
            return Err(Error::invalid_request(
                "source service has no provisioned VM to clone",
            ));
        }

        let dest_kind = source_kind.other();
        let dest_netconf = match self
            .datastore()
            .service_for_site(site_id, dest_kind)?
        {
            Some(existing) => {
                let netconf = existing.network_config;
                self.service_teardown(existing.id).await?;
                netconf
            }
            None => {
                self.datastore()
                    .network_config_allocate(NetworkConfigKind::IpvxPub)?
                    .id
            }
        };

        let dest = self.datastore().service_create(ServiceCreate {
            site: Some(site_id),
            kind: dest_kind,
            network_config: dest_netconf,
            status: ServiceStatus::Requested,
        })?;

        let site = self.datastore().site_fetch(site_id)?;
        let server_type =
            self.datastore().server_type_fetch(site.server_type)?;
        let host_netconf = self
            .datastore()
            .network_config_allocate(NetworkConfigKind::Ipv4Priv)?;
        let dest_vm = self.datastore().vm_create(VmCreate {
            service: dest.id,
            token: Uuid::new_v4(),
            numcpu: server_type.numcpu,
            sizeram_gb: server_type.sizeram_gb,
            network_config: host_netconf.id,
        })?;

        info!(
            self.log(),
            "clone requested";
            "site_id" => %site_id,
            "source_service_id" => %source.id,
            "dest_service_id" => %dest.id,
        );

        let panel = Arc::clone(self);
        let source_id = source.id;
        let dest_vm_id = dest_vm.id;
        tokio::spawn(async move {
            panel.clone_task(source_id, dest_vm_id).await;
        });
        Ok(dest)
    }

    async fn clone_task(
        self: Arc<Self>,
        source_service_id: Uuid,
        dest_vm_id: Uuid,
    ) {
        let log = self
            .log()
            .new(o!("dest_vm_id" => dest_vm_id.to_string()));
        let result = self
            .clone_task_inner(&log, source_service_id, dest_vm_id)
            .await;
        if let Err(error) = result {
            // The destination stays `requested`, which is how a failed
            // clone surfaces.
            error!(log, "clone failed"; "error" => %error);
        }
    }

    async fn clone_task_inner(
        &self,
        log: &slog::Logger,
        source_service_id: Uuid,
        dest_vm_id: Uuid,
    ) -> Result<(), Error> {
        let dest_vm = self.datastore().vm_fetch(dest_vm_id)?;
        let dest_service_id = dest_vm.service;
        let netconf =
            self.datastore().network_config_fetch(dest_vm.network_config)?;
        let source_vm = self
            .datastore()
            .vms_for_service(source_service_id)?
            .into_iter()
            .find(|vm| vm.name.is_some())
            .ok_or_else(|| {
                Error::invalid_request("source VM disappeared before clone")
            })?;
        let source_name = source_vm.name.unwrap();
        let params = NetconfParams {
            ipv4: netconf.ipv4,
            ipv6: netconf.ipv6,
            hostname: netconf.name.clone(),
        };

        let response = vm_api_policy()
            .run(log, "vm clone", || {
                self.vm_controller.clone_vm(&source_name, &params)
            })
            .await?;

        let name = response.vmid.unwrap_or_else(|| netconf.name.clone());
        self.datastore().vm_set_name(dest_vm_id, name)?;

        // Copy the source's configuration onto the destination, as new
        // records with their own identity.  Domain names are deliberately
        // not copied — they must be re-requested and re-approved on the new
        // unit — which is also why every copied vhost starts with no main
        // domain.
        for group in
            self.datastore().unix_groups_for_service(source_service_id)?
        {
            self.datastore().unix_group_create(
                dest_service_id,
                &group.name,
                group.users.clone(),
            )?;
        }
        for (key, value) in
            self.datastore().ansible_configuration_list(source_service_id)?
        {
            self.datastore().ansible_configuration_set(
                dest_service_id,
                &key,
                &value,
            )?;
        }
        for vhost in self.datastore().vhosts_for_service(source_service_id)? {
            let copy = self.datastore().vhost_create(
                dest_service_id,
                &vhost.name,
                vhost.webapp.clone(),
            )?;
            let mut copy = self.datastore().vhost_fetch(copy.id)?;
            copy.csr = vhost.csr.clone();
            copy.certificate = vhost.certificate.clone();
            copy.certificate_chain = vhost.certificate_chain.clone();
            copy.tls_key_hash = vhost.tls_key_hash.clone();
            copy.tls_enabled = vhost.tls_enabled;
            self.datastore().vhost_update(&copy)?;
        }

        if !self.datastore().service_update_status_if(
            dest_service_id,
            ServiceStatus::Requested,
            ServiceStatus::Ready,
        )? {
            warn!(
                log,
                "cloned service left requested before completion";
                "dest_service_id" => %dest_service_id,
            );
        }
        info!(
            log,
            "clone complete";
            "dest_service_id" => %dest_service_id,
        );
        Ok(())
    }

    /// Promotes test to production (and vice versa) in one atomic store
    /// transaction, then converges both units so the promoted VM picks up
    /// the production vhosts and the demoted one sheds them.
    pub fn service_switch(self: &Arc<Self>, site_id: Uuid) -> Result<(), Error> {
        let production = self
            .service_for_site_required(site_id, ServiceKind::Production)?;
        let test = self.service_for_site_required(site_id, ServiceKind::Test)?;
        if production.status != ServiceStatus::Ready
            || test.status != ServiceStatus::Ready
        {
            return Err(Error::invalid_request(
                "both services must be ready to switch",
            ));
        }

        self.datastore().service_switch_swap(
            production.id,
            test.id,
            Utc::now().date_naive(),
        )?;
        info!(self.log(), "production/test switch"; "site_id" => %site_id);

        self.launch_ansible(production.id)?;
        self.launch_ansible(test.id)?;
        Ok(())
    }
}
