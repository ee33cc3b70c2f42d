// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! VM provisioning: create, post-installation callback, power, destroy

use crate::app::Panel;
use mws_common::params::CallbackParams;
use mws_common::params::NetconfParams;
use mws_common::params::VmCreateParams;
use mws_common::retry::vm_api_policy;
use mws_common::retry::vm_teardown_policy;
use mws_common::states::NetworkConfigKind;
use mws_common::states::PowerAction;
use mws_common::states::ServiceStatus;
use mws_common::Error;
use mws_store::model::VirtualMachine;
use mws_store::VmCreate;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Delay between the post-installation callback and the first convergence
/// run, giving the guest time to finish its reboot.
const POST_INSTALL_DELAY: Duration = Duration::from_secs(90);

/// Delay between a power-on and the convergence run that re-applies
/// configuration to the freshly-booted guest.
const POWER_ON_CONVERGENCE_DELAY: Duration = Duration::from_secs(120);

impl Panel {
    /// Provisions the VM backing a `requested` service.
    ///
    /// Synchronously: a host network configuration is reserved, the VM
    /// record is persisted with a fresh one-time token, and the service
    /// moves to `installing`.  The VM control API `create` call then runs
    /// asynchronously under the long retry policy; its callback descriptor
    /// carries the token so the installer can prove completion later.
    pub fn service_provision(
        self: &Arc<Self>,
        service_id: Uuid,
    ) -> Result<VirtualMachine, Error> {
        let service = self.datastore().service_fetch(service_id)?;
        let site_id = service.site.ok_or_else(|| {
            Error::invalid_request("cannot provision an unassigned service")
        })?;
        let site = self.datastore().site_fetch(site_id)?;
        let server_type =
            self.datastore().server_type_fetch(site.server_type)?;

        let host_netconf = self
            .datastore()
            .network_config_allocate(NetworkConfigKind::Ipv4Priv)?;
        let vm = self.datastore().vm_create(VmCreate {
            service: service_id,
            token: Uuid::new_v4(),
            numcpu: server_type.numcpu,
            sizeram_gb: server_type.sizeram_gb,
            network_config: host_netconf.id,
        })?;

        if !self.datastore().service_update_status_if(
            service_id,
            ServiceStatus::Requested,
            ServiceStatus::Installing,
        )? {
            let found = self.datastore().service_fetch(service_id)?.status;
            self.datastore().vm_delete(vm.id)?;
            return Err(Error::UnexpectedVmStatus { found });
        }

        info!(
            self.log(),
            "VM provisioning requested";
            "service_id" => %service_id,
            "vm_id" => %vm.id,
            "hostname" => &host_netconf.name,
        );

        let panel = Arc::clone(self);
        let vm_id = vm.id;
        tokio::spawn(async move {
            panel.vm_create_task(vm_id).await;
        });
        Ok(vm)
    }

    /// Builds the `create` request for a VM from its current records.
    fn vm_create_params(&self, vm_id: Uuid) -> Result<VmCreateParams, Error> {
        let vm = self.datastore().vm_fetch(vm_id)?;
        let service = self.datastore().service_fetch(vm.service)?;
        let site_id = service.site.ok_or_else(|| {
            Error::internal_error("provisioning VM for unassigned service")
        })?;
        let netconf =
            self.datastore().network_config_fetch(vm.network_config)?;
        let os = self
            .datastore()
            .ansible_configuration_get(service.id, "os")?
            .unwrap_or_else(|| self.settings().os_version.clone());
        Ok(VmCreateParams {
            site_id: format!("mwssite-{}", site_id),
            os: Some(os),
            netconf: NetconfParams {
                ipv4: netconf.ipv4,
                ipv6: netconf.ipv6,
                hostname: netconf.name,
            },
            callback: CallbackParams {
                endpoint: self.settings().callback_endpoint.clone(),
                vm_id: vm.id,
                secret: vm.token.to_string(),
            },
        })
    }

    async fn vm_create_task(self: Arc<Self>, vm_id: Uuid) {
        let log = self.log().new(o!("vm_id" => vm_id.to_string()));
        let params = match self.vm_create_params(vm_id) {
            Ok(params) => params,
            Err(error) => {
                error!(
                    log,
                    "failed to assemble VM create request";
                    "error" => %error,
                );
                return;
            }
        };

        let result = vm_api_policy()
            .run(&log, "vm create", || {
                self.vm_controller.create_vm(&params)
            })
            .await;

        match result {
            Ok(response) => {
                // Record the external name; fall back to the hostname when
                // the API response does not carry one.
                let name = response
                    .vmid
                    .unwrap_or_else(|| params.netconf.hostname.clone());
                let update = self
                    .datastore()
                    .vm_set_name(vm_id, name)
                    .and_then(|vm| {
                        self.datastore().ansible_configuration_set(
                            vm.service,
                            "os",
                            params.os.as_deref().unwrap_or_default(),
                        )
                    });
                if let Err(error) = update {
                    error!(
                        log,
                        "failed to record created VM";
                        "error" => %error,
                    );
                }
            }
            Err(error) => {
                // Either a structured rejection or a day of transport
                // failures.  The service stays `installing`, which is how
                // the failure surfaces to operators.
                error!(
                    log,
                    "giving up on VM create";
                    "error" => %error,
                );
            }
        }
    }

    /// Handles the authenticated post-installation callback.
    ///
    /// The presented token must match the VM's stored token exactly; a
    /// mismatch (or an unknown VM id) is `Forbidden` and changes nothing.
    /// On a match the service moves `installing -> postinstall` and the
    /// first convergence run is scheduled after the guest's reboot window.
    pub async fn post_installation(
        self: &Arc<Self>,
        vm_id: Uuid,
        token: &str,
    ) -> Result<(), Error> {
        let vm = match self.datastore().vm_fetch(vm_id) {
            Ok(vm) => vm,
            Err(_) => {
                warn!(
                    self.log(),
                    "post-installation callback for unknown VM";
                    "vm_id" => %vm_id,
                );
                return Err(Error::Forbidden);
            }
        };
        if vm.token.to_string() != token {
            warn!(
                self.log(),
                "post-installation callback with bad token";
                "vm_id" => %vm_id,
            );
            return Err(Error::Forbidden);
        }

        let service = self.datastore().service_fetch(vm.service)?;
        if !self.datastore().service_update_status_if(
            service.id,
            ServiceStatus::Installing,
            ServiceStatus::Postinstall,
        )? {
            let found = self.datastore().service_fetch(service.id)?.status;
            return Err(Error::UnexpectedVmStatus { found });
        }

        if vm.name.is_none() {
            let netconf =
                self.datastore().network_config_fetch(vm.network_config)?;
            self.datastore().vm_set_name(vm.id, netconf.name)?;
        }

        info!(
            self.log(),
            "OS installation complete";
            "service_id" => %service.id,
            "vm_id" => %vm_id,
        );

        let panel = Arc::clone(self);
        let service_id = service.id;
        tokio::spawn(async move {
            tokio::time::sleep(POST_INSTALL_DELAY).await;
            panel.post_install_convergence(service_id).await;
        });
        Ok(())
    }

    /// Presses a power button on a VM.  The call is asynchronous and
    /// retried; a power-on additionally schedules a deferred convergence
    /// run to re-apply configuration once the guest is back.
    pub fn vm_power(
        self: &Arc<Self>,
        vm_id: Uuid,
        action: PowerAction,
    ) -> Result<(), Error> {
        let vm = self.datastore().vm_fetch(vm_id)?;
        let name = vm.name.ok_or_else(|| {
            Error::invalid_request("VM has no external name yet")
        })?;

        let panel = Arc::clone(self);
        let log = self.log().new(o!(
            "vm_id" => vm_id.to_string(),
            "action" => action.to_string(),
        ));
        tokio::spawn(async move {
            let result = vm_api_policy()
                .run(&log, "vm power", || {
                    panel.vm_controller.button(&name, action)
                })
                .await;
            if let Err(error) = result {
                error!(log, "giving up on power action"; "error" => %error);
            }
        });

        if action == PowerAction::PowerOn {
            let panel = Arc::clone(self);
            let service_id = vm.service;
            tokio::spawn(async move {
                tokio::time::sleep(POWER_ON_CONVERGENCE_DELAY).await;
                if let Err(error) = panel.launch_ansible(service_id) {
                    warn!(
                        panel.log(),
                        "post-power-on convergence not dispatched";
                        "service_id" => %service_id,
                        "error" => %error,
                    );
                }
            });
        }
        Ok(())
    }

    /// Destroys a VM: the external instance first (the external identifier
    /// is only reachable through the record), then the record, which frees
    /// the host network configuration.  A VM that never received an
    /// external name has nothing external to destroy.
    pub async fn vm_delete(self: &Arc<Self>, vm_id: Uuid) -> Result<(), Error> {
        let vm = self.datastore().vm_fetch(vm_id)?;
        if let Some(name) = &vm.name {
            let log = self.log().new(o!("vm_id" => vm_id.to_string()));
            vm_teardown_policy()
                .run(&log, "vm delete", || self.vm_controller.delete_vm(name))
                .await?;
        }
        self.datastore().vm_delete(vm_id)
    }
}
