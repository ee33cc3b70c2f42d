// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration convergence: the queueing rule and the worker loop
//!
//! The invariant maintained here is "at most one in-flight convergence run
//! per service, and no requested change is ever lost."  The in-flight state
//! lives in the persisted `Service.status` field, moved exclusively through
//! compare-and-set, so the guarantee holds across process restarts and
//! across concurrent callers:
//!
//! - `ready`: no run in flight.  A request moves the service to `ansible`
//!   and dispatches exactly one worker.
//! - `ansible`: a run is in flight.  A request moves the service to
//!   `ansible_queued` and dispatches nothing — the running worker will see
//!   the flag when it finishes and loop once more.
//! - `ansible_queued`: a follow-up run is already promised; further
//!   requests coalesce into it.

use crate::app::Panel;
use mws_common::params::AnsibleOperation;
use mws_common::retry::ansible_run_policy;
use mws_common::states::ServiceStatus;
use mws_common::Error;
use slog::Logger;
use std::sync::Arc;
use uuid::Uuid;

/// How a convergence worker was started
#[derive(Clone, Copy, Debug, PartialEq)]
enum WorkerKind {
    /// An ordinary run against a `ready` service.
    Routine,
    /// The first run after an OS installation: host-key checking is
    /// disabled (the new host key is not recorded yet) and the post-install
    /// extras run once the pass succeeds.
    PostInstall,
}

impl Panel {
    /// Requests a convergence run for a service, coalescing with any run
    /// already in flight.
    ///
    /// Requests against services that are still installing are dropped:
    /// convergence is requested anyway when installation completes.
    /// Requests against suspended, disabled, or cancelled sites are dropped
    /// with a log line.  Any other status is an invariant violation.
    pub fn launch_ansible(
        self: &Arc<Self>,
        service_id: Uuid,
    ) -> Result<(), Error> {
        let service = self.datastore().service_fetch(service_id)?;
        if let Some(site_id) = service.site {
            let site = self.datastore().site_fetch(site_id)?;
            if !site.is_active() {
                info!(
                    self.log(),
                    "not converging inactive site";
                    "service_id" => %service_id,
                    "site_id" => %site_id,
                );
                return Ok(());
            }
            if self.datastore().site_has_active_suspension(site_id)? {
                info!(
                    self.log(),
                    "not converging suspended site";
                    "service_id" => %service_id,
                    "site_id" => %site_id,
                );
                return Ok(());
            }
        }

        // Compare-and-set loop: when a CAS loses a race we re-read and take
        // the branch for the status actually observed, so concurrent
        // requests can never double-dispatch and never drop a request.
        loop {
            let status = self.datastore().service_fetch(service_id)?.status;
            match status {
                ServiceStatus::Ready => {
                    if self.datastore().service_update_status_if(
                        service_id,
                        ServiceStatus::Ready,
                        ServiceStatus::Ansible,
                    )? {
                        self.spawn_convergence_worker(
                            service_id,
                            WorkerKind::Routine,
                        );
                        return Ok(());
                    }
                }
                ServiceStatus::Ansible => {
                    if self.datastore().service_update_status_if(
                        service_id,
                        ServiceStatus::Ansible,
                        ServiceStatus::AnsibleQueued,
                    )? {
                        return Ok(());
                    }
                }
                ServiceStatus::AnsibleQueued
                | ServiceStatus::Installing
                | ServiceStatus::Postinstall => return Ok(()),
                found => {
                    return Err(Error::UnexpectedVmStatus { found });
                }
            }
        }
    }

    /// Requests convergence of both of a site's services, where present.
    pub fn launch_ansible_site(
        self: &Arc<Self>,
        site_id: Uuid,
    ) -> Result<(), Error> {
        for service in self.datastore().services_for_site(site_id)? {
            self.launch_ansible(service.id)?;
        }
        Ok(())
    }

    /// Entry point for the deferred post-installation run: moves the
    /// service out of `postinstall` and runs the worker inline.
    pub(crate) async fn post_install_convergence(
        self: &Arc<Self>,
        service_id: Uuid,
    ) {
        match self.datastore().service_update_status_if(
            service_id,
            ServiceStatus::Postinstall,
            ServiceStatus::Ansible,
        ) {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    self.log(),
                    "service left postinstall before its convergence run";
                    "service_id" => %service_id,
                );
                return;
            }
            Err(error) => {
                error!(
                    self.log(),
                    "post-install convergence not started";
                    "service_id" => %service_id,
                    "error" => %error,
                );
                return;
            }
        }
        Arc::clone(self)
            .convergence_worker(service_id, WorkerKind::PostInstall)
            .await;
    }

    fn spawn_convergence_worker(
        self: &Arc<Self>,
        service_id: Uuid,
        kind: WorkerKind,
    ) {
        let panel = Arc::clone(self);
        tokio::spawn(async move {
            panel.convergence_worker(service_id, kind).await;
        });
    }

    /// The convergence worker: runs passes until the service settles.
    ///
    /// Each pass converges every VM of the service and is retried as a
    /// whole under the run policy.  On retry exhaustion the service is
    /// reset to `ready` — configuration drift over a wedged service.  On
    /// success, a set `ansible_queued` flag buys exactly one more pass.
    async fn convergence_worker(
        self: Arc<Self>,
        service_id: Uuid,
        kind: WorkerKind,
    ) {
        let log =
            self.log().new(o!("service_id" => service_id.to_string()));
        let mut ignore_host_key = kind == WorkerKind::PostInstall;
        let mut post_install = kind == WorkerKind::PostInstall;

        loop {
            let pass = ansible_run_policy()
                .run(&log, "configuration convergence", || {
                    self.converge_service_once(service_id, ignore_host_key)
                })
                .await;

            let pass = match pass {
                Ok(()) if post_install => {
                    post_install = false;
                    self.post_install_extras(service_id).await
                }
                other => other,
            };

            match pass {
                Err(error) => {
                    error!(
                        log,
                        "convergence run failed; resetting service to ready";
                        "error" => %error,
                    );
                    self.reset_to_ready(&log, service_id);
                    return;
                }
                Ok(()) => {
                    ignore_host_key = false;
                    match self.datastore().service_update_status_if(
                        service_id,
                        ServiceStatus::AnsibleQueued,
                        ServiceStatus::Ansible,
                    ) {
                        // A change arrived mid-run; go around again.
                        Ok(true) => continue,
                        Ok(false) => {
                            match self.datastore().service_update_status_if(
                                service_id,
                                ServiceStatus::Ansible,
                                ServiceStatus::Ready,
                            ) {
                                Ok(true) => {}
                                Ok(false) => warn!(
                                    log,
                                    "service status changed while converging"
                                ),
                                Err(error) => error!(
                                    log,
                                    "failed to settle converged service";
                                    "error" => %error,
                                ),
                            }
                            return;
                        }
                        Err(error) => {
                            error!(
                                log,
                                "failed to check convergence queue flag";
                                "error" => %error,
                            );
                            self.reset_to_ready(&log, service_id);
                            return;
                        }
                    }
                }
            }
        }
    }

    fn reset_to_ready(&self, log: &Logger, service_id: Uuid) {
        if let Err(error) = self
            .datastore()
            .service_set_status(service_id, ServiceStatus::Ready)
        {
            error!(
                log,
                "failed to reset service status";
                "error" => %error,
            );
        }
    }

    /// One convergence pass: every VM of the service, in turn; the pass
    /// fails on the first VM that fails (a partial pass is retried in
    /// full — runner operations are idempotent).
    async fn converge_service_once(
        &self,
        service_id: Uuid,
        ignore_host_key: bool,
    ) -> Result<(), Error> {
        for vm in self.datastore().vms_for_service(service_id)? {
            let netconf =
                self.datastore().network_config_fetch(vm.network_config)?;
            self.ansible
                .run(
                    &netconf.name,
                    &AnsibleOperation::DefaultRun { ignore_host_key },
                )
                .await?;
        }
        Ok(())
    }

    /// Extras that follow the first successful post-installation pass:
    /// production services get their MySQL root password rotated; a
    /// pre-allocated site goes back to sleep until it is handed out.
    async fn post_install_extras(
        &self,
        service_id: Uuid,
    ) -> Result<(), Error> {
        let service = self.datastore().service_fetch(service_id)?;
        if service.kind == mws_common::states::ServiceKind::Production {
            for vm in self.datastore().vms_for_service(service_id)? {
                let netconf = self
                    .datastore()
                    .network_config_fetch(vm.network_config)?;
                self.ansible
                    .run(&netconf.name, &AnsibleOperation::ChangeMysqlRootPwd)
                    .await?;
            }
        }
        if let Some(site_id) = service.site {
            let mut site = self.datastore().site_fetch(site_id)?;
            if site.preallocated && !site.disabled {
                site.disabled = true;
                self.datastore().site_update(&site)?;
            }
        }
        Ok(())
    }
}
