// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Snapshot lifecycle: create, delete, restore
//!
//! A snapshot's lifecycle is tracked by row presence plus the
//! `pending_delete` flag: no row until creation is requested, `date` unset
//! while the external operation runs, `pending_delete` set while an
//! asynchronous deletion is in flight.

use crate::app::Panel;
use chrono::NaiveDate;
use chrono::Utc;
use mws_common::params::AnsibleOperation;
use mws_common::params::RestoreTarget;
use mws_common::retry::ansible_run_policy;
use mws_common::Error;
use mws_store::model::Snapshot;
use std::sync::Arc;
use uuid::Uuid;

/// Custom snapshots a service may keep at once
const SNAPSHOT_QUOTA: usize = 2;

impl Panel {
    /// Creates a custom snapshot of a service.
    ///
    /// Rejected synchronously: names shaped like ISO dates (reserved for
    /// the daily automatic backups), a third snapshot (quota), and
    /// duplicate names on the same service.  The external snapshot then
    /// runs asynchronously; its success stamps the row's date, its failure
    /// removes the row so no record exists without an underlying artifact.
    pub fn snapshot_create(
        self: &Arc<Self>,
        service_id: Uuid,
        name: &str,
    ) -> Result<Snapshot, Error> {
        if NaiveDate::parse_from_str(name, "%Y-%m-%d").is_ok() {
            return Err(Error::InvalidValue {
                label: "name".to_string(),
                message: "date-shaped names are reserved for automatic \
                          backups"
                    .to_string(),
            });
        }
        let existing = self.datastore().snapshots_for_service(service_id)?;
        if existing.iter().filter(|s| !s.pending_delete).count()
            >= SNAPSHOT_QUOTA
        {
            return Err(Error::invalid_request(&format!(
                "a service may keep at most {} custom snapshots",
                SNAPSHOT_QUOTA
            )));
        }

        let snapshot = self.datastore().snapshot_create(service_id, name)?;
        info!(
            self.log(),
            "snapshot requested";
            "service_id" => %service_id,
            "snapshot" => name,
        );

        let panel = Arc::clone(self);
        let snapshot_id = snapshot.id;
        tokio::spawn(async move {
            panel.snapshot_create_task(snapshot_id).await;
        });
        Ok(snapshot)
    }

    async fn snapshot_create_task(self: Arc<Self>, snapshot_id: Uuid) {
        let snapshot = match self.datastore().snapshot_fetch(snapshot_id) {
            Ok(snapshot) => snapshot,
            Err(_) => return,
        };
        let log = self.log().new(o!(
            "service_id" => snapshot.service.to_string(),
            "snapshot" => snapshot.name.clone(),
        ));

        let operation = AnsibleOperation::CreateCustomSnapshot {
            name: snapshot.name.clone(),
        };
        match self.snapshot_run_all(snapshot.service, &operation).await {
            Ok(()) => {
                let mut snapshot = snapshot;
                snapshot.date = Some(Utc::now());
                if let Err(error) =
                    self.datastore().snapshot_update(&snapshot)
                {
                    error!(
                        log,
                        "failed to stamp created snapshot";
                        "error" => %error,
                    );
                }
            }
            Err(error) => {
                // No artifact, no record.
                error!(
                    log,
                    "snapshot creation failed; removing record";
                    "error" => %error,
                );
                if let Err(delete_error) =
                    self.datastore().snapshot_delete(snapshot_id)
                {
                    error!(
                        log,
                        "failed to remove snapshot record";
                        "error" => %delete_error,
                    );
                }
            }
        }
    }

    /// Deletes a custom snapshot.  The row is flagged `pending_delete`
    /// immediately (so it stops being offered) and removed once the
    /// external deletion succeeds.
    pub fn snapshot_delete(
        self: &Arc<Self>,
        service_id: Uuid,
        name: &str,
    ) -> Result<(), Error> {
        let mut snapshot =
            self.datastore().snapshot_fetch_by_name(service_id, name)?;
        if snapshot.pending_delete {
            return Ok(());
        }
        snapshot.pending_delete = true;
        self.datastore().snapshot_update(&snapshot)?;

        let panel = Arc::clone(self);
        let snapshot_id = snapshot.id;
        tokio::spawn(async move {
            panel.snapshot_delete_task(snapshot_id).await;
        });
        Ok(())
    }

    async fn snapshot_delete_task(self: Arc<Self>, snapshot_id: Uuid) {
        let snapshot = match self.datastore().snapshot_fetch(snapshot_id) {
            Ok(snapshot) => snapshot,
            Err(_) => return,
        };
        let log = self.log().new(o!(
            "service_id" => snapshot.service.to_string(),
            "snapshot" => snapshot.name.clone(),
        ));
        let operation = AnsibleOperation::DeleteSnapshot {
            name: snapshot.name.clone(),
        };

        let result = ansible_run_policy()
            .run(&log, "snapshot delete", || {
                self.snapshot_run_all(snapshot.service, &operation)
            })
            .await;
        match result {
            Ok(()) => {
                if let Err(error) =
                    self.datastore().snapshot_delete(snapshot_id)
                {
                    error!(
                        log,
                        "failed to remove deleted snapshot record";
                        "error" => %error,
                    );
                }
            }
            Err(error) => {
                // The artifact state is unknown, so the record is kept,
                // still flagged, for operator attention.
                error!(
                    log,
                    "snapshot deletion failed; record remains pending_delete";
                    "error" => %error,
                );
            }
        }
    }

    /// Restores a service from a daily backup (by date) or a custom
    /// snapshot (by name).  The caller gets an immediate answer; the
    /// restore itself is fire-and-forget.
    ///
    /// Restore dates must fall within `[site start + 1 day, yesterday]`,
    /// further clamped by the service's `backup_first_date` marker — a
    /// service that took over a hostname cannot restore from backups that
    /// predate the takeover.
    pub fn snapshot_restore(
        self: &Arc<Self>,
        service_id: Uuid,
        target: RestoreTarget,
    ) -> Result<(), Error> {
        let service = self.datastore().service_fetch(service_id)?;
        match &target {
            RestoreTarget::Date(date) => {
                let site_id = service.site.ok_or_else(|| {
                    Error::invalid_request(
                        "cannot restore an unassigned service",
                    )
                })?;
                let site = self.datastore().site_fetch(site_id)?;
                let mut first = site.start_date + chrono::Days::new(1);
                if let Some(marker) = self
                    .datastore()
                    .ansible_configuration_get(
                        service_id,
                        "backup_first_date",
                    )?
                {
                    if let Ok(grandfathered) =
                        NaiveDate::parse_from_str(&marker, "%Y-%m-%d")
                    {
                        if grandfathered > first {
                            first = grandfathered;
                        }
                    }
                }
                let last = Utc::now().date_naive() - chrono::Days::new(1);
                if *date < first || *date > last {
                    return Err(Error::invalid_request(&format!(
                        "restore date must be between {} and {}",
                        first, last
                    )));
                }
            }
            RestoreTarget::Named(name) => {
                let snapshot = self
                    .datastore()
                    .snapshot_fetch_by_name(service_id, name)?;
                if snapshot.pending_delete || snapshot.date.is_none() {
                    return Err(Error::invalid_request(
                        "snapshot is not available for restore",
                    ));
                }
            }
        }

        info!(
            self.log(),
            "restore requested";
            "service_id" => %service_id,
        );
        let panel = Arc::clone(self);
        tokio::spawn(async move {
            let log = panel
                .log()
                .new(o!("service_id" => service_id.to_string()));
            let operation =
                AnsibleOperation::RestoreSnapshot { target };
            if let Err(error) =
                panel.snapshot_run_all(service_id, &operation).await
            {
                error!(log, "restore failed"; "error" => %error);
            }
        });
        Ok(())
    }

    /// Runs one snapshot operation against every VM of a service.
    async fn snapshot_run_all(
        &self,
        service_id: Uuid,
        operation: &AnsibleOperation,
    ) -> Result<(), Error> {
        for vm in self.datastore().vms_for_service(service_id)? {
            let netconf =
                self.datastore().network_config_fetch(vm.network_config)?;
            self.ansible.run(&netconf.name, operation).await?;
        }
        Ok(())
    }
}
