// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background task verifying backup completeness
//!
//! The external backup system writes a JSON report of hosts it has backed
//! up.  This task cross-references that report against every VM of every
//! active site and logs an error for each host that is missing or stale.
//! Individual problems never fail the batch: one unreported host must not
//! hide the state of the others.

use super::driver::BackgroundTask;
use crate::app::Panel;
use camino::Utf8PathBuf;
use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use slog::Logger;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A backup older than this is reported as stale.  Backups run nightly;
/// the extra hour absorbs scheduling jitter.
const MAX_BACKUP_AGE_HOURS: i64 = 25;

/// One entry of the external backup report
#[derive(Debug, Deserialize)]
struct BackupReportEntry {
    hostname: String,
    last_backup: DateTime<Utc>,
}

pub struct BackupCheck {
    panel: Arc<Panel>,
    report_path: Utf8PathBuf,
}

impl BackupCheck {
    pub fn new(panel: Arc<Panel>, report_path: Utf8PathBuf) -> BackupCheck {
        BackupCheck { panel, report_path }
    }

    async fn run(&self, log: &Logger) -> serde_json::Value {
        let contents = match std::fs::read_to_string(&self.report_path) {
            Ok(contents) => contents,
            Err(error) => {
                error!(
                    log,
                    "failed to read backup report";
                    "path" => %self.report_path,
                    "error" => %error,
                );
                return serde_json::json!({ "error": error.to_string() });
            }
        };
        let entries: Vec<BackupReportEntry> =
            match serde_json::from_str(&contents) {
                Ok(entries) => entries,
                Err(error) => {
                    error!(
                        log,
                        "failed to parse backup report";
                        "path" => %self.report_path,
                        "error" => %error,
                    );
                    return serde_json::json!({
                        "error": error.to_string()
                    });
                }
            };
        let report: BTreeMap<String, DateTime<Utc>> = entries
            .into_iter()
            .map(|e| (e.hostname, e.last_backup))
            .collect();

        let mut checked = 0;
        let mut missing = 0;
        let mut stale = 0;
        let cutoff = Utc::now() - Duration::hours(MAX_BACKUP_AGE_HOURS);
        for host in self.active_hosts(log) {
            checked += 1;
            match report.get(&host) {
                None => {
                    error!(log, "no backup recorded for host"; "host" => %host);
                    missing += 1;
                }
                Some(last_backup) if *last_backup < cutoff => {
                    error!(
                        log,
                        "backup for host is stale";
                        "host" => %host,
                        "last_backup" => %last_backup,
                    );
                    stale += 1;
                }
                Some(_) => {}
            }
        }

        serde_json::json!({
            "checked": checked,
            "missing": missing,
            "stale": stale,
        })
    }

    /// Hostnames of every named VM belonging to an active site.
    fn active_hosts(&self, log: &Logger) -> Vec<String> {
        let datastore = self.panel.datastore();
        let mut hosts = Vec::new();
        let vms = match datastore.vm_list() {
            Ok(vms) => vms,
            Err(error) => {
                error!(log, "failed to list VMs"; "error" => %error);
                return hosts;
            }
        };
        for vm in vms {
            if vm.name.is_none() {
                continue;
            }
            let active = datastore
                .service_fetch(vm.service)
                .and_then(|service| match service.site {
                    Some(site_id) => {
                        datastore.site_fetch(site_id).map(|s| s.is_active())
                    }
                    None => Ok(false),
                })
                .unwrap_or(false);
            if !active {
                continue;
            }
            match datastore.network_config_fetch(vm.network_config) {
                Ok(netconf) => hosts.push(netconf.name),
                Err(error) => {
                    error!(
                        log,
                        "VM has no network configuration";
                        "vm_id" => %vm.id,
                        "error" => %error,
                    );
                }
            }
        }
        hosts
    }
}

impl BackgroundTask for BackupCheck {
    fn activate<'a>(
        &'a mut self,
        log: &'a Logger,
    ) -> BoxFuture<'a, serde_json::Value> {
        self.run(log).boxed()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::app::test_helpers::test_panel;

    fn write_report(
        entries: serde_json::Value,
    ) -> (camino_tempfile::Utf8TempDir, Utf8PathBuf) {
        let dir = camino_tempfile::tempdir().unwrap();
        let path = dir.path().join("backup-report.json");
        std::fs::write(&path, entries.to_string()).unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn test_missing_and_stale_hosts_reported() {
        let ctx = test_panel();
        let site = ctx.make_site("backed-up");
        let (_service, fresh_vm) = ctx.make_provisioned_service(site.id);
        let fresh_host = ctx.vm_hostname(&fresh_vm);
        // a second site whose host the report does not mention
        let other = ctx.make_site("forgotten");
        let (_, _missing_vm) = ctx.make_provisioned_service(other.id);

        let (_dir, path) = write_report(serde_json::json!([
            { "hostname": fresh_host, "last_backup": Utc::now() },
        ]));
        let mut task = BackupCheck::new(Arc::clone(&ctx.panel), path);
        let value = task.run(ctx.panel.log()).await;
        assert_eq!(value["checked"], 2);
        assert_eq!(value["missing"], 1);
        assert_eq!(value["stale"], 0);
    }

    #[tokio::test]
    async fn test_stale_backup_reported() {
        let ctx = test_panel();
        let site = ctx.make_site("stale");
        let (_, vm) = ctx.make_provisioned_service(site.id);
        let host = ctx.vm_hostname(&vm);

        let (_dir, path) = write_report(serde_json::json!([
            {
                "hostname": host,
                "last_backup": Utc::now() - Duration::hours(48),
            },
        ]));
        let mut task = BackupCheck::new(Arc::clone(&ctx.panel), path);
        let value = task.run(ctx.panel.log()).await;
        assert_eq!(value["checked"], 1);
        assert_eq!(value["stale"], 1);
    }

    #[tokio::test]
    async fn test_unreadable_report_does_not_panic() {
        let ctx = test_panel();
        let mut task = BackupCheck::new(
            Arc::clone(&ctx.panel),
            Utf8PathBuf::from("/nonexistent/backup-report.json"),
        );
        let value = task.run(ctx.panel.log()).await;
        assert!(value.get("error").is_some());
    }
}
