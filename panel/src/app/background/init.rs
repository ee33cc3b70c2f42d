// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background task initialization

use super::admins::AdminWatch;
use super::backups::BackupCheck;
use super::billing::BillingReminders;
use super::domains::CommandDnsChecker;
use super::domains::DnsChecker;
use super::domains::DomainAutoProcess;
use super::driver::Driver;
use super::preallocate::PoolReplenish;
use super::purge::SitePurge;
use super::renewal::RenewalReminders;
use crate::app::Panel;
use crate::config::BackgroundTaskConfig;
use std::sync::Arc;
use std::time::Duration;

/// Kick off all background tasks
///
/// Returns a `Driver` that can be used for inspecting background tasks and
/// activating them explicitly.  Dropping the driver stops the tasks.
pub fn init(panel: &Arc<Panel>, config: &BackgroundTaskConfig) -> Driver {
    let mut driver = Driver::new();
    let log = panel.log();

    driver.register(
        "billing-reminders",
        "warns unpaid sites and cancels them after the payment deadline",
        Duration::from_secs(config.billing.period_secs),
        Box::new(BillingReminders::new(Arc::clone(panel))),
        log,
    );

    driver.register(
        "renewal-reminders",
        "sends annual renewal reminders ahead of each site's anniversary",
        Duration::from_secs(config.renewal.period_secs),
        Box::new(RenewalReminders::new(Arc::clone(panel))),
        log,
    );

    driver.register(
        "backup-check",
        "cross-references the external backup report against active VMs",
        Duration::from_secs(config.backups.period_secs),
        Box::new(BackupCheck::new(
            Arc::clone(panel),
            config.backups.report_path.clone(),
        )),
        log,
    );

    driver.register(
        "site-purge",
        "hard-deletes sites cancelled at least eight weeks ago",
        Duration::from_secs(config.purge.period_secs),
        Box::new(SitePurge::new(Arc::clone(panel))),
        log,
    );

    driver.register(
        "pool-replenish",
        "keeps the pre-allocated site pool at its target size",
        Duration::from_secs(config.preallocate.period_secs),
        Box::new(PoolReplenish::new(
            Arc::clone(panel),
            config.preallocate.target,
        )),
        log,
    );

    driver.register(
        "admin-watch",
        "warns and eventually suspends sites that lost their administrators",
        Duration::from_secs(config.admins.period_secs),
        Box::new(AdminWatch::new(Arc::clone(panel))),
        log,
    );

    let dns_checker: Option<Arc<dyn DnsChecker>> =
        config.domains.check_command.as_ref().map(|command| {
            Arc::new(CommandDnsChecker::new(command.clone()))
                as Arc<dyn DnsChecker>
        });
    driver.register(
        "domain-autoprocess",
        "accepts or denies domain name requests outstanding for three days",
        Duration::from_secs(config.domains.period_secs),
        Box::new(DomainAutoProcess::new(Arc::clone(panel), dns_checker)),
        log,
    );

    driver
}
