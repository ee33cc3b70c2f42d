// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Periodic maintenance tasks and the driver that runs them

mod admins;
mod backups;
mod billing;
mod domains;
mod driver;
mod init;
mod preallocate;
mod purge;
mod renewal;

pub use admins::AdminWatch;
pub use backups::BackupCheck;
pub use billing::BillingReminders;
pub use domains::CommandDnsChecker;
pub use domains::DnsChecker;
pub use domains::DomainAutoProcess;
pub use driver::ActivationReason;
pub use driver::BackgroundTask;
pub use driver::Driver;
pub use driver::LastResult;
pub use driver::LastStart;
pub use driver::TaskName;
pub use driver::TaskStatus;
pub use init::init;
pub use preallocate::PoolReplenish;
pub use purge::SitePurge;
pub use renewal::RenewalReminders;
