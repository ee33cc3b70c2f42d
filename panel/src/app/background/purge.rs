// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background task purging long-cancelled sites
//!
//! Cancelled sites keep their records (and external VMs, powered off) for
//! eight weeks so a cancellation can be undone.  After that the site is
//! hard-deleted, external VMs included.

use super::driver::BackgroundTask;
use crate::app::Panel;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use slog::Logger;
use std::sync::Arc;

/// Grace period between cancellation and hard deletion
const PURGE_AFTER_DAYS: i64 = 7 * 8;

pub struct SitePurge {
    panel: Arc<Panel>,
}

impl SitePurge {
    pub fn new(panel: Arc<Panel>) -> SitePurge {
        SitePurge { panel }
    }

    async fn run(&self, log: &Logger) -> serde_json::Value {
        let today = Utc::now().date_naive();
        let mut purged = 0;
        let mut failed = 0;

        let sites = match self.panel.datastore().site_list() {
            Ok(sites) => sites,
            Err(error) => {
                error!(log, "failed to list sites"; "error" => %error);
                return serde_json::json!({ "error": error.to_string() });
            }
        };
        for site in sites {
            let end_date = match site.end_date {
                Some(end_date) => end_date,
                None => continue,
            };
            if (today - end_date).num_days() < PURGE_AFTER_DAYS {
                continue;
            }
            match self.panel.site_delete(site.id).await {
                Ok(()) => {
                    info!(
                        log,
                        "purged cancelled site";
                        "site_id" => %site.id,
                        "site_name" => &site.name,
                        "cancelled" => %end_date,
                    );
                    purged += 1;
                }
                Err(error) => {
                    // Try again on the next sweep.
                    error!(
                        log,
                        "failed to purge site";
                        "site_id" => %site.id,
                        "error" => %error,
                    );
                    failed += 1;
                }
            }
        }

        serde_json::json!({ "purged": purged, "failed": failed })
    }
}

impl BackgroundTask for SitePurge {
    fn activate<'a>(
        &'a mut self,
        log: &'a Logger,
    ) -> BoxFuture<'a, serde_json::Value> {
        self.run(log).boxed()
    }
}
