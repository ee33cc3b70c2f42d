// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background task chasing sites that have not provided payment details
//!
//! A new site has 30 days to submit a purchase order: a first warning goes
//! out on day 15, daily warnings through the final week, and after day 30
//! the site is cancelled.  Pre-allocated sites are not billed until they
//! are handed out.

use super::driver::BackgroundTask;
use crate::app::Panel;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use slog::Logger;
use std::sync::Arc;

/// First unpaid warning, in days after site creation
const FIRST_WARNING_DAY: i64 = 15;
/// Daily warnings start here
const FINAL_WEEK_DAY: i64 = 24;
/// Unpaid sites are cancelled after this many days
const PAYMENT_DEADLINE_DAYS: i64 = 30;

pub struct BillingReminders {
    panel: Arc<Panel>,
}

impl BillingReminders {
    pub fn new(panel: Arc<Panel>) -> BillingReminders {
        BillingReminders { panel }
    }

    async fn run(&self, log: &Logger) -> serde_json::Value {
        let today = Utc::now().date_naive();
        let mut warned = 0;
        let mut cancelled = 0;

        let sites = match self.panel.datastore().site_list() {
            Ok(sites) => sites,
            Err(error) => {
                error!(log, "failed to list sites"; "error" => %error);
                return serde_json::json!({ "error": error.to_string() });
            }
        };
        for site in sites {
            if site.preallocated || site.is_cancelled() {
                continue;
            }
            match self.panel.datastore().billing_for_site(site.id) {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(error) => {
                    error!(
                        log,
                        "failed to look up billing";
                        "site_id" => %site.id,
                        "error" => %error,
                    );
                    continue;
                }
            }

            let days = (today - site.start_date).num_days();
            let recipient = site
                .email
                .clone()
                .unwrap_or_else(|| {
                    self.panel.settings().support_email.clone()
                });
            if days > PAYMENT_DEADLINE_DAYS {
                if let Err(error) = self.panel.site_cancel(site.id).await {
                    error!(
                        log,
                        "failed to cancel unpaid site";
                        "site_id" => %site.id,
                        "error" => %error,
                    );
                    continue;
                }
                self.panel.notifier().notify(
                    &recipient,
                    "Managed Web Service: site cancelled",
                    &format!(
                        "Your site '{}' was cancelled because no purchase \
                         order was received within {} days.",
                        site.name, PAYMENT_DEADLINE_DAYS
                    ),
                );
                info!(
                    log,
                    "cancelled unpaid site";
                    "site_id" => %site.id,
                    "days_unpaid" => days,
                );
                cancelled += 1;
            } else if days >= FINAL_WEEK_DAY || days == FIRST_WARNING_DAY {
                self.panel.notifier().notify(
                    &recipient,
                    "Managed Web Service: payment details needed",
                    &format!(
                        "Your site '{}' has no purchase order on file.  It \
                         will be cancelled {} days after creation.",
                        site.name, PAYMENT_DEADLINE_DAYS
                    ),
                );
                warned += 1;
            }
        }

        serde_json::json!({ "warned": warned, "cancelled": cancelled })
    }
}

impl BackgroundTask for BillingReminders {
    fn activate<'a>(
        &'a mut self,
        log: &'a Logger,
    ) -> BoxFuture<'a, serde_json::Value> {
        self.run(log).boxed()
    }
}
