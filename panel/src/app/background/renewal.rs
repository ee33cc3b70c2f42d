// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background task sending annual renewal reminders
//!
//! Subscription sites renew on the anniversary of their start date.  A
//! reminder goes out in the month before the anniversary and again in the
//! anniversary month itself.

use super::driver::BackgroundTask;
use crate::app::Panel;
use chrono::Datelike;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use slog::Logger;
use std::sync::Arc;

pub struct RenewalReminders {
    panel: Arc<Panel>,
}

impl RenewalReminders {
    pub fn new(panel: Arc<Panel>) -> RenewalReminders {
        RenewalReminders { panel }
    }

    async fn run(&self, log: &Logger) -> serde_json::Value {
        let today = Utc::now().date_naive();
        let next_month = today.month() % 12 + 1;
        let mut notified = 0;

        let sites = match self.panel.datastore().site_list() {
            Ok(sites) => sites,
            Err(error) => {
                error!(log, "failed to list sites"; "error" => %error);
                return serde_json::json!({ "error": error.to_string() });
            }
        };
        for site in sites {
            if site.preallocated
                || site.is_cancelled()
                || !site.subscription
            {
                continue;
            }
            // No renewal in the first year.
            if site.start_date.year() >= today.year() {
                continue;
            }
            let anniversary_month = site.start_date.month();
            let when = if anniversary_month == today.month() {
                "this month"
            } else if anniversary_month == next_month {
                "next month"
            } else {
                continue;
            };

            let recipient = site.email.clone().unwrap_or_else(|| {
                self.panel.settings().support_email.clone()
            });
            self.panel.notifier().notify(
                &recipient,
                &format!(
                    "Managed Web Service: your site is due to renew {}",
                    when
                ),
                &format!(
                    "Your site '{}' is due to renew {} (anniversary of \
                     {}).  Please make sure the purchase order on file can \
                     be used as a valid payment method this year as well.",
                    site.name, when, site.start_date
                ),
            );
            notified += 1;
        }

        serde_json::json!({ "notified": notified })
    }
}

impl BackgroundTask for RenewalReminders {
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
    use chrono::Datelike;
    use chrono::NaiveDate;
    use chrono::Utc;

    #[tokio::test]
    async fn test_reminder_in_anniversary_month() {
        let ctx = test_panel();
        let today = Utc::now().date_naive();
        let mut site = ctx.make_site("renewing");
        site.start_date =
            NaiveDate::from_ymd_opt(today.year() - 2, today.month(), 1)
                .unwrap();
        ctx.panel.datastore().site_update(&site).unwrap();

        let mut task = RenewalReminders::new(Arc::clone(&ctx.panel));
        let value = task.run(ctx.panel.log()).await;
        assert_eq!(value["notified"], 1);
    }

    #[tokio::test]
    async fn test_no_reminder_in_first_year() {
        let ctx = test_panel();
        let site = ctx.make_site("new-site");
        // created today, same month but same year
        assert_eq!(
            site.start_date.month(),
            Utc::now().date_naive().month()
        );

        let mut task = RenewalReminders::new(Arc::clone(&ctx.panel));
        let value = task.run(ctx.panel.log()).await;
        assert_eq!(value["notified"], 0);
    }
}
