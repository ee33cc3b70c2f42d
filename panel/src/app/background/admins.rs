// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background task watching for sites without administrators
//!
//! A site whose last administrator leaves gets a daily warning while a
//! grace counter runs; after seven days the site is suspended and
//! disabled.  Sites down to a single administrator get a weekly nudge to
//! appoint another.

use super::driver::BackgroundTask;
use crate::app::Panel;
use chrono::Datelike;
use chrono::Utc;
use chrono::Weekday;
use futures::future::BoxFuture;
use futures::FutureExt;
use slog::Logger;
use std::sync::Arc;

/// Days without any administrator before the site is suspended
const ADMIN_GRACE_DAYS: u32 = 7;

pub struct AdminWatch {
    panel: Arc<Panel>,
}

impl AdminWatch {
    pub fn new(panel: Arc<Panel>) -> AdminWatch {
        AdminWatch { panel }
    }

    async fn run(&self, log: &Logger) -> serde_json::Value {
        let today = Utc::now().date_naive();
        let mut warned = 0;
        let mut suspended = 0;
        let mut reminded = 0;

        let sites = match self.panel.datastore().site_list() {
            Ok(sites) => sites,
            Err(error) => {
                error!(log, "failed to list sites"; "error" => %error);
                return serde_json::json!({ "error": error.to_string() });
            }
        };
        for mut site in sites {
            if site.preallocated || site.is_cancelled() {
                continue;
            }
            let recipient = site.email.clone().unwrap_or_else(|| {
                self.panel.settings().support_email.clone()
            });

            if site.users.is_empty() {
                site.days_without_admin += 1;
                if let Err(error) =
                    self.panel.datastore().site_update(&site)
                {
                    error!(
                        log,
                        "failed to update admin grace counter";
                        "site_id" => %site.id,
                        "error" => %error,
                    );
                    continue;
                }

                if site.days_without_admin >= ADMIN_GRACE_DAYS {
                    let already_suspended = self
                        .panel
                        .datastore()
                        .site_has_active_suspension(site.id)
                        .unwrap_or(false);
                    if !already_suspended {
                        if let Err(error) =
                            self.panel.datastore().suspension_create(
                                site.id,
                                "site has no administrators",
                                today,
                            )
                        {
                            error!(
                                log,
                                "failed to suspend site";
                                "site_id" => %site.id,
                                "error" => %error,
                            );
                            continue;
                        }
                        if let Err(error) =
                            self.panel.site_disable(site.id).await
                        {
                            error!(
                                log,
                                "failed to disable suspended site";
                                "site_id" => %site.id,
                                "error" => %error,
                            );
                        }
                        self.panel.notifier().notify(
                            &recipient,
                            "Managed Web Service: site suspended",
                            &format!(
                                "Your site '{}' has had no administrators \
                                 for {} days and has been suspended.",
                                site.name, site.days_without_admin
                            ),
                        );
                        info!(
                            log,
                            "suspended site without administrators";
                            "site_id" => %site.id,
                        );
                        suspended += 1;
                    }
                } else {
                    self.panel.notifier().notify(
                        &recipient,
                        "Managed Web Service: site has no administrators",
                        &format!(
                            "Your site '{}' has no administrators.  It \
                             will be suspended after {} days.",
                            site.name, ADMIN_GRACE_DAYS
                        ),
                    );
                    warned += 1;
                }
            } else {
                if site.days_without_admin != 0 {
                    site.days_without_admin = 0;
                    if let Err(error) =
                        self.panel.datastore().site_update(&site)
                    {
                        error!(
                            log,
                            "failed to reset admin grace counter";
                            "site_id" => %site.id,
                            "error" => %error,
                        );
                    }
                }
                if site.users.len() == 1 && today.weekday() == Weekday::Mon {
                    self.panel.notifier().notify(
                        &recipient,
                        "Managed Web Service: only one administrator left",
                        &format!(
                            "Your site '{}' has a single administrator.  \
                             Please appoint another so the site does not \
                             become orphaned.",
                            site.name
                        ),
                    );
                    reminded += 1;
                }
            }
        }

        serde_json::json!({
            "warned": warned,
            "suspended": suspended,
            "reminded": reminded,
        })
    }
}

impl BackgroundTask for AdminWatch {
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

    #[tokio::test]
    async fn test_adminless_site_suspended_after_grace() {
        let ctx = test_panel();
        let mut site = ctx.make_site("orphaned");
        site.users.clear();
        site.days_without_admin = ADMIN_GRACE_DAYS - 1;
        ctx.panel.datastore().site_update(&site).unwrap();

        let mut task = AdminWatch::new(Arc::clone(&ctx.panel));
        let value = task.run(ctx.panel.log()).await;
        assert_eq!(value["suspended"], 1);

        let site = ctx.panel.datastore().site_fetch(site.id).unwrap();
        assert!(site.disabled);
        assert!(ctx
            .panel
            .datastore()
            .site_has_active_suspension(site.id)
            .unwrap());
    }

    #[tokio::test]
    async fn test_adminless_site_warned_during_grace() {
        let ctx = test_panel();
        let mut site = ctx.make_site("losing-admins");
        site.users.clear();
        ctx.panel.datastore().site_update(&site).unwrap();

        let mut task = AdminWatch::new(Arc::clone(&ctx.panel));
        let value = task.run(ctx.panel.log()).await;
        assert_eq!(value["warned"], 1);
        assert_eq!(value["suspended"], 0);
        let site = ctx.panel.datastore().site_fetch(site.id).unwrap();
        assert_eq!(site.days_without_admin, 1);
        assert!(!site.disabled);
    }

    #[tokio::test]
    async fn test_counter_resets_when_admins_return() {
        let ctx = test_panel();
        let mut site = ctx.make_site("recovered");
        site.days_without_admin = 3;
        ctx.panel.datastore().site_update(&site).unwrap();

        let mut task = AdminWatch::new(Arc::clone(&ctx.panel));
        task.run(ctx.panel.log()).await;
        let site = ctx.panel.datastore().site_fetch(site.id).unwrap();
        assert_eq!(site.days_without_admin, 0);
    }
}
