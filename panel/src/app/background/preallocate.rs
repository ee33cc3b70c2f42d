// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background task replenishing the pre-allocated site pool
//!
//! Provisioning a fresh VM takes long enough that new users would wait for
//! it; instead a small pool of sites is created ahead of demand and handed
//! out on request.  This task tops the pool back up to its configured
//! target.

use super::driver::BackgroundTask;
use crate::app::Panel;
use crate::app::SiteCreateParams;
use futures::future::BoxFuture;
use futures::FutureExt;
use slog::Logger;
use std::sync::Arc;
use uuid::Uuid;

pub struct PoolReplenish {
    panel: Arc<Panel>,
    target: usize,
}

impl PoolReplenish {
    pub fn new(panel: Arc<Panel>, target: usize) -> PoolReplenish {
        PoolReplenish { panel, target }
    }

    async fn run(&self, log: &Logger) -> serde_json::Value {
        let existing = match self.panel.datastore().site_list() {
            Ok(sites) => {
                sites.iter().filter(|s| s.preallocated).count()
            }
            Err(error) => {
                error!(log, "failed to list sites"; "error" => %error);
                return serde_json::json!({ "error": error.to_string() });
            }
        };

        let server_type = match self.panel.datastore().server_type_list() {
            Ok(types) => match types.into_iter().next() {
                Some(server_type) => server_type,
                None => {
                    warn!(log, "no server types defined; cannot preallocate");
                    return serde_json::json!({ "preallocated": existing });
                }
            },
            Err(error) => {
                error!(log, "failed to list server types"; "error" => %error);
                return serde_json::json!({ "error": error.to_string() });
            }
        };

        let mut created = 0;
        while existing + created < self.target {
            let name = format!("preallocated-{}", Uuid::new_v4());
            let result = self
                .panel
                .site_create(SiteCreateParams {
                    name,
                    description: "pre-allocated".to_string(),
                    institution: String::new(),
                    email: None,
                    server_type: server_type.id,
                    users: Vec::new(),
                    preallocated: true,
                    subscription: false,
                })
                .await;
            match result {
                Ok(site) => {
                    info!(
                        log,
                        "pre-allocated a site";
                        "site_id" => %site.id,
                    );
                    created += 1;
                }
                Err(error) => {
                    // Usually pool exhaustion; there is no point trying to
                    // create more right now.
                    warn!(
                        log,
                        "failed to pre-allocate site";
                        "error" => %error,
                    );
                    break;
                }
            }
        }

        serde_json::json!({
            "preallocated": existing + created,
            "created": created,
        })
    }
}

impl BackgroundTask for PoolReplenish {
    fn activate<'a>(
        &'a mut self,
        log: &'a Logger,
    ) -> BoxFuture<'a, serde_json::Value> {
        self.run(log).boxed()
    }
}
