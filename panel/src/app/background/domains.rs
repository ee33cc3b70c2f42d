// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background task auto-processing stale domain name requests
//!
//! Domain requests are normally approved by hostmasters.  Requests left
//! `requested` for more than three days are decided automatically: accepted
//! when the name currently resolves to a changeable (CNAME) record — the
//! requester controls it and repointing it is safe — and denied otherwise.

use super::driver::BackgroundTask;
use crate::app::Panel;
use async_trait::async_trait;
use chrono::Duration;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use mws_common::states::DomainStatus;
use mws_common::Error;
use slog::Logger;
use std::sync::Arc;
use tokio::process::Command;

/// Requests older than this are decided automatically
const AUTO_PROCESS_AFTER_DAYS: i64 = 3;

/// Answers whether a hostname currently resolves to a changeable (CNAME)
/// record
#[async_trait]
pub trait DnsChecker: Send + Sync {
    async fn is_changeable(&self, name: &str) -> Result<bool, Error>;
}

/// [`DnsChecker`] invoking a configured command with the hostname; zero
/// exit means changeable
pub struct CommandDnsChecker {
    command: Vec<String>,
}

impl CommandDnsChecker {
    pub fn new(command: Vec<String>) -> CommandDnsChecker {
        CommandDnsChecker { command }
    }
}

#[async_trait]
impl DnsChecker for CommandDnsChecker {
    async fn is_changeable(&self, name: &str) -> Result<bool, Error> {
        let (program, prefix_args) =
            self.command.split_first().ok_or_else(|| {
                Error::internal_error("DNS check command not configured")
            })?;
        let status = Command::new(program)
            .args(prefix_args)
            .arg(name)
            .status()
            .await
            .map_err(|e| {
                Error::unavail(&format!(
                    "failed to execute DNS check command: {}",
                    e
                ))
            })?;
        Ok(status.success())
    }
}

pub struct DomainAutoProcess {
    panel: Arc<Panel>,
    checker: Option<Arc<dyn DnsChecker>>,
}

impl DomainAutoProcess {
    pub fn new(
        panel: Arc<Panel>,
        checker: Option<Arc<dyn DnsChecker>>,
    ) -> DomainAutoProcess {
        DomainAutoProcess { panel, checker }
    }

    async fn run(&self, log: &Logger) -> serde_json::Value {
        let checker = match &self.checker {
            Some(checker) => checker,
            None => {
                debug!(log, "no DNS checker configured; skipping");
                return serde_json::json!({ "skipped": true });
            }
        };
        let cutoff = Utc::now() - Duration::days(AUTO_PROCESS_AFTER_DAYS);
        let mut accepted = 0;
        let mut denied = 0;
        let mut skipped = 0;

        let requests = match self
            .panel
            .datastore()
            .domains_with_status(DomainStatus::Requested)
        {
            Ok(requests) => requests,
            Err(error) => {
                error!(log, "failed to list domain requests"; "error" => %error);
                return serde_json::json!({ "error": error.to_string() });
            }
        };
        for mut domain in requests {
            if domain.requested_at > cutoff {
                continue;
            }
            match checker.is_changeable(&domain.name).await {
                Ok(true) => {
                    domain.status = DomainStatus::Accepted;
                    domain.authorised_by = Some("mws-panel".to_string());
                    if let Err(error) =
                        self.panel.datastore().domain_update(&domain)
                    {
                        error!(
                            log,
                            "failed to accept domain";
                            "domain" => &domain.name,
                            "error" => %error,
                        );
                        continue;
                    }
                    info!(
                        log,
                        "auto-accepted domain request";
                        "domain" => &domain.name,
                    );
                    accepted += 1;
                    // the owning service needs a convergence run to start
                    // serving the name
                    let service = self
                        .panel
                        .datastore()
                        .vhost_fetch(domain.vhost)
                        .map(|vhost| vhost.service);
                    match service {
                        Ok(service_id) => {
                            if let Err(error) =
                                self.panel.launch_ansible(service_id)
                            {
                                warn!(
                                    log,
                                    "convergence not dispatched for accepted \
                                     domain";
                                    "domain" => &domain.name,
                                    "error" => %error,
                                );
                            }
                        }
                        Err(error) => {
                            error!(
                                log,
                                "accepted domain has no vhost";
                                "domain" => &domain.name,
                                "error" => %error,
                            );
                        }
                    }
                }
                Ok(false) => {
                    domain.status = DomainStatus::Denied;
                    domain.authorised_by = Some("mws-panel".to_string());
                    domain.reject_reason = Some(
                        "the name does not resolve to a changeable (CNAME) \
                         record"
                            .to_string(),
                    );
                    if let Err(error) =
                        self.panel.datastore().domain_update(&domain)
                    {
                        error!(
                            log,
                            "failed to deny domain";
                            "domain" => &domain.name,
                            "error" => %error,
                        );
                        continue;
                    }
                    info!(
                        log,
                        "auto-denied domain request";
                        "domain" => &domain.name,
                    );
                    denied += 1;
                }
                Err(error) => {
                    // DNS trouble now does not decide the request; leave it
                    // for the next sweep.
                    warn!(
                        log,
                        "DNS check failed; leaving request pending";
                        "domain" => &domain.name,
                        "error" => %error,
                    );
                    skipped += 1;
                }
            }
        }

        serde_json::json!({
            "accepted": accepted,
            "denied": denied,
            "skipped": skipped,
        })
    }
}

impl BackgroundTask for DomainAutoProcess {
    fn activate<'a>(
        &'a mut self,
        log: &'a Logger,
    ) -> BoxFuture<'a, serde_json::Value> {
        self.run(log).boxed()
    }
}
