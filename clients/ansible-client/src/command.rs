// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command-line implementation of [`AnsibleRunner`]

use crate::AnsibleRunner;
use async_trait::async_trait;
use mws_common::params::AnsibleOperation;
use mws_common::Error;
use slog::Logger;
use tokio::process::Command;

/// [`AnsibleRunner`] implementation invoking the configured runner command
///
/// The invocation is `<command...> <host> <operation tag> <parameters
/// JSON>`; the runner resolves the host against its own inventory (see the
/// panel's inventory export).
pub struct CommandAnsibleRunner {
    command: Vec<String>,
    log: Logger,
}

impl CommandAnsibleRunner {
    pub fn new(command: Vec<String>, log: Logger) -> CommandAnsibleRunner {
        CommandAnsibleRunner { command, log }
    }
}

#[async_trait]
impl AnsibleRunner for CommandAnsibleRunner {
    async fn run(
        &self,
        host: &str,
        operation: &AnsibleOperation,
    ) -> Result<(), Error> {
        let (program, prefix_args) =
            self.command.split_first().ok_or_else(|| {
                Error::internal_error("ansible command not configured")
            })?;
        let parameters =
            serde_json::to_string(operation).map_err(|e| {
                Error::internal_error(&format!(
                    "failed to serialize ansible parameters: {}",
                    e
                ))
            })?;

        slog::info!(
            self.log,
            "ansible run starting";
            "host" => host,
            "operation" => operation.tag(),
        );

        let output = Command::new(program)
            .args(prefix_args)
            .arg(host)
            .arg(operation.tag())
            .arg(&parameters)
            .output()
            .await
            .map_err(|e| {
                Error::unavail(&format!(
                    "failed to execute ansible command {:?}: {}",
                    program, e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            slog::error!(
                self.log,
                "ansible run failed";
                "host" => host,
                "operation" => operation.tag(),
                "status" => %output.status,
                "stderr" => %stderr,
            );
            return Err(Error::unavail(&format!(
                "ansible {} against {} exited with {}",
                operation.tag(),
                host,
                output.status
            )));
        }

        slog::info!(
            self.log,
            "ansible run complete";
            "host" => host,
            "operation" => operation.tag(),
        );
        Ok(())
    }
}
