// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command-line implementation of [`VmController`]
//!
//! The control API is reached by invoking a configured command with the
//! operation name and a JSON parameter document as arguments.  The command's
//! stdout is the JSON response.

use crate::VmApiResponse;
use crate::VmController;
use async_trait::async_trait;
use mws_common::params::NetconfParams;
use mws_common::params::VmCreateParams;
use mws_common::states::PowerAction;
use mws_common::Error;
use slog::Logger;
use tokio::process::Command;

/// [`VmController`] implementation invoking the configured control command
pub struct CommandVmController {
    command: Vec<String>,
    log: Logger,
}

impl CommandVmController {
    /// `command` is the argv prefix of the control command; the operation
    /// name and JSON parameters are appended per request.
    pub fn new(command: Vec<String>, log: Logger) -> CommandVmController {
        CommandVmController { command, log }
    }

    async fn request(
        &self,
        operation: &str,
        parameters: serde_json::Value,
    ) -> Result<VmApiResponse, Error> {
        let (program, prefix_args) = self.command.split_first().ok_or_else(
            || Error::internal_error("VM control command not configured"),
        )?;
        let parameters_json = parameters.to_string();

        slog::info!(
            self.log,
            "VM API request";
            "operation" => operation,
            "parameters" => &parameters_json,
        );

        let output = Command::new(program)
            .args(prefix_args)
            .arg(operation)
            .arg(&parameters_json)
            .output()
            .await
            .map_err(|e| {
                Error::unavail(&format!(
                    "failed to execute VM control command {:?}: {}",
                    program, e
                ))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            slog::error!(
                self.log,
                "VM API request failed";
                "operation" => operation,
                "status" => %output.status,
                "stdout" => &stdout,
                "stderr" => %stderr,
            );
            return Err(Error::unavail(&format!(
                "VM control command exited with {}: {}",
                output.status, stderr
            )));
        }

        slog::info!(
            self.log,
            "VM API response";
            "operation" => operation,
            "response" => &stdout,
        );
        parse_response(operation, &stdout)
    }
}

/// Interprets the API's stdout.
///
/// A response carrying an `error` field is a structured rejection and fatal.
/// A response that is not JSON at all is tolerated as an empty response
/// (older API versions answered `create` with free text); callers fall back
/// to the hostname when `vmid` is absent.
fn parse_response(
    operation: &str,
    stdout: &str,
) -> Result<VmApiResponse, Error> {
    let value: serde_json::Value = match serde_json::from_str(stdout) {
        Ok(value) => value,
        Err(_) => return Ok(VmApiResponse::default()),
    };
    if let Some(error) = value.get("error") {
        return Err(Error::invalid_request(&format!(
            "VM API rejected {} request: {}",
            operation, error
        )));
    }
    Ok(VmApiResponse {
        vmid: value
            .get("vmid")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
    })
}

#[async_trait]
impl VmController for CommandVmController {
    async fn create_vm(
        &self,
        params: &VmCreateParams,
    ) -> Result<VmApiResponse, Error> {
        let parameters = serde_json::to_value(params).map_err(|e| {
            Error::internal_error(&format!(
                "failed to serialize create parameters: {}",
                e
            ))
        })?;
        self.request("create", parameters).await
    }

    async fn delete_vm(&self, vmid: &str) -> Result<(), Error> {
        self.request("delete", serde_json::json!({ "vmid": vmid }))
            .await
            .map(|_| ())
    }

    async fn button(
        &self,
        vmid: &str,
        action: PowerAction,
    ) -> Result<(), Error> {
        self.request(
            "button",
            serde_json::json!({ "vmid": vmid, "action": action.label() }),
        )
        .await
        .map(|_| ())
    }

    async fn clone_vm(
        &self,
        source_vmid: &str,
        netconf: &NetconfParams,
    ) -> Result<VmApiResponse, Error> {
        let netconf = serde_json::to_value(netconf).map_err(|e| {
            Error::internal_error(&format!(
                "failed to serialize clone parameters: {}",
                e
            ))
        })?;
        self.request(
            "clone",
            serde_json::json!({ "vmid": source_vmid, "netconf": netconf }),
        )
        .await
    }
}

#[cfg(test)]
mod test {
    use super::parse_response;
    use crate::VmApiResponse;
    use assert_matches::assert_matches;
    use mws_common::Error;

    #[test]
    fn test_parse_vmid() {
        assert_eq!(
            parse_response("create", r#"{"vmid": "mwsvm-00123"}"#).unwrap(),
            VmApiResponse { vmid: Some("mwsvm-00123".to_string()) }
        );
    }

    #[test]
    fn test_parse_missing_vmid() {
        assert_eq!(
            parse_response("delete", r#"{"ok": true}"#).unwrap(),
            VmApiResponse { vmid: None }
        );
    }

    #[test]
    fn test_structured_rejection_is_fatal() {
        let err = parse_response(
            "create",
            r#"{"error": "no capacity on cluster wcdc"}"#,
        )
        .unwrap_err();
        assert_matches!(err, Error::InvalidRequest { .. });
        assert!(!err.retryable());
    }

    #[test]
    fn test_non_json_response_tolerated() {
        assert_eq!(
            parse_response("create", "machine queued\n").unwrap(),
            VmApiResponse { vmid: None }
        );
    }
}
