// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Panel configuration, deserialized from a TOML file

use camino::Utf8Path;
use camino::Utf8PathBuf;
use dropshot::ConfigDropshot;
use dropshot::ConfigLogging;
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Dropshot server configuration for the callback/inventory API
    pub dropshot: ConfigDropshot,
    /// Server-wide logging configuration
    pub log: ConfigLogging,
    pub panel: PanelSettings,
    pub vm_api: VmApiConfig,
    pub ansible: AnsibleConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub background_tasks: BackgroundTaskConfig,
}

/// Store bootstrap settings
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// seed file describing the network pool and server-type catalogue,
    /// loaded on startup
    pub seed_path: Option<Utf8PathBuf>,
}

/// Settings consumed directly by the orchestration core
#[derive(Clone, Debug, Deserialize)]
pub struct PanelSettings {
    /// Public URL of the post-installation callback, sent to the installer
    /// with every `create` request
    pub callback_endpoint: String,
    /// OS version requested for new VMs
    #[serde(default = "default_os_version")]
    pub os_version: String,
    /// Recipient for operator-facing notifications
    #[serde(default = "default_support_email")]
    pub support_email: String,
}

fn default_os_version() -> String {
    "jessie".to_string()
}

fn default_support_email() -> String {
    "mws-support@example.org".to_string()
}

/// How to invoke the external VM control API
#[derive(Clone, Debug, Deserialize)]
pub struct VmApiConfig {
    /// argv prefix of the control command
    pub command: Vec<String>,
}

/// How to invoke the configuration convergence runner
#[derive(Clone, Debug, Deserialize)]
pub struct AnsibleConfig {
    /// argv prefix of the runner command
    pub command: Vec<String>,
}

/// Activation periods and per-task knobs for the background task driver
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct BackgroundTaskConfig {
    pub billing: BillingTaskConfig,
    pub renewal: RenewalTaskConfig,
    pub backups: BackupTaskConfig,
    pub purge: PurgeTaskConfig,
    pub preallocate: PreallocateTaskConfig,
    pub admins: AdminTaskConfig,
    pub domains: DomainTaskConfig,
}

const DAY_SECS: u64 = 24 * 60 * 60;

fn default_period_secs() -> u64 {
    DAY_SECS
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BillingTaskConfig {
    pub period_secs: u64,
}

impl Default for BillingTaskConfig {
    fn default() -> Self {
        BillingTaskConfig { period_secs: default_period_secs() }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RenewalTaskConfig {
    pub period_secs: u64,
}

impl Default for RenewalTaskConfig {
    fn default() -> Self {
        RenewalTaskConfig { period_secs: default_period_secs() }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BackupTaskConfig {
    pub period_secs: u64,
    /// location of the report produced by the external backup system
    pub report_path: Utf8PathBuf,
}

impl Default for BackupTaskConfig {
    fn default() -> Self {
        BackupTaskConfig {
            period_secs: default_period_secs(),
            report_path: Utf8PathBuf::from(
                "/var/lib/mws/backup-report.json",
            ),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PurgeTaskConfig {
    pub period_secs: u64,
}

impl Default for PurgeTaskConfig {
    fn default() -> Self {
        PurgeTaskConfig { period_secs: default_period_secs() }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PreallocateTaskConfig {
    pub period_secs: u64,
    /// how many unassigned pre-allocated sites to keep on hand
    pub target: usize,
}

impl Default for PreallocateTaskConfig {
    fn default() -> Self {
        PreallocateTaskConfig { period_secs: default_period_secs(), target: 2 }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AdminTaskConfig {
    pub period_secs: u64,
}

impl Default for AdminTaskConfig {
    fn default() -> Self {
        AdminTaskConfig { period_secs: default_period_secs() }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DomainTaskConfig {
    pub period_secs: u64,
    /// command invoked with a hostname; zero exit means the name currently
    /// resolves to a changeable (CNAME) record
    pub check_command: Option<Vec<String>>,
}

impl Default for DomainTaskConfig {
    fn default() -> Self {
        DomainTaskConfig {
            period_secs: default_period_secs(),
            check_command: None,
        }
    }
}

/// Problems loading a [`Config`]
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("failed to parse {path}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
}

impl Config {
    pub fn from_file(path: &Utf8Path) -> Result<Config, LoadError> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            LoadError::Io { path: path.to_path_buf(), err }
        })?;
        toml::from_str(&contents).map_err(|err| LoadError::Parse {
            path: path.to_path_buf(),
            err,
        })
    }
}

#[cfg(test)]
mod test {
    use super::Config;

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = toml::from_str(
            r##"
            [dropshot]
            bind_address = "127.0.0.1:8123"

            [log]
            mode = "stderr-terminal"
            level = "info"

            [panel]
            callback_endpoint = "https://panel.example.org/api/post-installation"

            [vm_api]
            command = ["userv", "mws-admin", "vmapi"]

            [ansible]
            command = ["userv", "mws-admin", "ansible"]
            "##,
        )
        .unwrap();
        assert_eq!(config.panel.os_version, "jessie");
        assert_eq!(config.background_tasks.preallocate.target, 2);
        assert_eq!(
            config.background_tasks.billing.period_secs,
            24 * 60 * 60
        );
        assert!(config.background_tasks.domains.check_command.is_none());
    }

    #[test]
    fn test_parse_task_overrides() {
        let config: Config = toml::from_str(
            r##"
            [dropshot]
            bind_address = "127.0.0.1:8123"

            [log]
            mode = "stderr-terminal"
            level = "info"

            [panel]
            callback_endpoint = "https://panel.example.org/api/post-installation"
            os_version = "bookworm"

            [vm_api]
            command = ["/usr/local/bin/vmapi"]

            [ansible]
            command = ["/usr/local/bin/mws-ansible"]

            [background_tasks.preallocate]
            period_secs = 3600
            target = 5

            [background_tasks.backups]
            report_path = "/srv/backups/report.json"
            "##,
        )
        .unwrap();
        assert_eq!(config.panel.os_version, "bookworm");
        assert_eq!(config.background_tasks.preallocate.period_secs, 3600);
        assert_eq!(config.background_tasks.preallocate.target, 5);
        assert_eq!(
            config.background_tasks.backups.report_path,
            "/srv/backups/report.json"
        );
    }
}
