// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Helpers shared by the panel's unit tests

use crate::app::Panel;
use crate::config::PanelSettings;
use crate::notify::RecordingNotifier;
use ansible_client::mock::MockAnsibleRunner;
use chrono::Utc;
use mws_common::states::NetworkConfigKind;
use mws_common::states::ServiceKind;
use mws_common::states::ServiceStatus;
use mws_store::model::Service;
use mws_store::model::Site;
use mws_store::model::VirtualMachine;
use mws_store::DataStore;
use mws_store::ServiceCreate;
use mws_store::SiteCreate;
use mws_store::VmCreate;
use slog::Logger;
use std::sync::Arc;
use uuid::Uuid;
use vm_control_client::mock::MockVmController;

pub(crate) struct TestContext {
    pub panel: Arc<Panel>,
    pub vm: Arc<MockVmController>,
    pub ansible: Arc<MockAnsibleRunner>,
    pub notifier: Arc<RecordingNotifier>,
    pub server_type: Uuid,
}

/// Builds a panel over an in-memory store with a seeded network pool and
/// mock collaborators.
pub(crate) fn test_panel() -> TestContext {
    test_panel_with_runner(MockAnsibleRunner::new())
}

pub(crate) fn test_panel_with_runner(
    runner: MockAnsibleRunner,
) -> TestContext {
    let log = Logger::root(slog::Discard, o!());
    let datastore = Arc::new(DataStore::new());
    let server_type = datastore
        .server_type_create("small", 1, 2, 20, 500)
        .unwrap()
        .id;
    for i in 0..16u8 {
        datastore
            .network_config_create(
                NetworkConfigKind::IpvxPub,
                format!("192.0.2.{}", i).parse().unwrap(),
                format!("2001:db8:0:1::{:x}", i).parse().unwrap(),
                format!("site-{:03}.mws.example.org", i),
            )
            .unwrap();
        datastore
            .network_config_create(
                NetworkConfigKind::Ipv4Priv,
                format!("10.0.0.{}", i).parse().unwrap(),
                format!("fd00::{:x}", i).parse().unwrap(),
                format!("host-{:03}.mws.example.org", i),
            )
            .unwrap();
    }

    let vm = Arc::new(MockVmController::new());
    let ansible = Arc::new(runner);
    let notifier = Arc::new(RecordingNotifier::new());
    let panel = Panel::new(
        log,
        Arc::clone(&datastore),
        Arc::clone(&vm) as Arc<dyn vm_control_client::VmController>,
        Arc::clone(&ansible) as Arc<dyn ansible_client::AnsibleRunner>,
        Arc::clone(&notifier) as Arc<dyn crate::notify::Notifier>,
        PanelSettings {
            callback_endpoint:
                "https://panel.mws.example.org/api/post-installation"
                    .to_string(),
            os_version: "jessie".to_string(),
            support_email: "mws-support@example.org".to_string(),
        },
    );
    TestContext { panel, vm, ansible, notifier, server_type }
}

impl TestContext {
    /// Creates a bare active site with one administrator.
    pub(crate) fn make_site(&self, name: &str) -> Site {
        self.panel
            .datastore()
            .site_create(SiteCreate {
                name: name.to_string(),
                description: String::new(),
                institution: "INST".to_string(),
                start_date: Utc::now().date_naive(),
                email: Some(format!("webmaster@{}.example.org", name)),
                server_type: self.server_type,
                users: vec!["admin1".to_string()],
                ssh_users: Vec::new(),
                preallocated: false,
                subscription: true,
            })
            .unwrap()
    }

    /// Creates a `ready` production service with one named VM, bypassing
    /// the provisioning path.
    pub(crate) fn make_provisioned_service(
        &self,
        site_id: Uuid,
    ) -> (Service, VirtualMachine) {
        let datastore = self.panel.datastore();
        let netconf = datastore
            .network_config_allocate(NetworkConfigKind::IpvxPub)
            .unwrap();
        let service = datastore
            .service_create(ServiceCreate {
                site: Some(site_id),
                kind: ServiceKind::Production,
                network_config: netconf.id,
                status: ServiceStatus::Ready,
            })
            .unwrap();
        let host_netconf = datastore
            .network_config_allocate(NetworkConfigKind::Ipv4Priv)
            .unwrap();
        let vm = datastore
            .vm_create(VmCreate {
                service: service.id,
                token: Uuid::new_v4(),
                numcpu: 1,
                sizeram_gb: 2,
                network_config: host_netconf.id,
            })
            .unwrap();
        let vm = datastore
            .vm_set_name(vm.id, format!("mwsvm-test-{}", host_netconf.name))
            .unwrap();
        (service, vm)
    }

    pub(crate) fn vm_hostname(&self, vm: &VirtualMachine) -> String {
        self.panel
            .datastore()
            .network_config_fetch(vm.network_config)
            .unwrap()
            .name
    }
}
