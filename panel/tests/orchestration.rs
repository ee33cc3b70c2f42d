// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scenario tests for the orchestration core: provisioning end-to-end,
//! convergence coalescing, retry exhaustion, snapshots, clone, and switch.
//!
//! External collaborators are mocks; time is tokio's paused clock, so the
//! fixed provisioning delays (90 s post-install, 120 s retry intervals)
//! elapse instantly while preserving their ordering.

use ansible_client::mock::MockAnsibleRunner;
use assert_matches::assert_matches;
use chrono::Days;
use chrono::Utc;
use mws_common::params::RestoreTarget;
use mws_common::states::NetworkConfigKind;
use mws_common::states::PowerAction;
use mws_common::states::ServiceKind;
use mws_common::states::ServiceStatus;
use mws_common::Error;
use mws_panel::app::Panel;
use mws_panel::app::SiteCreateParams;
use mws_panel::config::PanelSettings;
use mws_panel::notify::RecordingNotifier;
use mws_store::model::Service;
use mws_store::model::VirtualMachine;
use mws_store::DataStore;
use mws_store::ServiceCreate;
use mws_store::VmCreate;
use slog::o;
use slog::Logger;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use vm_control_client::mock::MockVmController;
use vm_control_client::mock::VmCall;

struct TestContext {
    panel: Arc<Panel>,
    datastore: Arc<DataStore>,
    vm: Arc<MockVmController>,
    ansible: Arc<MockAnsibleRunner>,
    server_type: Uuid,
}

fn test_context(runner: MockAnsibleRunner) -> TestContext {
    let log = Logger::root(slog::Discard, o!());
    let datastore = Arc::new(DataStore::new());
    let server_type =
        datastore.server_type_create("small", 1, 2, 20, 500).unwrap().id;
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
    let panel = Panel::new(
        log,
        Arc::clone(&datastore),
        Arc::clone(&vm) as Arc<dyn vm_control_client::VmController>,
        Arc::clone(&ansible) as Arc<dyn ansible_client::AnsibleRunner>,
        Arc::new(RecordingNotifier::new()),
        PanelSettings {
            callback_endpoint:
                "https://panel.mws.example.org/api/post-installation"
                    .to_string(),
            os_version: "jessie".to_string(),
            support_email: "mws-support@example.org".to_string(),
        },
    );
    TestContext { panel, datastore, vm, ansible, server_type }
}

impl TestContext {
    async fn create_site(&self, name: &str) -> mws_store::model::Site {
        self.panel
            .site_create(SiteCreateParams {
                name: name.to_string(),
                description: String::new(),
                institution: "INST".to_string(),
                email: None,
                server_type: self.server_type,
                users: vec!["admin1".to_string()],
                preallocated: false,
                subscription: true,
            })
            .await
            .unwrap()
    }

    fn make_site_record(&self, name: &str) -> mws_store::model::Site {
        self.datastore
            .site_create(mws_store::SiteCreate {
                name: name.to_string(),
                description: String::new(),
                institution: "INST".to_string(),
                start_date: Utc::now().date_naive(),
                email: None,
                server_type: self.server_type,
                users: vec!["admin1".to_string()],
                ssh_users: Vec::new(),
                preallocated: false,
                subscription: true,
            })
            .unwrap()
    }

    /// A service with a named VM, bypassing the provisioning path.
    fn make_service(
        &self,
        site_id: Uuid,
        kind: ServiceKind,
        status: ServiceStatus,
    ) -> (Service, VirtualMachine) {
        let netconf = self
            .datastore
            .network_config_allocate(NetworkConfigKind::IpvxPub)
            .unwrap();
        let service = self
            .datastore
            .service_create(ServiceCreate {
                site: Some(site_id),
                kind,
                network_config: netconf.id,
                status,
            })
            .unwrap();
        let host_netconf = self
            .datastore
            .network_config_allocate(NetworkConfigKind::Ipv4Priv)
            .unwrap();
        let vm = self
            .datastore
            .vm_create(VmCreate {
                service: service.id,
                token: Uuid::new_v4(),
                numcpu: 1,
                sizeram_gb: 2,
                network_config: host_netconf.id,
            })
            .unwrap();
        let vm = self
            .datastore
            .vm_set_name(vm.id, format!("mwsvm-{}", host_netconf.name))
            .unwrap();
        (service, vm)
    }

    fn service_status(&self, service_id: Uuid) -> ServiceStatus {
        self.datastore.service_fetch(service_id).unwrap().status
    }
}

/// Polls `cond` on the paused clock; panics after a generous virtual
/// timeout.
async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..100_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_provisioning() {
    let (runner, mut gate) = MockAnsibleRunner::gated();
    let ctx = test_context(runner);
    let site = ctx.create_site("fresh-site").await;

    let service = ctx
        .datastore
        .service_for_site(site.id, ServiceKind::Production)
        .unwrap()
        .unwrap();
    // site creation leaves the service on the install path
    assert_eq!(service.status, ServiceStatus::Installing);

    // the create call goes out exactly once and records the external name
    wait_for("VM create call", || ctx.vm.create_calls() == 1).await;
    let vm = &ctx.datastore.vms_for_service(service.id).unwrap()[0];
    wait_for("external name", || {
        ctx.datastore.vm_fetch(vm.id).unwrap().name.is_some()
    })
    .await;

    // the authenticated callback advances the machine
    ctx.panel
        .post_installation(vm.id, &vm.token.to_string())
        .await
        .unwrap();
    assert_eq!(ctx.service_status(service.id), ServiceStatus::Postinstall);

    // the reboot delay elapses and the first convergence pass reaches the
    // gate: installing -> postinstall -> ansible, in order, no skips
    let _host = gate.started.recv().await.unwrap();
    assert_eq!(ctx.service_status(service.id), ServiceStatus::Ansible);
    gate.proceed.send(()).unwrap();
    // the post-install extras pass the gate too (MySQL root password)
    let _host = gate.started.recv().await.unwrap();
    gate.proceed.send(()).unwrap();

    wait_for("service ready", || {
        ctx.service_status(service.id) == ServiceStatus::Ready
    })
    .await;

    // exactly one convergence run, with the post-install extras
    assert_eq!(ctx.ansible.default_runs(), 1);
    assert_eq!(ctx.ansible.runs_with_tag("change_mysql_root_pwd"), 1);
    assert_eq!(ctx.vm.create_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_preallocated_site_disabled_after_install() {
    let ctx = test_context(MockAnsibleRunner::new());
    let site = ctx
        .panel
        .site_create(SiteCreateParams {
            name: "pool-entry".to_string(),
            description: String::new(),
            institution: String::new(),
            email: None,
            server_type: ctx.server_type,
            users: Vec::new(),
            preallocated: true,
            subscription: false,
        })
        .await
        .unwrap();
    let service = ctx
        .datastore
        .service_for_site(site.id, ServiceKind::Production)
        .unwrap()
        .unwrap();
    let vm = &ctx.datastore.vms_for_service(service.id).unwrap()[0];
    wait_for("external name", || {
        ctx.datastore.vm_fetch(vm.id).unwrap().name.is_some()
    })
    .await;

    ctx.panel
        .post_installation(vm.id, &vm.token.to_string())
        .await
        .unwrap();
    wait_for("service ready", || {
        ctx.service_status(service.id) == ServiceStatus::Ready
    })
    .await;

    // the pool entry goes back to sleep until it is handed out
    assert!(ctx.datastore.site_fetch(site.id).unwrap().disabled);
}

#[tokio::test(start_paused = true)]
async fn test_post_install_callback_rejects_bad_token() {
    let ctx = test_context(MockAnsibleRunner::new());
    let site = ctx.make_site_record("token-site");

    // a service mid-install whose VM has no external name yet
    let netconf = ctx
        .datastore
        .network_config_allocate(NetworkConfigKind::IpvxPub)
        .unwrap();
    let service = ctx
        .datastore
        .service_create(ServiceCreate {
            site: Some(site.id),
            kind: ServiceKind::Production,
            network_config: netconf.id,
            status: ServiceStatus::Installing,
        })
        .unwrap();
    let host_netconf = ctx
        .datastore
        .network_config_allocate(NetworkConfigKind::Ipv4Priv)
        .unwrap();
    let vm = ctx
        .datastore
        .vm_create(VmCreate {
            service: service.id,
            token: Uuid::new_v4(),
            numcpu: 1,
            sizeram_gb: 2,
            network_config: host_netconf.id,
        })
        .unwrap();

    let err = ctx
        .panel
        .post_installation(vm.id, "not-the-token")
        .await
        .unwrap_err();
    assert_matches!(err, Error::Forbidden);
    assert_eq!(ctx.service_status(service.id), ServiceStatus::Installing);
    assert!(ctx.datastore.vm_fetch(vm.id).unwrap().name.is_none());

    // an unknown VM id is just as forbidden
    let err = ctx
        .panel
        .post_installation(Uuid::new_v4(), "whatever")
        .await
        .unwrap_err();
    assert_matches!(err, Error::Forbidden);

    // the right token advances the machine
    ctx.panel
        .post_installation(vm.id, &vm.token.to_string())
        .await
        .unwrap();
    assert_eq!(ctx.service_status(service.id), ServiceStatus::Postinstall);
    // and the external name was defaulted to the hostname
    assert!(ctx.datastore.vm_fetch(vm.id).unwrap().name.is_some());
}

async fn run_coalescing_case(extra_requests: usize) {
    let (runner, mut gate) = MockAnsibleRunner::gated();
    let ctx = test_context(runner);
    let site = ctx.make_site_record("coalesce");
    let (service, _vm) = ctx.make_service(
        site.id,
        ServiceKind::Production,
        ServiceStatus::Ready,
    );

    // first request dispatches a run
    ctx.panel.launch_ansible(service.id).unwrap();
    assert_eq!(ctx.service_status(service.id), ServiceStatus::Ansible);
    let _host = gate.started.recv().await.unwrap();

    // requests arriving mid-run coalesce into exactly one follow-up
    for _ in 0..extra_requests {
        ctx.panel.launch_ansible(service.id).unwrap();
        assert_eq!(
            ctx.service_status(service.id),
            ServiceStatus::AnsibleQueued
        );
    }

    // finish the first run; the worker notices the queued flag and goes
    // around exactly once more
    gate.proceed.send(()).unwrap();
    let _host = gate.started.recv().await.unwrap();
    assert_eq!(ctx.service_status(service.id), ServiceStatus::Ansible);
    gate.proceed.send(()).unwrap();

    wait_for("service settled", || {
        ctx.service_status(service.id) == ServiceStatus::Ready
    })
    .await;
    assert_eq!(ctx.ansible.default_runs(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_coalescing_two_requests() {
    run_coalescing_case(1).await;
}

#[tokio::test(start_paused = true)]
async fn test_coalescing_five_requests() {
    run_coalescing_case(5).await;
}

#[tokio::test(start_paused = true)]
async fn test_coalescing_fifty_requests() {
    run_coalescing_case(50).await;
}

#[tokio::test(start_paused = true)]
async fn test_convergence_retry_exhaustion_resets_to_ready() {
    let ctx = test_context(MockAnsibleRunner::new());
    let site = ctx.make_site_record("flaky");
    let (service, _vm) = ctx.make_service(
        site.id,
        ServiceKind::Production,
        ServiceStatus::Ready,
    );

    // every attempt fails: initial + 2 retries, then give up
    for _ in 0..3 {
        ctx.ansible.push_result(Err(Error::unavail("runner broken")));
    }
    ctx.panel.launch_ansible(service.id).unwrap();

    wait_for("retries exhausted", || ctx.ansible.default_runs() == 3).await;
    wait_for("service reset", || {
        ctx.service_status(service.id) == ServiceStatus::Ready
    })
    .await;
    // no fourth attempt materializes later
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(ctx.ansible.default_runs(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_launch_ansible_rejects_unexpected_status() {
    let ctx = test_context(MockAnsibleRunner::new());
    let site = ctx.make_site_record("odd-status");
    let (service, _vm) = ctx.make_service(
        site.id,
        ServiceKind::Production,
        ServiceStatus::Requested,
    );

    let err = ctx.panel.launch_ansible(service.id).unwrap_err();
    assert_matches!(
        err,
        Error::UnexpectedVmStatus { found: ServiceStatus::Requested }
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_site_skips_convergence() {
    let ctx = test_context(MockAnsibleRunner::new());
    let site = ctx.make_site_record("leaving");
    let (service, _vm) = ctx.make_service(
        site.id,
        ServiceKind::Production,
        ServiceStatus::Ready,
    );

    ctx.panel.site_cancel(site.id).await.unwrap();
    wait_for("power off", || {
        ctx.vm.calls().iter().any(|c| {
            matches!(
                c,
                VmCall::Button { action: PowerAction::PowerOff, .. }
            )
        })
    })
    .await;

    // convergence requests against the cancelled site are dropped
    ctx.panel.launch_ansible(service.id).unwrap();
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(ctx.ansible.default_runs(), 0);
    assert_eq!(ctx.service_status(service.id), ServiceStatus::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_quota_and_reserved_names() {
    let ctx = test_context(MockAnsibleRunner::new());
    let site = ctx.make_site_record("snappy");
    let (service, _vm) = ctx.make_service(
        site.id,
        ServiceKind::Production,
        ServiceStatus::Ready,
    );
    let (other_service, _other_vm) =
        ctx.make_service(site.id, ServiceKind::Test, ServiceStatus::Ready);

    // date-shaped names are reserved for the daily automatic backups
    assert_matches!(
        ctx.panel.snapshot_create(service.id, "2024-01-01"),
        Err(Error::InvalidValue { .. })
    );

    ctx.panel.snapshot_create(service.id, "before-upgrade").unwrap();
    // duplicate name on the same service
    assert_matches!(
        ctx.panel.snapshot_create(service.id, "before-upgrade"),
        Err(Error::ObjectAlreadyExists { .. })
    );
    // same name on a different service is fine
    ctx.panel
        .snapshot_create(other_service.id, "before-upgrade")
        .unwrap();

    ctx.panel.snapshot_create(service.id, "second").unwrap();
    // a third custom snapshot exceeds the quota
    assert_matches!(
        ctx.panel.snapshot_create(service.id, "third"),
        Err(Error::InvalidRequest { .. })
    );
    assert_eq!(
        ctx.datastore.snapshots_for_service(service.id).unwrap().len(),
        2
    );

    // the successful creations get their dates stamped
    wait_for("snapshots stamped", || {
        ctx.datastore
            .snapshots_for_service(service.id)
            .unwrap()
            .iter()
            .all(|s| s.date.is_some())
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_snapshot_creation_removes_record() {
    let ctx = test_context(MockAnsibleRunner::new());
    let site = ctx.make_site_record("snap-fail");
    let (service, _vm) = ctx.make_service(
        site.id,
        ServiceKind::Production,
        ServiceStatus::Ready,
    );

    ctx.ansible.push_result(Err(Error::unavail("no space")));
    ctx.panel.snapshot_create(service.id, "doomed").unwrap();

    wait_for("record removed", || {
        ctx.datastore.snapshots_for_service(service.id).unwrap().is_empty()
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_delete_retry_and_failure_gap() {
    let ctx = test_context(MockAnsibleRunner::new());
    let site = ctx.make_site_record("snap-delete");
    let (service, _vm) = ctx.make_service(
        site.id,
        ServiceKind::Production,
        ServiceStatus::Ready,
    );

    ctx.panel.snapshot_create(service.id, "keepsake").unwrap();
    wait_for("snapshot created", || {
        ctx.datastore
            .snapshot_fetch_by_name(service.id, "keepsake")
            .map(|s| s.date.is_some())
            .unwrap_or(false)
    })
    .await;

    // deletion failing through every attempt leaves the record flagged
    for _ in 0..3 {
        ctx.ansible.push_result(Err(Error::unavail("runner down")));
    }
    ctx.panel.snapshot_delete(service.id, "keepsake").unwrap();
    // pending_delete is visible immediately
    assert!(ctx
        .datastore
        .snapshot_fetch_by_name(service.id, "keepsake")
        .unwrap()
        .pending_delete);
    wait_for("delete attempts exhausted", || {
        ctx.ansible.runs_with_tag("delete_snapshot") == 3
    })
    .await;
    tokio::time::sleep(Duration::from_secs(600)).await;
    let snapshot = ctx
        .datastore
        .snapshot_fetch_by_name(service.id, "keepsake")
        .unwrap();
    assert!(snapshot.pending_delete);

    // a deletion that recovers on a retry removes the record
    ctx.panel.snapshot_create(service.id, "transient").unwrap();
    wait_for("second snapshot created", || {
        ctx.datastore
            .snapshot_fetch_by_name(service.id, "transient")
            .map(|s| s.date.is_some())
            .unwrap_or(false)
    })
    .await;
    ctx.ansible.push_result(Err(Error::unavail("blip")));
    ctx.panel.snapshot_delete(service.id, "transient").unwrap();
    wait_for("record removed after retry", || {
        ctx.datastore
            .snapshot_fetch_by_name(service.id, "transient")
            .is_err()
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_restore_window() {
    let ctx = test_context(MockAnsibleRunner::new());
    let mut site = ctx.make_site_record("restorable");
    site.start_date = Utc::now().date_naive() - Days::new(30);
    ctx.datastore.site_update(&site).unwrap();
    let (service, _vm) = ctx.make_service(
        site.id,
        ServiceKind::Production,
        ServiceStatus::Ready,
    );
    let today = Utc::now().date_naive();

    // yesterday is the newest restorable backup
    ctx.panel
        .snapshot_restore(
            service.id,
            RestoreTarget::Date(today - Days::new(1)),
        )
        .unwrap();
    // today is not restorable
    assert_matches!(
        ctx.panel
            .snapshot_restore(service.id, RestoreTarget::Date(today)),
        Err(Error::InvalidRequest { .. })
    );
    // the site's first day is not restorable either
    assert_matches!(
        ctx.panel.snapshot_restore(
            service.id,
            RestoreTarget::Date(site.start_date),
        ),
        Err(Error::InvalidRequest { .. })
    );

    // a grandfathering marker clamps the window further
    let marker = today - Days::new(5);
    ctx.datastore
        .ansible_configuration_set(
            service.id,
            "backup_first_date",
            &marker.to_string(),
        )
        .unwrap();
    assert_matches!(
        ctx.panel.snapshot_restore(
            service.id,
            RestoreTarget::Date(today - Days::new(6)),
        ),
        Err(Error::InvalidRequest { .. })
    );
    ctx.panel
        .snapshot_restore(
            service.id,
            RestoreTarget::Date(today - Days::new(4)),
        )
        .unwrap();

    // by-name restores need an existing, fully-created snapshot
    assert_matches!(
        ctx.panel.snapshot_restore(
            service.id,
            RestoreTarget::Named("no-such-snapshot".to_string()),
        ),
        Err(Error::ObjectNotFound { .. })
    );

    wait_for("restores dispatched", || {
        ctx.ansible.runs_with_tag("restore_snapshot") == 2
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_clone_copies_expected_subsets() {
    let ctx = test_context(MockAnsibleRunner::new());
    let site = ctx.make_site_record("clonable");
    let (source, source_vm) = ctx.make_service(
        site.id,
        ServiceKind::Production,
        ServiceStatus::Ready,
    );

    // dress the source: groups, configuration entries, vhosts with domains
    let group = ctx
        .datastore
        .unix_group_create(
            source.id,
            "editors",
            vec!["alice".to_string(), "bob".to_string()],
        )
        .unwrap();
    ctx.datastore
        .ansible_configuration_set(source.id, "os", "jessie")
        .unwrap();
    ctx.datastore
        .ansible_configuration_set(source.id, "php_modules", "imagick")
        .unwrap();
    let vhost = ctx
        .datastore
        .vhost_create(source.id, "default", Some("wordpress".to_string()))
        .unwrap();
    let domain = ctx
        .datastore
        .domain_create(
            vhost.id,
            "www.clonable.example.org",
            mws_common::states::DomainStatus::Accepted,
            None,
        )
        .unwrap();
    let mut vhost = ctx.datastore.vhost_fetch(vhost.id).unwrap();
    vhost.main_domain = Some(domain.id);
    vhost.tls_enabled = true;
    ctx.datastore.vhost_update(&vhost).unwrap();
    ctx.datastore.vhost_create(source.id, "blog", None).unwrap();
    let domains_before = ctx
        .datastore
        .domains_for_vhost(vhost.id)
        .unwrap()
        .len();

    let dest = ctx
        .panel
        .service_clone(site.id, ServiceKind::Production)
        .await
        .unwrap();
    assert_eq!(dest.kind, ServiceKind::Test);
    assert_eq!(dest.status, ServiceStatus::Requested);

    wait_for("clone complete", || {
        ctx.service_status(dest.id) == ServiceStatus::Ready
    })
    .await;

    // the clone API was driven off the source VM's external name
    let source_name = source_vm.name.clone().unwrap();
    assert!(ctx.vm.calls().iter().any(|c| matches!(
        c,
        VmCall::Clone { source_vmid, .. } if *source_vmid == source_name
    )));

    // unix groups: same content, new identity
    let dest_groups =
        ctx.datastore.unix_groups_for_service(dest.id).unwrap();
    assert_eq!(dest_groups.len(), 1);
    assert_eq!(dest_groups[0].name, "editors");
    assert_eq!(dest_groups[0].users, vec!["alice", "bob"]);
    assert_ne!(dest_groups[0].id, group.id);

    // configuration entries match
    let mut entries =
        ctx.datastore.ansible_configuration_list(dest.id).unwrap();
    entries.sort();
    assert_eq!(
        entries,
        vec![
            ("os".to_string(), "jessie".to_string()),
            ("php_modules".to_string(), "imagick".to_string()),
        ]
    );

    // vhosts match by name with fresh identity and no main domain
    let mut dest_vhosts =
        ctx.datastore.vhosts_for_service(dest.id).unwrap();
    dest_vhosts.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(dest_vhosts.len(), 2);
    assert_eq!(dest_vhosts[0].name, "blog");
    assert_eq!(dest_vhosts[1].name, "default");
    assert!(dest_vhosts.iter().all(|v| v.main_domain.is_none()));
    assert!(dest_vhosts.iter().all(|v| v.id != vhost.id));
    assert!(dest_vhosts[1].tls_enabled);

    // domain names were not duplicated
    for dest_vhost in &dest_vhosts {
        assert!(ctx
            .datastore
            .domains_for_vhost(dest_vhost.id)
            .unwrap()
            .is_empty());
    }
    assert_eq!(
        ctx.datastore.domains_for_vhost(vhost.id).unwrap().len(),
        domains_before
    );

    // the destination VM got its own name and network identity
    let dest_vms = ctx.datastore.vms_for_service(dest.id).unwrap();
    assert_eq!(dest_vms.len(), 1);
    assert!(dest_vms[0].name.is_some());
    assert_ne!(dest_vms[0].network_config, source_vm.network_config);
}

#[tokio::test(start_paused = true)]
async fn test_clone_replaces_existing_destination() {
    let ctx = test_context(MockAnsibleRunner::new());
    let site = ctx.make_site_record("reclone");
    let (_source, _) = ctx.make_service(
        site.id,
        ServiceKind::Production,
        ServiceStatus::Ready,
    );
    let (old_test, old_test_vm) =
        ctx.make_service(site.id, ServiceKind::Test, ServiceStatus::Ready);

    let dest = ctx
        .panel
        .service_clone(site.id, ServiceKind::Production)
        .await
        .unwrap();
    // the old test service was torn down, external VM included
    assert_ne!(dest.id, old_test.id);
    assert!(ctx.datastore.service_fetch(old_test.id).is_err());
    let old_name = old_test_vm.name.unwrap();
    assert!(ctx
        .vm
        .calls()
        .contains(&VmCall::Delete { vmid: old_name }));
    // and its public network identity carried over to the replacement
    assert_eq!(dest.network_config, old_test.network_config);

    wait_for("clone complete", || {
        ctx.service_status(dest.id) == ServiceStatus::Ready
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_switch_swaps_identity_and_converges() {
    let ctx = test_context(MockAnsibleRunner::new());
    let site = ctx.make_site_record("switchable");
    let (production, production_vm) = ctx.make_service(
        site.id,
        ServiceKind::Production,
        ServiceStatus::Ready,
    );
    let (test, test_vm) =
        ctx.make_service(site.id, ServiceKind::Test, ServiceStatus::Ready);
    let production_vhost = ctx
        .datastore
        .vhost_create(production.id, "default", None)
        .unwrap();

    ctx.panel.service_switch(site.id).unwrap();

    let demoted = ctx.datastore.service_fetch(production.id).unwrap();
    let promoted = ctx.datastore.service_fetch(test.id).unwrap();
    assert_eq!(demoted.kind, ServiceKind::Test);
    assert_eq!(promoted.kind, ServiceKind::Production);
    assert_eq!(demoted.network_config, test.network_config);
    assert_eq!(promoted.network_config, production.network_config);
    // the production vhost followed the production identity
    assert_eq!(
        ctx.datastore.vhost_fetch(production_vhost.id).unwrap().service,
        test.id
    );
    // the demoted service is marked so pre-switch backups are not its own
    assert!(ctx
        .datastore
        .ansible_configuration_get(production.id, "backup_first_date")
        .unwrap()
        .is_some());
    // VMs stayed with their services
    assert_eq!(
        ctx.datastore.vms_for_service(production.id).unwrap()[0].id,
        ctx.datastore.vm_fetch(production_vm.id).unwrap().id
    );
    assert_eq!(
        ctx.datastore.vms_for_service(test.id).unwrap()[0].id,
        ctx.datastore.vm_fetch(test_vm.id).unwrap().id
    );

    // both services converge and settle
    wait_for("both converged", || {
        ctx.ansible.default_runs() >= 2
            && ctx.service_status(production.id) == ServiceStatus::Ready
            && ctx.service_status(test.id) == ServiceStatus::Ready
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_vm_delete_is_idempotent_for_unnamed_vms() {
    let ctx = test_context(MockAnsibleRunner::new());
    let site = ctx.make_site_record("unnamed");
    let netconf = ctx
        .datastore
        .network_config_allocate(NetworkConfigKind::IpvxPub)
        .unwrap();
    let service = ctx
        .datastore
        .service_create(ServiceCreate {
            site: Some(site.id),
            kind: ServiceKind::Production,
            network_config: netconf.id,
            status: ServiceStatus::Requested,
        })
        .unwrap();
    let host_netconf = ctx
        .datastore
        .network_config_allocate(NetworkConfigKind::Ipv4Priv)
        .unwrap();
    let free_before = ctx
        .datastore
        .network_config_free_count(NetworkConfigKind::Ipv4Priv)
        .unwrap();
    let vm = ctx
        .datastore
        .vm_create(VmCreate {
            service: service.id,
            token: Uuid::new_v4(),
            numcpu: 1,
            sizeram_gb: 2,
            network_config: host_netconf.id,
        })
        .unwrap();

    ctx.panel.vm_delete(vm.id).await.unwrap();
    // no external name, no external delete call
    assert_eq!(ctx.vm.delete_calls(), 0);
    assert!(ctx.datastore.vm_fetch(vm.id).is_err());
    assert_eq!(
        ctx.datastore
            .network_config_free_count(NetworkConfigKind::Ipv4Priv)
            .unwrap(),
        free_before
    );
}

#[tokio::test(start_paused = true)]
async fn test_power_on_schedules_deferred_convergence() {
    let ctx = test_context(MockAnsibleRunner::new());
    let site = ctx.make_site_record("powered");
    let (service, vm) = ctx.make_service(
        site.id,
        ServiceKind::Production,
        ServiceStatus::Ready,
    );

    ctx.panel.vm_power(vm.id, PowerAction::PowerOn).unwrap();
    wait_for("power button", || {
        ctx.vm.calls().iter().any(|c| {
            matches!(c, VmCall::Button { action: PowerAction::PowerOn, .. })
        })
    })
    .await;

    // the deferred convergence run fires after the boot delay
    wait_for("deferred convergence", || ctx.ansible.default_runs() == 1)
        .await;
    wait_for("service settled", || {
        ctx.service_status(service.id) == ServiceStatus::Ready
    })
    .await;
}
