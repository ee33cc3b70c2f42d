// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Executable program to run the panel, the MWS control plane

use anyhow::anyhow;
use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Parser;
use dropshot::HttpServerStarter;
use mws_panel::app::background;
use mws_panel::app::Panel;
use mws_panel::config::Config;
use mws_panel::context::ServerContext;
use mws_panel::notify::LogNotifier;
use mws_store::DataStore;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[clap(name = "mws-panel", about = "MWS control plane server")]
struct Args {
    #[clap(long, value_name = "CONFIG_FILE_PATH")]
    config: Utf8PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_file(&args.config)
        .with_context(|| format!("loading config from {}", args.config))?;

    let log = config
        .log
        .to_logger("mws-panel")
        .context("initializing logger")?;

    let datastore = Arc::new(DataStore::new());
    if let Some(seed_path) = &config.store.seed_path {
        let contents = std::fs::read_to_string(seed_path)
            .with_context(|| format!("reading seed file {}", seed_path))?;
        let seed: mws_store::seed::SeedData = toml::from_str(&contents)
            .with_context(|| format!("parsing seed file {}", seed_path))?;
        mws_store::seed::populate(&datastore, &seed)
            .map_err(|error| anyhow!("seeding store: {}", error))?;
        slog::info!(
            log,
            "store seeded";
            "server_types" => seed.server_types.len(),
            "network_configs" => seed.network_configs.len(),
        );
    }

    let vm_controller =
        Arc::new(vm_control_client::command::CommandVmController::new(
            config.vm_api.command.clone(),
            log.new(slog::o!("component" => "VmController")),
        ));
    let ansible =
        Arc::new(ansible_client::command::CommandAnsibleRunner::new(
            config.ansible.command.clone(),
            log.new(slog::o!("component" => "AnsibleRunner")),
        ));
    let notifier = Arc::new(LogNotifier::new(
        log.new(slog::o!("component" => "Notifier")),
    ));

    let panel = Panel::new(
        log.new(slog::o!("component" => "Panel")),
        datastore,
        vm_controller,
        ansible,
        notifier,
        config.panel.clone(),
    );

    // The driver owns the background tasks; keep it alive for the life of
    // the server.
    let _driver = background::init(&panel, &config.background_tasks);

    let context = Arc::new(ServerContext {
        panel: Arc::clone(&panel),
        log: log.new(slog::o!("component" => "ServerContext")),
    });
    let server = HttpServerStarter::new(
        &config.dropshot,
        mws_panel::http_entrypoints::api(),
        context,
        &log.new(slog::o!("component" => "dropshot")),
    )
    .map_err(|error| anyhow!("starting server: {}", error))?
    .start();

    slog::info!(log, "mws-panel running"; "local_addr" => %server.local_addr());
    server.await.map_err(|error| anyhow!("server failed: {}", error))
}
