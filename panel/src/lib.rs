// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Library interface to the panel, the orchestration core of the MWS
//! control plane
//!
//! The panel drives sites, services, and virtual machines through the
//! provisioning state machine, coordinates configuration convergence runs
//! against the external runner, manages snapshots and the clone/switch
//! workflows, and hosts the periodic maintenance tasks.

pub mod app;
pub mod config;
pub mod context;
pub mod http_entrypoints;
pub mod inventory;
pub mod notify;

pub use app::Panel;
pub use config::Config;
pub use context::ServerContext;

#[macro_use]
extern crate slog;
