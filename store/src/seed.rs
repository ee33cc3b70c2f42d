// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Initial store contents loaded at server startup
//!
//! The network pool and the server-type catalogue are operator-managed
//! data: they exist before any site does.  Deployments describe them in a
//! seed file that the server loads into the store on startup.  Populating
//! is idempotent in the sense that a seed entry already present (by its
//! unique name) is skipped rather than treated as an error, so a restart
//! with the same seed file is safe.

use crate::DataStore;
use mws_common::states::NetworkConfigKind;
use mws_common::Error;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub server_types: Vec<ServerTypeSeed>,
    #[serde(default)]
    pub network_configs: Vec<NetworkConfigSeed>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerTypeSeed {
    pub name: String,
    pub numcpu: u32,
    pub sizeram_gb: u32,
    pub sizedisk_gb: u32,
    pub price: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NetworkConfigSeed {
    pub kind: NetworkConfigKind,
    pub ipv4: Ipv4Addr,
    pub ipv6: Ipv6Addr,
    pub name: String,
}

/// Loads seed data into the store, skipping entries that already exist.
pub fn populate(
    datastore: &DataStore,
    seed: &SeedData,
) -> Result<(), Error> {
    for server_type in &seed.server_types {
        match datastore.server_type_create(
            &server_type.name,
            server_type.numcpu,
            server_type.sizeram_gb,
            server_type.sizedisk_gb,
            server_type.price,
        ) {
            Ok(_) => {}
            Err(Error::ObjectAlreadyExists { .. }) => {}
            Err(error) => return Err(error),
        }
    }
    for netconf in &seed.network_configs {
        match datastore.network_config_create(
            netconf.kind,
            netconf.ipv4,
            netconf.ipv6,
            netconf.name.clone(),
        ) {
            Ok(_) => {}
            Err(Error::ObjectAlreadyExists { .. }) => {}
            Err(error) => return Err(error),
        }
    }
    Ok(())
}
