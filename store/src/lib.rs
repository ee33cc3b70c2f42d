// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persistent store for the MWS control plane
//!
//! The orchestration core treats persistence as an external collaborator
//! reached through a small interface: record CRUD, an atomic compare-and-set
//! on service status, free-list allocation of network configurations, and
//! one multi-record swap.  This crate is that interface, backed by an
//! in-process map store under a single lock.  What the orchestration relies
//! on is the contract — uniqueness constraints surfacing as errors, status
//! movement being atomic, allocation never handing the same pool entry to
//! two consumers — not the storage technology.

mod datastore;
pub mod model;
pub mod seed;

pub use datastore::DataStore;
pub use datastore::ServiceCreate;
pub use datastore::SiteCreate;
pub use datastore::VmCreate;
