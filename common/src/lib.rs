// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared vocabulary for the MWS control plane: the error taxonomy, retry
//! policies for calls to external collaborators, the service status state
//! machine, and parameter types exchanged with the VM control API and the
//! configuration convergence runner.

pub mod error;
pub mod params;
pub mod retry;
pub mod states;

pub use error::Error;
pub use error::ResourceType;

/// Result of a create operation for the specified type
pub type CreateResult<T> = Result<T, Error>;
/// Result of a delete operation
pub type DeleteResult = Result<(), Error>;
/// Result of a lookup operation for the specified type
pub type LookupResult<T> = Result<T, Error>;
/// Result of a list operation that returns a vector
pub type ListResultVec<T> = Result<Vec<T>, Error>;
/// Result of an update operation for the specified type
pub type UpdateResult<T> = Result<T, Error>;
