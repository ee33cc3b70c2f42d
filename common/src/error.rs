// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error handling facilities for the MWS control plane
//!
//! For HTTP-level error handling, see Dropshot.

use crate::states::ServiceStatus;
use dropshot::HttpError;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// An error that can be generated within a control plane component
///
/// These may be generated while handling a client request or as part of a
/// background operation.  When generated while handling an HTTP request, an
/// `Error` is converted into an `HttpError` as one of the last steps in
/// processing the request, which keeps the rest of the system agnostic to the
/// transport.
///
/// The taxonomy matters to the retry machinery: `ServiceUnavailable` is the
/// only class that external-call retry policies will retry.  Everything else
/// is surfaced immediately.
#[derive(Clone, Debug, Deserialize, thiserror::Error, PartialEq, Serialize)]
pub enum Error {
    /// An object needed as part of this operation was not found.
    #[error("Object (of type {type_name:?}) not found: {lookup_type:?}")]
    ObjectNotFound { type_name: ResourceType, lookup_type: LookupType },
    /// An object already exists with the specified name or identifier.
    #[error("Object (of type {type_name:?}) already exists: {object_name}")]
    ObjectAlreadyExists { type_name: ResourceType, object_name: String },
    /// The request was well-formed, but the operation cannot be completed
    /// given the current state of the system.
    #[error("Invalid Request: {message}")]
    InvalidRequest { message: String },
    /// The specified input field is not valid.
    #[error("Invalid Value: {label}, {message}")]
    InvalidValue { label: String, message: String },
    /// The request is not authorized to perform the requested operation.
    /// Used for the post-installation callback when the presented token does
    /// not match the stored one.
    #[error("Forbidden")]
    Forbidden,
    /// A service was asked to do something that its current provisioning
    /// status does not allow.  This is an invariant violation, not a user
    /// error: callers are expected to have driven the state machine through
    /// the documented edges.
    #[error("unexpected VM status: {found}")]
    UnexpectedVmStatus { found: ServiceStatus },
    /// The system encountered an unhandled operational error.
    #[error("Internal Error: {internal_message}")]
    InternalError { internal_message: String },
    /// An external collaborator (or part of the system) is unavailable.
    #[error("Service Unavailable: {internal_message}")]
    ServiceUnavailable { internal_message: String },
}

/// The type of a resource involved in an error
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub enum ResourceType {
    Site,
    Service,
    VirtualMachine,
    NetworkConfig,
    Vhost,
    DomainName,
    Snapshot,
    UnixGroup,
    Billing,
    Suspension,
    ServerType,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ResourceType::Site => "site",
                ResourceType::Service => "service",
                ResourceType::VirtualMachine => "virtual machine",
                ResourceType::NetworkConfig => "network config",
                ResourceType::Vhost => "vhost",
                ResourceType::DomainName => "domain name",
                ResourceType::Snapshot => "snapshot",
                ResourceType::UnixGroup => "unix group",
                ResourceType::Billing => "billing",
                ResourceType::Suspension => "suspension",
                ResourceType::ServerType => "server type",
            }
        )
    }
}

/// Indicates how an object was looked up (for an `ObjectNotFound` error)
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum LookupType {
    /// a specific name was requested
    ByName(String),
    /// a specific id was requested
    ById(Uuid),
    /// a composite key was requested (caller summarizes it)
    ByCompositeId(String),
}

impl LookupType {
    /// Returns an ObjectNotFound error appropriate for the case where this
    /// lookup failed
    pub fn into_not_found(self, type_name: ResourceType) -> Error {
        Error::ObjectNotFound { type_name, lookup_type: self }
    }
}

impl Error {
    /// Returns whether the error is likely transient and could reasonably be
    /// retried
    pub fn retryable(&self) -> bool {
        match self {
            Error::ServiceUnavailable { .. } => true,

            Error::ObjectNotFound { .. }
            | Error::ObjectAlreadyExists { .. }
            | Error::InvalidRequest { .. }
            | Error::InvalidValue { .. }
            | Error::Forbidden
            | Error::UnexpectedVmStatus { .. }
            | Error::InternalError { .. } => false,
        }
    }

    /// Generates an [`Error::ObjectNotFound`] error for a lookup by object
    /// name.
    pub fn not_found_by_name(type_name: ResourceType, name: &str) -> Error {
        LookupType::ByName(name.to_owned()).into_not_found(type_name)
    }

    /// Generates an [`Error::ObjectNotFound`] error for a lookup by object id.
    pub fn not_found_by_id(type_name: ResourceType, id: &Uuid) -> Error {
        LookupType::ById(*id).into_not_found(type_name)
    }

    /// Generates an [`Error::InternalError`] error with the specific message
    ///
    /// InternalError should be used for operational conditions that should not
    /// happen but that we cannot reasonably handle at runtime (e.g., finding
    /// two records for something that is supposed to be unique).
    pub fn internal_error(internal_message: &str) -> Error {
        Error::InternalError { internal_message: internal_message.to_owned() }
    }

    /// Generates an [`Error::InvalidRequest`] error with the specific message
    ///
    /// This should be used for failures due possibly to invalid client input
    /// or requests that cannot be satisfied in the system's current state
    /// (quota exceeded, invalid restore date, and the like).
    pub fn invalid_request(message: &str) -> Error {
        Error::InvalidRequest { message: message.to_owned() }
    }

    /// Generates an [`Error::ServiceUnavailable`] error with the specific
    /// message
    ///
    /// This should be used for transient failures where the caller might be
    /// expected to retry: the VM control API being unreachable, the
    /// convergence runner exiting non-zero, and the like.
    pub fn unavail(message: &str) -> Error {
        Error::ServiceUnavailable { internal_message: message.to_owned() }
    }

    /// Given an [`Error`] with an internal message, return the same error with
    /// `context` prepended to it to provide more context
    ///
    /// If the error has no internal message, then it is returned unchanged.
    pub fn internal_context<C>(self, context: C) -> Error
    where
        C: fmt::Display + Send + Sync + 'static,
    {
        match self {
            Error::ObjectNotFound { .. }
            | Error::ObjectAlreadyExists { .. }
            | Error::InvalidRequest { .. }
            | Error::InvalidValue { .. }
            | Error::UnexpectedVmStatus { .. }
            | Error::Forbidden => self,
            Error::InternalError { internal_message } => Error::InternalError {
                internal_message: format!("{}: {}", context, internal_message),
            },
            Error::ServiceUnavailable { internal_message } => {
                Error::ServiceUnavailable {
                    internal_message: format!(
                        "{}: {}",
                        context, internal_message
                    ),
                }
            }
        }
    }
}

impl From<Error> for HttpError {
    /// Converts an `Error` error into an `HttpError`.  This defines how
    /// errors that are represented internally using `Error` are ultimately
    /// exposed to clients over HTTP.
    fn from(error: Error) -> HttpError {
        match error {
            Error::ObjectNotFound { .. } => {
                HttpError::for_not_found(None, format!("{}", error))
            }
            Error::ObjectAlreadyExists { .. }
            | Error::InvalidRequest { .. }
            | Error::InvalidValue { .. } => HttpError::for_bad_request(
                None,
                format!("{}", error),
            ),
            Error::Forbidden => HttpError::for_client_error(
                None,
                http::StatusCode::FORBIDDEN,
                "Forbidden".to_string(),
            ),
            Error::UnexpectedVmStatus { .. } => HttpError::for_client_error(
                None,
                http::StatusCode::CONFLICT,
                format!("{}", error),
            ),
            Error::InternalError { internal_message } => {
                HttpError::for_internal_error(internal_message)
            }
            Error::ServiceUnavailable { internal_message } => {
                HttpError::for_unavail(None, internal_message)
            }
        }
    }
}
