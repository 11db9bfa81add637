//! The error type returned by every fallible control-plane operation.
//! The `kind` drives client retry policy; the message never does.

use serde::{Deserialize, Serialize};
use std::{error::Error as StdError, fmt};
use strum_macros::{AsRefStr, Display, EnumString};

/// Error kinds surfaced at the RPC boundary.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, AsRefStr, Display, EnumString, Eq, PartialEq,
)]
pub enum ReplyErrorKind {
    /// Malformed input, rejected at the edge. Never retried.
    InvalidArgument,
    /// The resource does not exist.
    NotFound,
    /// A resource with the same natural key but different parameters exists.
    AlreadyExists,
    /// VIP/VLAN collision at create time. The CSI allocator retries with a
    /// fresh allocation.
    NetworkConflict,
    /// Backing pool or IP pools exhausted.
    ResourceExhausted,
    /// Operation not valid in the resource's current state.
    FailedPrecondition,
    /// State could not be persisted after side-effects succeeded.
    FailedPersist,
    /// Service temporarily unavailable; retryable.
    Unavailable,
    /// Operation did not finish within its deadline; retryable.
    Timeout,
    /// Concurrent mutation detected by the metadata store.
    Conflict,
    /// Operation was aborted mid-flight.
    Aborted,
    /// Anything else.
    Internal,
    /// Functionality not implemented.
    Unimplemented,
    /// Missing or invalid credentials.
    Unauthorized,
}

/// The kind of resource an error relates to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, AsRefStr, Display, Eq, PartialEq)]
pub enum ResourceKind {
    /// Unknown or unspecified resource.
    Unknown,
    /// Storage virtual machine.
    Svm,
    /// Thin volume.
    Volume,
    /// NFS export record.
    Export,
    /// Quota-capped directory.
    Directory,
    /// Reflink snapshot.
    Snapshot,
    /// XFS project quota.
    Quota,
    /// Per-volume I/O limits.
    Qos,
    /// HA resource group.
    ResourceGroup,
}

/// Error type which is returned over the wire for any operation.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReplyError {
    /// Error kind.
    pub kind: ReplyErrorKind,
    /// Resource kind.
    pub resource: ResourceKind,
    /// Last source of this error.
    pub source: String,
    /// Extra information.
    pub extra: String,
}

impl fmt::Display for ReplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_string())
    }
}
impl StdError for ReplyError {}

impl ReplyError {
    /// Full error description, kind and resource included.
    pub fn full_string(&self) -> String {
        format!(
            "{} of {}: {} ({})",
            self.kind, self.resource, self.source, self.extra
        )
    }

    /// Extend error with source, when wrapping around another `ReplyError`.
    pub fn extend(&mut self, source: &str, extra: &str) {
        self.source = format!("{}::{}", source, self.source);
        self.extra = format!("{}::{}", extra, self.extra);
    }

    /// An invalid argument was provided.
    pub fn invalid_argument(resource: ResourceKind, arg_name: &str, error: impl ToString) -> Self {
        Self {
            kind: ReplyErrorKind::InvalidArgument,
            resource,
            source: error.to_string(),
            extra: format!("Invalid {arg_name} was provided"),
        }
    }

    /// A required argument was not provided.
    pub fn missing_argument(resource: ResourceKind, arg_name: &str) -> Self {
        Self {
            kind: ReplyErrorKind::InvalidArgument,
            resource,
            source: arg_name.to_string(),
            extra: format!("Argument {arg_name} was not provided"),
        }
    }

    /// The resource was not found.
    pub fn not_found(resource: ResourceKind, id: impl ToString) -> Self {
        Self {
            kind: ReplyErrorKind::NotFound,
            resource,
            source: id.to_string(),
            extra: String::new(),
        }
    }

    /// The resource exists with different parameters.
    pub fn already_exists(resource: ResourceKind, id: impl ToString) -> Self {
        Self {
            kind: ReplyErrorKind::AlreadyExists,
            resource,
            source: id.to_string(),
            extra: String::new(),
        }
    }

    /// A VIP or VLAN collides with another SVM.
    pub fn network_conflict(resource: ResourceKind, detail: impl ToString) -> Self {
        Self {
            kind: ReplyErrorKind::NetworkConflict,
            resource,
            source: detail.to_string(),
            extra: String::new(),
        }
    }

    /// The operation is not valid in the resource's current state.
    pub fn failed_precondition(resource: ResourceKind, detail: impl ToString) -> Self {
        Self {
            kind: ReplyErrorKind::FailedPrecondition,
            resource,
            source: detail.to_string(),
            extra: String::new(),
        }
    }

    /// State could not be persisted.
    pub fn failed_persist(resource: ResourceKind, source: String, extra: String) -> Self {
        Self {
            kind: ReplyErrorKind::FailedPersist,
            resource,
            source,
            extra,
        }
    }

    /// An internal error.
    pub fn internal_error(resource: ResourceKind, source: String, extra: String) -> Self {
        Self {
            kind: ReplyErrorKind::Internal,
            resource,
            source,
            extra,
        }
    }
}

impl From<ReplyError> for tonic::Status {
    fn from(error: ReplyError) -> Self {
        match error.kind {
            ReplyErrorKind::InvalidArgument => tonic::Status::invalid_argument(error.full_string()),
            ReplyErrorKind::NotFound => tonic::Status::not_found(error.full_string()),
            ReplyErrorKind::AlreadyExists => tonic::Status::already_exists(error.full_string()),
            ReplyErrorKind::FailedPrecondition => {
                tonic::Status::failed_precondition(error.full_string())
            }
            ReplyErrorKind::ResourceExhausted => {
                tonic::Status::resource_exhausted(error.full_string())
            }
            ReplyErrorKind::Timeout => tonic::Status::deadline_exceeded(error.full_string()),
            ReplyErrorKind::Unavailable => tonic::Status::unavailable(error.full_string()),
            ReplyErrorKind::Aborted => tonic::Status::aborted(error.full_string()),
            ReplyErrorKind::Unimplemented => tonic::Status::unimplemented(error.full_string()),
            ReplyErrorKind::Unauthorized => tonic::Status::unauthenticated(error.full_string()),
            _ => tonic::Status::internal(error.full_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn kind_round_trips_as_string() {
        let kind = ReplyErrorKind::NetworkConflict;
        let parsed = ReplyErrorKind::from_str(kind.as_ref()).unwrap();
        assert_eq!(kind, parsed);
    }

    #[test]
    fn kind_drives_tonic_code() {
        let error = ReplyError::not_found(ResourceKind::Svm, "tenant_a");
        let status = tonic::Status::from(error);
        assert_eq!(status.code(), tonic::Code::NotFound);
    }
}
