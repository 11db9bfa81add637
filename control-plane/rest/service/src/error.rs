//! Mapping of `ReplyError` onto actix responses carrying the JSON envelope.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use std::fmt;
use stor_port::{types::v0::RestJson, ReplyError, ReplyErrorKind};

/// A REST-visible error. Wraps the transport error and renders the envelope.
#[derive(Debug)]
pub(crate) struct RestError {
    inner: ReplyError,
}

impl fmt::Display for RestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl From<ReplyError> for RestError {
    fn from(inner: ReplyError) -> Self {
        Self { inner }
    }
}

impl ResponseError for RestError {
    fn status_code(&self) -> StatusCode {
        match self.inner.kind {
            ReplyErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ReplyErrorKind::NotFound => StatusCode::NOT_FOUND,
            // Both 409 flavours; clients split them on the envelope's kind.
            ReplyErrorKind::AlreadyExists
            | ReplyErrorKind::NetworkConflict
            | ReplyErrorKind::Conflict => StatusCode::CONFLICT,
            ReplyErrorKind::ResourceExhausted => StatusCode::INSUFFICIENT_STORAGE,
            ReplyErrorKind::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            ReplyErrorKind::Unavailable | ReplyErrorKind::FailedPersist => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ReplyErrorKind::Timeout => StatusCode::REQUEST_TIMEOUT,
            ReplyErrorKind::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            ReplyErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(RestJson::error(&self.inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stor_port::ResourceKind;

    #[test]
    fn conflict_kinds_share_409_but_differ_in_body() {
        let exists: RestError = ReplyError::already_exists(ResourceKind::Svm, "a").into();
        let network: RestError = ReplyError::network_conflict(ResourceKind::Svm, "vip").into();
        assert_eq!(exists.status_code(), StatusCode::CONFLICT);
        assert_eq!(network.status_code(), StatusCode::CONFLICT);
        assert_ne!(
            RestJson::error(&ReplyError::already_exists(ResourceKind::Svm, "a")).error,
            RestJson::error(&ReplyError::network_conflict(ResourceKind::Svm, "vip")).error,
        );
    }
}
