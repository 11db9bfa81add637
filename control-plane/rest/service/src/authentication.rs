//! Bearer-token authentication. When the service is started without a token
//! every request is accepted; with one, all routes require it.

use actix_web::{dev::Payload, FromRequest, HttpRequest};
use futures::future::{ready, Ready};
use once_cell::sync::OnceCell;
use stor_port::{ReplyError, ReplyErrorKind, ResourceKind};

static AUTH_TOKEN: OnceCell<Option<String>> = OnceCell::new();

/// Install the expected token at startup.
pub(crate) fn init(token: Option<String>) {
    AUTH_TOKEN.get_or_init(|| token);
}

fn authenticate(req: &HttpRequest) -> Result<(), ReplyError> {
    let Some(expected) = AUTH_TOKEN.get().cloned().flatten() else {
        return Ok(());
    };
    let presented = req
        .headers()
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    match presented {
        Some(token) if token == expected => Ok(()),
        _ => Err(ReplyError {
            kind: ReplyErrorKind::Unauthorized,
            resource: ResourceKind::Unknown,
            source: req.uri().to_string(),
            extra: "missing or invalid bearer token".to_string(),
        }),
    }
}

/// Extractor placed on every handler; rejects unauthenticated requests.
pub(crate) struct BearerToken;

impl FromRequest for BearerToken {
    type Error = crate::error::RestError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authenticate(req).map(|_| Self).map_err(Into::into))
    }
}
