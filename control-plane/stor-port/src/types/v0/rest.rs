//! The JSON envelope of the REST surface.

use crate::{ReplyError, ReplyErrorKind};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::str::FromStr;

/// Every REST response is wrapped in this envelope. On success `data` is set;
/// on failure `error` carries the stable `ReplyErrorKind` token and `message`
/// the human-readable detail.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct RestJson<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize + DeserializeOwned> RestJson<T> {
    /// Success envelope.
    pub fn data(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            message: None,
        }
    }
}

impl RestJson<()> {
    /// Failure envelope. The `error` field is the kind token the clients key
    /// their retry policy on.
    pub fn error(error: &ReplyError) -> Self {
        Self {
            data: None,
            error: Some(error.kind.as_ref().to_string()),
            message: Some(error.full_string()),
        }
    }
}

/// Recover the error kind from a wire envelope, tolerating unknown tokens.
pub fn error_kind(error: &str) -> ReplyErrorKind {
    ReplyErrorKind::from_str(error).unwrap_or(ReplyErrorKind::Internal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResourceKind;

    #[test]
    fn error_envelope_carries_kind_token() {
        let reply = ReplyError::network_conflict(ResourceKind::Svm, "vip 10.0.0.5 in use");
        let wire = serde_json::to_string(&RestJson::error(&reply)).unwrap();
        let parsed: RestJson<()> = serde_json::from_str(&wire).unwrap();
        assert_eq!(
            error_kind(parsed.error.as_deref().unwrap()),
            ReplyErrorKind::NetworkConflict
        );
    }
}
