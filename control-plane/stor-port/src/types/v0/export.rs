use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Client access level of an export.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExportAccess {
    Rw,
    Ro,
}

/// Root squashing behaviour of an export.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Squash {
    RootSquash,
    NoRootSquash,
}

/// Authentication flavors accepted by an export.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SecFlavor {
    Sys,
    Krb5,
    Krb5i,
    Krb5p,
}

/// An ACL record granting a client CIDR access to a volume through the SVM's
/// exporter. `(svm, export_id)` is unique; the exporter's on-disk config is a
/// pure function of the SVM's export set.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Export {
    /// Stable positive id, unique within the SVM.
    pub export_id: u32,
    pub svm: String,
    pub volume: String,
    /// Client network in CIDR notation.
    pub client_cidr: String,
    pub access: ExportAccess,
    pub squash: Squash,
    pub sec: Vec<SecFlavor>,
    /// Absolute path on the server.
    pub path: String,
    /// NFSv4 pseudo path.
    pub pseudo: String,
    pub created_at: DateTime<Utc>,
}

/// Request body of `POST /v1/exports`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CreateExportBody {
    pub svm: String,
    pub volume: String,
    pub client_cidr: String,
    #[serde(default = "default_access")]
    pub access: ExportAccess,
    #[serde(default = "default_squash")]
    pub squash: Squash,
    #[serde(default = "default_sec")]
    pub sec: Vec<SecFlavor>,
}

fn default_access() -> ExportAccess {
    ExportAccess::Rw
}
fn default_squash() -> Squash {
    Squash::RootSquash
}
fn default_sec() -> Vec<SecFlavor> {
    vec![SecFlavor::Sys]
}

/// Request body of `DELETE /v1/exports`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DeleteExportBody {
    pub svm: String,
    pub export_id: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_defaults_apply() {
        let body: CreateExportBody = serde_json::from_str(
            r#"{"svm":"tenant_a","volume":"vol1","client_cidr":"10.0.0.0/24"}"#,
        )
        .unwrap();
        assert_eq!(body.access, ExportAccess::Rw);
        assert_eq!(body.squash, Squash::RootSquash);
        assert_eq!(body.sec, vec![SecFlavor::Sys]);
    }

    #[test]
    fn unknown_fields_rejected() {
        let result: Result<CreateExportBody, _> = serde_json::from_str(
            r#"{"svm":"a","volume":"v","client_cidr":"10.0.0.0/24","bogus":true}"#,
        );
        assert!(result.is_err());
    }
}
