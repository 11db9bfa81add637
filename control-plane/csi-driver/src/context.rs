//! Parameters and volume context crossing the CSI boundary.

use std::collections::HashMap;
use tonic::Status;

/// Storage-class parameter keys the external provisioner injects.
pub mod params {
    pub const PVC_NAMESPACE: &str = "csi.storage.k8s.io/pvc/namespace";
    pub const PVC_NAME: &str = "csi.storage.k8s.io/pvc/name";
}

/// Volume context keys handed from the controller to the node.
pub mod volume_context {
    pub const SVM: &str = "svm";
    pub const VIP: &str = "vip";
    pub const VOLUME_PATH: &str = "volumePath";
}

/// Parameters of a CreateVolume request.
#[derive(Debug, Clone)]
pub struct CreateParams {
    namespace: String,
    pvc_name: Option<String>,
}

impl CreateParams {
    /// The namespace the PVC lives in; the unit SVMs are carved by.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// PVC name, used as the record's display name when present.
    pub fn pvc_name(&self) -> Option<&str> {
        self.pvc_name.as_deref()
    }
}

impl TryFrom<&HashMap<String, String>> for CreateParams {
    type Error = Status;

    fn try_from(parameters: &HashMap<String, String>) -> Result<Self, Self::Error> {
        let namespace = parameters
            .get(params::PVC_NAMESPACE)
            .filter(|namespace| !namespace.is_empty())
            .ok_or_else(|| {
                Status::invalid_argument(format!(
                    "Parameter {} is required",
                    params::PVC_NAMESPACE
                ))
            })?;
        Ok(Self {
            namespace: namespace.clone(),
            pvc_name: parameters.get(params::PVC_NAME).cloned(),
        })
    }
}

/// Volume context of a staged volume, as validated by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeContext {
    pub svm: String,
    pub vip: String,
    pub volume_path: String,
}

impl VolumeContext {
    /// Build the context map sent along a created volume.
    pub fn to_map(&self) -> HashMap<String, String> {
        HashMap::from([
            (volume_context::SVM.to_string(), self.svm.clone()),
            (volume_context::VIP.to_string(), self.vip.clone()),
            (
                volume_context::VOLUME_PATH.to_string(),
                self.volume_path.clone(),
            ),
        ])
    }
}

impl TryFrom<&HashMap<String, String>> for VolumeContext {
    type Error = Status;

    fn try_from(context: &HashMap<String, String>) -> Result<Self, Self::Error> {
        let fetch = |key: &str| {
            context
                .get(key)
                .filter(|value| !value.is_empty())
                .cloned()
                .ok_or_else(|| {
                    Status::invalid_argument(format!("Volume context must contain {key}"))
                })
        };
        let this = Self {
            svm: fetch(volume_context::SVM)?,
            vip: fetch(volume_context::VIP)?,
            volume_path: fetch(volume_context::VOLUME_PATH)?,
        };
        if this.vip.parse::<std::net::Ipv4Addr>().is_err() {
            return Err(Status::invalid_argument(format!(
                "Volume context vip '{}' is not an IPv4 address",
                this.vip
            )));
        }
        stor_port::validation::validate_relative_path(&this.volume_path)
            .map_err(|error| Status::invalid_argument(error.to_string()))?;
        Ok(this)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(svm: &str, vip: &str, path: &str) -> HashMap<String, String> {
        HashMap::from([
            ("svm".to_string(), svm.to_string()),
            ("vip".to_string(), vip.to_string()),
            ("volumePath".to_string(), path.to_string()),
        ])
    }

    #[test]
    fn volume_context_requires_all_keys() {
        let mut map = context("svm1", "10.0.0.5", "pvc-0011223344556677");
        assert!(VolumeContext::try_from(&map).is_ok());
        map.remove("vip");
        assert!(VolumeContext::try_from(&map).is_err());
    }

    #[test]
    fn volume_context_rejects_bad_vip_and_traversal() {
        let bad_vip = context("svm1", "not-an-ip", "p");
        assert!(VolumeContext::try_from(&bad_vip).is_err());
        let traversal = context("svm1", "10.0.0.5", "../etc");
        assert!(VolumeContext::try_from(&traversal).is_err());
        let absolute = context("svm1", "10.0.0.5", "/abs");
        assert!(VolumeContext::try_from(&absolute).is_err());
    }

    #[test]
    fn create_params_require_namespace() {
        let mut map = HashMap::from([(
            params::PVC_NAMESPACE.to_string(),
            "default".to_string(),
        )]);
        assert_eq!(CreateParams::try_from(&map).unwrap().namespace(), "default");
        map.clear();
        assert!(CreateParams::try_from(&map).is_err());
    }
}
