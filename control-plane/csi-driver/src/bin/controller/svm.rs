//! Namespace → SVM mapping. One SVM per Kubernetes namespace, created on
//! first use under a distributed lock, retrying allocation on network
//! conflicts with exponential backoff.

use crate::{
    allocator::{AllocatorError, StandaloneAllocator},
    client::ArcaApi,
    lock::LockManager,
};
use rest_client::ApiClientError;
use snafu::Snafu;
use std::{sync::Arc, time::Duration};
use stor_port::types::v0::{CreateSvmBody, Svm, DEFAULT_MTU};
use tracing::{debug, info, warn};

const CREATE_ATTEMPTS: u32 = 5;
const LOCK_TTL: Duration = Duration::from_secs(30);

/// SVM provisioning failures.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub(crate) enum SvmError {
    #[snafu(display("Failed to allocate a tenant network: {source}"))]
    Allocation { source: AllocatorError },
    #[snafu(display("Failed to lock namespace {namespace}: {message}"))]
    Lock { namespace: String, message: String },
    #[snafu(display("Failed to create SVM {name} after {attempts} attempts"))]
    Exhausted { name: String, attempts: u32 },
    #[snafu(display("REST failure for SVM {name}: {message}"))]
    Api { name: String, message: String },
}

/// The SVM name of a namespace.
pub(crate) fn svm_name_for(namespace: &str) -> String {
    format!("k8s-{namespace}")
}

/// Manages the namespace → SVM mapping.
pub(crate) struct SvmManager {
    api: Arc<dyn ArcaApi>,
    allocator: StandaloneAllocator,
    locks: Arc<dyn LockManager>,
    mtu: u32,
}

impl SvmManager {
    pub(crate) fn new(
        api: Arc<dyn ArcaApi>,
        allocator: StandaloneAllocator,
        locks: Arc<dyn LockManager>,
        mtu: Option<u32>,
    ) -> Self {
        Self {
            api,
            allocator,
            locks,
            mtu: mtu.unwrap_or(DEFAULT_MTU),
        }
    }

    pub(crate) async fn get_svm(&self, name: &str) -> Result<Svm, ApiClientError> {
        self.api.get_svm(name).await
    }

    /// Ensure the namespace's SVM exists, creating it when first seen.
    pub(crate) async fn ensure_svm(&self, namespace: &str) -> Result<Svm, SvmError> {
        let name = svm_name_for(namespace);

        // Fast path: it usually exists already.
        match self.api.get_svm(&name).await {
            Ok(svm) => {
                debug!(svm = %name, vip = %svm.vip, "SVM already exists");
                return Ok(svm);
            }
            Err(ApiClientError::ResourceNotExists(_)) => {}
            Err(error) => {
                return Err(SvmError::Api {
                    name,
                    message: format!("{error:?}"),
                });
            }
        }

        let lock = self
            .locks
            .acquire(&format!("svm-{namespace}"), LOCK_TTL)
            .await
            .map_err(|error| SvmError::Lock {
                namespace: namespace.to_string(),
                message: error.to_string(),
            })?;
        let result = self.create_svm_locked(namespace, &name).await;
        lock.release().await;
        result
    }

    async fn create_svm_locked(&self, namespace: &str, name: &str) -> Result<Svm, SvmError> {
        // Double-check under the lock: another controller may have won.
        match self.api.get_svm(name).await {
            Ok(svm) => {
                debug!(svm = %name, "SVM was created by another controller");
                return Ok(svm);
            }
            Err(ApiClientError::ResourceNotExists(_)) => {}
            Err(error) => {
                return Err(SvmError::Api {
                    name: name.to_string(),
                    message: format!("{error:?}"),
                });
            }
        }

        for attempt in 0..CREATE_ATTEMPTS {
            if attempt > 0 {
                let backoff = Duration::from_secs(1 << (attempt - 1));
                warn!(svm = %name, attempt, ?backoff, "retrying after network conflict");
                tokio::time::sleep(backoff).await;
            }

            let allocation = self
                .allocator
                .allocate(namespace, attempt)
                .await
                .map_err(|source| SvmError::Allocation { source })?;

            let body = CreateSvmBody {
                name: name.to_string(),
                vlan_id: allocation.vlan_id,
                ip_cidr: allocation.ip_cidr,
                gateway: Some(allocation.gateway),
                mtu: self.mtu,
                root_volume_size_bytes: None,
            };
            match self.api.create_svm(&body).await {
                Ok(svm) => {
                    info!(svm = %name, vip = %svm.vip, vlan = svm.vlan_id, "SVM created");
                    return Ok(svm);
                }
                // Another controller slipped past both probes.
                Err(ApiClientError::ResourceAlreadyExists(_)) => {
                    return self.api.get_svm(name).await.map_err(|error| SvmError::Api {
                        name: name.to_string(),
                        message: format!("{error:?}"),
                    });
                }
                Err(ApiClientError::NetworkConflict(message)) => {
                    debug!(svm = %name, %message, "allocation collided, will retry");
                    continue;
                }
                Err(error) => {
                    return Err(SvmError::Api {
                        name: name.to_string(),
                        message: format!("{error:?}"),
                    });
                }
            }
        }
        Err(SvmError::Exhausted {
            name: name.to_string(),
            attempts: CREATE_ATTEMPTS,
        })
    }
}
