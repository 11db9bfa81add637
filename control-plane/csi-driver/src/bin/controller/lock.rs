//! Distributed locking on Kubernetes coordination Leases. A lease is taken
//! over only once expired (RenewTime + LeaseDuration before now); a holder
//! renews at a third of the TTL from a background task which stops when the
//! lock is released.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use k8s_openapi::{
    api::coordination::v1::{Lease, LeaseSpec},
    apimachinery::pkg::apis::meta::v1::MicroTime,
};
use kube::{
    api::{Api as KubeApi, ObjectMeta, PostParams},
    Client,
};
use snafu::Snafu;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Locking failures.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub(crate) enum LockError {
    #[snafu(display("Lock {name} is held by another owner"))]
    Busy { name: String },
    #[snafu(display("Lease API failure for {name}: {message}"))]
    Api { name: String, message: String },
}

/// An acquired lock. Releasing stops renewal and deletes the lease; dropping
/// without release stops renewal and lets the lease expire.
pub(crate) struct LockHandle {
    name: String,
    renewal: Option<JoinHandle<()>>,
    release: Option<KubeApi<Lease>>,
    on_release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockHandle {
    /// A handle with no lease behind it, used by process-local managers.
    pub(crate) fn unmanaged(name: String, on_release: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            name,
            renewal: None,
            release: None,
            on_release: Some(on_release),
        }
    }

    pub(crate) async fn release(mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.abort();
        }
        if let Some(api) = self.release.take() {
            if let Err(error) = api.delete(&self.name, &Default::default()).await {
                warn!(lease = %self.name, %error, "failed to delete lease on release");
            } else {
                debug!(lease = %self.name, "lock released");
            }
        }
        if let Some(on_release) = self.on_release.take() {
            on_release();
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.abort();
        }
        if let Some(on_release) = self.on_release.take() {
            on_release();
        }
    }
}

/// Acquires named locks.
#[async_trait]
pub(crate) trait LockManager: Send + Sync {
    /// Acquire `resource`'s lock, waiting up to the TTL for a holder to
    /// vacate before giving up with `Busy`.
    async fn acquire(&self, resource: &str, ttl: Duration) -> Result<LockHandle, LockError>;
}

/// Whether a lease can be taken over: its renew time plus duration lies in
/// the past. A lease without a renew time is up for grabs.
pub(crate) fn lease_expired(
    renew_time: Option<DateTime<Utc>>,
    lease_duration_seconds: Option<i32>,
    now: DateTime<Utc>,
) -> bool {
    match (renew_time, lease_duration_seconds) {
        (Some(renewed), Some(duration)) => {
            renewed + ChronoDuration::seconds(duration as i64) < now
        }
        _ => true,
    }
}

/// The name of the lease backing a resource's lock.
pub(crate) fn lease_name(resource: &str) -> String {
    format!("{}-{resource}", utils::LEASE_NAME_PREFIX)
}

/// Lease-backed lock manager.
pub(crate) struct LeaseLockManager {
    api: KubeApi<Lease>,
    identity: String,
}

impl LeaseLockManager {
    /// `identity` is this process's unique holder identity (`POD_NAME` for
    /// controller pods); it must never be empty.
    pub(crate) fn new(client: Client, namespace: &str, identity: String) -> Self {
        assert!(!identity.is_empty(), "lock holder identity must not be empty");
        Self {
            api: KubeApi::namespaced(client, namespace),
            identity,
        }
    }

    /// One acquisition round: true when this identity now holds the lease.
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<bool, LockError> {
        let api_error = |error: kube::Error| LockError::Api {
            name: name.to_string(),
            message: error.to_string(),
        };
        let now = MicroTime(Utc::now());
        let duration_seconds = ttl.as_secs() as i32;

        match self.api.get(name).await {
            Ok(mut lease) => {
                let spec = lease.spec.get_or_insert_with(LeaseSpec::default);
                let ours = spec.holder_identity.as_deref() == Some(self.identity.as_str());
                let expired = lease_expired(
                    spec.renew_time.as_ref().map(|time| time.0),
                    spec.lease_duration_seconds,
                    Utc::now(),
                );
                if !ours && !expired {
                    return Ok(false);
                }
                spec.holder_identity = Some(self.identity.clone());
                spec.lease_duration_seconds = Some(duration_seconds);
                spec.renew_time = Some(now);
                match self.api.replace(name, &PostParams::default(), &lease).await {
                    Ok(_) => Ok(true),
                    // Somebody else updated concurrently; not ours this round.
                    Err(kube::Error::Api(response)) if response.code == 409 => Ok(false),
                    Err(error) => Err(api_error(error)),
                }
            }
            Err(kube::Error::Api(response)) if response.code == 404 => {
                let lease = Lease {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        ..ObjectMeta::default()
                    },
                    spec: Some(LeaseSpec {
                        holder_identity: Some(self.identity.clone()),
                        lease_duration_seconds: Some(duration_seconds),
                        renew_time: Some(now),
                        ..LeaseSpec::default()
                    }),
                };
                match self.api.create(&PostParams::default(), &lease).await {
                    Ok(_) => Ok(true),
                    Err(kube::Error::Api(response)) if response.reason == "AlreadyExists" => {
                        Ok(false)
                    }
                    Err(error) => Err(api_error(error)),
                }
            }
            Err(error) => Err(api_error(error)),
        }
    }

    fn spawn_renewal(&self, name: String, ttl: Duration) -> JoinHandle<()> {
        let api = self.api.clone();
        let identity = self.identity.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ttl / 3);
            interval.tick().await;
            loop {
                interval.tick().await;
                let result = async {
                    let mut lease = api.get(&name).await?;
                    let spec = lease.spec.get_or_insert_with(LeaseSpec::default);
                    if spec.holder_identity.as_deref() != Some(identity.as_str()) {
                        // Lost the lock; renewing would steal it back.
                        return Ok::<bool, kube::Error>(false);
                    }
                    spec.renew_time = Some(MicroTime(Utc::now()));
                    api.replace(&name, &PostParams::default(), &lease).await?;
                    Ok(true)
                }
                .await;
                match result {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(lease = %name, "lock lost, stopping renewal");
                        return;
                    }
                    Err(error) => warn!(lease = %name, %error, "failed to renew lease"),
                }
            }
        })
    }
}

#[async_trait]
impl LockManager for LeaseLockManager {
    async fn acquire(&self, resource: &str, ttl: Duration) -> Result<LockHandle, LockError> {
        let name = lease_name(resource);
        let deadline = tokio::time::Instant::now() + ttl;
        loop {
            if self.try_acquire(&name, ttl).await? {
                debug!(lease = %name, "lock acquired");
                return Ok(LockHandle {
                    renewal: Some(self.spawn_renewal(name.clone(), ttl)),
                    release: Some(self.api.clone()),
                    name,
                    on_release: None,
                });
            }
            if tokio::time::Instant::now() + Duration::from_secs(1) > deadline {
                return Err(LockError::Busy { name });
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

/// Process-local lock manager used in tests: a holder blocks others until
/// released, with no waiting.
#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use parking_lot::Mutex;
    use std::{collections::HashSet, sync::Arc};

    #[derive(Default)]
    pub(crate) struct MemoryLockManager {
        held: Arc<Mutex<HashSet<String>>>,
    }

    #[async_trait]
    impl LockManager for MemoryLockManager {
        async fn acquire(&self, resource: &str, _ttl: Duration) -> Result<LockHandle, LockError> {
            let name = lease_name(resource);
            if !self.held.lock().insert(name.clone()) {
                return Err(LockError::Busy { name });
            }
            let held = self.held.clone();
            let release_name = name.clone();
            Ok(LockHandle::unmanaged(
                name,
                Box::new(move || {
                    held.lock().remove(&release_name);
                }),
            ))
        }
    }
}
