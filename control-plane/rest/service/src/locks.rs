//! Resource-scoped advisory locks. Concurrent mutations of the same key
//! serialize; keys are `svm:<name>`, `svm:<name>:exports` and
//! `svm:<name>:volume:<name>`.

use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::OwnedMutexGuard;

#[derive(Default)]
pub(crate) struct ResourceLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ResourceLocks {
    /// Take the lock for a key, waiting behind any holder. The guard releases
    /// on drop at the end of the request.
    pub(crate) async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut inner = self.inner.lock();
            inner
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }

    /// Lock key of SVM-level mutations.
    pub(crate) fn svm_key(name: &str) -> String {
        format!("svm:{name}")
    }

    /// Lock key of export mutations within an SVM.
    pub(crate) fn exports_key(name: &str) -> String {
        format!("svm:{name}:exports")
    }

    /// Lock key of volume and directory mutations within an SVM.
    pub(crate) fn volume_key(svm: &str, volume: &str) -> String {
        format!("svm:{svm}:volume:{volume}")
    }
}
