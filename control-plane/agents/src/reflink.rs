//! Server-side reflink copies backing snapshots, clones and restores.

use crate::runner::{RunnerError, SystemRunner};
use snafu::Snafu;
use std::{path::Path, sync::Arc};
use tracing::debug;

/// Errors of the reflink layer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(false)))]
pub enum ReflinkError {
    #[snafu(display("Source path {path} does not exist"))]
    SourceMissing { path: String },
    #[snafu(display("{source}"))]
    Command { source: RunnerError },
}

impl From<RunnerError> for ReflinkError {
    fn from(source: RunnerError) -> Self {
        ReflinkError::Command { source }
    }
}

/// Reflink operations under one SVM's volume root. All paths handed in are
/// volume-relative and validated by the caller.
#[derive(Clone)]
pub struct Reflink {
    runner: Arc<dyn SystemRunner>,
}

impl Reflink {
    pub fn new(runner: Arc<dyn SystemRunner>) -> Self {
        Self { runner }
    }

    async fn exists(&self, path: &str) -> Result<bool, ReflinkError> {
        let output = self.runner.run("test", &["-e", path]).await?;
        Ok(output.success)
    }

    /// Create `dest` as a reflink copy of `source`. An existing destination
    /// makes this a no-op success, which is what create-idempotency needs.
    pub async fn copy(&self, volume_root: &str, source: &str, dest: &str) -> Result<(), ReflinkError> {
        let source_abs = join(volume_root, source);
        let dest_abs = join(volume_root, dest);
        if !self.exists(&source_abs).await? {
            return Err(ReflinkError::SourceMissing { path: source_abs });
        }
        if self.exists(&dest_abs).await? {
            return Ok(());
        }
        if let Some(parent) = Path::new(&dest_abs).parent() {
            self.runner
                .run_checked("mkdir", &["-p", &parent.to_string_lossy()])
                .await?;
        }
        self.runner
            .run_checked("cp", &["-a", "--reflink=always", &source_abs, &dest_abs])
            .await?;
        debug!(source = %source_abs, dest = %dest_abs, "reflink copy created");
        Ok(())
    }

    /// Remove a previously created copy. Absence is success.
    pub async fn remove(&self, volume_root: &str, path: &str) -> Result<(), ReflinkError> {
        let abs = join(volume_root, path);
        if !self.exists(&abs).await? {
            return Ok(());
        }
        self.runner.run_checked("rm", &["-rf", &abs]).await?;
        Ok(())
    }
}

fn join(root: &str, relative: &str) -> String {
    format!("{}/{}", root.trim_end_matches('/'), relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::FakeRunner;

    #[tokio::test]
    async fn copy_is_idempotent_on_existing_destination() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("test -e /exports/a/src", true, "", "");
        runner.respond("test -e /exports/a/dst", true, "", "");
        Reflink::new(runner.clone())
            .copy("/exports/a", "src", "dst")
            .await
            .unwrap();
        assert!(!runner.ran("cp"));
    }

    #[tokio::test]
    async fn copy_fails_on_missing_source() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("test -e", false, "", "");
        let error = Reflink::new(runner)
            .copy("/exports/a", "missing", "dst")
            .await
            .unwrap_err();
        assert!(matches!(error, ReflinkError::SourceMissing { .. }));
    }

    #[tokio::test]
    async fn copy_uses_reflink_always() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("test -e /exports/a/src", true, "", "");
        runner.respond("test -e /exports/a/.snapshots/s1", false, "", "");
        Reflink::new(runner.clone())
            .copy("/exports/a", "src", ".snapshots/s1")
            .await
            .unwrap();
        assert!(runner.ran("cp -a --reflink=always /exports/a/src /exports/a/.snapshots/s1"));
    }
}
