//! Volume concurrency limiter.
//!
//! The orchestrator normally keeps a single call in flight per volume, but it
//! may lose state and issue duplicates after a restart. Such a duplicate is
//! answered with ABORTED by taking a per-id reservation here.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use snafu::Snafu;
use std::collections::HashSet;
use tracing::trace;

/// Limiter error variants.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    #[snafu(display("Existing CSI operation is in progress for id: {id}"))]
    OperationInProgress { id: String },
}

impl From<Error> for tonic::Status {
    fn from(error: Error) -> Self {
        tonic::Status::aborted(error.to_string())
    }
}

/// Reservation for one volume or snapshot id. Dropping it returns the
/// reservation so the next operation can be accepted.
pub struct VolumeOpGuard {
    id: String,
}

impl VolumeOpGuard {
    /// Take a reservation, failing if an operation is already in flight.
    pub fn new(id: &str) -> Result<Self, Error> {
        let mut inventory = op_serializer().lock();
        if inventory.contains(id) {
            trace!(%id, "operation already exists for id");
            return Err(Error::OperationInProgress { id: id.to_string() });
        }
        inventory.insert(id.to_string());
        trace!(%id, "new reservation");
        Ok(Self { id: id.to_string() })
    }
}

impl Drop for VolumeOpGuard {
    fn drop(&mut self) {
        op_serializer().lock().remove(&self.id);
    }
}

fn op_serializer() -> &'static Mutex<HashSet<String>> {
    static OPERATION_LIMITER: OnceCell<Mutex<HashSet<String>>> = OnceCell::new();
    OPERATION_LIMITER.get_or_init(|| Mutex::new(HashSet::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_reservation_is_refused_until_drop() {
        let guard = VolumeOpGuard::new("pvc-0011223344556677").unwrap();
        assert!(VolumeOpGuard::new("pvc-0011223344556677").is_err());
        assert!(VolumeOpGuard::new("pvc-aaaaaaaaaaaaaaaa").is_ok());
        drop(guard);
        assert!(VolumeOpGuard::new("pvc-0011223344556677").is_ok());
    }
}
