//! Storage-node orchestration: everything the REST server drives on the host
//! that owns the replicated block device primary. All host mutation funnels
//! through [`runner::SystemRunner`] so every composition is testable without
//! touching the machine.

/// HA resource host contract and its pacemaker-backed implementation.
pub mod ha;
/// LVM thin pool and thin volume operations.
pub mod lvm;
/// Tenant network isolator resource.
pub mod netns;
/// Per-volume I/O limits through the cgroups-v2 io controller.
pub mod qos;
/// Reflink snapshot operations.
pub mod reflink;
/// The control plane's state of record on the storage node.
pub mod registry;
/// Host command execution.
pub mod runner;
/// XFS formatting, mounting and project quotas.
pub mod xfs;

/// Per-SVM NFS exporter configuration rendering and reload.
pub mod exporter;
