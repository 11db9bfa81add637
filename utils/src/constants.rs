//! Various common constants used by the control plane.

/// The CSI plugin's name, as reported by the identity service.
pub const CSI_PLUGIN_NAME: &str = "io.arca.csi-nfs";

/// The API version prefix of the REST surface.
pub const REST_API_VERSION: &str = "v1";

/// Default request timeout for REST operations.
pub const DEFAULT_REST_TIMEOUT: &str = "30s";

/// Default number of retries for transient REST failures.
pub const DEFAULT_REST_RETRIES: u32 = 3;

/// Base delay for exponential backoff of transient REST failures.
pub const REST_BACKOFF_BASE: std::time::Duration = std::time::Duration::from_secs(1);

/// The lease lock ttl after which another holder may take over.
pub const SVM_LOCK_TTL: &str = "30s";

/// Prefix of all lease names owned by the CSI controller.
pub const LEASE_NAME_PREFIX: &str = "arca-csi-svm";

/// The key of the finalizer protecting driver-owned metadata records.
pub const METADATA_FINALIZER: &str = "storage.arca.io/protection";

/// The CRD group of the driver-owned metadata records.
pub const METADATA_GROUP: &str = "storage.arca.io";

/// Root of all SVM exports on the storage node, and of the NFS pseudo tree.
pub const DEFAULT_EXPORT_ROOT: &str = "/exports";

/// Where the per-SVM exporter configuration files live.
pub const DEFAULT_EXPORTER_CONFIG_DIR: &str = "/etc/ganesha";

/// Where the REST service keeps its state of record.
pub const DEFAULT_STATE_DIR: &str = "/var/lib/arca-storage";

/// Default path of the per-node staging bookkeeping file.
pub const DEFAULT_NODE_STATE_FILE: &str = "/var/lib/csi-arca-storage/node-volumes.json";

/// Default base path under which per-SVM NFS mounts are kept.
pub const DEFAULT_BASE_MOUNT_PATH: &str = "/var/lib/kubelet/plugins/io.arca.csi-nfs/mounts";

/// Quieter log levels for noisy dependencies when running debug/trace.
pub const RUST_LOG_QUIET_DEFAULTS: &str =
    "actix_web=info,reqwest=info,hyper=info,tower=info,h2=info,kube=info";
