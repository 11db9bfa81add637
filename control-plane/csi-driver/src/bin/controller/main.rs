//! The CSI controller: translates CSI RPCs into ARCA REST calls, owns the
//! cluster metadata records and the namespace → SVM mapping.

mod allocator;
mod client;
mod controller;
mod identity;
mod lock;
mod node_stub;
mod server;
mod store;
mod svm;

use crate::{
    allocator::StandaloneAllocator,
    controller::CsiControllerSvc,
    lock::LeaseLockManager,
    store::{cached::CachedStore, crd::CrdStore, memory::MemoryStore, MetaStore},
    svm::SvmManager,
};
use clap::Parser;
use rest_client::ArcaApiClient;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{info, warn};

const CSI_SOCKET: &str = "/var/tmp/csi.sock";
const CACHE_CAPACITY: usize = 256;
const CACHE_TTL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = utils::package_description!(), version)]
struct CliArgs {
    /// CSI socket path.
    #[arg(short = 'c', long, env = "CSI_SOCKET", default_value = CSI_SOCKET)]
    csi_socket: String,
    /// Driver configuration file.
    #[arg(long, env = "ARCA_CSI_CONFIG", default_value = "/etc/csi-arca-storage/config.yaml")]
    config: PathBuf,
    /// Holder identity of distributed locks; defaults to the pod name.
    #[arg(long, env = "POD_NAME")]
    identity: Option<String>,
    /// Namespace the coordination leases live in.
    #[arg(long, env = "POD_NAMESPACE", default_value = "kube-system")]
    lease_namespace: String,
    /// Keep all metadata in memory instead of the cluster (development only).
    #[arg(long)]
    in_memory_store: bool,
}

#[tokio::main(worker_threads = 2)]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    utils::tracing_telemetry::init_tracing("csi-controller");
    utils::print_package_info!();

    let config = csi_driver::config::Config::load(&args.config)?;
    let api = Arc::new(ArcaApiClient::new(&config.rest_client_config()).map_err(
        |error| anyhow::anyhow!("Failed to create REST client: {error:?}"),
    )?);
    api.ping().await;

    let identity = args
        .identity
        .clone()
        .unwrap_or_else(|| format!("csi-controller-{}", std::process::id()));

    let (store, locks): (Arc<dyn MetaStore>, Arc<dyn lock::LockManager>) = if args.in_memory_store
    {
        warn!("running with the in-memory store; state dies with this process");
        (
            Arc::new(MemoryStore::new()),
            Arc::new(in_memory_locks::ProcessLockManager::default()),
        )
    } else {
        let kube = kube::Client::try_default().await?;
        (
            Arc::new(CrdStore::new(kube.clone())),
            Arc::new(LeaseLockManager::new(
                kube,
                &args.lease_namespace,
                identity.clone(),
            )),
        )
    };
    let store = Arc::new(CachedStore::new(store, CACHE_CAPACITY, CACHE_TTL));

    let allocator = StandaloneAllocator::new(&config.network.pools, api.clone())
        .map_err(|error| anyhow::anyhow!("Invalid pool configuration: {error}"))?;
    let svms = SvmManager::new(api.clone(), allocator, locks, config.network.mtu);

    info!(
        endpoint = %config.arca.base_url,
        socket = %args.csi_socket,
        %identity,
        "starting CSI controller"
    );
    server::CsiServer::run(
        &args.csi_socket,
        CsiControllerSvc::new(store, api, svms),
    )
    .await
}

/// Process-local locks for the in-memory development mode.
mod in_memory_locks {
    use crate::lock::{lease_name, LockError, LockHandle, LockManager};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::{collections::HashSet, sync::Arc, time::Duration};

    #[derive(Default)]
    pub(crate) struct ProcessLockManager {
        held: Arc<Mutex<HashSet<String>>>,
    }

    #[async_trait]
    impl LockManager for ProcessLockManager {
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
