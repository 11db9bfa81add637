//! The CSI node plugin: one shared NFS mount per active SVM, bind mounts
//! into staging and pod targets, crash-safe node-local state.

mod controller_stub;
mod identity;
mod mount;
mod node;
mod server;
mod state;

use crate::{
    mount::{HostMounter, MountManager},
    node::NodeSvc,
    state::NodeState,
};
use clap::Parser;
use std::{path::PathBuf, sync::Arc};
use tracing::info;

const CSI_SOCKET: &str = "/var/tmp/csi-node.sock";

#[derive(Parser, Debug)]
#[command(name = utils::package_description!(), version)]
struct CliArgs {
    /// CSI socket path.
    #[arg(short = 'c', long, env = "CSI_SOCKET", default_value = CSI_SOCKET)]
    csi_socket: String,
    /// Unique id of this node, as registered with the orchestrator.
    #[arg(long, env = "NODE_ID")]
    node_id: String,
    /// Path of the persistent staging bookkeeping file.
    #[arg(long, default_value = utils::DEFAULT_NODE_STATE_FILE)]
    state_file_path: PathBuf,
    /// Base path under which per-SVM NFS mounts are kept.
    #[arg(long, default_value = utils::DEFAULT_BASE_MOUNT_PATH)]
    base_mount_path: PathBuf,
}

#[tokio::main(worker_threads = 2)]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    utils::tracing_telemetry::init_tracing("csi-node");
    utils::print_package_info!();

    anyhow::ensure!(!args.node_id.is_empty(), "node id must not be empty");

    if let Some(dir) = args.state_file_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::create_dir_all(&args.base_mount_path)?;

    let state = Arc::new(NodeState::load(&args.state_file_path));
    let mounts = Arc::new(MountManager::new(
        state.clone(),
        args.base_mount_path.clone(),
        Arc::new(HostMounter::default()),
    ));

    // Restore shared SVM mounts for whatever survived the restart.
    mounts.reconcile().await;

    info!(
        node_id = %args.node_id,
        socket = %args.csi_socket,
        state = %args.state_file_path.display(),
        "starting CSI node plugin"
    );
    server::CsiServer::run(
        &args.csi_socket,
        NodeSvc::new(args.node_id, state, mounts),
    )
    .await
}
