//! The ARCA REST service: CRUD on SVMs, volumes, exports, directories,
//! snapshots and quotas, orchestrating the storage node underneath.

mod authentication;
mod core;
mod error;
mod locks;
mod v1;

#[cfg(test)]
mod tests;

use crate::core::{CoreService, ServiceConfig};
use actix_web::{middleware, web, App, HttpServer};
use agents::{ha::PacemakerHost, runner::HostRunner};
use clap::Parser;
use std::{path::PathBuf, sync::Arc};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = utils::package_description!(), version)]
struct CliArgs {
    /// Address the REST server binds to.
    #[arg(long, env = "ARCA_REST_BIND", default_value = "127.0.0.1:8080")]
    bind: String,
    /// Directory holding the state of record.
    #[arg(long, default_value = utils::DEFAULT_STATE_DIR)]
    state_dir: PathBuf,
    /// Root of the export tree.
    #[arg(long, default_value = utils::DEFAULT_EXPORT_ROOT)]
    export_root: String,
    /// Directory of the per-SVM exporter configuration files.
    #[arg(long, default_value = utils::DEFAULT_EXPORTER_CONFIG_DIR)]
    exporter_config_dir: PathBuf,
    /// Volume group backing the thin pool.
    #[arg(long, default_value = "vg_pool_01")]
    vg_name: String,
    /// Thin pool LV name inside the volume group.
    #[arg(long, default_value = "pool")]
    thinpool: String,
    /// Parent interface of tenant VLAN sub-interfaces.
    #[arg(long, default_value = "bond0")]
    parent_if: String,
    /// Name of the replicated block device resource.
    #[arg(long, default_value = "drbd_r0")]
    replicated_resource: String,
    /// Additionally serve NFSv3 (requires the fixed ports below).
    #[arg(long)]
    enable_v3: bool,
    #[arg(long, default_value_t = 20048)]
    mountd_port: u16,
    #[arg(long, default_value_t = 32768)]
    nlm_port: u16,
    /// Bearer token required on every request when set.
    #[arg(long, env = "ARCA_AUTH_TOKEN")]
    auth_token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    utils::tracing_telemetry::init_tracing("rest-service");
    utils::print_package_info!();

    authentication::init(args.auth_token.clone());

    let config = ServiceConfig {
        state_dir: args.state_dir,
        export_root: args.export_root,
        exporter_config_dir: args.exporter_config_dir,
        vg_name: args.vg_name,
        thinpool: args.thinpool,
        parent_if: args.parent_if,
        replicated_resource: args.replicated_resource,
        enable_v3: args.enable_v3,
        mountd_port: args.mountd_port,
        nlm_port: args.nlm_port,
    };

    let runner = Arc::new(HostRunner::default());
    let ha = Arc::new(PacemakerHost::new(runner.clone()));
    let service = CoreService::new(config, runner, ha);

    info!(bind = %args.bind, "starting REST service");
    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(web::Data::new(service.clone()))
            .configure(v1::configure)
    })
    .bind(&args.bind)?
    .run()
    .await?;
    Ok(())
}
