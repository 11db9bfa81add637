//! Resource agent for the tenant network isolator. The HA host invokes it
//! with `start`, `stop`, `monitor` or `validate-all`; all four share the same
//! idempotent reconcile routine and report through OCF exit codes.

use agents::{
    netns::{NetnsError, NetnsResource, NetnsSpec},
    runner::HostRunner,
};
use clap::{Parser, Subcommand};
use std::{net::Ipv4Addr, process::ExitCode, sync::Arc};

const OCF_SUCCESS: u8 = 0;
const OCF_ERR_GENERIC: u8 = 1;
const OCF_ERR_ARGS: u8 = 2;
const OCF_NOT_RUNNING: u8 = 7;

#[derive(Parser, Debug)]
#[command(name = "tenant-netns-ra", version)]
struct CliArgs {
    #[command(subcommand)]
    action: Action,
    #[arg(long, env = "OCF_RESKEY_ns")]
    ns: String,
    #[arg(long, env = "OCF_RESKEY_vlan_id")]
    vlan_id: u16,
    #[arg(long, env = "OCF_RESKEY_parent_if")]
    parent_if: String,
    #[arg(long, env = "OCF_RESKEY_ip")]
    ip: Ipv4Addr,
    #[arg(long, env = "OCF_RESKEY_prefix")]
    prefix: u8,
    #[arg(long, env = "OCF_RESKEY_gw")]
    gw: Ipv4Addr,
    #[arg(long, env = "OCF_RESKEY_mtu", default_value_t = 1500)]
    mtu: u32,
}

#[derive(Subcommand, Debug)]
enum Action {
    Start,
    Stop,
    Monitor,
    ValidateAll,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    utils::tracing_telemetry::init_tracing_level("tenant-netns-ra", Some("warn"));

    let spec = NetnsSpec {
        ns: args.ns,
        vlan_id: args.vlan_id,
        parent_if: args.parent_if,
        ip: args.ip,
        prefix: args.prefix,
        gateway: args.gw,
        mtu: args.mtu,
    };
    let resource = NetnsResource::new(Arc::new(HostRunner::default()));

    let result = match args.action {
        Action::ValidateAll => NetnsResource::validate(&spec),
        Action::Start => resource.start(&spec).await,
        Action::Stop => resource.stop(&spec).await,
        Action::Monitor => resource.monitor(&spec).await,
    };

    match result {
        Ok(()) => ExitCode::from(OCF_SUCCESS),
        Err(NetnsError::Invalid { source }) => {
            eprintln!("invalid parameters: {source}");
            ExitCode::from(OCF_ERR_ARGS)
        }
        Err(NetnsError::MonitorFailed { ns, check }) => {
            eprintln!("{ns}: {check}");
            ExitCode::from(OCF_NOT_RUNNING)
        }
        Err(error) => {
            eprintln!("{error}");
            ExitCode::from(OCF_ERR_GENERIC)
        }
    }
}
