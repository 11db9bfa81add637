//! Tenant network allocation from static IP pools. Pools are tried
//! round-robin; within a pool the allocator enumerates VIPs already in use
//! for the pool's VLAN through the REST API and picks the lowest free host.
//! After a reported conflict the retry starts from a random offset so two
//! racing controllers stop colliding on the same address.

use crate::client::ArcaApi;
use csi_driver::config::PoolConfig;
use ipnetwork::Ipv4Network;
use rand::Rng;
use snafu::Snafu;
use std::{
    collections::HashSet,
    net::Ipv4Addr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::debug;

/// Allocation failures.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub(crate) enum AllocatorError {
    #[snafu(display("No IP pools configured"))]
    NoPools,
    #[snafu(display("Invalid pool {index}: {detail}"))]
    InvalidPool { index: usize, detail: String },
    #[snafu(display("All IP pools exhausted"))]
    AllPoolsExhausted,
    #[snafu(display("Failed to enumerate used VIPs: {message}"))]
    Enumeration { message: String },
}

/// Network parameters picked for a new SVM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NetworkAllocation {
    pub vlan_id: u16,
    pub ip_cidr: String,
    pub gateway: String,
}

struct IpPool {
    network: Ipv4Network,
    vlan_id: u16,
    gateway: String,
    first: u32,
    last: u32,
}

impl IpPool {
    fn hosts(&self) -> u32 {
        self.last - self.first + 1
    }
}

fn parse_pool(index: usize, config: &PoolConfig) -> Result<IpPool, AllocatorError> {
    let invalid = |detail: String| AllocatorError::InvalidPool { index, detail };
    let network: Ipv4Network = config
        .cidr
        .parse()
        .map_err(|_| invalid(format!("bad cidr '{}'", config.cidr)))?;

    // Range defaults to the whole network minus network and broadcast.
    let (first, last) = match &config.range {
        Some(range) => {
            let (first, last) = range
                .split_once('-')
                .ok_or_else(|| invalid(format!("bad range '{range}'")))?;
            let first: Ipv4Addr = first
                .trim()
                .parse()
                .map_err(|_| invalid(format!("bad range start '{first}'")))?;
            let last: Ipv4Addr = last
                .trim()
                .parse()
                .map_err(|_| invalid(format!("bad range end '{last}'")))?;
            (u32::from(first), u32::from(last))
        }
        None => (
            u32::from(network.network()) + 1,
            u32::from(network.broadcast()) - 1,
        ),
    };
    if first > last {
        return Err(invalid("range start above range end".to_string()));
    }
    // Network and broadcast addresses are never handed out.
    let floor = u32::from(network.network()) + 1;
    let ceiling = u32::from(network.broadcast()) - 1;
    Ok(IpPool {
        first: first.max(floor),
        last: last.min(ceiling),
        vlan_id: config.vlan,
        gateway: config.gateway.clone(),
        network,
    })
}

/// The standalone pool allocator. The only strategy this driver implements.
pub(crate) struct StandaloneAllocator {
    pools: Vec<IpPool>,
    pool_counter: AtomicUsize,
    api: Arc<dyn ArcaApi>,
}

impl StandaloneAllocator {
    pub(crate) fn new(
        configs: &[PoolConfig],
        api: Arc<dyn ArcaApi>,
    ) -> Result<Self, AllocatorError> {
        if configs.is_empty() {
            return Err(AllocatorError::NoPools);
        }
        let pools = configs
            .iter()
            .enumerate()
            .map(|(index, config)| parse_pool(index, config))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            pools,
            pool_counter: AtomicUsize::new(0),
            api,
        })
    }

    async fn used_vips(&self, vlan_id: u16) -> Result<HashSet<Ipv4Addr>, AllocatorError> {
        let svms = self
            .api
            .list_svms()
            .await
            .map_err(|error| AllocatorError::Enumeration {
                message: format!("{error:?}"),
            })?;
        Ok(svms
            .into_iter()
            .filter(|svm| svm.vlan_id == vlan_id)
            .filter_map(|svm| svm.vip.parse().ok())
            .collect())
    }

    /// Allocate network parameters. `attempt` is the caller's retry counter
    /// after a reported conflict.
    pub(crate) async fn allocate(
        &self,
        namespace: &str,
        attempt: u32,
    ) -> Result<NetworkAllocation, AllocatorError> {
        let start = self.pool_counter.fetch_add(1, Ordering::Relaxed) % self.pools.len();

        for index in 0..self.pools.len() {
            let pool = &self.pools[(start + index) % self.pools.len()];
            let used = self.used_vips(pool.vlan_id).await?;

            let hosts = pool.hosts();
            let offset = if attempt > 0 {
                rand::thread_rng().gen_range(0..hosts)
            } else {
                0
            };
            for step in 0..hosts {
                let candidate = Ipv4Addr::from(pool.first + (offset + step) % hosts);
                if !used.contains(&candidate) {
                    let allocation = NetworkAllocation {
                        vlan_id: pool.vlan_id,
                        ip_cidr: format!("{candidate}/{}", pool.network.prefix()),
                        gateway: pool.gateway.clone(),
                    };
                    debug!(%namespace, vlan = pool.vlan_id, cidr = %allocation.ip_cidr, "allocated");
                    return Ok(allocation);
                }
            }
            debug!(vlan = pool.vlan_id, "pool exhausted");
        }
        Err(AllocatorError::AllPoolsExhausted)
    }
}
