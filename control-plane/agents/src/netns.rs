//! The tenant network isolator: one netns per SVM with a VLAN sub-interface,
//! the VIP and a default route. Exposed to the HA host as a resource with
//! `start`/`stop`/`monitor`/`validate` semantics.

use crate::runner::{RunnerError, SystemRunner};
use snafu::Snafu;
use std::{net::Ipv4Addr, sync::Arc};
use stor_port::validation::{self, ValidationError};
use tracing::{debug, info};

/// Errors of the isolator resource.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(false)))]
pub enum NetnsError {
    #[snafu(display("Invalid isolator parameters: {source}"))]
    Invalid { source: ValidationError },
    #[snafu(display("Monitor: {check} failed for namespace {ns}"))]
    MonitorFailed { ns: String, check: String },
    #[snafu(display("{source}"))]
    Command { source: RunnerError },
}

impl From<RunnerError> for NetnsError {
    fn from(source: RunnerError) -> Self {
        NetnsError::Command { source }
    }
}

/// Parameters of one isolator instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetnsSpec {
    pub ns: String,
    pub vlan_id: u16,
    pub parent_if: String,
    pub ip: Ipv4Addr,
    pub prefix: u8,
    pub gateway: Ipv4Addr,
    pub mtu: u32,
}

impl NetnsSpec {
    /// The VLAN sub-interface name inside the namespace.
    pub fn vlan_ifname(&self) -> String {
        let name = format!("{}.{}", self.parent_if, self.vlan_id);
        // IFNAMSIZ bounds interface names to 15 visible characters.
        name.chars().take(15).collect()
    }

    fn ip_cidr(&self) -> String {
        format!("{}/{}", self.ip, self.prefix)
    }
}

/// The isolator resource.
#[derive(Clone)]
pub struct NetnsResource {
    runner: Arc<dyn SystemRunner>,
}

impl NetnsResource {
    pub fn new(runner: Arc<dyn SystemRunner>) -> Self {
        Self { runner }
    }

    /// Check parameter legality without touching the host.
    pub fn validate(spec: &NetnsSpec) -> Result<(), NetnsError> {
        validation::validate_name(&spec.ns)
            .and_then(|_| validation::validate_vlan(spec.vlan_id))
            .and_then(|_| validation::parse_ip_cidr(&spec.ip_cidr()).map(|_| ()))
            .map_err(|source| NetnsError::Invalid { source })
    }

    async fn ns_exists(&self, ns: &str) -> Result<bool, NetnsError> {
        let output = self.runner.run("ip", &["netns", "list"]).await?;
        Ok(output
            .stdout
            .lines()
            .any(|line| line.split_whitespace().next() == Some(ns)))
    }

    async fn in_ns(&self, ns: &str, args: &[&str]) -> Result<crate::runner::CommandOutput, NetnsError> {
        let mut full = vec!["netns", "exec", ns, "ip"];
        full.extend_from_slice(args);
        Ok(self.runner.run("ip", &full).await?)
    }

    async fn in_ns_checked(&self, ns: &str, args: &[&str]) -> Result<(), NetnsError> {
        let mut full = vec!["netns", "exec", ns, "ip"];
        full.extend_from_slice(args);
        self.runner.run_checked("ip", &full).await?;
        Ok(())
    }

    /// Bring the isolator up. Idempotent: each step succeeds if its condition
    /// already holds.
    pub async fn start(&self, spec: &NetnsSpec) -> Result<(), NetnsError> {
        Self::validate(spec)?;
        let ns = &spec.ns;
        let ifname = spec.vlan_ifname();

        if !self.ns_exists(ns).await? {
            self.runner.run_checked("ip", &["netns", "add", ns]).await?;
        }

        // The VLAN interface either already sits inside the namespace, or is
        // created in the root namespace and moved in.
        let inside = self.in_ns(ns, &["link", "show", &ifname]).await?;
        if !inside.success {
            let in_root = self.runner.run("ip", &["link", "show", &ifname]).await?;
            if !in_root.success {
                self.runner
                    .run_checked("ip", &[
                        "link", "add", "link", &spec.parent_if, "name", &ifname, "type", "vlan",
                        "id", &spec.vlan_id.to_string(),
                    ])
                    .await?;
            }
            self.runner
                .run_checked("ip", &["link", "set", &ifname, "netns", ns])
                .await?;
        }

        self.in_ns_checked(ns, &["link", "set", &ifname, "mtu", &spec.mtu.to_string()])
            .await?;

        let addr_show = self.in_ns(ns, &["addr", "show", &ifname]).await?;
        if !addr_show.stdout.contains(&spec.ip_cidr()) {
            self.in_ns_checked(ns, &["addr", "add", &spec.ip_cidr(), "dev", &ifname])
                .await?;
        }

        self.in_ns_checked(ns, &["link", "set", &ifname, "up"]).await?;
        self.in_ns_checked(ns, &["link", "set", "lo", "up"]).await?;

        let routes = self.in_ns(ns, &["route", "show", "default"]).await?;
        let wanted = format!("default via {}", spec.gateway);
        if !routes.stdout.contains(&wanted) {
            // Replace rather than add, a stale default route may linger.
            let _ = self.in_ns(ns, &["route", "del", "default"]).await?;
            self.in_ns_checked(ns, &["route", "add", "default", "via", &spec.gateway.to_string()])
                .await?;
        }

        info!(ns = %ns, vlan = spec.vlan_id, vip = %spec.ip, "tenant namespace up");
        Ok(())
    }

    /// Tear the isolator down. Deleting the namespace removes the interfaces
    /// inside it; absence is success.
    pub async fn stop(&self, spec: &NetnsSpec) -> Result<(), NetnsError> {
        if !self.ns_exists(&spec.ns).await? {
            return Ok(());
        }
        self.runner
            .run_checked("ip", &["netns", "del", &spec.ns])
            .await?;
        debug!(ns = %spec.ns, "tenant namespace removed");
        Ok(())
    }

    /// Verify the namespace, interface, VIP and default route are all live.
    pub async fn monitor(&self, spec: &NetnsSpec) -> Result<(), NetnsError> {
        let failed = |check: &str| NetnsError::MonitorFailed {
            ns: spec.ns.clone(),
            check: check.to_string(),
        };
        if !self.ns_exists(&spec.ns).await? {
            return Err(failed("namespace present"));
        }
        let ifname = spec.vlan_ifname();
        let link = self.in_ns(&spec.ns, &["link", "show", &ifname]).await?;
        if !link.success || !link.stdout.contains("UP") {
            return Err(failed("interface up"));
        }
        let addr = self.in_ns(&spec.ns, &["addr", "show", &ifname]).await?;
        if !addr.stdout.contains(&spec.ip_cidr()) {
            return Err(failed("vip assigned"));
        }
        let route = self.in_ns(&spec.ns, &["route", "show", "default"]).await?;
        if !route.stdout.contains("default via") {
            return Err(failed("default route present"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::FakeRunner;

    fn spec() -> NetnsSpec {
        NetnsSpec {
            ns: "tenant_a".to_string(),
            vlan_id: 100,
            parent_if: "bond0".to_string(),
            ip: "192.168.10.5".parse().unwrap(),
            prefix: 24,
            gateway: "192.168.10.1".parse().unwrap(),
            mtu: 1500,
        }
    }

    #[test]
    fn validate_bounds() {
        let mut bad = spec();
        bad.vlan_id = 0;
        assert!(NetnsResource::validate(&bad).is_err());
        bad.vlan_id = 4095;
        assert!(NetnsResource::validate(&bad).is_err());
        bad.vlan_id = 4094;
        assert!(NetnsResource::validate(&bad).is_ok());
    }

    #[test]
    fn ifname_is_bounded() {
        let mut long = spec();
        long.parent_if = "verylongparent0".to_string();
        assert!(long.vlan_ifname().len() <= 15);
    }

    #[tokio::test]
    async fn stop_tolerates_missing_namespace() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("ip netns list", true, "", "");
        NetnsResource::new(runner.clone())
            .stop(&spec())
            .await
            .unwrap();
        assert!(!runner.ran("netns del"));
    }

    #[tokio::test]
    async fn start_creates_and_moves_interface() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("ip netns list", true, "", "");
        runner.respond("ip netns exec tenant_a ip link show bond0.100", false, "", "");
        runner.respond("ip link show bond0.100", false, "", "");
        NetnsResource::new(runner.clone())
            .start(&spec())
            .await
            .unwrap();
        assert!(runner.ran("netns add tenant_a"));
        assert!(runner.ran("link add link bond0 name bond0.100 type vlan id 100"));
        assert!(runner.ran("link set bond0.100 netns tenant_a"));
        assert!(runner.ran("addr add 192.168.10.5/24 dev bond0.100"));
        assert!(runner.ran("route add default via 192.168.10.1"));
    }
}
