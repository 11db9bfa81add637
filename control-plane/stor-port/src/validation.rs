//! Edge validation of user-supplied input. Everything here is pure; the REST
//! server and the CSI driver both reject malformed input before any
//! side-effect runs.

use crate::{ReplyError, ResourceKind};
use ipnetwork::Ipv4Network;
use snafu::Snafu;
use std::net::Ipv4Addr;

/// Inclusive VLAN id range usable for tagging.
pub const VLAN_MIN: u16 = 1;
pub const VLAN_MAX: u16 = 4094;

const NAME_MAX_LEN: usize = 64;

/// Validation failures. Surfaced directly, never retried.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub), context(suffix(false)))]
pub enum ValidationError {
    #[snafu(display(
        "Name '{name}' must start alphanumeric, use only [A-Za-z0-9._-] and be 1..={max} chars",
        max = NAME_MAX_LEN
    ))]
    InvalidName { name: String },
    #[snafu(display("VLAN id {vlan_id} outside {VLAN_MIN}..={VLAN_MAX}"))]
    VlanOutOfRange { vlan_id: u16 },
    #[snafu(display("'{cidr}' is not an IPv4 address with prefix (e.g. 192.168.10.5/24)"))]
    InvalidIpCidr { cidr: String },
    #[snafu(display("'{ip}' is not an IPv4 address"))]
    InvalidIpv4 { ip: String },
    #[snafu(display("'{cidr}' is not an IPv4 network in CIDR notation"))]
    InvalidClientCidr { cidr: String },
    #[snafu(display("Gateway cannot be inferred for /31 or /32, specify it explicitly"))]
    GatewayNotInferable,
    #[snafu(display("Path '{path}' must be relative and must not contain '..'"))]
    InvalidRelativePath { path: String },
    #[snafu(display("Size must be greater than zero"))]
    NonPositiveSize,
}

impl ValidationError {
    /// Attach the resource kind this input belonged to.
    pub fn for_resource(self, resource: ResourceKind) -> ReplyError {
        ReplyError::invalid_argument(resource, "request", self)
    }
}

/// Validate a resource name (SVM, volume, snapshot...).
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .map(|c| c.is_ascii_alphanumeric())
        .unwrap_or(false);
    let tail_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !head_ok || !tail_ok || name.len() > NAME_MAX_LEN {
        return Err(ValidationError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Validate a VLAN id.
pub fn validate_vlan(vlan_id: u16) -> Result<(), ValidationError> {
    if !(VLAN_MIN..=VLAN_MAX).contains(&vlan_id) {
        return Err(ValidationError::VlanOutOfRange { vlan_id });
    }
    Ok(())
}

/// Parse `ip/prefix` into its parts, validating both.
pub fn parse_ip_cidr(cidr: &str) -> Result<(Ipv4Addr, u8), ValidationError> {
    let invalid = || ValidationError::InvalidIpCidr {
        cidr: cidr.to_string(),
    };
    let (ip, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let ip: Ipv4Addr = ip.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    if prefix > 32 {
        return Err(invalid());
    }
    Ok((ip, prefix))
}

/// Validate a bare IPv4 address.
pub fn parse_ipv4(ip: &str) -> Result<Ipv4Addr, ValidationError> {
    ip.parse().map_err(|_| ValidationError::InvalidIpv4 {
        ip: ip.to_string(),
    })
}

/// Validate a client network in CIDR notation.
pub fn validate_client_cidr(cidr: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::InvalidClientCidr {
        cidr: cidr.to_string(),
    };
    if !cidr.contains('/') {
        return Err(invalid());
    }
    cidr.parse::<Ipv4Network>().map_err(|_| invalid())?;
    Ok(())
}

/// Infer a default gateway from an interface CIDR: the first usable host of
/// the subnet that is not the interface address itself. /31 and /32 have no
/// such convention, the caller must be explicit there.
pub fn infer_gateway(cidr: &str) -> Result<Ipv4Addr, ValidationError> {
    let (ip, prefix) = parse_ip_cidr(cidr)?;
    if prefix >= 31 {
        return Err(ValidationError::GatewayNotInferable);
    }
    let network = Ipv4Network::new(ip, prefix).map_err(|_| ValidationError::InvalidIpCidr {
        cidr: cidr.to_string(),
    })?;
    let net = u32::from(network.network());
    let broadcast = u32::from(network.broadcast());
    ((net + 1)..broadcast)
        .map(Ipv4Addr::from)
        .find(|host| *host != ip)
        .ok_or(ValidationError::GatewayNotInferable)
}

/// Validate a volume-relative path: non-empty, no leading `/`, and no `..`
/// segment anywhere so it cannot escape its volume.
pub fn validate_relative_path(path: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::InvalidRelativePath {
        path: path.to_string(),
    };
    if path.is_empty() || path.starts_with('/') {
        return Err(invalid());
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(invalid());
    }
    Ok(())
}

/// Validate a size argument.
pub fn validate_size(size_bytes: u64) -> Result<(), ValidationError> {
    if size_bytes == 0 {
        return Err(ValidationError::NonPositiveSize);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert!(validate_name("tenant_a").is_ok());
        assert!(validate_name("k8s-default").is_ok());
        assert!(validate_name("a.b-c_9").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("-leading").is_err());
        assert!(validate_name(&"x".repeat(65)).is_err());
        assert!(validate_name("has space").is_err());
    }

    #[test]
    fn vlan_bounds() {
        assert!(validate_vlan(0).is_err());
        assert!(validate_vlan(1).is_ok());
        assert!(validate_vlan(4094).is_ok());
        assert!(validate_vlan(4095).is_err());
    }

    #[test]
    fn ip_cidr() {
        assert_eq!(
            parse_ip_cidr("192.168.10.5/24").unwrap(),
            ("192.168.10.5".parse().unwrap(), 24)
        );
        assert!(parse_ip_cidr("192.168.10.5").is_err());
        assert!(parse_ip_cidr("192.168.10.5/33").is_err());
        assert!(parse_ip_cidr("not-an-ip/24").is_err());
    }

    #[test]
    fn gateway_inference() {
        assert_eq!(
            infer_gateway("192.168.10.5/24").unwrap(),
            "192.168.10.1".parse::<Ipv4Addr>().unwrap()
        );
        // The interface owning the first host pushes the gateway to the next.
        assert_eq!(
            infer_gateway("192.168.10.1/24").unwrap(),
            "192.168.10.2".parse::<Ipv4Addr>().unwrap()
        );
        assert_eq!(
            infer_gateway("10.0.0.2/30").unwrap(),
            "10.0.0.1".parse::<Ipv4Addr>().unwrap()
        );
        assert!(infer_gateway("10.0.0.1/31").is_err());
        assert!(infer_gateway("10.0.0.1/32").is_err());
    }

    #[test]
    fn relative_paths() {
        assert!(validate_relative_path("pvc-0011223344556677").is_ok());
        assert!(validate_relative_path(".snapshots/abc").is_ok());
        assert!(validate_relative_path("").is_err());
        assert!(validate_relative_path("/abs").is_err());
        assert!(validate_relative_path("a/../b").is_err());
        assert!(validate_relative_path("..").is_err());
        // A dotted name is not a traversal.
        assert!(validate_relative_path("a..b/c").is_ok());
    }

    #[test]
    fn client_cidrs() {
        assert!(validate_client_cidr("10.0.0.0/24").is_ok());
        assert!(validate_client_cidr("10.0.0.0").is_err());
        assert!(validate_client_cidr("300.0.0.0/24").is_err());
    }
}
