//! Driver runtime configuration, loaded from a YAML file. The REST auth
//! token can be overridden through `ARCA_AUTH_TOKEN`.

use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::{path::Path, time::Duration};

/// Configuration errors surfaced at startup.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(false)))]
pub enum ConfigError {
    #[snafu(display("Failed to read config file {path}: {source}"))]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("Failed to parse config file {path}: {source}"))]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[snafu(display("{field} is required"))]
    MissingField { field: String },
    #[snafu(display("network.pools[{index}].{field} is required"))]
    MissingPoolField { index: usize, field: String },
    #[snafu(display("Unsupported allocator strategy '{strategy}': only 'standalone' exists"))]
    UnsupportedStrategy { strategy: String },
}

/// The full driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub arca: ArcaConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub driver: DriverConfig,
}

/// REST API access.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ArcaConfig {
    #[serde(default)]
    pub base_url: String,
    /// Human-readable duration, e.g. "30s".
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub tls: TlsConfig,
}

impl ArcaConfig {
    pub fn timeout(&self) -> Duration {
        self.timeout
            .as_deref()
            .and_then(|raw| humantime::parse_duration(raw).ok())
            .unwrap_or(Duration::from_secs(30))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    #[serde(default)]
    pub ca_cert_path: Option<String>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

/// Tenant network pools.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
    #[serde(default)]
    pub mtu: Option<u32>,
    /// Allocation strategy; only `standalone` is implemented.
    #[serde(default)]
    pub strategy: Option<String>,
}

/// One IP pool.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    pub cidr: String,
    /// Optional sub-range "first-last"; defaults to the whole network minus
    /// network and broadcast addresses.
    #[serde(default)]
    pub range: Option<String>,
    pub vlan: u16,
    pub gateway: String,
}

/// Process-level knobs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct DriverConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub state_file_path: Option<String>,
    #[serde(default)]
    pub base_mount_path: Option<String>,
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Config =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        if let Ok(token) = std::env::var("ARCA_AUTH_TOKEN") {
            if !token.is_empty() {
                config.arca.auth_token = Some(token);
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate the controller-relevant parts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.arca.base_url.is_empty() {
            return Err(ConfigError::MissingField {
                field: "arca.base_url".to_string(),
            });
        }
        if let Some(strategy) = &self.network.strategy {
            if strategy != "standalone" {
                return Err(ConfigError::UnsupportedStrategy {
                    strategy: strategy.clone(),
                });
            }
        }
        for (index, pool) in self.network.pools.iter().enumerate() {
            for (field, empty) in [
                ("cidr", pool.cidr.is_empty()),
                ("gateway", pool.gateway.is_empty()),
            ] {
                if empty {
                    return Err(ConfigError::MissingPoolField {
                        index,
                        field: field.to_string(),
                    });
                }
            }
            if pool.vlan == 0 {
                return Err(ConfigError::MissingPoolField {
                    index,
                    field: "vlan".to_string(),
                });
            }
        }
        Ok(())
    }

    /// The REST client configuration derived from this file.
    pub fn rest_client_config(&self) -> rest_client::ArcaClientConfig {
        let mut client = rest_client::ArcaClientConfig::new(self.arca.base_url.clone());
        client.timeout = self.arca.timeout();
        client.auth_token = self.arca.auth_token.clone();
        client.insecure_skip_verify = self.arca.tls.insecure_skip_verify;
        client.ca_cert_pem = self
            .arca
            .tls
            .ca_cert_path
            .as_deref()
            .and_then(|path| std::fs::read(path).ok());
        client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_and_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
arca:
  base_url: "https://arca.example:8080"
  timeout: "10s"
network:
  pools:
    - cidr: "192.168.100.0/24"
      range: "192.168.100.10-192.168.100.200"
      vlan: 100
      gateway: "192.168.100.1"
driver:
  endpoint: "unix:///var/tmp/csi.sock"
"#
        )
        .unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.arca.timeout(), Duration::from_secs(10));
        assert_eq!(config.network.pools[0].vlan, 100);
    }

    #[test]
    fn per_project_strategy_is_rejected() {
        let config = Config {
            arca: ArcaConfig {
                base_url: "http://x".to_string(),
                ..ArcaConfig::default()
            },
            network: NetworkConfig {
                strategy: Some("per_project".to_string()),
                ..NetworkConfig::default()
            },
            driver: DriverConfig::default(),
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedStrategy { .. })
        ));
    }

    #[test]
    fn missing_base_url_is_an_error() {
        assert!(Config::default().validate().is_err());
    }
}
