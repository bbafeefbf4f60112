//! cvat.toml configuration parser.
//!
//! Every field has a default, so an empty file (or no file at all) yields
//! the standard deployment (one database writer, one cache node) of the
//! `dev` CVAT images.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::CpuArchitecture;

/// Services whose task size and replica count can be overridden.
pub const SERVICE_NAMES: &[&str] = &[
    "server",
    "utils",
    "worker-import",
    "worker-export",
    "worker-annotation",
    "worker-webhooks",
    "opa",
    "ui",
    "logstash",
    "serverless",
];

const OPA_LOG_LEVELS: &[&str] = &["debug", "info", "error"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CvatConfig {
    pub stack: StackConfig,
    pub network: NetworkConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub opa: OpaConfig,
    pub ui: UiConfig,
    pub analytics: AnalyticsConfig,
    pub auto_annotation: AutoAnnotationConfig,
    /// Per-service overrides keyed by service name.
    pub services: BTreeMap<String, ServiceOverride>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub name: String,
    /// Tag of the CVAT server and UI images.
    pub cvat_version: String,
    /// Add a database reader and a second cache node.
    pub multi_az: bool,
    pub description: Option<String>,
    /// Directory the image build contexts (`containers/...`) are resolved
    /// against.
    pub asset_root: PathBuf,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            name: "CVAT".to_string(),
            cvat_version: "dev".to_string(),
            multi_az: false,
            description: None,
            asset_root: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub cidr: String,
    pub max_azs: u32,
    pub nat_gateways: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            cidr: "10.0.0.0/16".to_string(),
            max_azs: 2,
            nat_gateways: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub engine_version: String,
    /// Minimum Aurora capacity units.
    pub min_capacity: f64,
    /// Maximum Aurora capacity units.
    pub max_capacity: f64,
    pub database_name: String,
    pub username: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine_version: "15.3".to_string(),
            min_capacity: 0.5,
            max_capacity: 8.0,
            database_name: "cvat".to_string(),
            username: "postgres".to_string(),
        }
    }
}

impl DatabaseConfig {
    /// Major version, e.g. `15` for `15.3`.
    pub fn major_version(&self) -> &str {
        self.engine_version
            .split_once('.')
            .map(|(major, _)| major)
            .unwrap_or(&self.engine_version)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub engine_version: String,
    pub node_type: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            engine_version: "7.0".to_string(),
            node_type: "cache.t4g.micro".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpaConfig {
    pub image: String,
    pub log_level: String,
}

impl Default for OpaConfig {
    fn default() -> Self {
        Self {
            image: "openpolicyagent/opa:0.47.4-rootless".to_string(),
            log_level: "error".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub repository: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            repository: "cvat/ui".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub enabled: bool,
    pub search_version: String,
    pub instance_type: String,
    pub volume_size_gib: u32,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            search_version: "2.3".to_string(),
            instance_type: "t3.small.search".to_string(),
            volume_size_gib: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoAnnotationConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceOverride {
    pub cpu: Option<u32>,
    pub memory_mib: Option<u32>,
    pub desired_count: Option<u32>,
    pub cpu_architecture: Option<CpuArchitecture>,
}

impl CvatConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: CvatConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a cvat.toml for the given CVAT release.
    pub fn scaffold(cvat_version: &str, multi_az: bool) -> Self {
        let mut config = CvatConfig::default();
        config.stack.cvat_version = cvat_version.to_string();
        config.stack.multi_az = multi_az;
        config.services.insert(
            "server".to_string(),
            ServiceOverride {
                cpu: Some(1024),
                memory_mib: Some(2048),
                ..Default::default()
            },
        );
        config
    }

    /// Override for one service, if configured.
    pub fn service(&self, name: &str) -> Option<&ServiceOverride> {
        self.services.get(name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let version = &self.stack.cvat_version;
        if version.is_empty() || version.chars().any(|c| c.is_whitespace() || c == ':') {
            return Err(invalid("stack.cvat_version", format!("`{version}` is not an image tag")));
        }
        if self.stack.name.is_empty() || !self.stack.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(invalid("stack.name", format!("`{}` is not a valid stack name", self.stack.name)));
        }
        if !(2..=6).contains(&self.network.max_azs) {
            return Err(invalid("network.max_azs", "must be between 2 and 6".to_string()));
        }
        if self.network.nat_gateways > self.network.max_azs {
            return Err(invalid(
                "network.nat_gateways",
                format!("{} exceeds max_azs {}", self.network.nat_gateways, self.network.max_azs),
            ));
        }
        if !OPA_LOG_LEVELS.contains(&self.opa.log_level.as_str()) {
            return Err(invalid("opa.log_level", format!("`{}` is not one of {OPA_LOG_LEVELS:?}", self.opa.log_level)));
        }
        for (name, svc) in &self.services {
            if !SERVICE_NAMES.contains(&name.as_str()) {
                return Err(invalid("services", format!("unknown service `{name}`")));
            }
            if let (Some(cpu), Some(memory)) = (svc.cpu, svc.memory_mib) {
                if !fargate_size_is_valid(cpu, memory) {
                    return Err(invalid(
                        "services",
                        format!("`{name}`: {cpu} CPU units with {memory} MiB is not a Fargate task size"),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { field, reason }
}

/// Check a CPU/memory pair against the Fargate task size table.
pub fn fargate_size_is_valid(cpu: u32, memory_mib: u32) -> bool {
    let (min, max, step) = match cpu {
        256 => return matches!(memory_mib, 512 | 1024 | 2048),
        512 => (1024, 4096, 1024),
        1024 => (2048, 8192, 1024),
        2048 => (4096, 16384, 1024),
        4096 => (8192, 30720, 1024),
        8192 => (16384, 61440, 4096),
        16384 => (32768, 122880, 8192),
        _ => return false,
    };
    (min..=max).contains(&memory_mib) && memory_mib % step == 0
}
