//! Stack configuration.
//!
//! Operators set values in a stack file:
//!
//! ```yaml
//! config:
//!   kubenode:instanceType: t3.small
//!   kubenode:vpcNetworkCidr: 10.10.0.0/16
//! ```
//!
//! Keys may be bare (`instanceType`) or namespaced by project
//! (`kubenode:instanceType`). A file without a top-level `config:` map is
//! read as the map itself. Anything left unset falls back to the defaults
//! below when the configuration is resolved.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cidr::Ipv4Cidr;
use crate::error::StackError;

/// Default machine size: a small burstable instance.
pub const DEFAULT_INSTANCE_TYPE: &str = "t2.micro";

/// Default VPC range.
pub const DEFAULT_VPC_CIDR: &str = "10.0.0.0/16";

/// Default subnet range.
pub const DEFAULT_SUBNET_CIDR: &str = "10.0.1.0/24";

/// Default region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default availability zone.
pub const DEFAULT_AVAILABILITY_ZONE: &str = "us-east-1a";

/// Ubuntu 24.04 LTS (HVM), SSD volume type, us-east-1.
pub const DEFAULT_AMI: &str = "ami-084568db4383264d4";

/// Default `Name` tag of the instance.
pub const DEFAULT_NAME_TAG: &str = "k8s-webserver";

/// Operator-supplied configuration; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StackConfig {
    /// Machine size.
    pub instance_type: Option<String>,
    /// VPC range.
    pub vpc_network_cidr: Option<String>,
    /// Subnet range.
    pub subnet_cidr: Option<String>,
    /// AWS region.
    pub region: Option<String>,
    /// Availability zone of the subnet.
    pub availability_zone: Option<String>,
    /// Machine image.
    pub ami: Option<String>,
    /// `Name` tag of the instance.
    pub name_tag: Option<String>,
}

impl StackConfig {
    /// Parse a stack file.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or contains unknown keys.
    pub fn from_yaml_str(content: &str) -> Result<Self, StackError> {
        let value: serde_yaml::Value =
            serde_yaml::from_str(content).map_err(|e| StackError::Config(e.to_string()))?;

        let map = match value {
            serde_yaml::Value::Null => return Ok(Self::default()),
            serde_yaml::Value::Mapping(mut root) => {
                match root.remove(serde_yaml::Value::from("config")) {
                    Some(serde_yaml::Value::Mapping(inner)) => inner,
                    Some(serde_yaml::Value::Null) => serde_yaml::Mapping::new(),
                    Some(_) => {
                        return Err(StackError::Config("'config' must be a mapping".into()));
                    }
                    None => root,
                }
            }
            _ => return Err(StackError::Config("stack file must be a mapping".into())),
        };

        let mut bare = serde_yaml::Mapping::new();
        for (key, value) in map {
            let key = key
                .as_str()
                .ok_or_else(|| StackError::Config("config keys must be strings".into()))?;
            let bare_key = key.rsplit_once(':').map_or(key, |(_, k)| k);
            bare.insert(serde_yaml::Value::from(bare_key), value);
        }

        serde_yaml::from_value(serde_yaml::Value::Mapping(bare))
            .map_err(|e| StackError::Config(e.to_string()))
    }

    /// Load a stack file from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read stack file {}", path.display()))?;
        let config = Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse stack file {}", path.display()))?;
        debug!(path = %path.display(), "Loaded stack config");
        Ok(config)
    }

    /// Overlay `other` on top of `self`: values set in `other` win.
    #[must_use]
    pub fn merged_with(self, other: Self) -> Self {
        Self {
            instance_type: other.instance_type.or(self.instance_type),
            vpc_network_cidr: other.vpc_network_cidr.or(self.vpc_network_cidr),
            subnet_cidr: other.subnet_cidr.or(self.subnet_cidr),
            region: other.region.or(self.region),
            availability_zone: other.availability_zone.or(self.availability_zone),
            ami: other.ami.or(self.ami),
            name_tag: other.name_tag.or(self.name_tag),
        }
    }

    /// Fill in defaults and parse ranges.
    ///
    /// # Errors
    ///
    /// Returns an error if a CIDR is invalid or a value is empty.
    pub fn resolve(&self) -> Result<ResolvedConfig, StackError> {
        fn pick(value: Option<&String>, default: &str, key: &str) -> Result<String, StackError> {
            let value = value.map_or(default, String::as_str).trim();
            if value.is_empty() {
                return Err(StackError::Config(format!("'{key}' must not be empty")));
            }
            Ok(value.to_string())
        }

        let region = pick(self.region.as_ref(), DEFAULT_REGION, "region")?;
        let availability_zone = pick(
            self.availability_zone.as_ref(),
            DEFAULT_AVAILABILITY_ZONE,
            "availabilityZone",
        )?;
        if !availability_zone.starts_with(&region) {
            return Err(StackError::Config(format!(
                "availability zone '{availability_zone}' is not in region '{region}'"
            )));
        }

        Ok(ResolvedConfig {
            instance_type: pick(self.instance_type.as_ref(), DEFAULT_INSTANCE_TYPE, "instanceType")?,
            vpc_cidr: Ipv4Cidr::parse(&pick(
                self.vpc_network_cidr.as_ref(),
                DEFAULT_VPC_CIDR,
                "vpcNetworkCidr",
            )?)?,
            subnet_cidr: Ipv4Cidr::parse(&pick(
                self.subnet_cidr.as_ref(),
                DEFAULT_SUBNET_CIDR,
                "subnetCidr",
            )?)?,
            region,
            availability_zone,
            ami: pick(self.ami.as_ref(), DEFAULT_AMI, "ami")?,
            name_tag: pick(self.name_tag.as_ref(), DEFAULT_NAME_TAG, "nameTag")?,
        })
    }
}

/// Configuration with every default applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    /// Machine size.
    pub instance_type: String,
    /// VPC range.
    pub vpc_cidr: Ipv4Cidr,
    /// Subnet range.
    pub subnet_cidr: Ipv4Cidr,
    /// AWS region.
    pub region: String,
    /// Availability zone of the subnet.
    pub availability_zone: String,
    /// Machine image.
    pub ami: String,
    /// `Name` tag of the instance.
    pub name_tag: String,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
            vpc_cidr: Ipv4Cidr::parse(DEFAULT_VPC_CIDR).unwrap_or(Ipv4Cidr::ANY),
            subnet_cidr: Ipv4Cidr::parse(DEFAULT_SUBNET_CIDR).unwrap_or(Ipv4Cidr::ANY),
            region: DEFAULT_REGION.to_string(),
            availability_zone: DEFAULT_AVAILABILITY_ZONE.to_string(),
            ami: DEFAULT_AMI.to_string(),
            name_tag: DEFAULT_NAME_TAG.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_empty() {
        let resolved = StackConfig::default().resolve().unwrap();
        assert_eq!(resolved.instance_type, "t2.micro");
        assert_eq!(resolved.vpc_cidr.to_string(), "10.0.0.0/16");
        assert_eq!(resolved.subnet_cidr.to_string(), "10.0.1.0/24");
        assert_eq!(resolved, ResolvedConfig::default());
    }

    #[test]
    fn test_namespaced_keys() {
        let config = StackConfig::from_yaml_str(
            "config:\n  kubenode:instanceType: t3.small\n  vpcNetworkCidr: 10.10.0.0/16\n",
        )
        .unwrap();

        assert_eq!(config.instance_type.as_deref(), Some("t3.small"));
        assert_eq!(config.vpc_network_cidr.as_deref(), Some("10.10.0.0/16"));
    }

    #[test]
    fn test_root_mapping_without_config_key() {
        let config = StackConfig::from_yaml_str("instanceType: m6i.large\n").unwrap();
        assert_eq!(config.instance_type.as_deref(), Some("m6i.large"));
    }

    #[test]
    fn test_empty_file() {
        assert_eq!(StackConfig::from_yaml_str("").unwrap(), StackConfig::default());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = StackConfig::from_yaml_str("config:\n  instanceSize: big\n").unwrap_err();
        assert!(matches!(err, StackError::Config(_)));
    }

    #[test]
    fn test_merge_prefers_override() {
        let file = StackConfig {
            instance_type: Some("t3.small".into()),
            region: Some("eu-west-1".into()),
            ..StackConfig::default()
        };
        let flags = StackConfig {
            instance_type: Some("t3.medium".into()),
            ..StackConfig::default()
        };

        let merged = file.merged_with(flags);
        assert_eq!(merged.instance_type.as_deref(), Some("t3.medium"));
        assert_eq!(merged.region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn test_zone_must_match_region() {
        let config = StackConfig {
            region: Some("eu-west-1".into()),
            ..StackConfig::default()
        };
        assert!(config.resolve().is_err());
    }

    #[test]
    fn test_invalid_cidr() {
        let config = StackConfig {
            vpc_network_cidr: Some("10.0.0.0/40".into()),
            ..StackConfig::default()
        };
        assert!(matches!(config.resolve(), Err(StackError::InvalidCidr { .. })));
    }
}
