//! EC2 provider trait and common types.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kubenode_stack::resources::SecurityRule;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Polling interval when waiting for an instance.
pub const POLL_INTERVAL_SECS: u64 = 15;

/// Errors that can occur during cloud provider operations.
#[derive(Error, Debug)]
pub enum CloudProviderError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Operation timed out.
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication error.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Quota exceeded.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),
}

/// Instance lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Instance is being launched.
    Pending,
    /// Instance is running.
    Running,
    /// Instance is stopping or stopped.
    Stopped,
    /// Instance is shutting down.
    Terminating,
    /// Instance is gone.
    Terminated,
    /// Unrecognised state.
    Unknown,
}

impl InstanceStatus {
    /// Map an EC2 state name.
    #[must_use]
    pub fn from_state_name(name: &str) -> Self {
        match name {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "stopped" | "stopping" => Self::Stopped,
            "shutting-down" => Self::Terminating,
            "terminated" => Self::Terminated,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Terminating => write!(f, "terminating"),
            Self::Terminated => write!(f, "terminated"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// An EC2 instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Instance id.
    pub id: String,
    /// Current status.
    pub status: InstanceStatus,
    /// Instance type.
    pub instance_type: String,
    /// Public IPv4 address.
    pub public_ip: Option<String>,
    /// Public DNS hostname.
    pub public_dns: Option<String>,
    /// Private IPv4 address.
    pub private_ip: Option<String>,
    /// When the instance was launched.
    pub launched_at: Option<DateTime<Utc>>,
}

/// Request to create a VPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpcRequest {
    /// Network range.
    pub cidr_block: String,
    /// Give instances public DNS hostnames.
    pub enable_dns_hostnames: bool,
    /// Enable the Amazon-provided resolver.
    pub enable_dns_support: bool,
}

/// Request to create a subnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetRequest {
    /// Owning VPC id.
    pub vpc_id: String,
    /// Subnet range.
    pub cidr_block: String,
    /// Availability zone.
    pub availability_zone: String,
    /// Assign public addresses to instances launched here.
    pub map_public_ip_on_launch: bool,
}

/// A route through an internet gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRequest {
    /// Destination range.
    pub destination_cidr_block: String,
    /// Gateway id.
    pub gateway_id: String,
}

/// Request to create a security group with its rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroupRequest {
    /// Group name, unique within the VPC.
    pub name: String,
    /// Group description.
    pub description: String,
    /// Owning VPC id.
    pub vpc_id: String,
    /// Inbound rules.
    pub ingress: Vec<SecurityRule>,
    /// Outbound rules. These replace the default allow-all egress rule.
    pub egress: Vec<SecurityRule>,
}

/// Request to launch one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInstanceRequest {
    /// Machine image.
    pub image_id: String,
    /// Instance type.
    pub instance_type: String,
    /// Subnet id.
    pub subnet_id: String,
    /// Security group ids.
    pub security_group_ids: Vec<String>,
    /// User-data script, plain text.
    pub user_data: String,
    /// Instance tags.
    pub tags: BTreeMap<String, String>,
}

/// The EC2 operations a stack needs.
///
/// Every create returns the provider id of the new resource.
#[async_trait]
pub trait Ec2Api: Send + Sync {
    // ========================================================================
    // Networking
    // ========================================================================

    /// Create a VPC and apply its DNS attributes.
    async fn create_vpc(&self, req: &VpcRequest) -> Result<String, CloudProviderError>;

    /// Delete a VPC.
    async fn delete_vpc(&self, id: &str) -> Result<(), CloudProviderError>;

    /// Create an internet gateway and attach it to a VPC.
    async fn create_internet_gateway(&self, vpc_id: &str) -> Result<String, CloudProviderError>;

    /// Detach an internet gateway from its VPC and delete it.
    async fn delete_internet_gateway(
        &self,
        id: &str,
        vpc_id: &str,
    ) -> Result<(), CloudProviderError>;

    /// Create a subnet.
    async fn create_subnet(&self, req: &SubnetRequest) -> Result<String, CloudProviderError>;

    /// Delete a subnet.
    async fn delete_subnet(&self, id: &str) -> Result<(), CloudProviderError>;

    /// Create a route table and add its routes.
    async fn create_route_table(
        &self,
        vpc_id: &str,
        routes: &[RouteRequest],
    ) -> Result<String, CloudProviderError>;

    /// Delete a route table.
    async fn delete_route_table(&self, id: &str) -> Result<(), CloudProviderError>;

    /// Bind a subnet to a route table. Returns the association id.
    async fn associate_route_table(
        &self,
        subnet_id: &str,
        route_table_id: &str,
    ) -> Result<String, CloudProviderError>;

    /// Remove a subnet binding.
    async fn disassociate_route_table(
        &self,
        association_id: &str,
    ) -> Result<(), CloudProviderError>;

    /// Create a security group and authorize its rules.
    async fn create_security_group(
        &self,
        req: &SecurityGroupRequest,
    ) -> Result<String, CloudProviderError>;

    /// Delete a security group.
    async fn delete_security_group(&self, id: &str) -> Result<(), CloudProviderError>;

    // ========================================================================
    // Instances
    // ========================================================================

    /// Launch an instance.
    async fn run_instance(&self, req: &RunInstanceRequest)
        -> Result<Instance, CloudProviderError>;

    /// Get instance by id.
    async fn get_instance(&self, id: &str) -> Result<Instance, CloudProviderError>;

    /// Terminate an instance.
    async fn terminate_instance(&self, id: &str) -> Result<(), CloudProviderError>;

    /// Poll an instance until it reaches `target` or `timeout_secs` pass.
    async fn wait_instance_status(
        &self,
        id: &str,
        target: InstanceStatus,
        timeout_secs: u64,
    ) -> Result<Instance, CloudProviderError> {
        info!(instance_id = %id, %target, timeout_secs, "Waiting for instance");

        let start = Instant::now();
        let timeout = Duration::from_secs(timeout_secs);

        loop {
            let instance = self.get_instance(id).await?;

            debug!(
                instance_id = %id,
                status = %instance.status,
                elapsed_secs = start.elapsed().as_secs(),
                "Polling instance status"
            );

            if instance.status == target {
                info!(instance_id = %id, status = %target, "Instance reached target state");
                return Ok(instance);
            }

            if instance.status == InstanceStatus::Terminated {
                return Err(CloudProviderError::Api {
                    status: 500,
                    message: format!("Instance {id} was terminated"),
                });
            }

            if start.elapsed() >= timeout {
                return Err(CloudProviderError::Timeout(timeout_secs));
            }

            tokio::time::sleep(Duration::from_secs(POLL_INTERVAL_SECS)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_state_names() {
        assert_eq!(InstanceStatus::from_state_name("running"), InstanceStatus::Running);
        assert_eq!(InstanceStatus::from_state_name("stopping"), InstanceStatus::Stopped);
        assert_eq!(
            InstanceStatus::from_state_name("shutting-down"),
            InstanceStatus::Terminating
        );
        assert_eq!(InstanceStatus::from_state_name("rebooting"), InstanceStatus::Unknown);
    }
}
