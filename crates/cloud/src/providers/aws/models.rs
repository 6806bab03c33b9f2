//! AWS EC2 request and response models.

use kubenode_stack::resources::{Protocol, SecurityRule};
use serde::{Deserialize, Serialize};

// ============================================================================
// Shared types
// ============================================================================

/// Boolean attribute wrapper used by the `Modify*Attribute` actions.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttributeValue {
    /// The value.
    pub value: bool,
}

/// Tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

/// Tag specification for resource creation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TagSpecification {
    /// Resource type.
    pub resource_type: String,
    /// Tags.
    pub tags: Vec<Tag>,
}

// ============================================================================
// VPC
// ============================================================================

/// Create VPC request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateVpcRequest {
    /// Network range.
    pub cidr_block: String,
}

/// Create VPC response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateVpcResponse {
    /// The new VPC.
    pub vpc: Vpc,
}

/// VPC.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Vpc {
    /// VPC id.
    pub vpc_id: String,
    /// Network range.
    pub cidr_block: Option<String>,
}

/// Modify VPC attribute request. EC2 accepts one attribute per call.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModifyVpcAttributeRequest {
    /// VPC id.
    pub vpc_id: String,
    /// DNS hostnames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_dns_hostnames: Option<AttributeValue>,
    /// DNS resolution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_dns_support: Option<AttributeValue>,
}

/// Delete VPC request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteVpcRequest {
    /// VPC id.
    pub vpc_id: String,
}

// ============================================================================
// Internet gateway
// ============================================================================

/// Create internet gateway response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateInternetGatewayResponse {
    /// The new gateway.
    pub internet_gateway: InternetGateway,
}

/// Internet gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InternetGateway {
    /// Gateway id.
    pub internet_gateway_id: String,
}

/// Attach or detach internet gateway request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GatewayAttachmentRequest {
    /// Gateway id.
    pub internet_gateway_id: String,
    /// VPC id.
    pub vpc_id: String,
}

/// Delete internet gateway request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteInternetGatewayRequest {
    /// Gateway id.
    pub internet_gateway_id: String,
}

// ============================================================================
// Subnet
// ============================================================================

/// Create subnet request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateSubnetRequest {
    /// Owning VPC.
    pub vpc_id: String,
    /// Subnet range.
    pub cidr_block: String,
    /// Availability zone.
    pub availability_zone: String,
}

/// Create subnet response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateSubnetResponse {
    /// The new subnet.
    pub subnet: Subnet,
}

/// Subnet.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Subnet {
    /// Subnet id.
    pub subnet_id: String,
    /// Availability zone.
    pub availability_zone: Option<String>,
}

/// Modify subnet attribute request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModifySubnetAttributeRequest {
    /// Subnet id.
    pub subnet_id: String,
    /// Public address on launch.
    pub map_public_ip_on_launch: AttributeValue,
}

/// Delete subnet request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteSubnetRequest {
    /// Subnet id.
    pub subnet_id: String,
}

// ============================================================================
// Routing
// ============================================================================

/// Create route table request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateRouteTableRequest {
    /// Owning VPC.
    pub vpc_id: String,
}

/// Create route table response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateRouteTableResponse {
    /// The new route table.
    pub route_table: RouteTable,
}

/// Route table.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RouteTable {
    /// Route table id.
    pub route_table_id: String,
}

/// Create route request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateRouteRequest {
    /// Route table id.
    pub route_table_id: String,
    /// Destination range.
    pub destination_cidr_block: String,
    /// Target gateway.
    pub gateway_id: String,
}

/// Delete route table request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteRouteTableRequest {
    /// Route table id.
    pub route_table_id: String,
}

/// Associate route table request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssociateRouteTableRequest {
    /// Subnet id.
    pub subnet_id: String,
    /// Route table id.
    pub route_table_id: String,
}

/// Associate route table response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssociateRouteTableResponse {
    /// Association id.
    pub association_id: String,
}

/// Disassociate route table request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DisassociateRouteTableRequest {
    /// Association id.
    pub association_id: String,
}

// ============================================================================
// Security groups
// ============================================================================

/// Create security group request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateSecurityGroupRequest {
    /// Group name.
    pub group_name: String,
    /// Group description.
    pub description: String,
    /// Owning VPC.
    pub vpc_id: String,
}

/// Create security group response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateSecurityGroupResponse {
    /// Group id.
    pub group_id: String,
}

/// Authorize or revoke rules on a group.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecurityGroupRulesRequest {
    /// Group id.
    pub group_id: String,
    /// Rules.
    pub ip_permissions: Vec<IpPermission>,
}

/// One permission entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct IpPermission {
    /// `tcp`, `udp` or `-1`.
    pub ip_protocol: String,
    /// First port. Omitted for all protocols.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_port: Option<u16>,
    /// Last port. Omitted for all protocols.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_port: Option<u16>,
    /// Address ranges.
    pub ip_ranges: Vec<IpRange>,
}

/// Address range of a permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct IpRange {
    /// Range in CIDR notation.
    pub cidr_ip: String,
    /// Rule description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<&SecurityRule> for IpPermission {
    fn from(rule: &SecurityRule) -> Self {
        let ports = rule.protocol != Protocol::All;
        Self {
            ip_protocol: rule.protocol.as_api_str().to_string(),
            from_port: ports.then_some(rule.from_port),
            to_port: ports.then_some(rule.to_port),
            ip_ranges: rule
                .cidr_blocks
                .iter()
                .map(|cidr| IpRange {
                    cidr_ip: cidr.to_string(),
                    description: rule.description.clone(),
                })
                .collect(),
        }
    }
}

/// Delete security group request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteSecurityGroupRequest {
    /// Group id.
    pub group_id: String,
}

// ============================================================================
// Instances
// ============================================================================

/// EC2 instance information.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ec2Instance {
    /// Instance id.
    pub instance_id: String,
    /// Instance type.
    pub instance_type: String,
    /// Instance state.
    pub state: InstanceState,
    /// Public IP address.
    pub public_ip_address: Option<String>,
    /// Public DNS name. Empty until the instance has one.
    pub public_dns_name: Option<String>,
    /// Private IP address.
    pub private_ip_address: Option<String>,
    /// Launch time.
    pub launch_time: Option<String>,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Instance state.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceState {
    /// State code.
    pub code: i32,
    /// State name.
    pub name: String,
}

/// Run instances request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RunInstancesRequest {
    /// Image id (AMI).
    pub image_id: String,
    /// Instance type.
    pub instance_type: String,
    /// Minimum count.
    pub min_count: i32,
    /// Maximum count.
    pub max_count: i32,
    /// Security group ids.
    pub security_group_ids: Vec<String>,
    /// Subnet id.
    pub subnet_id: String,
    /// User data (base64 encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    /// Tags.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tag_specifications: Vec<TagSpecification>,
}

/// Run instances response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RunInstancesResponse {
    /// Launched instances.
    #[serde(default)]
    pub instances: Vec<Ec2Instance>,
}

/// Describe or terminate instances request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceIdsRequest {
    /// Instance ids.
    pub instance_ids: Vec<String>,
}

/// Describe instances response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeInstancesResponse {
    /// Reservations.
    #[serde(default)]
    pub reservations: Vec<Reservation>,
}

/// Reservation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Reservation {
    /// Instances.
    #[serde(default)]
    pub instances: Vec<Ec2Instance>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_rule_permission() {
        let rule = SecurityRule::tcp_from_anywhere(30000, 32767, "NodePort services");
        let permission = IpPermission::from(&rule);

        assert_eq!(permission.ip_protocol, "tcp");
        assert_eq!(permission.from_port, Some(30000));
        assert_eq!(permission.to_port, Some(32767));
        assert_eq!(permission.ip_ranges[0].cidr_ip, "0.0.0.0/0");
    }

    #[test]
    fn test_all_protocols_omit_ports() {
        let permission = IpPermission::from(&SecurityRule::allow_all());
        let json = serde_json::to_value(&permission).unwrap();

        assert_eq!(json["IpProtocol"], "-1");
        assert!(json.get("FromPort").is_none());
        assert!(json.get("ToPort").is_none());
    }
}
