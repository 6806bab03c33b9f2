//! Resource specifications.
//!
//! These are pure data: a resource refers to other resources by logical
//! name, never by provider id. Provider ids only exist in recorded state.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cidr::Ipv4Cidr;

/// Kind of a declared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// VPC.
    Vpc,
    /// Internet gateway attached to a VPC.
    InternetGateway,
    /// Subnet inside a VPC.
    Subnet,
    /// Route table inside a VPC.
    RouteTable,
    /// Binding of a subnet to a route table.
    RouteTableAssociation,
    /// Security group.
    SecurityGroup,
    /// EC2 instance.
    Instance,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vpc => write!(f, "vpc"),
            Self::InternetGateway => write!(f, "internet gateway"),
            Self::Subnet => write!(f, "subnet"),
            Self::RouteTable => write!(f, "route table"),
            Self::RouteTableAssociation => write!(f, "route table association"),
            Self::SecurityGroup => write!(f, "security group"),
            Self::Instance => write!(f, "instance"),
        }
    }
}

/// VPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcSpec {
    /// Network range.
    pub cidr_block: Ipv4Cidr,
    /// Give instances public DNS hostnames.
    pub enable_dns_hostnames: bool,
    /// Enable the Amazon-provided DNS resolver.
    pub enable_dns_support: bool,
}

/// Internet gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternetGatewaySpec {
    /// VPC the gateway is attached to.
    pub vpc: String,
}

/// Subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetSpec {
    /// Owning VPC.
    pub vpc: String,
    /// Range carved from the VPC range.
    pub cidr_block: Ipv4Cidr,
    /// Availability zone the subnet is pinned to.
    pub availability_zone: String,
    /// Assign public IPv4 addresses to instances launched here.
    pub map_public_ip_on_launch: bool,
}

/// A single route entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Destination range.
    pub cidr_block: Ipv4Cidr,
    /// Internet gateway that receives the traffic.
    pub gateway: String,
}

/// Route table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTableSpec {
    /// Owning VPC.
    pub vpc: String,
    /// Non-local routes.
    pub routes: Vec<Route>,
}

/// Route table association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTableAssociationSpec {
    /// Subnet whose traffic is routed.
    pub subnet: String,
    /// Route table to use.
    pub route_table: String,
}

/// Rule protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// TCP.
    #[serde(rename = "tcp")]
    Tcp,
    /// UDP.
    #[serde(rename = "udp")]
    Udp,
    /// Every protocol (`-1` in the EC2 API).
    #[serde(rename = "-1")]
    All,
}

impl Protocol {
    /// Protocol identifier as the EC2 API expects it.
    #[must_use]
    pub fn as_api_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::All => "-1",
        }
    }
}

/// One security group rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    /// Protocol.
    pub protocol: Protocol,
    /// First port of the range.
    pub from_port: u16,
    /// Last port of the range (inclusive).
    pub to_port: u16,
    /// Source (ingress) or destination (egress) ranges.
    pub cidr_blocks: Vec<Ipv4Cidr>,
    /// What the rule is for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SecurityRule {
    /// TCP rule for `from..=to` open to every address.
    #[must_use]
    pub fn tcp_from_anywhere(from_port: u16, to_port: u16, description: &str) -> Self {
        Self {
            protocol: Protocol::Tcp,
            from_port,
            to_port,
            cidr_blocks: vec![Ipv4Cidr::ANY],
            description: Some(description.to_string()),
        }
    }

    /// Rule allowing every protocol to every address.
    #[must_use]
    pub fn allow_all() -> Self {
        Self {
            protocol: Protocol::All,
            from_port: 0,
            to_port: 0,
            cidr_blocks: vec![Ipv4Cidr::ANY],
            description: None,
        }
    }

    /// Whether `port` is covered by this rule.
    #[must_use]
    pub fn covers_port(&self, port: u16) -> bool {
        self.protocol == Protocol::All || (self.from_port..=self.to_port).contains(&port)
    }
}

/// Security group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupSpec {
    /// Group description.
    pub description: String,
    /// Owning VPC.
    pub vpc: String,
    /// Inbound rules.
    pub ingress: Vec<SecurityRule>,
    /// Outbound rules.
    pub egress: Vec<SecurityRule>,
}

/// EC2 instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Machine size (e.g. `t2.micro`).
    pub instance_type: String,
    /// Machine image.
    pub ami: String,
    /// Subnet the instance is placed in.
    pub subnet: String,
    /// Security groups attached to the instance.
    pub security_groups: Vec<String>,
    /// Boot payload run once by cloud-init.
    pub user_data: String,
    /// Instance tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Any declared resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    /// VPC.
    Vpc(VpcSpec),
    /// Internet gateway.
    InternetGateway(InternetGatewaySpec),
    /// Subnet.
    Subnet(SubnetSpec),
    /// Route table.
    RouteTable(RouteTableSpec),
    /// Route table association.
    RouteTableAssociation(RouteTableAssociationSpec),
    /// Security group.
    SecurityGroup(SecurityGroupSpec),
    /// EC2 instance.
    Instance(InstanceSpec),
}

impl ResourceSpec {
    /// Kind of this resource.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Vpc(_) => ResourceKind::Vpc,
            Self::InternetGateway(_) => ResourceKind::InternetGateway,
            Self::Subnet(_) => ResourceKind::Subnet,
            Self::RouteTable(_) => ResourceKind::RouteTable,
            Self::RouteTableAssociation(_) => ResourceKind::RouteTableAssociation,
            Self::SecurityGroup(_) => ResourceKind::SecurityGroup,
            Self::Instance(_) => ResourceKind::Instance,
        }
    }

    /// Referenced resources, each paired with the kind it must have.
    #[must_use]
    pub fn references(&self) -> Vec<(&str, ResourceKind)> {
        match self {
            Self::Vpc(_) => Vec::new(),
            Self::InternetGateway(spec) => vec![(spec.vpc.as_str(), ResourceKind::Vpc)],
            Self::Subnet(spec) => vec![(spec.vpc.as_str(), ResourceKind::Vpc)],
            Self::RouteTable(spec) => {
                let mut refs = vec![(spec.vpc.as_str(), ResourceKind::Vpc)];
                refs.extend(
                    spec.routes
                        .iter()
                        .map(|r| (r.gateway.as_str(), ResourceKind::InternetGateway)),
                );
                refs
            }
            Self::RouteTableAssociation(spec) => vec![
                (spec.subnet.as_str(), ResourceKind::Subnet),
                (spec.route_table.as_str(), ResourceKind::RouteTable),
            ],
            Self::SecurityGroup(spec) => vec![(spec.vpc.as_str(), ResourceKind::Vpc)],
            Self::Instance(spec) => {
                let mut refs = vec![(spec.subnet.as_str(), ResourceKind::Subnet)];
                refs.extend(
                    spec.security_groups
                        .iter()
                        .map(|g| (g.as_str(), ResourceKind::SecurityGroup)),
                );
                refs
            }
        }
    }

    /// Names of the resources this one depends on, deduplicated and sorted.
    #[must_use]
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps: Vec<String> = self
            .references()
            .into_iter()
            .map(|(name, _)| name.to_string())
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }
}
