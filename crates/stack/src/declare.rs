//! Declaration of the single-node Kubernetes topology.

use std::collections::BTreeMap;

use crate::cidr::Ipv4Cidr;
use crate::config::ResolvedConfig;
use crate::error::StackError;
use crate::graph::DesiredState;
use crate::resources::{
    InstanceSpec, InternetGatewaySpec, ResourceSpec, Route, RouteTableAssociationSpec,
    RouteTableSpec, SecurityGroupSpec, SecurityRule, SubnetSpec, VpcSpec,
};

/// Logical name of the VPC.
pub const VPC: &str = "vpc";
/// Logical name of the internet gateway.
pub const GATEWAY: &str = "gateway";
/// Logical name of the subnet.
pub const SUBNET: &str = "subnet";
/// Logical name of the route table.
pub const ROUTE_TABLE: &str = "routeTable";
/// Logical name of the route table association.
pub const ROUTE_TABLE_ASSOCIATION: &str = "routeTableAssociation";
/// Logical name of the security group.
pub const SECURITY_GROUP: &str = "secGroup";
/// Logical name of the instance.
pub const SERVER: &str = "server";

/// Security group description.
pub const SECURITY_GROUP_DESCRIPTION: &str = "Enable HTTP access";

/// Inbound TCP port ranges opened to every address: `(from, to, purpose)`.
pub const INGRESS_PORT_RANGES: [(u16, u16, &str); 7] = [
    (22, 22, "SSH access to the node"),
    (80, 80, "HTTP access to the web server"),
    (6443, 6443, "Kubernetes API server"),
    (2379, 2380, "etcd client and peer communication"),
    (10251, 10252, "kube-scheduler and kube-controller-manager"),
    (30000, 32767, "NodePort services"),
    (10250, 10250, "kubelet API"),
];

/// Inbound rules of the cluster security group.
#[must_use]
pub fn ingress_rules() -> Vec<SecurityRule> {
    INGRESS_PORT_RANGES
        .iter()
        .map(|&(from, to, purpose)| SecurityRule::tcp_from_anywhere(from, to, purpose))
        .collect()
}

/// Build and validate the desired state of a single-node cluster.
///
/// `user_data` is the boot payload handed to the instance.
///
/// # Errors
///
/// Returns an error if the resulting graph violates a topology invariant
/// (for example a subnet range outside the VPC range).
pub fn single_node_cluster(
    config: &ResolvedConfig,
    user_data: impl Into<String>,
) -> Result<DesiredState, StackError> {
    let mut state = DesiredState::new();

    state.insert(
        VPC,
        ResourceSpec::Vpc(VpcSpec {
            cidr_block: config.vpc_cidr,
            enable_dns_hostnames: true,
            enable_dns_support: true,
        }),
    )?;

    state.insert(
        GATEWAY,
        ResourceSpec::InternetGateway(InternetGatewaySpec { vpc: VPC.into() }),
    )?;

    state.insert(
        SUBNET,
        ResourceSpec::Subnet(SubnetSpec {
            vpc: VPC.into(),
            cidr_block: config.subnet_cidr,
            availability_zone: config.availability_zone.clone(),
            map_public_ip_on_launch: true,
        }),
    )?;

    state.insert(
        ROUTE_TABLE,
        ResourceSpec::RouteTable(RouteTableSpec {
            vpc: VPC.into(),
            routes: vec![Route {
                cidr_block: Ipv4Cidr::ANY,
                gateway: GATEWAY.into(),
            }],
        }),
    )?;

    state.insert(
        ROUTE_TABLE_ASSOCIATION,
        ResourceSpec::RouteTableAssociation(RouteTableAssociationSpec {
            subnet: SUBNET.into(),
            route_table: ROUTE_TABLE.into(),
        }),
    )?;

    state.insert(
        SECURITY_GROUP,
        ResourceSpec::SecurityGroup(SecurityGroupSpec {
            description: SECURITY_GROUP_DESCRIPTION.into(),
            vpc: VPC.into(),
            ingress: ingress_rules(),
            egress: vec![SecurityRule::allow_all()],
        }),
    )?;

    let mut tags = BTreeMap::new();
    tags.insert("Name".to_string(), config.name_tag.clone());

    state.insert(
        SERVER,
        ResourceSpec::Instance(InstanceSpec {
            instance_type: config.instance_type.clone(),
            ami: config.ami.clone(),
            subnet: SUBNET.into(),
            security_groups: vec![SECURITY_GROUP.into()],
            user_data: user_data.into(),
            tags,
        }),
    )?;

    state.validate()?;
    Ok(state)
}
