//! Integration tests for declaring, validating, and planning the stack.
//!
//! These tests go through the public API the CLI uses: a stack file is
//! parsed, resolved, declared, and planned against recorded state on disk.

use kubenode_stack::declare::{self, single_node_cluster, INGRESS_PORT_RANGES};
use kubenode_stack::resources::Protocol;
use kubenode_stack::{
    plan, Action, Ipv4Cidr, ResolvedConfig, ResourceKind, ResourceSpec, StackConfig, StackState,
};
use tempfile::TempDir;

fn default_stack() -> kubenode_stack::DesiredState {
    single_node_cluster(&StackConfig::default().resolve().unwrap(), "#!/bin/bash\n").unwrap()
}

/// Tests for the default configuration and topology
mod topology_tests {
    use super::*;

    #[test]
    fn test_omitted_config_uses_defaults() {
        let stack = default_stack();

        let ResourceSpec::Instance(server) = stack.get(declare::SERVER).unwrap() else {
            panic!("server is not an instance");
        };
        assert_eq!(server.instance_type, "t2.micro");
        assert_eq!(server.ami, "ami-084568db4383264d4");
        assert_eq!(server.tags.get("Name").map(String::as_str), Some("k8s-webserver"));

        let ResourceSpec::Vpc(vpc) = stack.get(declare::VPC).unwrap() else {
            panic!("vpc is not a vpc");
        };
        assert_eq!(vpc.cidr_block.to_string(), "10.0.0.0/16");
        assert!(vpc.enable_dns_hostnames);
        assert!(vpc.enable_dns_support);
    }

    #[test]
    fn test_subnet_is_public_strict_subset_of_vpc() {
        let stack = default_stack();

        let ResourceSpec::Subnet(subnet) = stack.get(declare::SUBNET).unwrap() else {
            panic!("subnet is not a subnet");
        };
        let ResourceSpec::Vpc(vpc) = stack.get(declare::VPC).unwrap() else {
            panic!("vpc is not a vpc");
        };

        assert_eq!(subnet.cidr_block.to_string(), "10.0.1.0/24");
        assert!(subnet.cidr_block.is_strict_subset_of(&vpc.cidr_block));
        assert!(subnet.map_public_ip_on_launch);
        assert_eq!(subnet.availability_zone, "us-east-1a");
    }

    #[test]
    fn test_default_route_targets_gateway() {
        let stack = default_stack();

        let ResourceSpec::RouteTable(table) = stack.get(declare::ROUTE_TABLE).unwrap() else {
            panic!("routeTable is not a route table");
        };
        assert_eq!(table.routes.len(), 1);
        assert_eq!(table.routes[0].cidr_block, Ipv4Cidr::ANY);
        assert_eq!(table.routes[0].gateway, declare::GATEWAY);
    }

    #[test]
    fn test_access_policy_rules() {
        let stack = default_stack();

        let ResourceSpec::SecurityGroup(group) = stack.get(declare::SECURITY_GROUP).unwrap() else {
            panic!("secGroup is not a security group");
        };

        assert_eq!(group.description, "Enable HTTP access");
        assert_eq!(group.ingress.len(), 7);
        assert_eq!(group.egress.len(), 1);
        assert_eq!(group.ingress.len() + group.egress.len(), 8);

        for (rule, &(from, to, _)) in group.ingress.iter().zip(INGRESS_PORT_RANGES.iter()) {
            assert_eq!(rule.protocol, Protocol::Tcp);
            assert_eq!((rule.from_port, rule.to_port), (from, to));
            assert_eq!(rule.cidr_blocks, vec![Ipv4Cidr::ANY]);
        }

        for port in [22, 80, 6443, 2379, 2380, 10250, 10251, 10252, 30000, 32767] {
            assert!(
                group.ingress.iter().any(|r| r.covers_port(port)),
                "port {port} is not open"
            );
        }
        assert!(!group.ingress.iter().any(|r| r.covers_port(443)));

        let egress = &group.egress[0];
        assert_eq!(egress.protocol, Protocol::All);
        assert_eq!((egress.from_port, egress.to_port), (0, 0));
        assert_eq!(egress.cidr_blocks, vec![Ipv4Cidr::ANY]);
    }

    #[test]
    fn test_one_of_each_kind() {
        let stack = default_stack();
        for kind in [
            ResourceKind::Vpc,
            ResourceKind::InternetGateway,
            ResourceKind::Subnet,
            ResourceKind::RouteTable,
            ResourceKind::RouteTableAssociation,
            ResourceKind::SecurityGroup,
            ResourceKind::Instance,
        ] {
            assert_eq!(stack.names_of_kind(kind).len(), 1, "kind {kind}");
        }
    }

    #[test]
    fn test_stack_file_overrides() {
        let config = StackConfig::from_yaml_str(
            "config:\n  kubenode:instanceType: t3.large\n  kubenode:vpcNetworkCidr: 10.20.0.0/16\n  kubenode:subnetCidr: 10.20.5.0/24\n",
        )
        .unwrap()
        .resolve()
        .unwrap();

        let stack = single_node_cluster(&config, "").unwrap();
        let ResourceSpec::Instance(server) = stack.get(declare::SERVER).unwrap() else {
            panic!("server is not an instance");
        };
        assert_eq!(server.instance_type, "t3.large");
    }

    #[test]
    fn test_vpc_override_without_matching_subnet_rejected() {
        let config = StackConfig::from_yaml_str("vpcNetworkCidr: 172.16.0.0/16\n")
            .unwrap()
            .resolve()
            .unwrap();

        assert!(single_node_cluster(&config, "").is_err());
    }
}

/// Tests for planning against state persisted on disk
mod plan_tests {
    use super::*;

    fn apply_all(desired: &kubenode_stack::DesiredState, dir: &TempDir) {
        let mut state = StackState::new("dev");
        for (i, name) in desired.creation_order().unwrap().into_iter().enumerate() {
            state.record(name, format!("res-{i}"), desired.get(name).unwrap().clone());
        }
        state.save(dir.path()).unwrap();
    }

    #[test]
    fn test_plan_after_apply_is_empty() {
        let dir = TempDir::new().unwrap();
        let desired = default_stack();
        apply_all(&desired, &dir);

        let state = StackState::load(dir.path()).unwrap().unwrap();
        let plan = plan(&desired, &state).unwrap();
        assert!(!plan.has_changes());
    }

    #[test]
    fn test_user_data_change_replaces_instance_only() {
        let dir = TempDir::new().unwrap();
        apply_all(&default_stack(), &dir);

        let desired = single_node_cluster(&ResolvedConfig::default(), "#!/bin/bash\necho hi\n").unwrap();
        let state = StackState::load(dir.path()).unwrap().unwrap();
        let plan = plan(&desired, &state).unwrap();

        let replaced: Vec<&str> = plan
            .changes()
            .iter()
            .filter(|c| matches!(c.action, Action::Replace { .. }))
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(replaced, vec![declare::SERVER]);
    }

    #[test]
    fn test_subnet_change_replaces_association_and_instance() {
        let dir = TempDir::new().unwrap();
        apply_all(&default_stack(), &dir);

        let config = ResolvedConfig {
            subnet_cidr: Ipv4Cidr::parse("10.0.2.0/24").unwrap(),
            ..ResolvedConfig::default()
        };
        let desired = single_node_cluster(&config, "#!/bin/bash\n").unwrap();
        let state = StackState::load(dir.path()).unwrap().unwrap();
        let plan = plan(&desired, &state).unwrap();

        let mut replaced: Vec<&str> = plan
            .build()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        replaced.sort_unstable();
        assert_eq!(
            replaced,
            vec![declare::ROUTE_TABLE_ASSOCIATION, declare::SERVER, declare::SUBNET]
        );
        assert_eq!(plan.summary().unchanged, 4);
    }
}
