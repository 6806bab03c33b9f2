//! Tests for applying plans through a fake EC2 provider.

use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;
use kubenode_cloud::{
    CloudProviderError, Ec2Api, Instance, InstanceStatus, Provisioner, RouteRequest,
    RunInstanceRequest, SecurityGroupRequest, SubnetRequest, VpcRequest,
};
use kubenode_stack::declare::{self, single_node_cluster};
use kubenode_stack::{plan, DesiredState, StackConfig, StackState};
use tempfile::TempDir;

#[derive(Default)]
struct FakeState {
    next_id: u32,
    calls: Vec<String>,
    live: BTreeSet<String>,
    terminated: BTreeSet<String>,
    fail_action: Option<String>,
    last_sg: Option<SecurityGroupRequest>,
    last_run: Option<RunInstanceRequest>,
}

#[derive(Default)]
struct FakeEc2 {
    inner: Mutex<FakeState>,
}

impl FakeEc2 {
    fn fail_on(&self, action: &str) {
        self.inner.lock().unwrap().fail_action = Some(action.to_string());
    }

    fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    fn live(&self) -> BTreeSet<String> {
        self.inner.lock().unwrap().live.clone()
    }

    fn call(&self, action: &str, detail: &str) -> Result<(), CloudProviderError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("{action} {detail}"));
        if inner.fail_action.as_deref() == Some(action) {
            return Err(CloudProviderError::Api {
                status: 400,
                message: format!("{action} rejected"),
            });
        }
        Ok(())
    }

    fn create(&self, action: &str, prefix: &str, detail: &str) -> Result<String, CloudProviderError> {
        self.call(action, detail)?;
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = format!("{prefix}-{}", inner.next_id);
        inner.live.insert(id.clone());
        Ok(id)
    }

    fn delete(&self, action: &str, id: &str) -> Result<(), CloudProviderError> {
        self.call(action, id)?;
        let mut inner = self.inner.lock().unwrap();
        if !inner.live.remove(id) {
            return Err(CloudProviderError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Ec2Api for FakeEc2 {
    async fn create_vpc(&self, req: &VpcRequest) -> Result<String, CloudProviderError> {
        self.create("CreateVpc", "vpc", &req.cidr_block)
    }

    async fn delete_vpc(&self, id: &str) -> Result<(), CloudProviderError> {
        self.delete("DeleteVpc", id)
    }

    async fn create_internet_gateway(&self, vpc_id: &str) -> Result<String, CloudProviderError> {
        self.create("CreateInternetGateway", "igw", vpc_id)
    }

    async fn delete_internet_gateway(
        &self,
        id: &str,
        vpc_id: &str,
    ) -> Result<(), CloudProviderError> {
        self.call("DetachInternetGateway", vpc_id)?;
        self.delete("DeleteInternetGateway", id)
    }

    async fn create_subnet(&self, req: &SubnetRequest) -> Result<String, CloudProviderError> {
        self.create("CreateSubnet", "subnet", &req.vpc_id)
    }

    async fn delete_subnet(&self, id: &str) -> Result<(), CloudProviderError> {
        self.delete("DeleteSubnet", id)
    }

    async fn create_route_table(
        &self,
        vpc_id: &str,
        routes: &[RouteRequest],
    ) -> Result<String, CloudProviderError> {
        let gateways: Vec<&str> = routes.iter().map(|r| r.gateway_id.as_str()).collect();
        self.create(
            "CreateRouteTable",
            "rtb",
            &format!("{vpc_id} via {}", gateways.join(",")),
        )
    }

    async fn delete_route_table(&self, id: &str) -> Result<(), CloudProviderError> {
        self.delete("DeleteRouteTable", id)
    }

    async fn associate_route_table(
        &self,
        subnet_id: &str,
        route_table_id: &str,
    ) -> Result<String, CloudProviderError> {
        self.create(
            "AssociateRouteTable",
            "rtbassoc",
            &format!("{subnet_id} {route_table_id}"),
        )
    }

    async fn disassociate_route_table(
        &self,
        association_id: &str,
    ) -> Result<(), CloudProviderError> {
        self.delete("DisassociateRouteTable", association_id)
    }

    async fn create_security_group(
        &self,
        req: &SecurityGroupRequest,
    ) -> Result<String, CloudProviderError> {
        self.inner.lock().unwrap().last_sg = Some(req.clone());
        self.create("CreateSecurityGroup", "sg", &req.vpc_id)
    }

    async fn delete_security_group(&self, id: &str) -> Result<(), CloudProviderError> {
        self.delete("DeleteSecurityGroup", id)
    }

    async fn run_instance(
        &self,
        req: &RunInstanceRequest,
    ) -> Result<Instance, CloudProviderError> {
        self.inner.lock().unwrap().last_run = Some(req.clone());
        let id = self.create("RunInstances", "i", &req.subnet_id)?;
        Ok(Instance {
            id,
            status: InstanceStatus::Pending,
            instance_type: req.instance_type.clone(),
            public_ip: None,
            public_dns: None,
            private_ip: None,
            launched_at: None,
        })
    }

    async fn get_instance(&self, id: &str) -> Result<Instance, CloudProviderError> {
        self.call("DescribeInstances", id)?;
        let inner = self.inner.lock().unwrap();
        let status = if inner.terminated.contains(id) {
            InstanceStatus::Terminated
        } else if inner.live.contains(id) {
            InstanceStatus::Running
        } else {
            return Err(CloudProviderError::NotFound(id.to_string()));
        };
        Ok(Instance {
            id: id.to_string(),
            status,
            instance_type: "t2.micro".into(),
            public_ip: Some("54.210.1.2".into()),
            public_dns: Some("ec2-54-210-1-2.compute-1.amazonaws.com".into()),
            private_ip: Some("10.0.1.25".into()),
            launched_at: None,
        })
    }

    async fn terminate_instance(&self, id: &str) -> Result<(), CloudProviderError> {
        self.call("TerminateInstances", id)?;
        let mut inner = self.inner.lock().unwrap();
        inner.live.remove(id);
        inner.terminated.insert(id.to_string());
        Ok(())
    }
}

fn desired(config: &StackConfig) -> DesiredState {
    single_node_cluster(&config.resolve().unwrap(), "#!/bin/bash\necho hi\n").unwrap()
}

fn actions(calls: &[String]) -> Vec<&str> {
    calls
        .iter()
        .map(|c| c.split(' ').next().unwrap_or_default())
        .collect()
}

/// Tests for applying plans
mod apply_tests {
    use super::*;

    #[tokio::test]
    async fn test_fresh_apply_creates_in_dependency_order() {
        let dir = TempDir::new().unwrap();
        let ec2 = FakeEc2::default();
        let desired = desired(&StackConfig::default());
        let state = StackState::new("dev");
        let plan = plan(&desired, &state).unwrap();

        let mut provisioner = Provisioner::new(&ec2, state, dir.path());
        let report = provisioner.apply(&plan).await.unwrap();

        assert_eq!(report.created.len(), 7);
        assert!(report.deleted.is_empty());

        let calls = ec2.calls();
        let order = actions(&calls);
        let pos = |a: &str| order.iter().position(|c| *c == a).unwrap();
        assert!(pos("CreateVpc") < pos("CreateInternetGateway"));
        assert!(pos("CreateInternetGateway") < pos("CreateRouteTable"));
        assert!(pos("CreateSubnet") < pos("AssociateRouteTable"));
        assert!(pos("CreateRouteTable") < pos("AssociateRouteTable"));
        assert!(pos("CreateSecurityGroup") < pos("RunInstances"));
        assert!(pos("CreateSubnet") < pos("RunInstances"));

        let outputs = report.outputs.unwrap();
        assert_eq!(outputs.ip.as_deref(), Some("54.210.1.2"));
        assert_eq!(
            outputs.url.as_deref(),
            Some("http://ec2-54-210-1-2.compute-1.amazonaws.com")
        );
    }

    #[tokio::test]
    async fn test_references_resolved_to_provider_ids() {
        let dir = TempDir::new().unwrap();
        let ec2 = FakeEc2::default();
        let desired = desired(&StackConfig::default());
        let state = StackState::new("dev");
        let plan = plan(&desired, &state).unwrap();

        let mut provisioner = Provisioner::new(&ec2, state, dir.path());
        provisioner.apply(&plan).await.unwrap();
        let state = provisioner.into_state();

        let vpc_id = state.provider_id(declare::VPC).unwrap();
        let gateway_id = state.provider_id(declare::GATEWAY).unwrap();
        let calls = ec2.calls();
        assert!(calls.contains(&format!("CreateInternetGateway {vpc_id}")));
        assert!(calls.contains(&format!("CreateRouteTable {vpc_id} via {gateway_id}")));

        let inner = ec2.inner.lock().unwrap();
        let sg = inner.last_sg.as_ref().unwrap();
        assert_eq!(sg.name, "dev-secGroup");
        assert_eq!(sg.description, "Enable HTTP access");
        assert_eq!(sg.ingress.len(), 7);
        assert_eq!(sg.egress.len(), 1);

        let run = inner.last_run.as_ref().unwrap();
        assert_eq!(run.security_group_ids, vec![state.provider_id(declare::SECURITY_GROUP).unwrap()]);
        assert_eq!(run.subnet_id, state.provider_id(declare::SUBNET).unwrap());
        assert_eq!(run.image_id, "ami-084568db4383264d4");
    }

    #[tokio::test]
    async fn test_state_saved_and_reapply_is_noop() {
        let dir = TempDir::new().unwrap();
        let ec2 = FakeEc2::default();
        let desired = desired(&StackConfig::default());

        let state = StackState::load_or_new(dir.path(), "dev").unwrap();
        let first = plan(&desired, &state).unwrap();
        Provisioner::new(&ec2, state, dir.path())
            .apply(&first)
            .await
            .unwrap();

        let saved = StackState::load(dir.path()).unwrap().unwrap();
        assert_eq!(saved.resources.len(), 7);
        assert!(saved.outputs.is_some());

        let second = plan(&desired, &saved).unwrap();
        assert!(!second.has_changes());

        let before = ec2.calls().len();
        let report = Provisioner::new(&ec2, saved, dir.path())
            .apply(&second)
            .await
            .unwrap();
        assert!(report.created.is_empty());
        assert_eq!(ec2.calls().len(), before);
        assert!(report.outputs.is_some());
    }

    #[tokio::test]
    async fn test_instance_type_change_replaces_server_only() {
        let dir = TempDir::new().unwrap();
        let ec2 = FakeEc2::default();
        let state = StackState::new("dev");
        let first = plan(&desired(&StackConfig::default()), &state).unwrap();
        let mut provisioner = Provisioner::new(&ec2, state, dir.path());
        provisioner.apply(&first).await.unwrap();
        let state = provisioner.into_state();
        let old_server = state.provider_id(declare::SERVER).unwrap().to_string();

        let bigger = StackConfig {
            instance_type: Some("t3.medium".into()),
            ..StackConfig::default()
        };
        let second = plan(&desired(&bigger), &state).unwrap();
        let mut provisioner = Provisioner::new(&ec2, state, dir.path());
        let report = provisioner.apply(&second).await.unwrap();

        assert_eq!(report.deleted, vec![declare::SERVER.to_string()]);
        assert_eq!(report.created, vec![declare::SERVER.to_string()]);
        assert!(ec2.calls().contains(&format!("TerminateInstances {old_server}")));
        assert_ne!(
            provisioner.state().provider_id(declare::SERVER).unwrap(),
            old_server
        );
        assert_eq!(ec2.live().len(), 7);
    }

    #[tokio::test]
    async fn test_failed_apply_keeps_partial_state() {
        let dir = TempDir::new().unwrap();
        let ec2 = FakeEc2::default();
        ec2.fail_on("CreateSecurityGroup");
        let desired = desired(&StackConfig::default());
        let state = StackState::new("dev");
        let plan = plan(&desired, &state).unwrap();

        let err = Provisioner::new(&ec2, state, dir.path())
            .apply(&plan)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("CreateSecurityGroup rejected"));

        let saved = StackState::load(dir.path()).unwrap().unwrap();
        assert!(saved.provider_id(declare::VPC).is_some());
        assert!(saved.provider_id(declare::SECURITY_GROUP).is_none());
        assert!(saved.provider_id(declare::SERVER).is_none());
        assert_eq!(saved.resources.len(), ec2.live().len());
    }

    #[tokio::test]
    async fn test_launched_instance_recorded_when_wait_fails() {
        let dir = TempDir::new().unwrap();
        let ec2 = FakeEc2::default();
        ec2.fail_on("DescribeInstances");
        let desired = desired(&StackConfig::default());
        let state = StackState::new("dev");
        let first = plan(&desired, &state).unwrap();

        let err = Provisioner::new(&ec2, state, dir.path())
            .apply(&first)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not start"));

        let saved = StackState::load(dir.path()).unwrap().unwrap();
        let server = saved.provider_id(declare::SERVER).unwrap().to_string();
        assert!(ec2.live().contains(&server));
        assert!(saved.outputs.is_none());
        assert_eq!(saved.resources.len(), ec2.live().len());

        // The next apply launches nothing and picks up the outputs.
        ec2.inner.lock().unwrap().fail_action = None;
        let second = plan(&desired, &saved).unwrap();
        assert!(!second.has_changes());
        let report = Provisioner::new(&ec2, saved, dir.path())
            .apply(&second)
            .await
            .unwrap();

        let runs = ec2.calls().iter().filter(|c| c.starts_with("RunInstances")).count();
        assert_eq!(runs, 1);
        assert_eq!(
            report.outputs.and_then(|o| o.ip).as_deref(),
            Some("54.210.1.2")
        );
    }
}

/// Tests for tearing the stack down
mod destroy_tests {
    use super::*;

    #[tokio::test]
    async fn test_destroy_removes_everything_dependents_first() {
        let dir = TempDir::new().unwrap();
        let ec2 = FakeEc2::default();
        let state = StackState::new("dev");
        let plan = plan(&desired(&StackConfig::default()), &state).unwrap();
        let mut provisioner = Provisioner::new(&ec2, state, dir.path());
        provisioner.apply(&plan).await.unwrap();

        let removed = provisioner.destroy().await.unwrap();
        assert_eq!(removed.len(), 7);
        let at = |name: &str| removed.iter().position(|r| r == name).unwrap();
        assert!(at(declare::SERVER) < at(declare::SECURITY_GROUP));
        assert!(at(declare::SERVER) < at(declare::SUBNET));
        assert_eq!(removed.last().map(String::as_str), Some(declare::VPC));
        assert!(ec2.live().is_empty());

        let calls = ec2.calls();
        let order = actions(&calls);
        let pos = |a: &str| order.iter().position(|c| *c == a).unwrap();
        assert!(pos("TerminateInstances") < pos("DeleteSecurityGroup"));
        assert!(pos("DisassociateRouteTable") < pos("DeleteRouteTable"));
        assert!(pos("DeleteInternetGateway") < pos("DeleteVpc"));
        assert!(pos("DeleteSubnet") < pos("DeleteVpc"));

        let saved = StackState::load(dir.path()).unwrap().unwrap();
        assert!(saved.is_empty());
        assert!(saved.outputs.is_none());
    }

    #[tokio::test]
    async fn test_destroy_empty_state() {
        let dir = TempDir::new().unwrap();
        let ec2 = FakeEc2::default();
        let removed = Provisioner::new(&ec2, StackState::new("dev"), dir.path())
            .destroy()
            .await
            .unwrap();
        assert!(removed.is_empty());
        assert!(ec2.calls().is_empty());
    }
}
