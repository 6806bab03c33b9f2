//! Applying a plan against EC2.
//!
//! Teardown runs first, dependents before the resources they use, then
//! creation in dependency order. State is saved after every resource so an
//! interrupted apply leaves an accurate record of what exists.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use kubenode_stack::resources::{InstanceSpec, ResourceKind, SecurityGroupSpec};
use kubenode_stack::{Outputs, Plan, ResourceSpec, StackState};
use tracing::{info, warn};

use crate::providers::{
    Ec2Api, InstanceStatus, RouteRequest, RunInstanceRequest, SecurityGroupRequest,
    SubnetRequest, VpcRequest,
};

/// Default time allowed for an instance to start or terminate.
pub const DEFAULT_INSTANCE_TIMEOUT: Duration = Duration::from_secs(600);

/// What an apply did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Logical names created, in order. Replacements appear here and in `deleted`.
    pub created: Vec<String>,
    /// Logical names removed, in order.
    pub deleted: Vec<String>,
    /// Published outputs after the apply.
    pub outputs: Option<Outputs>,
}

/// Executes plans through an [`Ec2Api`], keeping [`StackState`] current.
pub struct Provisioner<'a, P: Ec2Api + ?Sized> {
    provider: &'a P,
    state: StackState,
    state_dir: PathBuf,
    instance_timeout: Duration,
}

impl<'a, P: Ec2Api + ?Sized> Provisioner<'a, P> {
    /// Create a provisioner that saves state into `state_dir`.
    pub fn new(provider: &'a P, state: StackState, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            state,
            state_dir: state_dir.into(),
            instance_timeout: DEFAULT_INSTANCE_TIMEOUT,
        }
    }

    /// Set how long to wait for instance state changes.
    #[must_use]
    pub fn with_instance_timeout(mut self, timeout: Duration) -> Self {
        self.instance_timeout = timeout;
        self
    }

    /// Current recorded state.
    #[must_use]
    pub fn state(&self) -> &StackState {
        &self.state
    }

    /// Consume the provisioner, returning the recorded state.
    #[must_use]
    pub fn into_state(self) -> StackState {
        self.state
    }

    /// Apply `plan`.
    ///
    /// # Errors
    ///
    /// Returns the first provider or persistence error. Everything created
    /// or deleted before the error is already reflected in saved state.
    pub async fn apply(&mut self, plan: &Plan) -> Result<ApplyReport> {
        let mut report = ApplyReport::default();

        for change in plan.teardown() {
            self.remove(&change.name).await?;
            report.deleted.push(change.name.clone());
        }

        for change in plan.build() {
            let spec = change
                .spec
                .as_ref()
                .ok_or_else(|| anyhow!("No desired spec for {}", change.name))?;
            self.create(&change.name, spec).await?;
            report.created.push(change.name.clone());
        }

        // An earlier apply may have launched the instance but not seen it run.
        if self.state.outputs.is_none() {
            if let Some(id) = self.recorded_instance() {
                self.publish_outputs(&id).await?;
            }
        }

        report.outputs.clone_from(&self.state.outputs);
        info!(
            created = report.created.len(),
            deleted = report.deleted.len(),
            "✅ Stack applied"
        );
        Ok(report)
    }

    /// Remove every recorded resource.
    ///
    /// # Errors
    ///
    /// Returns the first provider or persistence error.
    pub async fn destroy(&mut self) -> Result<Vec<String>> {
        let order: Vec<String> = self
            .state
            .teardown_order()?
            .into_iter()
            .map(str::to_string)
            .collect();

        for name in &order {
            self.remove(name).await?;
        }

        self.state.outputs = None;
        self.save()?;
        info!(removed = order.len(), "✅ Stack destroyed");
        Ok(order)
    }

    fn save(&mut self) -> Result<()> {
        self.state.save(&self.state_dir)
    }

    fn recorded_instance(&self) -> Option<String> {
        self.state
            .resources
            .values()
            .find(|r| r.kind() == ResourceKind::Instance)
            .map(|r| r.id.clone())
    }

    /// Provider id recorded for a logical name.
    fn id_of(&self, name: &str) -> Result<String> {
        self.state
            .provider_id(name)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Resource '{name}' has not been created"))
    }

    async fn create(&mut self, name: &str, spec: &ResourceSpec) -> Result<()> {
        info!(resource = name, kind = %spec.kind(), "Creating");

        let id = match spec {
            ResourceSpec::Vpc(vpc) => {
                self.provider
                    .create_vpc(&VpcRequest {
                        cidr_block: vpc.cidr_block.to_string(),
                        enable_dns_hostnames: vpc.enable_dns_hostnames,
                        enable_dns_support: vpc.enable_dns_support,
                    })
                    .await?
            }
            ResourceSpec::InternetGateway(gateway) => {
                let vpc_id = self.id_of(&gateway.vpc)?;
                self.provider.create_internet_gateway(&vpc_id).await?
            }
            ResourceSpec::Subnet(subnet) => {
                self.provider
                    .create_subnet(&SubnetRequest {
                        vpc_id: self.id_of(&subnet.vpc)?,
                        cidr_block: subnet.cidr_block.to_string(),
                        availability_zone: subnet.availability_zone.clone(),
                        map_public_ip_on_launch: subnet.map_public_ip_on_launch,
                    })
                    .await?
            }
            ResourceSpec::RouteTable(table) => {
                let vpc_id = self.id_of(&table.vpc)?;
                let routes = table
                    .routes
                    .iter()
                    .map(|route| {
                        Ok(RouteRequest {
                            destination_cidr_block: route.cidr_block.to_string(),
                            gateway_id: self.id_of(&route.gateway)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                self.provider.create_route_table(&vpc_id, &routes).await?
            }
            ResourceSpec::RouteTableAssociation(association) => {
                let subnet_id = self.id_of(&association.subnet)?;
                let route_table_id = self.id_of(&association.route_table)?;
                self.provider
                    .associate_route_table(&subnet_id, &route_table_id)
                    .await?
            }
            ResourceSpec::SecurityGroup(group) => {
                let request = self.security_group_request(name, group)?;
                self.provider.create_security_group(&request).await?
            }
            ResourceSpec::Instance(instance) => {
                let id = self.launch(instance).await?;
                self.record(name, &id, spec)?;
                self.publish_outputs(&id).await?;
                info!(resource = name, id = %id, "✅ Created");
                return Ok(());
            }
        };

        self.record(name, &id, spec)?;
        info!(resource = name, id = %id, "✅ Created");
        Ok(())
    }

    /// Record a created resource and save state.
    fn record(&mut self, name: &str, id: &str, spec: &ResourceSpec) -> Result<()> {
        self.state.record(name, id.to_string(), spec.clone());
        self.save()
            .with_context(|| format!("Failed to record {name} ({id})"))
    }

    fn security_group_request(
        &self,
        name: &str,
        group: &SecurityGroupSpec,
    ) -> Result<SecurityGroupRequest> {
        Ok(SecurityGroupRequest {
            name: format!("{}-{name}", self.state.stack),
            description: group.description.clone(),
            vpc_id: self.id_of(&group.vpc)?,
            ingress: group.ingress.clone(),
            egress: group.egress.clone(),
        })
    }

    /// Launch the instance, returning its id as soon as EC2 accepts it.
    async fn launch(&self, spec: &InstanceSpec) -> Result<String> {
        let request = RunInstanceRequest {
            image_id: spec.ami.clone(),
            instance_type: spec.instance_type.clone(),
            subnet_id: self.id_of(&spec.subnet)?,
            security_group_ids: spec
                .security_groups
                .iter()
                .map(|g| self.id_of(g))
                .collect::<Result<Vec<_>>>()?,
            user_data: spec.user_data.clone(),
            tags: spec.tags.clone(),
        };

        let launched = self.provider.run_instance(&request).await?;
        Ok(launched.id)
    }

    /// Wait for a recorded instance to run and publish its outputs.
    async fn publish_outputs(&mut self, id: &str) -> Result<()> {
        let running = self
            .provider
            .wait_instance_status(id, InstanceStatus::Running, self.instance_timeout.as_secs())
            .await
            .with_context(|| format!("Instance {id} did not start"))?;

        if running.public_dns.is_none() {
            warn!(instance_id = %running.id, "Instance has no public hostname");
        }
        self.state.outputs = Some(Outputs::new(running.public_ip, running.public_dns));
        self.save()
            .with_context(|| format!("Failed to record outputs of {id}"))
    }

    async fn remove(&mut self, name: &str) -> Result<()> {
        let Some(recorded) = self.state.resources.get(name).cloned() else {
            return Ok(());
        };
        info!(resource = name, kind = %recorded.kind(), id = %recorded.id, "Deleting");

        match &recorded.spec {
            ResourceSpec::Vpc(_) => self.provider.delete_vpc(&recorded.id).await?,
            ResourceSpec::InternetGateway(gateway) => {
                let vpc_id = self.id_of(&gateway.vpc)?;
                self.provider
                    .delete_internet_gateway(&recorded.id, &vpc_id)
                    .await?;
            }
            ResourceSpec::Subnet(_) => self.provider.delete_subnet(&recorded.id).await?,
            ResourceSpec::RouteTable(_) => self.provider.delete_route_table(&recorded.id).await?,
            ResourceSpec::RouteTableAssociation(_) => {
                self.provider.disassociate_route_table(&recorded.id).await?;
            }
            ResourceSpec::SecurityGroup(_) => {
                self.provider.delete_security_group(&recorded.id).await?;
            }
            ResourceSpec::Instance(_) => {
                self.provider.terminate_instance(&recorded.id).await?;
                self.provider
                    .wait_instance_status(
                        &recorded.id,
                        InstanceStatus::Terminated,
                        self.instance_timeout.as_secs(),
                    )
                    .await?;
            }
        }

        self.state.forget(name);
        if recorded.kind() == ResourceKind::Instance {
            self.state.outputs = None;
        }
        self.save()
            .with_context(|| format!("Failed to record removal of {name}"))?;
        info!(resource = name, "✅ Deleted");
        Ok(())
    }
}
