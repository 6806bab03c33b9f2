use std::time::Duration;

use anyhow::Result;
use clap::Args;
use kubenode_cloud::Provisioner;

use super::{plan_stack, AwsArgs, KubernetesArgs, StackArgs};
use crate::ui;

/// Create or update the stack
#[derive(Args)]
pub struct UpCommand {
    #[command(flatten)]
    stack: StackArgs,

    #[command(flatten)]
    kubernetes: KubernetesArgs,

    #[command(flatten)]
    aws: AwsArgs,

    /// Seconds to wait for the instance to start
    #[arg(long, default_value_t = 600)]
    instance_timeout: u64,
}

impl UpCommand {
    pub async fn run(&self) -> Result<()> {
        let (config, state, plan) = plan_stack(&self.stack, &self.kubernetes)?;

        ui::print_section(&format!("Updating stack '{}' in {}", self.stack.stack, config.region));
        for change in plan.changes() {
            ui::print_change(change);
        }
        ui::print_summary(&plan.summary());

        if !plan.has_changes() {
            if let Some(outputs) = &state.outputs {
                ui::print_success("Stack is up to date");
                println!();
                ui::print_outputs(outputs);
                return Ok(());
            }
        }

        let aws = self.aws.client(&config.region)?;
        let mut provisioner = Provisioner::new(&aws, state, self.stack.stack_dir())
            .with_instance_timeout(Duration::from_secs(self.instance_timeout));
        let report = provisioner.apply(&plan).await?;

        println!();
        ui::print_success(&format!(
            "Stack updated: {} created, {} removed",
            report.created.len(),
            report.deleted.len()
        ));
        match &report.outputs {
            Some(outputs) => ui::print_outputs(outputs),
            None => ui::print_warning("No outputs recorded"),
        }
        ui::print_info("The instance bootstraps Kubernetes on first boot; see /var/log/user-data.log");
        Ok(())
    }
}
