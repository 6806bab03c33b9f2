use std::time::Duration;

use anyhow::Result;
use clap::Args;
use kubenode_cloud::Provisioner;

use super::{AwsArgs, StackArgs};
use crate::ui;

/// Tear down every recorded resource
#[derive(Args)]
pub struct DestroyCommand {
    #[command(flatten)]
    stack: StackArgs,

    #[command(flatten)]
    aws: AwsArgs,

    /// Seconds to wait for the instance to terminate
    #[arg(long, default_value_t = 600)]
    instance_timeout: u64,
}

impl DestroyCommand {
    pub async fn run(&self) -> Result<()> {
        let config = self.stack.resolve()?;
        let state = self.stack.load_state()?;

        ui::print_section(&format!("Destroying stack '{}'", self.stack.stack));
        if state.is_empty() {
            ui::print_info("Nothing recorded, nothing to destroy");
            return Ok(());
        }

        let aws = self.aws.client(&config.region)?;
        let mut provisioner = Provisioner::new(&aws, state, self.stack.stack_dir())
            .with_instance_timeout(Duration::from_secs(self.instance_timeout));
        let removed = provisioner.destroy().await?;

        for name in &removed {
            println!("  - {name}");
        }
        ui::print_success(&format!("Removed {} resources", removed.len()));
        Ok(())
    }
}
