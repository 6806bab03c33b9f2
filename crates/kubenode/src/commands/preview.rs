use anyhow::Result;
use clap::Args;

use super::{plan_stack, KubernetesArgs, StackArgs};
use crate::ui;

/// Show what `up` would change
#[derive(Args)]
pub struct PreviewCommand {
    #[command(flatten)]
    stack: StackArgs,

    #[command(flatten)]
    kubernetes: KubernetesArgs,

    /// Print the plan as JSON
    #[arg(long)]
    json: bool,
}

impl PreviewCommand {
    pub async fn run(&self) -> Result<()> {
        let (config, _, plan) = plan_stack(&self.stack, &self.kubernetes)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
            return Ok(());
        }

        ui::print_section(&format!("Preview: stack '{}' in {}", self.stack.stack, config.region));
        for change in plan.changes() {
            ui::print_change(change);
        }
        ui::print_summary(&plan.summary());

        if !plan.has_changes() {
            ui::print_success("Stack is up to date");
        }
        Ok(())
    }
}
