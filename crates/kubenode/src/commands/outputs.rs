use anyhow::Result;
use clap::Args;

use super::StackArgs;
use crate::ui;

/// Print the recorded outputs
#[derive(Args)]
pub struct OutputsCommand {
    #[command(flatten)]
    stack: StackArgs,

    /// Print as JSON
    #[arg(long)]
    json: bool,
}

impl OutputsCommand {
    pub fn run(&self) -> Result<()> {
        let state = self.stack.load_state()?;
        let outputs = state.outputs.unwrap_or_default();

        if self.json {
            println!("{}", serde_json::to_string_pretty(&outputs)?);
            return Ok(());
        }

        if outputs.ip.is_none() && outputs.hostname.is_none() {
            ui::print_warning(&format!("Stack '{}' has no outputs; run `kubenode up`", self.stack.stack));
            return Ok(());
        }
        ui::print_outputs(&outputs);
        Ok(())
    }
}
