use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use super::KubernetesArgs;

/// Print the instance's user-data script
#[derive(Args)]
pub struct UserDataCommand {
    #[command(flatten)]
    kubernetes: KubernetesArgs,

    /// Write to this file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

impl UserDataCommand {
    pub fn run(&self) -> Result<()> {
        let script = self.kubernetes.user_data()?;
        match &self.output {
            Some(path) => std::fs::write(path, script)
                .with_context(|| format!("Failed to write {}", path.display())),
            None => {
                print!("{script}");
                Ok(())
            }
        }
    }
}
