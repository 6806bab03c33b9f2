use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use kubenode_bootstrap::config::DEFAULT_STATE_DIR;
use kubenode_bootstrap::{
    control_plane_steps, BootstrapReport, Bootstrapper, Host, RunStatus, StepId, SystemRunner,
};

use super::KubernetesArgs;
use crate::ui;

/// Bootstrap the control plane on this node
#[derive(Args)]
pub struct BootstrapCommand {
    #[command(flatten)]
    kubernetes: KubernetesArgs,

    /// Only evaluate checks; change nothing
    #[arg(long)]
    dry_run: bool,

    /// Filesystem root for file steps (commands still act on this host)
    #[arg(long, value_name = "DIR", default_value = "/")]
    root: PathBuf,

    /// Node directory for the bootstrap state file
    #[arg(long, value_name = "DIR", default_value = DEFAULT_STATE_DIR)]
    state_dir: PathBuf,

    /// Also append JSON logs to this file
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

impl BootstrapCommand {
    /// Log file requested on the command line.
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    pub async fn run(&self) -> Result<()> {
        let config = self
            .kubernetes
            .bootstrap_config()?
            .with_state_dir(&self.state_dir);

        ui::print_section(if self.dry_run {
            "Kubernetes bootstrap (dry run)"
        } else {
            "Kubernetes bootstrap"
        });

        let bootstrapper = Bootstrapper::new(
            control_plane_steps(&config),
            Host::new(&self.root),
            SystemRunner,
        )
        .with_state_dir(&config.state_dir)
        .with_dry_run(self.dry_run);

        let report = tokio::task::spawn_blocking(move || bootstrapper.run())
            .await
            .context("Bootstrap task panicked")??;

        print_report(&report);

        match report.status {
            RunStatus::Succeeded => {
                ui::print_success(&format!(
                    "Control plane ready ({} steps applied)",
                    report.applied_count()
                ));
                Ok(())
            }
            RunStatus::DryRun => {
                ui::print_info("Dry run complete, nothing changed");
                Ok(())
            }
            RunStatus::Failed { step } => {
                ui::print_error(&format!("Bootstrap stopped at '{}'", step.description()));
                ui::print_info("Fix the cause and re-run; completed steps are skipped");
                bail!("Bootstrap failed at step {step}")
            }
        }
    }
}

fn print_report(report: &BootstrapReport) {
    for step in &report.steps {
        ui::print_outcome(
            step.id.step_number(),
            StepId::TOTAL_STEPS,
            step.id.description(),
            &step.outcome,
        );
    }
    println!();
}
