//! Native interpretation of checks and actions.

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::BootstrapError;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use crate::host::Host;
use crate::retry::with_retry;
use crate::steps::{is_active_swap_entry, Action, Check};

/// Evaluates checks and applies actions on a [`Host`].
pub struct Executor<'a, R: CommandRunner + ?Sized> {
    host: &'a Host,
    runner: &'a R,
}

impl<'a, R: CommandRunner + ?Sized> Executor<'a, R> {
    /// Create an executor.
    pub fn new(host: &'a Host, runner: &'a R) -> Self {
        Self { host, runner }
    }

    /// Evaluate a check.
    ///
    /// A command that cannot be started counts as a failed check, not an
    /// error: the tool it needs is usually installed by a later action.
    ///
    /// # Errors
    ///
    /// Returns an error if a file exists but cannot be read.
    pub fn check(&self, check: &Check) -> Result<bool, BootstrapError> {
        let passed = match check {
            Check::FileExists { path } => self.host.exists(path),
            Check::FileContains { path, needle } => self
                .host
                .read_optional(path)?
                .is_some_and(|content| content.contains(needle.as_str())),
            Check::FileHasLine { path, line } => self
                .host
                .read_optional(path)?
                .is_some_and(|content| content.lines().any(|l| l == line)),
            Check::FileEquals { path, content } => {
                self.host.read_optional(path)?.as_deref() == Some(content.as_str())
            }
            Check::FilesMatch { left, right } => {
                match (
                    self.host.read_bytes_optional(left)?,
                    self.host.read_bytes_optional(right)?,
                ) {
                    (Some(l), Some(r)) => l == r,
                    _ => false,
                }
            }
            Check::CommandSucceeds { command } => {
                self.probe(command).is_some_and(|out| out.succeeded())
            }
            Check::CommandOutputContains { command, needle } => self
                .probe(command)
                .is_some_and(|out| out.stdout.contains(needle.as_str())),
            Check::CommandOutputLacks { command, needle } => self
                .probe(command)
                .is_some_and(|out| out.succeeded() && !out.stdout.contains(needle.as_str())),
            Check::NoActiveSwap { fstab } => {
                let swap_active = self
                    .probe(&CommandSpec::new("swapon").args(["--show", "--noheadings"]))
                    .is_none_or(|out| !out.succeeded() || !out.stdout.trim().is_empty());
                !swap_active && !self.fstab_has_swap(fstab)?
            }
        };

        debug!(check = %check.describe(), passed, "Checked");
        Ok(passed)
    }

    /// Evaluate every check; `true` only if all pass.
    ///
    /// # Errors
    ///
    /// Returns the first evaluation error.
    pub fn all_pass(&self, checks: &[Check]) -> Result<bool, BootstrapError> {
        for check in checks {
            if !self.check(check)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Apply an action.
    ///
    /// # Errors
    ///
    /// Returns an error if a command fails, a file operation fails, retries
    /// are exhausted, or a wait times out.
    pub fn apply(&self, action: &Action) -> Result<(), BootstrapError> {
        match action {
            Action::Run { command } => {
                let output = self.run_checked(command)?;
                log_output(command, &output);
            }
            Action::WriteFile { path, content } => self.host.write(path, content)?,
            Action::CaptureToFile {
                command,
                path,
                replacements,
            } => {
                let output = self.run_checked(command)?;
                let content = replacements
                    .iter()
                    .fold(output.stdout, |acc, (from, to)| acc.replace(from.as_str(), to));
                self.host.write(path, &content)?;
            }
            Action::CommentOutSwap { fstab } => self.comment_out_swap(fstab)?,
            Action::CopyFile { from, to, owner } => {
                self.host.copy(from, to)?;
                if let Some(owner) = owner {
                    if let Some(dir) = to.parent() {
                        self.run_checked(
                            &CommandSpec::new("chown")
                                .arg("-R")
                                .arg(format!("{owner}:"))
                                .arg(self.host.resolve(dir).display().to_string()),
                        )?;
                    }
                }
            }
            Action::AppendLineOnce { path, line } => {
                self.host.append_line_once(path, line)?;
            }
            Action::MakeDir { path } => self.host.create_dir_all(path)?,
            Action::Retry { command, policy } => {
                let output = with_retry(policy, &command.to_shell(), || self.run_checked(command))?;
                log_output(command, &output);
            }
            Action::WaitFor {
                check,
                timeout,
                interval,
            } => self.wait_for(check, *timeout, *interval)?,
        }
        Ok(())
    }

    /// Poll `check` until it passes or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Timeout`] if the check never passes.
    pub fn wait_for(
        &self,
        check: &Check,
        timeout: Duration,
        interval: Duration,
    ) -> Result<(), BootstrapError> {
        let start = Instant::now();
        info!(
            "Waiting for {} (timeout: {}s)...",
            check.describe(),
            timeout.as_secs()
        );

        loop {
            if self.check(check)? {
                info!("✅ {}", check.describe());
                return Ok(());
            }

            if start.elapsed() >= timeout {
                return Err(BootstrapError::Timeout {
                    what: check.describe(),
                    seconds: timeout.as_secs(),
                });
            }

            std::thread::sleep(interval);
        }
    }

    fn probe(&self, command: &CommandSpec) -> Option<CommandOutput> {
        match self.runner.run(command) {
            Ok(output) => Some(output),
            Err(e) => {
                debug!("Check command unavailable: {e}");
                None
            }
        }
    }

    fn run_checked(&self, command: &CommandSpec) -> Result<CommandOutput, BootstrapError> {
        self.runner.run(command)?.into_result(command)
    }

    fn fstab_has_swap(&self, fstab: &Path) -> Result<bool, BootstrapError> {
        Ok(self
            .host
            .read_optional(fstab)?
            .is_some_and(|content| content.lines().any(is_active_swap_entry)))
    }

    fn comment_out_swap(&self, fstab: &Path) -> Result<(), BootstrapError> {
        let Some(content) = self.host.read_optional(fstab)? else {
            return Ok(());
        };

        let mut changed = false;
        let mut rewritten: String = content
            .lines()
            .map(|line| {
                if is_active_swap_entry(line) {
                    changed = true;
                    format!("#{line}\n")
                } else {
                    format!("{line}\n")
                }
            })
            .collect();

        if changed {
            if !content.ends_with('\n') {
                rewritten.pop();
            }
            self.host.write(fstab, &rewritten)?;
        }
        Ok(())
    }
}

fn log_output(command: &CommandSpec, output: &CommandOutput) {
    let stdout = output.stdout.trim();
    if !stdout.is_empty() {
        info!(command = %command.program, "{stdout}");
    }
}
