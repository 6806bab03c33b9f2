//! Commands and the seam through which they are run.

use std::fmt;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::BootstrapError;

/// A program invocation, independent of how it is executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program name or path.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Extra environment variables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Create a command with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Render as a shell command line with every word quoted as needed.
    ///
    /// Environment variables are passed through `env` so the result is a
    /// plain word list that can also be handed to a shell function as `"$@"`.
    #[must_use]
    pub fn to_shell(&self) -> String {
        let mut words = Vec::with_capacity(self.env.len() + self.args.len() + 2);
        if !self.env.is_empty() {
            words.push("env".to_string());
            words.extend(
                self.env
                    .iter()
                    .map(|(k, v)| shell_quote(&format!("{k}={v}"))),
            );
        }
        words.push(shell_quote(&self.program));
        words.extend(self.args.iter().map(|a| shell_quote(a)));
        words.join(" ")
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell())
    }
}

/// Quote a word for a POSIX shell.
///
/// Words made only of characters with no special meaning are left bare.
#[must_use]
pub fn shell_quote(word: &str) -> String {
    let is_plain = |c: char| c.is_ascii_alphanumeric() || "_-./=:,+@%".contains(c);
    if !word.is_empty() && word.chars().all(is_plain) {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if killed by a signal.
    pub status: Option<i32>,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    #[must_use]
    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the command exited with status 0.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == Some(0)
    }

    /// Turn a non-zero exit into [`BootstrapError::CommandFailed`].
    ///
    /// # Errors
    ///
    /// Returns an error if the command did not succeed.
    pub fn into_result(self, command: &CommandSpec) -> Result<Self, BootstrapError> {
        if self.succeeded() {
            return Ok(self);
        }

        Err(BootstrapError::CommandFailed {
            command: command.to_shell(),
            status: self
                .status
                .map_or_else(|| "signal".to_string(), |code| format!("exit code {code}")),
            stderr: self.stderr.trim().to_string(),
        })
    }
}

/// Runs commands on the node.
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner {
    /// Run a command to completion and capture its output.
    ///
    /// # Errors
    ///
    /// Returns an error only if the command could not be started; a non-zero
    /// exit is reported through [`CommandOutput::status`].
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput, BootstrapError>;
}

/// Runs commands with [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput, BootstrapError> {
        debug!(command = %command, "Running");

        let output = Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .output()
            .map_err(|source| BootstrapError::Spawn {
                command: command.to_shell(),
                source,
            })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
