//! Rendering the bootstrap steps into the instance's user-data script.

use std::path::Path;
use std::time::Duration;

use handlebars::Handlebars;
use serde::Serialize;

use crate::config::BootstrapConfig;
use crate::error::BootstrapError;
use crate::exec::shell_quote;
use crate::retry::RetryConfig;
use crate::steps::{Action, Check, Step, StepId};

const USER_DATA_TEMPLATE: &str = include_str!("../templates/user-data.sh.hbs");

const SWAP_ENTRY_AWK: &str = r#"$1 !~ /^#/ && $3 == "swap" { found = 1 } END { exit !found }"#;

const COMMENT_SWAP_AWK: &str = r##"{ if ($1 !~ /^#/ && $3 == "swap") print "#" $0; else print }"##;

#[derive(Serialize)]
struct ScriptContext {
    log_file: String,
    total: u8,
    steps: Vec<StepContext>,
}

#[derive(Serialize)]
struct StepContext {
    number: u8,
    name: &'static str,
    description: &'static str,
    quoted_description: String,
    reentrant: bool,
    checks: Vec<String>,
    actions: Vec<String>,
}

/// Render the user-data script for `steps`.
///
/// # Errors
///
/// Returns an error if the template fails to render.
pub fn render_user_data(config: &BootstrapConfig, steps: &[Step]) -> Result<String, BootstrapError> {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(true);
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars
        .register_template_string("user-data", USER_DATA_TEMPLATE)
        .map_err(|e| BootstrapError::Template(e.to_string()))?;

    let context = ScriptContext {
        log_file: quote_path(&config.log_file),
        total: StepId::TOTAL_STEPS,
        steps: steps.iter().map(step_context).collect(),
    };

    handlebars
        .render("user-data", &context)
        .map_err(|e| BootstrapError::Template(e.to_string()))
}

fn step_context(step: &Step) -> StepContext {
    StepContext {
        number: step.id.step_number(),
        name: step.id.name(),
        description: step.id.description(),
        quoted_description: shell_quote(step.id.description()),
        reentrant: step.id.is_reentrant(),
        checks: step
            .checks
            .iter()
            .map(|c| format!("{} || return 1", condition(c)))
            .collect(),
        actions: step.actions.iter().map(action_lines).collect(),
    }
}

fn quote_path(path: &Path) -> String {
    shell_quote(&path.display().to_string())
}

fn parent_of(path: &Path) -> String {
    quote_path(path.parent().unwrap_or_else(|| Path::new("/")))
}

/// Shell condition equivalent to a [`Check`].
fn condition(check: &Check) -> String {
    match check {
        Check::FileExists { path } => format!("[[ -e {} ]]", quote_path(path)),
        Check::FileContains { path, needle } => format!(
            "grep -qF -- {} {} 2>/dev/null",
            shell_quote(needle),
            quote_path(path)
        ),
        Check::FileHasLine { path, line } => format!(
            "grep -qxF -- {} {} 2>/dev/null",
            shell_quote(line),
            quote_path(path)
        ),
        Check::FileEquals { path, content } => format!(
            "printf '%s' {} | cmp -s - {}",
            shell_quote(content),
            quote_path(path)
        ),
        Check::FilesMatch { left, right } => {
            format!("cmp -s {} {}", quote_path(left), quote_path(right))
        }
        Check::CommandSucceeds { command } => format!("{command} >/dev/null 2>&1"),
        Check::CommandOutputContains { command, needle } => format!(
            "[[ \"$({command} 2>/dev/null)\" == *{}* ]]",
            shell_quote(needle)
        ),
        Check::CommandOutputLacks { command, needle } => format!(
            "{{ output=\"$({command})\" && [[ \"$output\" != *{}* ]]; }}",
            shell_quote(needle)
        ),
        Check::NoActiveSwap { fstab } => format!(
            "{{ [[ -z \"$(swapon --show --noheadings)\" ]] && ! awk {} {}; }}",
            shell_quote(SWAP_ENTRY_AWK),
            quote_path(fstab)
        ),
    }
}

/// Shell lines performing an [`Action`], joined for a two-space indented body.
fn action_lines(action: &Action) -> String {
    let lines = match action {
        Action::Run { command } => vec![command.to_shell()],
        Action::WriteFile { path, content } => vec![
            format!("mkdir -p {}", parent_of(path)),
            format!("printf '%s' {} > {}", shell_quote(content), quote_path(path)),
        ],
        Action::CaptureToFile {
            command,
            path,
            replacements,
        } => {
            let mut line = command.to_shell();
            if !replacements.is_empty() {
                line.push_str(" | sed");
                for (from, to) in replacements {
                    line.push_str(" -e ");
                    line.push_str(&shell_quote(&format!(
                        "s/{}/{}/g",
                        sed_pattern(from),
                        sed_replacement(to)
                    )));
                }
            }
            line.push_str(" > ");
            line.push_str(&quote_path(path));
            vec![line]
        }
        Action::CommentOutSwap { fstab } => {
            let file = quote_path(fstab);
            let tmp = shell_quote(&format!("{}.kubenode.tmp", fstab.display()));
            vec![format!(
                "[[ ! -f {file} ]] || {{ awk {} {file} > {tmp} && mv {tmp} {file}; }}",
                shell_quote(COMMENT_SWAP_AWK)
            )]
        }
        Action::CopyFile { from, to, owner } => {
            let mut lines = vec![
                format!("mkdir -p {}", parent_of(to)),
                format!("cp -f {} {}", quote_path(from), quote_path(to)),
            ];
            if let Some(owner) = owner {
                lines.push(format!(
                    "chown -R {} {}",
                    shell_quote(&format!("{owner}:")),
                    parent_of(to)
                ));
            }
            lines
        }
        Action::AppendLineOnce { path, line } => {
            let file = quote_path(path);
            let quoted = shell_quote(line);
            vec![format!(
                "grep -qxF -- {quoted} {file} 2>/dev/null || printf '%s\\n' {quoted} >> {file}"
            )]
        }
        Action::MakeDir { path } => vec![format!("mkdir -p {}", quote_path(path))],
        Action::Retry { command, policy } => {
            vec![format!("retry {} {command}", shell_quote(&delay_list(policy)))]
        }
        Action::WaitFor {
            check,
            timeout,
            interval,
        } => wait_lines(check, *timeout, *interval),
    };

    lines.join("\n  ")
}

fn wait_lines(check: &Check, timeout: Duration, interval: Duration) -> Vec<String> {
    let seconds = timeout.as_secs();
    let message = format!("Timed out after {seconds}s waiting for {}", check.describe());

    vec![
        format!("deadline=$((SECONDS + {seconds}))"),
        format!("until {}; do", condition(check)),
        "  if (( SECONDS >= deadline )); then".to_string(),
        format!("    log {}", shell_quote(&message)),
        "    return 1".to_string(),
        "  fi".to_string(),
        format!("  sleep {}", interval.as_secs().max(1)),
        "done".to_string(),
    ]
}

/// Space-separated whole-second delays between attempts.
fn delay_list(policy: &RetryConfig) -> String {
    policy
        .schedule()
        .iter()
        .map(|d| d.as_secs().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn sed_pattern(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '\\' | '/' | '.' | '*' | '[' | ']' | '^' | '$') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn sed_replacement(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '\\' | '/' | '&') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
