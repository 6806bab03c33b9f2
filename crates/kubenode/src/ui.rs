//! UI helpers for the kubenode CLI.
//!
//! Provides consistent formatting for console output.

use colored::{ColoredString, Colorize};
use kubenode_bootstrap::StepOutcome;
use kubenode_stack::{Action, Outputs, PlanSummary, PlannedChange};

/// Print a section header.
pub fn print_section(title: &str) {
    println!();
    println!("{}", "═".repeat(70).bright_black());
    println!("{}", title.cyan().bold());
    println!("{}", "═".repeat(70).bright_black());
    println!();
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Print an error message.
pub fn print_error(message: &str) {
    println!("{} {}", "✗".red().bold(), message.red());
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a key-value pair.
pub fn print_kv(key: &str, value: &str) {
    println!("  {} {}", format!("{key}:").bright_black(), value.green());
}

/// Print one planned change.
pub fn print_change(change: &PlannedChange) {
    let symbol = colored_symbol(&change.action);
    let detail = match &change.action {
        Action::Replace { reason } => format!(" ({reason})"),
        _ => String::new(),
    };
    println!(
        "  {symbol} {} {}{}",
        change.name.bold(),
        format!("[{}]", change.kind).bright_black(),
        detail.bright_black()
    );
}

fn colored_symbol(action: &Action) -> ColoredString {
    let symbol = action.symbol();
    match action {
        Action::Create => symbol.green().bold(),
        Action::Replace { .. } => symbol.yellow().bold(),
        Action::Delete => symbol.red().bold(),
        Action::NoOp => symbol.bright_black(),
    }
}

/// Print plan counts.
pub fn print_summary(summary: &PlanSummary) {
    println!();
    println!("  {} {summary}", "Plan:".bold());
}

/// Print stack outputs.
pub fn print_outputs(outputs: &Outputs) {
    let missing = "(none)";
    print_kv("ip", outputs.ip.as_deref().unwrap_or(missing));
    print_kv("hostname", outputs.hostname.as_deref().unwrap_or(missing));
    print_kv("url", outputs.url.as_deref().unwrap_or(missing));
}

/// Print a bootstrap step outcome.
pub fn print_outcome(current: u8, total: u8, description: &str, outcome: &StepOutcome) {
    let label = outcome.label();
    let status = match outcome {
        StepOutcome::AlreadySatisfied | StepOutcome::NotReached => label.bright_black(),
        StepOutcome::Applied => label.green(),
        StepOutcome::WouldApply => label.yellow(),
        StepOutcome::Failed { .. } => label.red().bold(),
    };
    println!(
        "{} {description} ({status})",
        format!("[{current}/{total}]").bright_black()
    );
    if let StepOutcome::Failed { error } = outcome {
        println!("      {}", error.red());
    }
}
