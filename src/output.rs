//! Colored terminal output for the `stack` CLI
//!
//! Uses owo-colors for terminal colors. Reports go to stdout, warnings and
//! errors to stderr. When the template itself is written to stdout the
//! reports are silenced with [`quiet`].

use owo_colors::OwoColorize;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::validate::{Finding, Severity};

static QUIET: AtomicBool = AtomicBool::new(false);

/// Suppress non-error output (used when the template is written to stdout).
pub fn quiet(enabled: bool) {
    QUIET.store(enabled, Ordering::Relaxed);
}

fn is_quiet() -> bool {
    QUIET.load(Ordering::Relaxed)
}

/// Print an action header (blue, bold)
/// Example: "==> Synthesizing CocoAnnotatorStack"
pub fn action(message: &str) {
    if !is_quiet() {
        println!("{} {}", "==>".blue().bold(), message.bold());
    }
}

/// Print a detail line (dimmed prefix)
/// Example: "     wrote cdk.out/CocoAnnotatorStack.template.json"
pub fn detail(message: &str) {
    if !is_quiet() {
        println!("     {}", message.dimmed());
    }
}

/// Print a success message (green)
pub fn success(message: &str) {
    if !is_quiet() {
        println!("{} {}", "==>".green().bold(), message.green());
    }
}

/// Print an info message (cyan)
pub fn info(message: &str) {
    if !is_quiet() {
        println!("{} {}", "::".cyan(), message);
    }
}

/// Print a warning message (yellow)
pub fn warning(message: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), message.yellow());
}

/// Print an error message (red)
pub fn error(message: &str) {
    eprintln!("{} {}", "error:".red().bold(), message.red());
}

/// Print a skip message (dimmed)
/// Example: "==> no changes"
pub fn skip(message: &str) {
    if !is_quiet() {
        println!("{} {}", "==>".dimmed(), message.dimmed());
    }
}

/// Print one resource line in list output
pub fn list_item(name: &str, status: &str, highlight: bool) {
    if highlight {
        println!("  {} {}", name.green(), status.dimmed());
    } else {
        println!("  {} {}", name, status.dimmed());
    }
}

/// Print a change marker line: `+` added, `-` removed, `~` modified
pub fn change(marker: char, name: &str, status: &str) {
    match marker {
        '+' => println!("  {} {} {}", "+".green().bold(), name.green(), status.dimmed()),
        '-' => println!("  {} {} {}", "-".red().bold(), name.red(), status.dimmed()),
        _ => println!("  {} {} {}", "~".yellow().bold(), name.yellow(), status.dimmed()),
    }
}

/// Print a validation finding with its severity color
pub fn finding(finding: &Finding) {
    let location = finding
        .resource
        .as_deref()
        .map(|r| format!(" [{}]", r))
        .unwrap_or_default();
    match finding.severity {
        Severity::Error => eprintln!(
            "{} {}{} {}",
            "error:".red().bold(),
            finding.code.red(),
            location.dimmed(),
            finding.message
        ),
        Severity::Warning => eprintln!(
            "{} {}{} {}",
            "warning:".yellow().bold(),
            finding.code.yellow(),
            location.dimmed(),
            finding.message
        ),
    }
}
