//! Output formatting and progress indicators

use indicatif::{ProgressBar, ProgressStyle};

use crate::core::builder::BuildReport;
use crate::core::resolver::DependencyPlan;

/// Create a spinner for operations with unknown duration
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

/// Status message prefixes
pub mod status {
    pub const SUCCESS: &str = "✓";
    pub const ERROR: &str = "✗";
    pub const WARNING: &str = "⚠";
    pub const INFO: &str = "ℹ";
}

/// Print an error with its cause chain
pub fn display_error(error: &anyhow::Error) {
    eprintln!("{} {error}", status::ERROR);
    for cause in error.chain().skip(1) {
        eprintln!("  caused by: {cause}");
    }
}

/// Dependency plan, grouped the way it was declared
pub fn format_plan(plan: &DependencyPlan) -> String {
    let mut out = String::new();
    for dep in &plan.dependencies {
        out.push_str(&format!("{} ({})", dep.name, dep.kind.as_str()));
        if let Some(req) = &dep.requirement {
            out.push_str(&format!(" {req}"));
        }
        out.push('\n');
    }
    for name in &plan.missing_optional {
        out.push_str(&format!("{} {name} (optional, not found)\n", status::WARNING));
    }
    out
}

/// Summary printed after a successful build
pub fn format_report(report: &BuildReport) -> String {
    let receipt = &report.receipt;
    let mut out = format!(
        "{} Installed {} {} to {}\n",
        status::SUCCESS,
        receipt.name,
        receipt.version,
        receipt.prefix.display()
    );
    out.push_str(&format!("  Variant: {} ({})\n", receipt.variant_id, receipt.source));
    if !receipt.options.is_empty() {
        out.push_str(&format!("  Options: {}\n", receipt.options.join(", ")));
    }
    if let Some(commit) = &receipt.commit {
        out.push_str(&format!("  Commit: {commit}\n"));
    }
    if report.fetch.mirror_fallbacks > 0 {
        out.push_str(&format!("  Mirror fallbacks: {}\n", report.fetch.mirror_fallbacks));
    }
    if !report.patches.fuzzed.is_empty() {
        out.push_str(&format!(
            "  {} Patches applied with fuzz: {:?}\n",
            status::WARNING,
            report.patches.fuzzed
        ));
    }
    out.push_str(&format!("  Files: {}\n", receipt.files.len()));
    if !receipt.removed.is_empty() {
        let removed: Vec<String> = receipt.removed.iter().map(|p| p.display().to_string()).collect();
        out.push_str(&format!("  Removed: {}\n", removed.join(", ")));
    }
    for caveat in &receipt.caveats {
        out.push_str(&format!("\n{} Caveats\n{}\n", status::INFO, caveat.trim_end()));
    }
    out
}
