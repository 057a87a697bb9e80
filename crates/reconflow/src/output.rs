//! Terminal rendering of reports

use colored::Colorize;
use reconflow_cloud::{Outcome, Report, Warning};

fn symbol(outcome: &Outcome) -> colored::ColoredString {
    match outcome {
        Outcome::NoOp => "=".dimmed(),
        Outcome::Created => "+".green().bold(),
        Outcome::Updated => "~".yellow().bold(),
        Outcome::Purged => "-".red().bold(),
        Outcome::Skipped { .. } => "!".yellow().bold(),
        Outcome::Failed { .. } => "✗".red().bold(),
    }
}

/// One line per identity: symbol, identity, outcome, elapsed time
pub fn report_line(report: &Report) -> String {
    let outcome = match &report.outcome {
        Outcome::Failed { .. } => report.outcome.to_string().red().to_string(),
        Outcome::Skipped { .. } => report.outcome.to_string().yellow().to_string(),
        other => other.to_string(),
    };
    let mut line = format!(
        "{} {} {} ({}ms)",
        symbol(&report.outcome),
        report.identity,
        outcome,
        report.duration_ms
    );
    for change in &report.changes {
        line.push_str(&format!("\n    {}", change));
    }
    line
}

pub fn print_warnings(warnings: &[Warning]) {
    for warning in warnings {
        println!("    {} {}", "warning:".yellow(), warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconflow_cloud::{ChangeEntry, Identity, Phase, ResourceKind};

    fn report(outcome: Outcome, changes: Vec<ChangeEntry>) -> Report {
        Report {
            identity: Identity::new(ResourceKind::Vpc, "test", "demo"),
            outcome,
            changes,
            warnings: Vec::new(),
            started_at: Default::default(),
            duration_ms: 12,
        }
    }

    #[test]
    fn test_report_line_lists_changes() {
        colored::control::set_override(false);
        let change = ChangeEntry {
            field: "map_public_ip".to_string(),
            current: "false".to_string(),
            desired: "true".to_string(),
        };
        let line = report_line(&report(Outcome::Updated, vec![change]));
        assert_eq!(
            line,
            "~ vpc[test,name=demo] updated (12ms)\n    map_public_ip: false -> true"
        );
    }

    #[test]
    fn test_failed_line_names_phase() {
        colored::control::set_override(false);
        let outcome = Outcome::Failed {
            phase: Phase::Reading,
            reason: "Provider unavailable: timeout".to_string(),
            attempted: Vec::new(),
        };
        let line = report_line(&report(outcome, Vec::new()));
        assert!(line.starts_with("✗ vpc[test,name=demo] failed while"));
        assert!(line.contains("Provider unavailable"));
    }
}
