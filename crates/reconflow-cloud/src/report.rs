//! Outcomes, reports and the warning side-channel

use crate::changeset::ChangeEntry;
use crate::identity::Identity;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Step of the reconciliation state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Static checks run before the state machine starts
    Validating,
    Reading,
    Diffing,
    Applying,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Validating => "validating",
            Phase::Reading => "reading",
            Phase::Diffing => "diffing",
            Phase::Applying => "applying",
            Phase::Done => "done",
        };
        f.write_str(s)
    }
}

/// Terminal outcome of one pass for one identity
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    NoOp,
    Created,
    Updated,
    Purged,
    Skipped {
        reason: String,
    },
    Failed {
        phase: Phase,
        reason: String,
        /// Change-set that was being applied when the failure happened
        attempted: Vec<ChangeEntry>,
    },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::NoOp => "no-op",
            Outcome::Created => "created",
            Outcome::Updated => "updated",
            Outcome::Purged => "purged",
            Outcome::Skipped { .. } => "skipped",
            Outcome::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Skipped { reason } => write!(f, "skipped: {}", reason),
            Outcome::Failed { phase, reason, .. } => {
                write!(f, "failed while {}: {}", phase, reason)
            }
            other => f.write_str(other.label()),
        }
    }
}

/// A degraded or skipped sub-change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub field: String,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Warning collector for one pass
///
/// Every warning is logged through `tracing` and kept for the report.
#[derive(Debug)]
pub struct Diagnostics {
    identity: Identity,
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            warnings: Vec::new(),
        }
    }

    pub fn warn(&mut self, field: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(identity = %self.identity, field, "{}", message);
        self.warnings.push(Warning {
            field: field.to_string(),
            message,
        });
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub identity: Identity,
    pub outcome: Outcome,
    /// Rendered change-set computed by the Differ
    pub changes: Vec<ChangeEntry>,
    pub warnings: Vec<Warning>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Dry-run result: what a pass would change
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub identity: Identity,
    pub changes: Vec<ChangeEntry>,
    pub warnings: Vec<Warning>,
}

impl Plan {
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// Reports of a batch run, in declaration order
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub reports: Vec<Report>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.reports.iter().any(|r| r.outcome.is_failure())
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for report in &self.reports {
            match report.outcome {
                Outcome::NoOp => summary.unchanged += 1,
                Outcome::Created => summary.created += 1,
                Outcome::Updated => summary.updated += 1,
                Outcome::Purged => summary.purged += 1,
                Outcome::Skipped { .. } => summary.skipped += 1,
                Outcome::Failed { .. } => summary.failed += 1,
            }
        }
        summary
    }
}

/// Outcome counts of a batch run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub purged: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} purged, {} unchanged, {} skipped, {} failed",
            self.created, self.updated, self.purged, self.unchanged, self.skipped, self.failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ResourceKind;

    fn report(outcome: Outcome) -> Report {
        Report {
            identity: Identity::new(ResourceKind::Vpc, "test", "main"),
            outcome,
            changes: Vec::new(),
            warnings: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    #[test]
    fn test_run_summary() {
        let run = RunReport {
            reports: vec![
                report(Outcome::Created),
                report(Outcome::NoOp),
                report(Outcome::NoOp),
                report(Outcome::Failed {
                    phase: Phase::Applying,
                    reason: "boom".to_string(),
                    attempted: Vec::new(),
                }),
            ],
        };
        assert!(run.has_failures());
        assert_eq!(
            run.summary().to_string(),
            "1 created, 0 updated, 0 purged, 2 unchanged, 0 skipped, 1 failed"
        );
    }

    #[test]
    fn test_outcome_display_carries_reason() {
        let outcome = Outcome::Skipped {
            reason: "2 live resources match vpc[test,name=main]".to_string(),
        };
        assert!(outcome.to_string().contains("vpc[test,name=main]"));
    }
}
