//! Per-step outcome aggregation
//!
//! Route commands are best effort: a failed step is logged and recorded,
//! and the sequence moves on. The [`RouteReport`] is what callers get back
//! instead of a single pass/fail.

use crate::exec::{CommandExecutor, Invocation};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StepOutcome {
    Applied,
    Failed { reason: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    /// Logical step, e.g. "split default 0.0.0.0/1"
    pub step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Invocation>,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouteReport {
    pub steps: Vec<StepRecord>,
}

impl RouteReport {
    pub fn applied(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.outcome == StepOutcome::Applied)
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Skipped { .. }))
    }

    /// Every step ran and succeeded
    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Issued commands rendered as command lines, in order
    pub fn commands(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter_map(|s| s.command.as_ref().map(ToString::to_string))
            .collect()
    }

    pub fn log_summary(&self, phase: &str) {
        let failed = self.failures().count();
        if failed == 0 {
            info!("{}: {} steps applied", phase, self.applied());
        } else {
            warn!(
                "{}: {} steps applied, {} failed",
                phase,
                self.applied(),
                failed
            );
        }
    }
}

/// Runs commands one after another, recording each outcome
pub struct StepRunner<'a> {
    exec: &'a dyn CommandExecutor,
    report: RouteReport,
}

impl<'a> StepRunner<'a> {
    pub fn new(exec: &'a dyn CommandExecutor) -> Self {
        Self {
            exec,
            report: RouteReport::default(),
        }
    }

    /// Run one command; failures are logged and recorded, never returned
    pub fn run<S: AsRef<str>>(&mut self, step: &str, program: &str, args: &[S]) -> bool {
        let args = args.iter().map(|a| AsRef::<str>::as_ref(a).to_string());
        let invocation = Invocation::new(program, args);
        let outcome = match self.exec.run(&invocation) {
            Ok(output) if output.success() => {
                debug!("{}: {}", step, invocation);
                StepOutcome::Applied
            }
            Ok(output) => {
                let reason = match output.status {
                    Some(code) => format!("exit status {}: {}", code, output.stderr.trim()),
                    None => format!("terminated by signal: {}", output.stderr.trim()),
                };
                warn!("{} failed ({}): {}", step, invocation, reason);
                StepOutcome::Failed { reason }
            }
            Err(e) => {
                warn!("{} failed ({}): {}", step, invocation, e);
                StepOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        let applied = outcome == StepOutcome::Applied;
        self.report.steps.push(StepRecord {
            step: step.to_string(),
            command: Some(invocation),
            outcome,
        });
        applied
    }

    /// Record a step that was not attempted
    pub fn skip(&mut self, step: &str, reason: &str) {
        warn!("{} skipped: {}", step, reason);
        self.report.steps.push(StepRecord {
            step: step.to_string(),
            command: None,
            outcome: StepOutcome::Skipped {
                reason: reason.to_string(),
            },
        });
    }

    pub fn finish(self) -> RouteReport {
        self.report
    }
}
