//! Ordered best-effort step execution.
//!
//! A [`StepRunner`] holds `(name, operation)` pairs and runs all of them in
//! order, whatever happens to earlier ones. The caller gets one
//! [`StepReport`] per step and decides what a failure means.

use std::fmt;

use tracing::{info, warn};

/// What happened to one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    /// The operation changed something.
    Done,
    /// There was nothing for the operation to do.
    Skipped,
    /// The operation failed with this message.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub name: &'static str,
    pub status: StepStatus,
}

impl StepReport {
    pub fn failed(&self) -> bool {
        matches!(self.status, StepStatus::Failed(_))
    }
}

impl fmt::Display for StepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            StepStatus::Done => write!(f, "{}: done", self.name),
            StepStatus::Skipped => write!(f, "{}: nothing to do", self.name),
            StepStatus::Failed(msg) => write!(f, "{}: FAILED: {msg}", self.name),
        }
    }
}

type Operation<'a> = Box<dyn FnOnce() -> Result<bool, String> + 'a>;

/// Runs every step, continuing past failures.
#[derive(Default)]
pub struct StepRunner<'a> {
    steps: Vec<(&'static str, Operation<'a>)>,
}

impl<'a> StepRunner<'a> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Append a step. The operation returns `Ok(true)` when it changed
    /// something and `Ok(false)` when there was nothing to do.
    pub fn step<E, F>(mut self, name: &'static str, op: F) -> Self
    where
        E: fmt::Display,
        F: FnOnce() -> Result<bool, E> + 'a,
    {
        self.steps
            .push((name, Box::new(move || op().map_err(|e| e.to_string()))));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn run(self) -> Vec<StepReport> {
        let mut reports = Vec::with_capacity(self.steps.len());
        for (name, op) in self.steps {
            let status = match op() {
                Ok(true) => StepStatus::Done,
                Ok(false) => StepStatus::Skipped,
                Err(msg) => {
                    warn!(step = name, error = %msg, "step failed, continuing");
                    StepStatus::Failed(msg)
                }
            };
            info!(step = name, ?status, "step finished");
            reports.push(StepReport { name, status });
        }
        reports
    }
}

/// True when no report is a failure.
pub fn all_succeeded(reports: &[StepReport]) -> bool {
    !reports.iter().any(StepReport::failed)
}
