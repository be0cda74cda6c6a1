// kmirror-common/src/pipeline.rs
use std::collections::BTreeMap;
use std::fmt;

use crate::error::KmError;

// --- Shared Outcome Types ---

/// A task whose execution returned an error.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub task: String,
    pub error: KmError,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.task, self.error)
    }
}

/// Final bookkeeping of one engine run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub enqueued: u64,
    pub acknowledged: u64,
    pub executed: u64,
    /// Tasks that ran on the publisher's thread because the buffer was full.
    pub inline_executions: u64,
    /// Tasks published after cancellation and never run.
    pub skipped: u64,
    pub cancelled: bool,
    pub failures: Vec<TaskFailure>,
    pub duration_secs: f64,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    /// Failure messages grouped by error text, most frequent first.
    pub fn failure_groups(&self) -> Vec<(String, Vec<String>)> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for failure in &self.failures {
            groups
                .entry(failure.error.to_string())
                .or_default()
                .push(failure.task.clone());
        }
        let mut groups: Vec<(String, Vec<String>)> = groups.into_iter().collect();
        groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));
        groups
    }

    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} task(s) executed ({} inline), {} failed in {:.1}s",
            self.executed,
            self.inline_executions,
            self.failures.len(),
            self.duration_secs
        );
        if self.cancelled {
            out.push_str(&format!(", run was cancelled ({} skipped)", self.skipped));
        }
        for (message, tasks) in self.failure_groups() {
            out.push_str(&format!("\n  {}x {}", tasks.len(), message));
            for task in tasks {
                out.push_str(&format!("\n    - {task}"));
            }
        }
        out
    }
}
