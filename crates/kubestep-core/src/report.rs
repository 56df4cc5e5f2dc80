use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ErrorKind, KubestepError};

// ---------------------------------------------------------------------------
// HostReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HostOutcome {
    /// The prepare chain returned false.
    Skipped,
    Succeeded {
        attempts: u32,
    },
    /// `attempts` is zero when the prepare chain itself failed.
    Failed {
        attempts: u32,
        kind: ErrorKind,
        error: String,
    },
    /// A sequential task aborted before reaching this host.
    NotRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostReport {
    pub host: String,
    #[serde(flatten)]
    pub outcome: HostOutcome,
}

impl HostReport {
    pub fn skipped(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            outcome: HostOutcome::Skipped,
        }
    }

    pub fn succeeded(host: impl Into<String>, attempts: u32) -> Self {
        Self {
            host: host.into(),
            outcome: HostOutcome::Succeeded { attempts },
        }
    }

    pub fn failed(host: impl Into<String>, attempts: u32, error: &KubestepError) -> Self {
        Self {
            host: host.into(),
            outcome: HostOutcome::Failed {
                attempts,
                kind: error.root_kind(),
                error: error.to_string(),
            },
        }
    }

    pub fn not_run(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            outcome: HostOutcome::NotRun,
        }
    }

    /// Number of times the action was invoked on this host.
    pub fn attempts(&self) -> u32 {
        match self.outcome {
            HostOutcome::Succeeded { attempts } | HostOutcome::Failed { attempts, .. } => attempts,
            HostOutcome::Skipped | HostOutcome::NotRun => 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, HostOutcome::Failed { .. })
    }
}

// ---------------------------------------------------------------------------
// TaskReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// At least one host ran the action and none failed.
    Executed,
    /// Every resolved host was filtered out by the prepare chain.
    Skipped,
    /// The selector resolved to zero hosts.
    NoHosts,
    Failed,
    /// An earlier task in the module failed.
    NotStarted,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Executed => "executed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::NoHosts => "no_hosts",
            TaskStatus::Failed => "failed",
            TaskStatus::NotStarted => "not_started",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub task: String,
    pub status: TaskStatus,
    pub hosts: Vec<HostReport>,
    pub duration_ms: u64,
}

impl TaskReport {
    /// Derive the status from per-host outcomes.
    pub fn from_hosts(task: impl Into<String>, hosts: Vec<HostReport>, duration_ms: u64) -> Self {
        let status = if hosts.is_empty() {
            TaskStatus::NoHosts
        } else if hosts.iter().any(HostReport::is_failed) {
            TaskStatus::Failed
        } else if hosts
            .iter()
            .all(|h| matches!(h.outcome, HostOutcome::Skipped))
        {
            TaskStatus::Skipped
        } else {
            TaskStatus::Executed
        };
        Self {
            task: task.into(),
            status,
            hosts,
            duration_ms,
        }
    }

    pub fn not_started(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            status: TaskStatus::NotStarted,
            hosts: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn action_invocations(&self) -> u32 {
        self.hosts.iter().map(HostReport::attempts).sum()
    }

    pub fn failed_hosts(&self) -> Vec<&str> {
        self.hosts
            .iter()
            .filter(|h| h.is_failed())
            .map(|h| h.host.as_str())
            .collect()
    }

    pub fn host(&self, name: &str) -> Option<&HostReport> {
        self.hosts.iter().find(|h| h.host == name)
    }
}

// ---------------------------------------------------------------------------
// ModuleReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleReport {
    pub module: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub tasks: Vec<TaskReport>,
}

impl ModuleReport {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            started_at: Utc::now(),
            duration_ms: 0,
            tasks: Vec::new(),
        }
    }

    pub fn task(&self, name: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.task == name)
    }

    pub fn is_success(&self) -> bool {
        self.tasks
            .iter()
            .all(|t| !matches!(t.status, TaskStatus::Failed | TaskStatus::NotStarted))
    }

    /// Total action invocations across every task and host. Zero after a
    /// re-run of an already converged module.
    pub fn action_invocations(&self) -> u32 {
        self.tasks.iter().map(TaskReport::action_invocations).sum()
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }
}

// ---------------------------------------------------------------------------
// PipelineReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub modules: Vec<ModuleReport>,
}

impl PipelineReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            duration_ms: 0,
            modules: Vec::new(),
        }
    }

    pub fn module(&self, name: &str) -> Option<&ModuleReport> {
        self.modules.iter().find(|m| m.module == name)
    }

    pub fn action_invocations(&self) -> u32 {
        self.modules.iter().map(ModuleReport::action_invocations).sum()
    }
}

impl Default for PipelineReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_derivation() {
        assert_eq!(TaskReport::from_hosts("t", vec![], 0).status, TaskStatus::NoHosts);
        let skipped = TaskReport::from_hosts("t", vec![HostReport::skipped("a")], 0);
        assert_eq!(skipped.status, TaskStatus::Skipped);
        let mixed = TaskReport::from_hosts(
            "t",
            vec![HostReport::skipped("a"), HostReport::succeeded("b", 2)],
            0,
        );
        assert_eq!(mixed.status, TaskStatus::Executed);
        assert_eq!(mixed.action_invocations(), 2);

        let err = KubestepError::action("c", "boom");
        let failed = TaskReport::from_hosts(
            "t",
            vec![
                HostReport::succeeded("b", 1),
                HostReport::failed("c", 3, &err),
                HostReport::not_run("d"),
            ],
            0,
        );
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.failed_hosts(), vec!["c"]);
        assert_eq!(failed.action_invocations(), 4);
    }

    #[test]
    fn host_outcome_serializes_flat() {
        let json = serde_json::to_value(HostReport::succeeded("node1", 2)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"host": "node1", "status": "succeeded", "attempts": 2})
        );
        let err = KubestepError::action("node1", "boom");
        let json = serde_json::to_value(HostReport::failed("node1", 1, &err)).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "action");
    }

    #[test]
    fn module_success_and_counts() {
        let mut m = ModuleReport::new("dns");
        m.tasks.push(TaskReport::from_hosts("a", vec![HostReport::succeeded("n", 1)], 0));
        m.tasks.push(TaskReport::from_hosts("b", vec![], 0));
        assert!(m.is_success());
        m.tasks.push(TaskReport::not_started("c"));
        assert!(!m.is_success());
        assert_eq!(m.count(TaskStatus::NoHosts), 1);
        assert_eq!(m.action_invocations(), 1);
        assert_eq!(TaskStatus::NoHosts.to_string(), "no_hosts");
    }
}
