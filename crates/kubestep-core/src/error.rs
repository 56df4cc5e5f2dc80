use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::report::{ModuleReport, PipelineReport};

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Coarse classification of a [`KubestepError`], stable enough to show users
/// and to match on in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    HostResolution,
    PrepareEvaluation,
    Render,
    Delivery,
    Action,
    TaskExhausted,
    TaskFailed,
    ModuleFailed,
    PipelineFailed,
    DuplicateTask,
    DuplicateModule,
    Config,
    Connector,
    Io,
    Yaml,
    Json,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::HostResolution => "host_resolution",
            ErrorKind::PrepareEvaluation => "prepare_evaluation",
            ErrorKind::Render => "render",
            ErrorKind::Delivery => "delivery",
            ErrorKind::Action => "action",
            ErrorKind::TaskExhausted => "task_exhausted",
            ErrorKind::TaskFailed => "task_failed",
            ErrorKind::ModuleFailed => "module_failed",
            ErrorKind::PipelineFailed => "pipeline_failed",
            ErrorKind::DuplicateTask => "duplicate_task",
            ErrorKind::DuplicateModule => "duplicate_module",
            ErrorKind::Config => "config",
            ErrorKind::Connector => "connector",
            ErrorKind::Io => "io",
            ErrorKind::Yaml => "yaml",
            ErrorKind::Json => "json",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// HostFailure
// ---------------------------------------------------------------------------

/// One host's terminal failure inside a parallel task.
#[derive(Debug)]
pub struct HostFailure {
    pub host: String,
    pub error: KubestepError,
}

fn join_failures(failures: &[HostFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("[{}] {}", f.host, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// KubestepError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum KubestepError {
    #[error("no hosts found for role '{0}'")]
    HostResolution(String),

    #[error("prepare '{prepare}' failed on host '{host}': {message}")]
    PrepareEvaluation {
        prepare: String,
        host: String,
        message: String,
    },

    #[error("failed to render template '{template}': {message}")]
    Render { template: String, message: String },

    #[error("failed to deliver '{dst}' to host '{host}': {message}")]
    Delivery {
        host: String,
        dst: String,
        message: String,
    },

    #[error("action failed on host '{host}': {message}")]
    Action { host: String, message: String },

    #[error("task '{task}' exhausted {attempts} attempt(s) on host '{host}': {source}")]
    TaskExhausted {
        task: String,
        host: String,
        attempts: u32,
        #[source]
        source: Box<KubestepError>,
    },

    #[error("task '{task}' failed on {} host(s): {}", .failures.len(), join_failures(.failures))]
    TaskFailed {
        task: String,
        failures: Vec<HostFailure>,
    },

    #[error("module '{module}' failed at task '{task}': {source}")]
    ModuleFailed {
        module: String,
        task: String,
        #[source]
        source: Box<KubestepError>,
        report: Box<ModuleReport>,
    },

    /// A module stopped the pipeline. `report` holds every module that ran,
    /// the failing one last.
    #[error("run {} stopped in module '{module}': {source}", .report.run_id)]
    PipelineFailed {
        module: String,
        #[source]
        source: Box<KubestepError>,
        report: Box<PipelineReport>,
    },

    #[error("duplicate task '{task}' in module '{module}'")]
    DuplicateTask { module: String, task: String },

    #[error("duplicate module '{0}' in pipeline")]
    DuplicateModule(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("connector error: {0}")]
    Connector(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl KubestepError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KubestepError::HostResolution(_) => ErrorKind::HostResolution,
            KubestepError::PrepareEvaluation { .. } => ErrorKind::PrepareEvaluation,
            KubestepError::Render { .. } => ErrorKind::Render,
            KubestepError::Delivery { .. } => ErrorKind::Delivery,
            KubestepError::Action { .. } => ErrorKind::Action,
            KubestepError::TaskExhausted { .. } => ErrorKind::TaskExhausted,
            KubestepError::TaskFailed { .. } => ErrorKind::TaskFailed,
            KubestepError::ModuleFailed { .. } => ErrorKind::ModuleFailed,
            KubestepError::PipelineFailed { .. } => ErrorKind::PipelineFailed,
            KubestepError::DuplicateTask { .. } => ErrorKind::DuplicateTask,
            KubestepError::DuplicateModule(_) => ErrorKind::DuplicateModule,
            KubestepError::Config(_) => ErrorKind::Config,
            KubestepError::Connector(_) => ErrorKind::Connector,
            KubestepError::Io(_) => ErrorKind::Io,
            KubestepError::Yaml(_) => ErrorKind::Yaml,
            KubestepError::Json(_) => ErrorKind::Json,
        }
    }

    /// Convenience constructor for custom actions.
    pub fn action(host: impl Into<String>, message: impl fmt::Display) -> Self {
        KubestepError::Action {
            host: host.into(),
            message: message.to_string(),
        }
    }

    /// Hosts implicated by this error, outermost first.
    pub fn hosts(&self) -> Vec<String> {
        match self {
            KubestepError::PrepareEvaluation { host, .. }
            | KubestepError::Delivery { host, .. }
            | KubestepError::Action { host, .. }
            | KubestepError::TaskExhausted { host, .. } => vec![host.clone()],
            KubestepError::TaskFailed { failures, .. } => {
                failures.iter().map(|f| f.host.clone()).collect()
            }
            KubestepError::ModuleFailed { source, .. }
            | KubestepError::PipelineFailed { source, .. } => source.hosts(),
            _ => Vec::new(),
        }
    }

    /// The innermost error kind, looking through task and module wrappers.
    pub fn root_kind(&self) -> ErrorKind {
        match self {
            KubestepError::TaskExhausted { source, .. }
            | KubestepError::ModuleFailed { source, .. }
            | KubestepError::PipelineFailed { source, .. } => source.root_kind(),
            other => other.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, KubestepError>;
