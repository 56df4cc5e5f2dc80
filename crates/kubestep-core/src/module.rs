//! Modules group tasks; pipelines group modules.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{KubestepError, Result};
use crate::runtime::Runtime;
use crate::task::{Task, TaskPlan};

/// A named, ordered group of tasks.
///
/// `init` is called exactly once per run, before any task executes; the
/// returned order is the execution order.
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    fn desc(&self) -> &str {
        ""
    }

    fn init(&self, runtime: &Runtime) -> Result<Vec<Task>>;
}

// ---------------------------------------------------------------------------
// ModulePlan
// ---------------------------------------------------------------------------

/// The validated, initialized form of a module.
#[derive(Debug)]
pub struct ModulePlan {
    pub module: String,
    pub desc: String,
    pub tasks: Vec<Task>,
}

impl ModulePlan {
    /// Run `module.init` and reject duplicate task names.
    pub fn build(module: &dyn Module, runtime: &Runtime) -> Result<Self> {
        let tasks = module.init(runtime)?;
        let mut seen = HashSet::new();
        for task in &tasks {
            if !seen.insert(task.name.as_str()) {
                return Err(KubestepError::DuplicateTask {
                    module: module.name().to_string(),
                    task: task.name.clone(),
                });
            }
        }
        Ok(Self {
            module: module.name().to_string(),
            desc: module.desc().to_string(),
            tasks,
        })
    }

    pub fn describe(&self) -> ModuleSummary {
        ModuleSummary {
            module: self.module.clone(),
            desc: self.desc.clone(),
            tasks: self.tasks.iter().map(Task::describe).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleSummary {
    pub module: String,
    pub desc: String,
    pub tasks: Vec<TaskPlan>,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Ordered list of modules with unique names.
#[derive(Default, Clone)]
pub struct Pipeline {
    modules: Vec<Arc<dyn Module>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, module: impl Module + 'static) -> Result<()> {
        if self.modules.iter().any(|m| m.name() == module.name()) {
            return Err(KubestepError::DuplicateModule(module.name().to_string()));
        }
        self.modules.push(Arc::new(module));
        Ok(())
    }

    pub fn with(mut self, module: impl Module + 'static) -> Result<Self> {
        self.add(module)?;
        Ok(self)
    }

    pub fn modules(&self) -> &[Arc<dyn Module>] {
        &self.modules
    }

    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    /// Keep only the named modules, preserving pipeline order. Unknown names
    /// are a config error.
    pub fn select(&self, names: &[String]) -> Result<Self> {
        for name in names {
            if !self.modules.iter().any(|m| m.name() == name) {
                return Err(KubestepError::Config(format!(
                    "unknown module '{name}' (available: {})",
                    self.names().join(", ")
                )));
            }
        }
        Ok(Self {
            modules: self
                .modules
                .iter()
                .filter(|m| names.iter().any(|n| n == m.name()))
                .cloned()
                .collect(),
        })
    }

    /// Initialize every module. Fails before anything runs if any module
    /// rejects its own task list.
    pub fn plan(&self, runtime: &Runtime) -> Result<Vec<ModulePlan>> {
        self.modules
            .iter()
            .map(|m| ModulePlan::build(m.as_ref(), runtime))
            .collect()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
