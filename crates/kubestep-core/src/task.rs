use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::action::Action;
use crate::inventory::{Host, HostSelector};
use crate::prepare::{Prepare, PrepareCollection};

/// One schedulable unit: a host selector, a gate, an action and the policy
/// for running it across hosts.
///
/// Defaults: sequential, no retries, no predicates, targets role `master`
/// until [`Task::role`] or [`Task::hosts`] says otherwise.
pub struct Task {
    pub name: String,
    pub desc: String,
    pub hosts: HostSelector,
    pub prepare: PrepareCollection,
    pub action: Arc<dyn Action>,
    pub parallel: bool,
    pub retry: u32,
}

impl Task {
    pub fn new(name: impl Into<String>, action: impl Action + 'static) -> Self {
        Self {
            name: name.into(),
            desc: String::new(),
            hosts: HostSelector::role(crate::inventory::MASTER),
            prepare: PrepareCollection::new(),
            action: Arc::new(action),
            parallel: false,
            retry: 0,
        }
    }

    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.hosts = HostSelector::role(role);
        self
    }

    pub fn hosts(mut self, hosts: Vec<Host>) -> Self {
        self.hosts = HostSelector::Hosts(hosts);
        self
    }

    /// Append a predicate to the gate.
    pub fn prepare(mut self, prepare: impl Prepare + 'static) -> Self {
        self.prepare.push(prepare);
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Extra attempts after the first failure on a host.
    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.retry.saturating_add(1)
    }

    pub fn describe(&self) -> TaskPlan {
        TaskPlan {
            name: self.name.clone(),
            desc: self.desc.clone(),
            hosts: self.hosts.describe(),
            prepare: self.prepare.names(),
            action: self.action.name(),
            parallel: self.parallel,
            retry: self.retry,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("hosts", &self.hosts)
            .field("prepare", &self.prepare)
            .field("action", &self.action.name())
            .field("parallel", &self.parallel)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Static description of a task, as shown by `kubestep plan`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskPlan {
    pub name: String,
    pub desc: String,
    pub hosts: String,
    pub prepare: Vec<String>,
    pub action: String,
    pub parallel: bool,
    pub retry: u32,
}
