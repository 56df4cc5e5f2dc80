//! Runs modules task by task.
//!
//! A task resolves its hosts, gates each one through its prepare chain and
//! dispatches the action on the survivors. Parallel tasks spawn one tokio
//! task per host, bounded by `forks`, and wait for every one of them; a
//! failing host never cancels its siblings. Sequential tasks walk hosts in
//! resolution order and stop at the first terminal failure.

use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use crate::action::Action;
use crate::config::ExecutorConfig;
use crate::error::{HostFailure, KubestepError, Result};
use crate::inventory::Host;
use crate::module::{Module, ModulePlan, Pipeline};
use crate::prepare::{Prepare, PrepareCollection};
use crate::report::{HostReport, ModuleReport, PipelineReport, TaskReport};
use crate::runtime::Runtime;
use crate::task::Task;

/// Outcome of one task: the report is always produced, even on failure.
pub type TaskRun = (TaskReport, Result<()>);

#[derive(Debug, Clone)]
pub struct Executor {
    runtime: Runtime,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(runtime: Runtime, config: ExecutorConfig) -> Self {
        Self { runtime, config }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Initialize every module first, so duplicate names are rejected before
    /// any remote change, then run them in order. Stops at the first failed
    /// module; the error keeps the reports of every module that ran.
    pub async fn run_pipeline(&self, pipeline: &Pipeline) -> Result<PipelineReport> {
        let start = Instant::now();
        let plans = pipeline.plan(&self.runtime)?;
        let mut report = PipelineReport::new();
        info!(run_id = %report.run_id, modules = plans.len(), "pipeline started");
        for plan in &plans {
            match self.run_plan(plan).await {
                Ok(module) => report.modules.push(module),
                Err(e) => {
                    if let KubestepError::ModuleFailed { report: partial, .. } = &e {
                        report.modules.push(partial.as_ref().clone());
                    }
                    report.duration_ms = elapsed_ms(start);
                    error!(run_id = %report.run_id, module = %plan.module, "pipeline stopped");
                    return Err(KubestepError::PipelineFailed {
                        module: plan.module.clone(),
                        source: Box::new(e),
                        report: Box::new(report),
                    });
                }
            }
        }
        report.duration_ms = elapsed_ms(start);
        info!(run_id = %report.run_id, duration_ms = report.duration_ms, "pipeline finished");
        Ok(report)
    }

    pub async fn run_module(&self, module: &dyn Module) -> Result<ModuleReport> {
        let plan = ModulePlan::build(module, &self.runtime)?;
        self.run_plan(&plan).await
    }

    /// Run an initialized module. On failure the error carries the partial
    /// report, with every task after the failing one marked not started.
    #[instrument(skip_all, fields(module = %plan.module))]
    pub async fn run_plan(&self, plan: &ModulePlan) -> Result<ModuleReport> {
        let start = Instant::now();
        let mut report = ModuleReport::new(&plan.module);
        info!(tasks = plan.tasks.len(), "module started");

        for (i, task) in plan.tasks.iter().enumerate() {
            let (task_report, result) = self.run_task(task).await;
            report.tasks.push(task_report);
            if let Err(e) = result {
                report
                    .tasks
                    .extend(plan.tasks[i + 1..].iter().map(|t| TaskReport::not_started(&t.name)));
                report.duration_ms = elapsed_ms(start);
                error!(task = %task.name, error = %e, "module failed");
                return Err(KubestepError::ModuleFailed {
                    module: plan.module.clone(),
                    task: task.name.clone(),
                    source: Box::new(e),
                    report: Box::new(report),
                });
            }
        }

        report.duration_ms = elapsed_ms(start);
        info!(
            duration_ms = report.duration_ms,
            invocations = report.action_invocations(),
            "module finished"
        );
        Ok(report)
    }

    #[instrument(skip_all, fields(task = %task.name))]
    pub async fn run_task(&self, task: &Task) -> TaskRun {
        let start = Instant::now();
        let hosts = task.hosts.resolve(self.runtime.inventory());
        if hosts.is_empty() {
            info!(selector = %task.hosts.describe(), "no hosts resolved, nothing to do");
            return (TaskReport::from_hosts(&task.name, Vec::new(), 0), Ok(()));
        }
        debug!(hosts = hosts.len(), parallel = task.parallel, retry = task.retry, "task started");

        let (hosts, result) = if task.parallel {
            self.run_parallel(task, hosts).await
        } else {
            self.run_sequential(task, hosts).await
        };
        let report = TaskReport::from_hosts(&task.name, hosts, elapsed_ms(start));
        match &result {
            Ok(()) => info!(status = %report.status, "task finished"),
            Err(e) => warn!(failed = ?report.failed_hosts(), error = %e, "task failed"),
        }
        (report, result)
    }

    async fn run_sequential(&self, task: &Task, hosts: Vec<Host>) -> (Vec<HostReport>, Result<()>) {
        let mut reports = Vec::with_capacity(hosts.len());
        let mut remaining = hosts.into_iter();
        while let Some(host) = remaining.next() {
            let (report, failure) = self.unit(task, host).run().await;
            reports.push(report);
            if let Some(e) = failure {
                reports.extend(remaining.map(|h| HostReport::not_run(h.name)));
                return (reports, Err(e));
            }
        }
        (reports, Ok(()))
    }

    async fn run_parallel(&self, task: &Task, hosts: Vec<Host>) -> (Vec<HostReport>, Result<()>) {
        let forks = self.config.forks.clamp(1, Semaphore::MAX_PERMITS);
        let semaphore = Arc::new(Semaphore::new(forks));
        let mut names = Vec::with_capacity(hosts.len());
        let mut handles = Vec::with_capacity(hosts.len());
        for host in hosts {
            names.push(host.name.clone());
            let unit = self.unit(task, host);
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                // The semaphore is never closed, so acquire cannot fail.
                let _permit = semaphore.acquire_owned().await.ok();
                unit.run().await
            }));
        }

        let mut reports = Vec::with_capacity(names.len());
        let mut failures = Vec::new();
        for (name, joined) in names.into_iter().zip(join_all(handles).await) {
            let (report, failure) = match joined {
                Ok(run) => run,
                Err(e) => {
                    let err = KubestepError::action(&name, format!("host task aborted: {e}"));
                    (HostReport::failed(&name, 0, &err), Some(err))
                }
            };
            reports.push(report);
            if let Some(error) = failure {
                failures.push(HostFailure { host: name, error });
            }
        }

        let result = match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0).error),
            _ => Err(KubestepError::TaskFailed {
                task: task.name.clone(),
                failures,
            }),
        };
        (reports, result)
    }

    fn unit(&self, task: &Task, host: Host) -> HostUnit {
        HostUnit {
            task: task.name.clone(),
            host,
            prepare: task.prepare.clone(),
            action: Arc::clone(&task.action),
            runtime: self.runtime.clone(),
            attempts: task.attempts(),
            retry_delay: self.config.retry_delay(),
        }
    }
}

/// Everything one host needs to run a task, owned so it can move into a
/// spawned tokio task.
struct HostUnit {
    task: String,
    host: Host,
    prepare: PrepareCollection,
    action: Arc<dyn Action>,
    runtime: Runtime,
    attempts: u32,
    retry_delay: Option<Duration>,
}

impl HostUnit {
    async fn run(self) -> (HostReport, Option<KubestepError>) {
        let host = &self.host;
        match self.prepare.evaluate(host, &self.runtime).await {
            Ok(false) => {
                debug!(host = %host.name, "skipped by prepare");
                return (HostReport::skipped(&host.name), None);
            }
            Err(e) => {
                warn!(host = %host.name, error = %e, "prepare evaluation failed");
                return (HostReport::failed(&host.name, 0, &e), Some(e));
            }
            Ok(true) => {}
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.action.execute(host, &self.runtime).await {
                Ok(()) => {
                    debug!(host = %host.name, attempt, "action succeeded");
                    return (HostReport::succeeded(&host.name, attempt), None);
                }
                Err(e) if attempt >= self.attempts => {
                    error!(host = %host.name, attempts = attempt, error = %e, "action exhausted retries");
                    let err = KubestepError::TaskExhausted {
                        task: self.task.clone(),
                        host: host.name.clone(),
                        attempts: attempt,
                        source: Box::new(e),
                    };
                    return (HostReport::failed(&host.name, attempt, &err), Some(err));
                }
                Err(e) => {
                    warn!(host = %host.name, attempt, max = self.attempts, error = %e, "action failed, retrying");
                    if let Some(delay) = self.retry_delay {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
