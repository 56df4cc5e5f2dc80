use crate::output::{print_json, print_table};
use kubestep_core::config::ConnectorKind;
use kubestep_core::connector::{self, Connector, RecordingConnector};
use kubestep_core::report::{HostOutcome, ModuleReport};
use kubestep_core::{Executor, KubestepError, Runtime};
use std::path::Path;
use std::sync::Arc;

pub fn run(config_path: &Path, dry_run: bool, modules: &[String], json: bool) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let pipeline = super::pipeline(modules)?;

    let dry_run = dry_run || matches!(config.connector.kind, ConnectorKind::DryRun);
    let recorder = dry_run.then(|| Arc::new(RecordingConnector::new()));
    let conn: Arc<dyn Connector> = match &recorder {
        Some(rec) => rec.clone() as Arc<dyn Connector>,
        None => Arc::from(connector::from_config(&config.connector)?),
    };
    tracing::info!(connector = conn.name(), hosts = config.hosts.len(), "starting run");

    let executor = Executor::new(
        Runtime::from_config(&config, conn),
        config.executor.clone(),
    );
    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(executor.run_pipeline(&pipeline));

    match result {
        Ok(report) => {
            if json {
                let mut value = serde_json::to_value(&report)?;
                if let Some(rec) = &recorder {
                    value["dry_run"] = serde_json::json!({
                        "commands": rec.execs(),
                        "uploads": rec.uploads(),
                    });
                }
                print_json(&value)?;
            } else {
                for module in &report.modules {
                    print_module(module);
                }
                if let Some(rec) = &recorder {
                    println!(
                        "\ndry run: {} command(s), {} upload(s) recorded",
                        rec.execs().len(),
                        rec.uploads().len()
                    );
                }
            }
            Ok(())
        }
        Err(e) => {
            if let KubestepError::PipelineFailed { report, .. } = &e {
                if json {
                    print_json(&serde_json::json!({
                        "error": e.to_string(),
                        "kind": e.root_kind(),
                        "hosts": e.hosts(),
                        "report": report,
                    }))?;
                } else {
                    for module in &report.modules {
                        print_module(module);
                    }
                    println!();
                }
            }
            Err(e.into())
        }
    }
}

fn print_module(module: &ModuleReport) {
    println!("Module: {} ({} ms)", module.module, module.duration_ms);
    let rows: Vec<Vec<String>> = module
        .tasks
        .iter()
        .map(|t| {
            let mut ok = 0;
            let mut skipped = 0;
            let mut failed = 0;
            for h in &t.hosts {
                match h.outcome {
                    HostOutcome::Succeeded { .. } => ok += 1,
                    HostOutcome::Skipped => skipped += 1,
                    HostOutcome::Failed { .. } => failed += 1,
                    HostOutcome::NotRun => {}
                }
            }
            vec![
                t.task.clone(),
                t.status.to_string(),
                format!("{ok}/{skipped}/{failed}"),
                t.action_invocations().to_string(),
                t.duration_ms.to_string(),
            ]
        })
        .collect();
    print_table(&["TASK", "STATUS", "OK/SKIP/FAIL", "ATTEMPTS", "MS"], rows);
}
