use crate::output::{print_json, print_table};
use kubestep_core::connector::RecordingConnector;
use kubestep_core::Runtime;
use std::path::Path;
use std::sync::Arc;

pub fn run(config_path: &Path, modules: &[String], json: bool) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let pipeline = super::pipeline(modules)?;

    // init never touches hosts, so no real connector is needed
    let runtime = Runtime::from_config(&config, Arc::new(RecordingConnector::new()));
    let plans = pipeline.plan(&runtime)?;
    let summaries: Vec<_> = plans.iter().map(|p| p.describe()).collect();

    if json {
        return print_json(&summaries);
    }

    for (i, module) in summaries.iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("Module: {} - {}", module.module, module.desc);
        let rows = module
            .tasks
            .iter()
            .map(|t| {
                vec![
                    t.name.clone(),
                    t.hosts.clone(),
                    if t.parallel { "parallel" } else { "sequential" }.to_string(),
                    t.retry.to_string(),
                    t.prepare.join(", "),
                    t.action.clone(),
                ]
            })
            .collect();
        print_table(&["TASK", "HOSTS", "MODE", "RETRY", "PREPARE", "ACTION"], rows);
    }
    Ok(())
}
