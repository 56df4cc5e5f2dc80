pub mod config;
pub mod hosts;
pub mod plan;
pub mod run;

use anyhow::Context;
use kubestep_core::config::Config;
use kubestep_core::Pipeline;
use kubestep_dns::ClusterDNSModule;
use std::path::Path;

pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    Config::load(path).with_context(|| format!("failed to load config {}", path.display()))
}

/// Every module the binary knows, in run order, narrowed to `only` when it is
/// non-empty.
pub fn pipeline(only: &[String]) -> anyhow::Result<Pipeline> {
    let all = Pipeline::new().with(ClusterDNSModule)?;
    if only.is_empty() {
        Ok(all)
    } else {
        Ok(all.select(only)?)
    }
}
