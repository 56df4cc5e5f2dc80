use crate::output::print_json;
use clap::Subcommand;
use kubestep_core::config::WarnLevel;
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Validate the config for common mistakes
    Validate,

    /// Print the effective config, defaults filled in
    Show,
}

pub fn run(config_path: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Validate => validate(config_path, json),
        ConfigSubcommand::Show => show(config_path, json),
    }
}

fn validate(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let warnings = config.validate();

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}

fn show(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    if json {
        return print_json(&config);
    }
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}
