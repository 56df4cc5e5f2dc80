mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "kubestep",
    about = "Declarative cluster bootstrap: run ordered, idempotent tasks against an inventory",
    version,
    propagate_version = true
)]
struct Cli {
    /// Cluster config file
    #[arg(long, global = true, env = "KUBESTEP_CONFIG", default_value = kubestep_core::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// More log output (-v info, -vv debug)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline against the inventory
    Run {
        /// Record commands and uploads instead of touching any host
        #[arg(long)]
        dry_run: bool,

        /// Only run the named module (repeatable)
        #[arg(long = "module", value_name = "NAME")]
        modules: Vec<String>,
    },

    /// Show the tasks each module would run, without running them
    Plan {
        #[arg(long = "module", value_name = "NAME")]
        modules: Vec<String>,
    },

    /// List inventory hosts
    Hosts {
        /// Only hosts carrying this role
        #[arg(long)]
        role: Option<String>,
    },

    /// Inspect the cluster config
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match (cli.verbose, &cli.command) {
        (0, Commands::Run { .. }) | (1, _) => tracing::Level::INFO,
        (0, _) => tracing::Level::WARN,
        (2, _) => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Run { dry_run, modules } => cmd::run::run(&cli.config, dry_run, &modules, cli.json),
        Commands::Plan { modules } => cmd::plan::run(&cli.config, &modules, cli.json),
        Commands::Hosts { role } => cmd::hosts::run(&cli.config, role.as_deref(), cli.json),
        Commands::Config { subcommand } => cmd::config::run(&cli.config, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
