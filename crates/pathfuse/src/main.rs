//! Pathfuse - pedestrian positioning fusion toolkit

use anyhow::Context;
use clap::{Parser, Subcommand};
use pathfuse_core::FusionConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pathfuse")]
#[command(about = "Pedestrian dead reckoning with EKF / particle filter fix fusion")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run CLI batch/single simulation mode
    Cli {
        /// Pass remaining arguments to pathfuse-cli
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Print the effective configuration as JSON
    Config {
        /// Config file to load and sanitize instead of the defaults
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Cli { args }) => {
            let cli_args: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
            run_cli(&cli_args)
        }
        Some(Commands::Config { file }) => print_config(file),
        None => print_config(None),
    }
}

fn run_cli(args: &[&str]) -> anyhow::Result<()> {
    let mut full_args = vec!["pathfuse-cli"];
    full_args.extend(args);

    match pathfuse_cli::run_cli_main(&full_args) {
        Ok(_) => Ok(()),
        Err(e) => {
            eprintln!("CLI error: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_config(file: Option<PathBuf>) -> anyhow::Result<()> {
    let config = match file {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            FusionConfig::from_json(&text)?
        }
        None => FusionConfig::default(),
    };
    tracing::info!(version = pathfuse_core::VERSION, "effective configuration");
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
