mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "arbiter-cli")]
#[command(about = "Arbiter CLI - Summarize evaluation reports and manage runtime configuration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate pass@k from a worker report
    PassAtK {
        /// Report written by arbiter-worker
        #[arg(short, long, default_value = "results.json")]
        report: PathBuf,

        /// Values of k to estimate (repeatable)
        #[arg(short, long = "k", default_values_t = [1u64, 10, 100])]
        k: Vec<u64>,

        /// Print the summary as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Write the default runtime configuration
    Init {
        /// Project path
        #[arg(short, long, default_value = ".")]
        path: PathBuf,

        /// Replace an existing config/runtime.json
        #[arg(long, default_value = "false")]
        force: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::PassAtK { report, k, json } => {
            commands::pass_at_k(&report, &k, json)?;
        }
        Commands::Init { path, force } => {
            commands::init_project(&path, force)?;
        }
    }

    Ok(())
}
