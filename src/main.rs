use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ragline::cli;

#[derive(Parser)]
#[command(name = "ragline")]
#[command(about = "Local-first retrieval-augmented generation engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a folder of documents into the indexes
    Ingest {
        /// Folder containing the corpus
        folder: PathBuf,

        /// Delete all existing indexes before ingesting
        #[arg(long)]
        fresh: bool,
    },

    /// Ask a question against the indexed corpus
    Query {
        /// The question to answer
        #[arg(trailing_var_arg = true, required = true)]
        question: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ragline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest { folder, fresh } => {
            cli::ingest(cli.config, folder, fresh).await?;
        }
        Commands::Query { question } => {
            cli::query(cli.config, question.join(" ")).await?;
        }
    }

    Ok(())
}
