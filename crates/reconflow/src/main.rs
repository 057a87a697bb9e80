mod commands;
mod output;

use clap::{Parser, Subcommand};
use colored::Colorize;
use reconflow_cloud::ResourceKind;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reconflow")]
#[command(version)]
#[command(about = "Converge declared cloud resources with what actually exists", long_about = None)]
struct Cli {
    /// Manifest to load instead of searching for one
    #[arg(short, long, global = true)]
    manifest: Option<PathBuf>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the manifest without contacting any provider
    Validate,
    /// Show the changes each resource needs, without applying them
    Plan,
    /// Converge every declared resource
    Apply {
        /// Resources of one kind reconciled at the same time
        #[arg(short, long, default_value_t = 4)]
        parallelism: usize,
    },
    /// Print provider facts of declared resources
    Facts {
        /// Only this kind (e.g. vpc, virtual_machine)
        #[arg(short, long)]
        kind: Option<ResourceKind>,
        /// Only resources with this name
        #[arg(short, long)]
        name: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let loaded = match commands::load(cli.manifest.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{}", "✗ Invalid manifest".red().bold());
            eprintln!("  {:#}", e);
            std::process::exit(1);
        }
    };

    let succeeded = match cli.command {
        Commands::Validate => commands::validate::handle(&loaded),
        Commands::Plan => commands::plan::handle(&loaded).await?,
        Commands::Apply { parallelism } => commands::apply::handle(&loaded, parallelism).await?,
        Commands::Facts { kind, name } => {
            commands::facts::handle(&loaded, kind, name.as_deref()).await?
        }
    };

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}
