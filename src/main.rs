use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rbxfs::config::Config;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "rbxfs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Enable extended logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new project file
    Init {
        /// Directory to create the project in
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Serve the project's scripts to the sync plugin
    Serve {
        /// Project directory holding rbxfs.json
        #[arg(default_value = ".")]
        project: PathBuf,
        /// Port to listen on (overrides servePort)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "rbxfs=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn init_command(path: &Path) -> Result<()> {
    let written = Config::init(path)
        .with_context(|| format!("Failed to create project in {}", path.display()))?;
    tracing::info!("Created new empty project at {}", written.display());
    Ok(())
}

async fn serve_command(project: &Path, port: Option<u16>) -> Result<()> {
    let config = Config::load(project);
    let port = port.unwrap_or_else(|| config.port());

    let vfs = rbxfs::open_project(&config)
        .with_context(|| format!("Failed to watch {}", config.root_directory.display()))?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    rbxfs::server::serve(vfs.clone(), port, shutdown)
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;

    vfs.stop_watching();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::Init { path } => init_command(path),
        Commands::Serve { project, port } => serve_command(project, *port).await,
    }
}
