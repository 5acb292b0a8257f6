//! Spindle CLI — package Kubernetes manifests and every image they
//! reference into a single content-addressed OCI artefact, with an
//! in-toto provenance trail.

mod commands;

use clap::{Parser, ValueEnum};
use color_eyre::eyre::Result;
use tokio_util::sync::CancellationToken;

/// Package a directory of Kubernetes manifests together with every
/// container image it references into one immutable OCI artefact.
#[derive(Parser)]
#[command(name = "spindle", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level.
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

#[derive(Copy, Clone, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Scan manifests and print what is known about each referenced image.
    Images(commands::images::ImagesArgs),
    /// Run the full pipeline and push the artefact index.
    Package(commands::package::PackageArgs),
    /// Fetch an artefact and extract its content (and attestations).
    Pull(commands::pull::PullArgs),
    /// Print an artefact's manifests, app images, and attestations.
    View(commands::view::ViewArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(cli.log_level.as_filter())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // every blocking registry call selects against this token
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Images(args) => commands::images::execute(args, &cancel).await,
        Commands::Package(args) => commands::package::execute(args, &cancel).await,
        Commands::Pull(args) => commands::pull::execute(args, &cancel).await,
        Commands::View(args) => commands::view::execute(args, &cancel).await,
    }
}
