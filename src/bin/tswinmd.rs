//! CLI entry point for tswinmd.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

/// tswinmd — generate TypeScript projections from WinRT metadata.
#[derive(Parser, Debug)]
#[command(name = "tswinmd", version, about)]
struct Cli {
    /// Paths to the `.winmd` metadata files to project.
    #[arg(required = true)]
    metadata: Vec<PathBuf>,

    /// Output directory (defaults to the working directory).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Path to a `tswinmd.toml` options file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tswinmd=info")),
        )
        .init();

    let cli = Cli::parse();
    let options = match &cli.config {
        Some(path) => tswinmd::config::load_options(path)?,
        None => tswinmd::config::Options::default(),
    };
    let out_dir = match cli.output {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    tswinmd::run(&cli.metadata, &options, &out_dir)?;
    Ok(())
}
