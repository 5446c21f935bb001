//! image-archive CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use image_archive_cli::commands::{dispatch, load_config, Cli};
use image_archive_core::LogFormat;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli.global) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing; RUST_LOG overrides the configured level
    let level = if cli.global.verbose {
        "debug".to_string()
    } else {
        tracing::Level::from(config.log.level).to_string().to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    match config.log.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
    }

    if let Err(e) = dispatch(cli.command, config).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
