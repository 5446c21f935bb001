//! CLI command definitions and dispatch.

mod archive;
mod delete;
mod duplicates;
mod list;
mod unmark;
mod validate;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use image_archive_core::{ArchiveConfig, LogFormat, RegistryGateway, Worklist};
use image_archive_runtime::{ArtifactRegistryGateway, BatchReport, GatewayAuth, WorkerPool};
use tokio::time::Instant;

use crate::output;

/// Image Archive: move image versions between active and archive repositories.
#[derive(Parser)]
#[command(name = "image-archive", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Configuration file (default: ~/.image-archive/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Number of concurrent workers
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Batch timeout in seconds (0 = unlimited)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// GCP project hosting the repositories
    #[arg(long, global = true)]
    pub project: Option<String>,

    /// Repository location
    #[arg(long, global = true)]
    pub location: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format: text or json
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Archive the versions named in a worklist and restore all others
    Archive(archive::ArchiveArgs),
    /// Delete the versions named in a worklist
    Delete(delete::DeleteArgs),
    /// Report versions that exist in both the active and archived state
    Duplicates(duplicates::DuplicatesArgs),
    /// Remove legacy marker tags from a repository
    Unmark(unmark::UnmarkArgs),
    /// List versions of the configured repositories
    List(list::ListArgs),
    /// Validate a worklist without contacting the registry
    Validate(validate::ValidateArgs),
}

/// Load the configuration file and apply command-line overrides.
pub fn load_config(args: &GlobalArgs) -> Result<ArchiveConfig, Box<dyn std::error::Error>> {
    let mut config = ArchiveConfig::load_or_default(args.config.as_deref())?;

    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(project) = &args.project {
        config.project = project.clone();
    }
    if let Some(location) = &args.location {
        config.location = location.clone();
    }
    if let Some(format) = args.log_format {
        config.log.format = format;
    }

    config.validate()?;
    Ok(config)
}

/// Configuration and registry handle shared by command handlers.
pub(crate) struct Context {
    pub config: ArchiveConfig,
    pub gateway: Arc<dyn RegistryGateway>,
    /// Wall-clock limit for the whole command, shared by every pass
    pub deadline: Option<Instant>,
}

impl Context {
    /// Connect to Artifact Registry with credentials from the environment.
    pub fn new(config: ArchiveConfig) -> Self {
        let gateway = ArtifactRegistryGateway::new(
            config.project.clone(),
            config.location.clone(),
            &config.registry,
            GatewayAuth::from_env(),
        );
        Self::with_gateway(config, Arc::new(gateway))
    }

    pub fn with_gateway(config: ArchiveConfig, gateway: Arc<dyn RegistryGateway>) -> Self {
        let deadline = config.timeout().map(|timeout| Instant::now() + timeout);
        Self {
            config,
            gateway,
            deadline,
        }
    }

    pub fn pool(&self) -> WorkerPool {
        WorkerPool::new(self.config.workers).with_deadline(self.deadline)
    }

    /// Load a worklist restricted to the configured repositories.
    pub fn load_worklist(&self, path: &std::path::Path) -> Result<Worklist, Box<dyn std::error::Error>> {
        Ok(Worklist::load(path, &self.config.repositories)?)
    }

    /// `repositories` if any were given, else every configured repository.
    pub fn repositories_or_configured(&self, repositories: &[String]) -> Vec<String> {
        if repositories.is_empty() {
            self.config.repositories.clone()
        } else {
            repositories.to_vec()
        }
    }
}

/// Print every report and fail if any of them recorded a failure.
pub(crate) fn finish(reports: &[BatchReport]) -> Result<(), Box<dyn std::error::Error>> {
    let mut failed = 0;
    for report in reports {
        println!("{}\n", output::render_report(report));
        failed += report.failed.len();
    }

    if let Some(fatal) = reports.iter().find_map(|r| r.fatal.as_ref()) {
        return Err(format!("run aborted: {fatal}").into());
    }
    if failed > 0 {
        return Err(format!("{failed} item(s) failed").into());
    }
    Ok(())
}

/// Dispatch a parsed command to its handler.
pub async fn dispatch(command: Command, config: ArchiveConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Validation is offline and needs no registry credentials
    if let Command::Validate(args) = command {
        return validate::execute(args, &config);
    }

    let ctx = Context::new(config);
    run(command, &ctx).await
}

pub(crate) async fn run(command: Command, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Archive(args) => archive::execute(args, ctx).await,
        Command::Delete(args) => delete::execute(args, ctx).await,
        Command::Duplicates(args) => duplicates::execute(args, ctx).await,
        Command::Unmark(args) => unmark::execute(args, ctx).await,
        Command::List(args) => list::execute(args, ctx).await,
        Command::Validate(args) => validate::execute(args, &ctx.config),
    }
}
