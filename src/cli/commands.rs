//! CLI command definitions for job-dispatcher.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::config::DispatcherConfig;
use crate::dispatcher::{new_job_dispatcher, DispatcherDeps, JobDispatcher};
use crate::kubernetes::configurer::FileIdentityTokenSource;

/// Launch Terraform jobs on Kubernetes, Docker or ECS.
#[derive(Parser)]
#[command(name = "job-dispatcher")]
#[command(about = "Launch Terraform jobs on Kubernetes, Docker or ECS")]
#[command(version)]
#[command(
    long_about = "job-dispatcher launches a single Terraform job on the compute backend selected by a dispatcher configuration file.\n\nExample usage:\n  job-dispatcher validate --config dispatcher.yaml\n  job-dispatcher dispatch --config dispatcher.yaml --job-id 6d3c0a2e --token $JOB_TOKEN"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Construct the configured dispatcher without launching anything.
    Validate(ConfigArgs),

    /// Dispatch one job and print the backend's external id.
    Dispatch(DispatchArgs),
}

/// Arguments shared by every command that loads a configuration.
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Dispatcher configuration file (YAML).
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override a plugin data value (repeatable).
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,

    /// File holding the runner identity token for `runner_id_token` auth.
    #[arg(long, env = "IDENTITY_TOKEN_FILE")]
    pub identity_token_file: Option<PathBuf>,
}

/// Arguments for `job-dispatcher dispatch`.
#[derive(Parser, Debug)]
pub struct DispatchArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Identifier of the job to launch.
    #[arg(long)]
    pub job_id: String,

    /// Bearer token forwarded to the job.
    #[arg(long, env = "JOB_TOKEN", hide_env_values = true)]
    pub token: String,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with already parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Validate(args) => run_validate_command(args).await,
        Commands::Dispatch(args) => run_dispatch_command(args).await,
    }
}

async fn build_dispatcher(args: &ConfigArgs) -> anyhow::Result<Box<dyn JobDispatcher>> {
    let config = DispatcherConfig::from_file(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?
        .with_overrides(args.overrides.iter().map(String::as_str))?;

    let mut deps = DispatcherDeps::new();
    if let Some(path) = &args.identity_token_file {
        deps = deps.with_identity_token_source(Arc::new(FileIdentityTokenSource::new(path)));
    }

    let dispatcher = new_job_dispatcher(&config, deps)
        .await
        .with_context(|| format!("invalid {} dispatcher configuration", config.dispatcher_type))?;
    Ok(dispatcher)
}

async fn run_validate_command(args: ConfigArgs) -> anyhow::Result<()> {
    build_dispatcher(&args).await?;
    info!(config = %args.config.display(), "Dispatcher configuration is valid");
    println!("configuration ok");
    Ok(())
}

async fn run_dispatch_command(args: DispatchArgs) -> anyhow::Result<()> {
    let dispatcher = build_dispatcher(&args.config).await?;
    let external_id = dispatcher.dispatch_job(&args.job_id, &args.token).await?;
    println!("{external_id}");
    Ok(())
}
