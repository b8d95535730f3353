//! Migration Orchestrator - CLI
//!
//! One subcommand per run mode, plus batch execution and rollback.
//! Exit codes: 0 success, 1 partial, 2 failed, 3 bad input.

use anyhow::Result;
use clap::{Parser, Subcommand};
use migration_orchestrator::apply::rollback_migration_file;
use migration_orchestrator::config::{MigrationConfig, Scope};
use migration_orchestrator::gitlab::{GitLabApi, GitLabClient};
use migration_orchestrator::github::{GitHubApi, GitHubClient};
use migration_orchestrator::pipeline::batch::{BatchOrchestrator, ClientFactory};
use migration_orchestrator::pipeline::{MigrationMode, PipelineOrchestrator, StageName};
use migration_orchestrator::ratelimit::RateLimiter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const GITHUB_API_URL: &str = "https://api.github.com";

#[derive(Parser)]
#[command(name = "migrator")]
#[command(about = "GitLab to GitHub migration orchestrator")]
struct Cli {
    /// Run id; defaults to a fresh UUID (env: RUN_ID)
    #[arg(long, env = "RUN_ID")]
    run_id: Option<String>,

    /// Artifact root directory (env: ARTIFACT_ROOT)
    #[arg(long, env = "ARTIFACT_ROOT")]
    artifact_root: Option<PathBuf>,

    /// Stage to resume from
    #[arg(long)]
    resume_from: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the source and build the project inventory
    Discover,
    /// Discover, then export the first project in scope
    Export {
        /// Resume the export from its checkpoint
        #[arg(long)]
        resume: bool,
    },
    /// Run through the transform stage
    Transform,
    /// Run through plan generation
    Plan,
    /// Full pipeline with a simulated apply (no destination writes)
    DryRun,
    /// Full pipeline up to and including apply
    Apply,
    /// Verify a previously applied migration
    Verify,
    /// The whole pipeline: discover through verify
    Full,
    /// Migrate several projects in parallel
    Batch {
        /// Comma-separated GitLab project ids
        #[arg(long, value_delimiter = ',')]
        project_ids: Vec<u64>,
        /// Maximum concurrent migrations
        #[arg(long, default_value = "5")]
        parallel_limit: usize,
    },
    /// Roll back a previous apply from its executed-actions record
    Rollback {
        /// Path to apply/executed_actions.json
        #[arg(long)]
        executed_actions: PathBuf,
    },
}

fn parse_stage(name: &str) -> Option<StageName> {
    match name {
        "discovery" => Some(StageName::Discovery),
        "export" => Some(StageName::Export),
        "transform" => Some(StageName::Transform),
        "plan" => Some(StageName::Plan),
        "apply" => Some(StageName::Apply),
        "verify" => Some(StageName::Verify),
        _ => None,
    }
}

fn build_clients(
    config: &MigrationConfig,
    gitlab_limiter: Arc<RateLimiter>,
    github_limiter: Arc<RateLimiter>,
) -> Result<(Arc<dyn GitLabApi>, Arc<dyn GitHubApi>)> {
    let gitlab = GitLabClient::new(
        &config.gitlab_url,
        &config.gitlab_token,
        gitlab_limiter,
        Duration::from_secs(config.timeouts.http),
    )?;
    let github = GitHubClient::new(
        GITHUB_API_URL,
        &config.github_token,
        github_limiter,
        Duration::from_secs(config.timeouts.http),
    )?;
    Ok((Arc::new(gitlab), Arc::new(github)))
}

async fn run_pipeline(config: MigrationConfig, mode: MigrationMode, resume: Option<StageName>) -> Result<i32> {
    let (gitlab, github) =
        build_clients(&config, RateLimiter::gitlab(), RateLimiter::github())?;
    let orchestrator = PipelineOrchestrator::new(gitlab, github, config);
    let result = orchestrator.run_migration(mode, resume).await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.status.exit_code())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,migration_orchestrator=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = match MigrationConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(3);
        }
    };
    if let Some(run_id) = cli.run_id {
        config.run_id = run_id;
    }
    if let Some(root) = cli.artifact_root {
        config.artifact_root = root;
    }

    let resume = match cli.resume_from.as_deref() {
        Some(name) => match parse_stage(name) {
            Some(stage) => Some(stage),
            None => {
                eprintln!("Unknown stage '{name}' for --resume-from");
                std::process::exit(3);
            }
        },
        None => None,
    };

    let exit_code = match cli.command {
        Commands::Discover => {
            run_pipeline(config, MigrationMode::DiscoverOnly, resume).await?
        }
        Commands::Export { resume: resume_export } => {
            config.resume = resume_export;
            run_pipeline(config, MigrationMode::ExportOnly, resume).await?
        }
        Commands::Transform => {
            run_pipeline(config, MigrationMode::TransformOnly, resume).await?
        }
        Commands::Plan => run_pipeline(config, MigrationMode::PlanOnly, resume).await?,
        Commands::DryRun => run_pipeline(config, MigrationMode::DryRun, resume).await?,
        Commands::Apply => run_pipeline(config, MigrationMode::Apply, resume).await?,
        Commands::Verify => run_pipeline(config, MigrationMode::Verify, resume).await?,
        Commands::Full => run_pipeline(config, MigrationMode::Full, resume).await?,

        Commands::Batch {
            project_ids,
            parallel_limit,
        } => {
            if project_ids.is_empty() {
                eprintln!("--project-ids must name at least one project");
                std::process::exit(3);
            }

            // One limiter per API, shared across every project's clients.
            let gitlab_limiter = RateLimiter::gitlab();
            let github_limiter = RateLimiter::github();
            let factory: ClientFactory = {
                let gitlab_limiter = gitlab_limiter.clone();
                let github_limiter = github_limiter.clone();
                Arc::new(move |project_config: &MigrationConfig| {
                    build_clients(
                        project_config,
                        gitlab_limiter.clone(),
                        github_limiter.clone(),
                    )
                    .expect("client construction")
                })
            };

            let configs: Vec<MigrationConfig> = project_ids
                .iter()
                .map(|&id| {
                    let mut project_config = config.clone();
                    project_config.scope = Scope::Project(id);
                    project_config.artifact_root =
                        config.artifact_root.join(format!("project-{id}"));
                    project_config
                })
                .collect();

            let batch = BatchOrchestrator::new(factory);
            let result = batch
                .execute_batch_migration(configs, MigrationMode::Full, parallel_limit, resume)
                .await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            match result.status.as_str() {
                "success" => 0,
                "partial_success" => 1,
                _ => 2,
            }
        }

        Commands::Rollback { executed_actions } => {
            let (_, github) =
                build_clients(&config, RateLimiter::gitlab(), RateLimiter::github())?;
            let report =
                rollback_migration_file(github, &config.github_token, &executed_actions).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            match report.status.as_str() {
                "success" => 0,
                "partial" => 1,
                _ => 2,
            }
        }
    };

    std::process::exit(exit_code);
}
