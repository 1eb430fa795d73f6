//! Batch translation runner
//!
//! Usage:
//!   batch-translate                                          # Resume running jobs
//!   batch-translate submit <type> <source> <target> [--auto-publish] [--ids 1,2,3]
//!   batch-translate resume <job-id>
//!   batch-translate jobs                                     # List stored jobs
//!
//! The process exits once no job is active, or on Ctrl-C. Active jobs are
//! paused on exit and picked up again by the next run.

use anyhow::{bail, Context, Result};
use batch_translate::config::{Config, ProviderKind};
use batch_translate::executor::ExecutorContext;
use batch_translate::job::{JobId, JobParams};
use batch_translate::locale::Locale;
use batch_translate::manager::JobManager;
use batch_translate::provider::{DummyProvider, HttpProvider, HttpProviderConfig, TranslationProvider};
use batch_translate::retry::RetryPolicy;
use batch_translate::source::{EntityId, MemoryEntitySource};
use batch_translate::store::{JobStore, MemoryJobStore, PgJobStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

enum Command {
    Run,
    Submit(JobParams),
    Resume(JobId),
    Jobs,
}

fn print_usage() {
    eprintln!(
        r#"Usage:
  batch-translate                                          Resume running jobs
  batch-translate submit <type> <source> <target> [--auto-publish] [--ids 1,2,3]
  batch-translate resume <job-id>
  batch-translate jobs                                     List stored jobs"#
    );
}

fn parse_ids(raw: &str) -> Result<Vec<EntityId>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().with_context(|| format!("Invalid entity id '{}'", s)))
        .collect()
}

fn parse_submit(args: &[String]) -> Result<JobParams> {
    let [content_type, source, target, rest @ ..] = args else {
        bail!("submit needs <type> <source> <target>");
    };

    let mut params = JobParams::new(
        content_type.as_str(),
        Locale::parse(source)?,
        Locale::parse(target)?,
    );

    let mut rest = rest.iter();
    while let Some(flag) = rest.next() {
        match flag.as_str() {
            "--auto-publish" => params = params.with_auto_publish(true),
            "--ids" => {
                let raw = rest.next().context("--ids needs a comma-separated list")?;
                params = params.with_entity_ids(parse_ids(raw)?);
            }
            other => bail!("Unknown option: {}", other),
        }
    }
    Ok(params)
}

fn parse_command(args: &[String]) -> Result<Option<Command>> {
    let Some(command) = args.get(1) else {
        return Ok(Some(Command::Run));
    };

    let command = match command.as_str() {
        "submit" => Command::Submit(parse_submit(&args[2..])?),
        "resume" => {
            let id = args.get(2).context("resume needs a job id")?;
            Command::Resume(JobId::from(id.as_str()))
        }
        "jobs" => Command::Jobs,
        "--help" | "-h" | "help" => return Ok(None),
        other => bail!("Unknown command: {}", other),
    };
    Ok(Some(command))
}

async fn create_store(config: &Config) -> Result<Arc<dyn JobStore>> {
    match &config.database_url {
        Some(url) => Ok(Arc::new(PgJobStore::connect(url).await?)),
        None => {
            warn!("DATABASE_URL not set, jobs will not survive a restart");
            Ok(Arc::new(MemoryJobStore::new()))
        }
    }
}

fn create_provider(config: &Config) -> Result<Arc<dyn TranslationProvider>> {
    match config.provider {
        ProviderKind::Dummy => Ok(Arc::new(DummyProvider)),
        ProviderKind::Http => {
            let api_url = config
                .api_url
                .clone()
                .context("TRANSLATION_API_URL not set")?;
            let mut provider_config = HttpProviderConfig::new(api_url);
            provider_config.api_key = config.api_key.clone();
            provider_config.bounds = config.chunk_bounds();
            provider_config.max_parallel = config.max_parallel;
            provider_config.retry = RetryPolicy::default().with_attempts(config.max_attempts);
            Ok(Arc::new(HttpProvider::new(provider_config)?))
        }
    }
}

/// Wait until no job is active or Ctrl-C is pressed
async fn wait_for_jobs(manager: &JobManager) -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Shutdown requested");
                return Ok(());
            }
            _ = ticker.tick() => {
                if manager.active_jobs().await.is_empty() {
                    info!("No active jobs left");
                    return Ok(());
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("batch_translate=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = match parse_command(&args) {
        Ok(Some(command)) => command,
        Ok(None) => {
            print_usage();
            return Ok(());
        }
        Err(e) => {
            eprintln!("{:#}", e);
            print_usage();
            std::process::exit(2);
        }
    };

    let config = Config::from_env()?;
    let store = create_store(&config).await?;

    if let Command::Jobs = command {
        for job in store.list().await? {
            println!(
                "{}  {:<9}  {:>5.1}%  {} {} -> {}  ({}/{})",
                job.id,
                job.status.as_str(),
                job.progress * 100.0,
                job.params.content_type,
                job.params.source_locale,
                job.params.target_locale,
                job.translated_entities,
                job.total_entities
            );
        }
        return Ok(());
    }

    let source = if config.content_file.exists() {
        Arc::new(MemoryEntitySource::load(&config.content_file)?)
    } else {
        warn!(
            "Content file {} not found, starting empty",
            config.content_file.display()
        );
        Arc::new(MemoryEntitySource::new())
    };

    let provider = create_provider(&config)?;
    info!(provider = provider.name(), "Starting batch translation");

    let ctx = ExecutorContext::new(store, source.clone(), provider);
    let manager = JobManager::new(ctx).with_shutdown_grace(config.shutdown_grace());
    manager.bootstrap().await?;

    let started = match command {
        Command::Submit(params) => manager
            .submit_job(params)
            .await
            .map(|job| info!(job_id = %job.id, "Job started")),
        Command::Resume(id) => manager
            .resume_job(&id)
            .await
            .map(|job| info!(job_id = %job.id, "Job resumed")),
        Command::Run | Command::Jobs => Ok(()),
    };

    let waited = match started {
        Ok(()) => wait_for_jobs(&manager).await,
        Err(e) => Err(e.into()),
    };
    manager.destroy().await;
    source.save(&config.content_file)?;
    info!("Content saved to {}", config.content_file.display());
    waited
}
