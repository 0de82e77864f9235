// Operator CLI for the LLM query engine

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use openai_client::OpenAIClient;
use query_engine::{
    CancellationToken, Fields, OpenAiService, OverrideScope, PostParse, QueryCategory,
    QueryEngine, QueryMode,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "ppa", about = "Run cached LLM extraction queries")]
struct Cli {
    /// Directory holding the query cache (overrides LLM_QUERY_CACHE_DIR)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one query per segment and print results as JSON lines
    Stage {
        /// Query category, e.g. data_entity
        #[arg(long)]
        category: QueryCategory,

        /// File with the system prompt
        #[arg(long)]
        system_prompt: PathBuf,

        /// File with the user-prompt template
        #[arg(long)]
        template: PathBuf,

        #[arg(long, default_value = "gpt-4o")]
        model: String,

        /// JSON lines: a field object or a bare segment string per line
        #[arg(long)]
        segments: PathBuf,

        /// Submit through the Batch API instead of one call per segment
        #[arg(long)]
        batch: bool,

        /// none, all, or a comma-separated category list
        #[arg(long = "override", default_value = "none")]
        override_scope: OverrideScope,

        /// Derived field as TARGET=SOURCE, e.g. sentence=segment
        #[arg(long = "alias")]
        aliases: Vec<String>,

        /// Reduce each result to its text
        #[arg(long)]
        unwrap_text: bool,
    },

    /// Wait on every batch job with pending entries in the cache
    Resume,

    /// Delete the pending entries of a batch job
    Abandon { job_id: String },

    /// Show cache statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,query_engine=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = Config::from_env(cli.cache_dir).context("Failed to load configuration")?;
    let mut client = OpenAIClient::new(&config.openai_api_key);
    if let Some(url) = &config.openai_base_url {
        client = client.with_base_url(url);
    }
    let llm = Arc::new(OpenAiService::new(client));

    let engine = QueryEngine::open(config.engine_config(), llm)
        .await
        .context("Failed to open query cache")?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping");
            trigger.cancel();
        }
    });

    match cli.command {
        Command::Stage {
            category,
            system_prompt,
            template,
            model,
            segments,
            batch,
            override_scope,
            aliases,
            unwrap_text,
        } => {
            let system_prompt = read_file(&system_prompt).await?;
            let template = read_file(&template).await?;
            let fields = read_segments(&segments).await?;

            let mut helper = engine.helper(category, system_prompt, template, model);
            for alias in &aliases {
                let (to, from) = alias
                    .split_once('=')
                    .with_context(|| format!("Alias must be TARGET=SOURCE, got {}", alias))?;
                helper = helper.with_alias(to, from);
            }
            if unwrap_text {
                helper = helper.with_post_parse(PostParse::UnwrapText);
            }

            let mode = if batch { QueryMode::Batch } else { QueryMode::Sync };
            let results = helper
                .run_stage(&fields, &override_scope, mode, &cancel)
                .await
                .context("Stage failed")?;

            let mut failures = 0;
            for (index, result) in results.into_iter().enumerate() {
                let line = match result {
                    Ok(value) => json!({"index": index, "value": value}),
                    Err(e) => {
                        failures += 1;
                        json!({"index": index, "error": e.to_string()})
                    }
                };
                println!("{}", line);
            }
            tracing::info!(category = %category, count = fields.len(), failures, "Stage finished");
        }

        Command::Resume => {
            let jobs = engine.batch().resume().await.context("Failed to load pending jobs")?;
            if jobs == 0 {
                tracing::info!("No pending batch jobs");
                return Ok(());
            }
            let report = engine
                .batch()
                .await_and_resolve(None, &cancel)
                .await
                .context("Failed to resolve batch jobs")?;
            for outcome in &report.outcomes {
                println!("{}", serde_json::to_string(outcome)?);
            }
            let errored = report.errored().count();
            if errored > 0 {
                bail!("{} batch job(s) could not be resolved; run resume again", errored);
            }
            let failed = report.failed().count();
            if failed > 0 {
                bail!("{} batch job(s) did not complete; abandon them to resubmit", failed);
            }
        }

        Command::Abandon { job_id } => {
            let removed = engine
                .batch()
                .abandon(&job_id)
                .await
                .with_context(|| format!("Failed to abandon job {}", job_id))?;
            println!("{}", json!({"job_id": job_id, "removed": removed}));
        }

        Command::Stats => {
            let stats = engine.stats().await.context("Failed to read cache statistics")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

async fn read_file(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

/// One field object per non-empty line; a bare string becomes `{"segment": ...}`.
async fn read_segments(path: &Path) -> Result<Vec<Fields>> {
    let content = read_file(path).await?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| -> Result<Fields> {
            let value: Value = serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid JSON", path.display(), number + 1))?;
            match value {
                Value::Object(fields) => Ok(fields),
                Value::String(segment) => {
                    let mut fields = Fields::new();
                    fields.insert("segment".to_string(), Value::String(segment));
                    Ok(fields)
                }
                other => bail!(
                    "{}:{}: expected an object or a string, got {}",
                    path.display(),
                    number + 1,
                    other
                ),
            }
        })
        .collect()
}
