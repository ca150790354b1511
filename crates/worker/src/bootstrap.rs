// Process bootstrap
//
// Picks the task store, builds the HTTP clients and wires the engine.

use std::sync::Arc;

use anyhow::{Context, Result};
use scout_directory::{GitHubClient, LinkedInSearchClient, OpenAiClient};
use scout_durable::persistence::{InMemoryTaskStore, PostgresTaskStore, TaskStore};
use scout_durable::{EngineConfig, QueryService, TaskContext, TaskScheduler};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::config::WorkerConfig;

pub struct App {
    pub engine: EngineConfig,
    pub service: QueryService,
}

impl App {
    pub async fn new(config: &WorkerConfig, engine: EngineConfig) -> Result<Self> {
        let store = connect_store(config).await?;

        let github = GitHubClient::with_timeout(
            credential(&config.github_token, "GITHUB_TOKEN"),
            config.http_timeout,
        )
        .context("Failed to build GitHub client")?;
        let linkedin = LinkedInSearchClient::with_timeout(
            credential(&config.google_api_key, "GOOGLE_API_KEY"),
            credential(&config.google_engine_id, "GOOGLE_LINKEDIN_ENGINE_ID"),
            config.http_timeout,
        )
        .context("Failed to build LinkedIn search client")?;
        let openai = Arc::new(
            OpenAiClient::with_timeout(
                credential(&config.openai_api_key, "OPENAI_API_KEY"),
                config.http_timeout,
            )
            .context("Failed to build OpenAI client")?
            .with_model(&config.openai_model),
        );

        let ctx = Arc::new(TaskContext::new(
            &engine,
            store,
            Arc::new(github),
            Arc::new(linkedin),
            openai.clone(),
            openai,
        ));
        let service = QueryService::new(TaskScheduler::new(ctx));

        Ok(Self { engine, service })
    }

    /// Re-admit every task that was still pending when the last process stopped
    pub async fn resume(&self) -> Result<usize> {
        let resumed = self
            .service
            .scheduler()
            .resume_all()
            .await
            .context("Failed to load active tasks")?;
        info!(resumed, "resumed active tasks");
        Ok(resumed)
    }
}

async fn connect_store(config: &WorkerConfig) -> Result<Arc<dyn TaskStore>> {
    let Some(url) = &config.database_url else {
        warn!("DATABASE_URL not set, tasks will not survive a restart");
        return Ok(Arc::new(InMemoryTaskStore::new()));
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(url)
        .await
        .context("Failed to connect to database")?;
    let store = PostgresTaskStore::new(pool);
    store.migrate().await.context("Failed to run migrations")?;
    info!("connected to task database");
    Ok(Arc::new(store))
}

/// Missing credentials only fail the calls that need them
fn credential(value: &Option<String>, name: &str) -> String {
    match value {
        Some(value) => value.clone(),
        None => {
            warn!(variable = name, "credential not set, requests that need it will fail");
            String::new()
        }
    }
}
