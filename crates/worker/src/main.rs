// Scout worker and CLI
//
// Design Decision: One binary both hosts the scheduler (`scout run`) and
// drives single queries from the shell.
// Design Decision: Use clap derive with env fallbacks, text/json output.

mod bootstrap;
mod commands;
mod config;
mod output;
mod telemetry;

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use scout_durable::directory::SearchParams;
use scout_durable::EngineConfig;
use uuid::Uuid;

use crate::bootstrap::App;
use crate::config::WorkerConfig;
use crate::output::OutputFormat;
use crate::telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "scout")]
#[command(about = "Scout - match people to a query through public directories")]
#[command(version)]
pub struct Cli {
    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Actor the work is billed to
    #[arg(long, env = "SCOUT_ACTOR")]
    pub actor: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resume pending tasks and keep processing until Ctrl-C
    Run,

    /// Match contributors of GitHub repositories found for a query
    Github {
        /// Free-text query
        text: String,

        /// Repository search keyword (repeatable); without any, the query
        /// text is turned into keywords by the language model
        #[arg(long = "keyword", short)]
        keywords: Vec<String>,

        /// Programming language (repeatable)
        #[arg(long)]
        language: Vec<String>,

        /// Location of interest (repeatable)
        #[arg(long)]
        location: Vec<String>,

        /// Role the query is looking for (repeatable)
        #[arg(long)]
        role: Vec<String>,

        /// Seconds to wait for summaries once the search is done
        #[arg(long, default_value = "60")]
        summary_wait: u64,
    },

    /// Search LinkedIn profiles for a query
    Linkedin {
        /// Free-text query
        text: String,

        /// Seconds to wait for summaries once the search is done
        #[arg(long, default_value = "60")]
        summary_wait: u64,
    },

    /// Show a task's progress and matches
    Status {
        task_id: Uuid,
    },

    /// Cancel a task
    Cancel {
        task_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_telemetry(&TelemetryConfig::from_env());

    let cli = Cli::parse();
    let config = WorkerConfig::from_env();
    let mut engine = EngineConfig::from_env();
    if let Some(actor) = cli.actor {
        engine = engine.with_actor(actor);
    }

    tracing::debug!(
        database = config.database_url.is_some(),
        actor = %engine.actor,
        "starting scout"
    );
    let app = App::new(&config, engine).await?;

    match cli.command {
        Commands::Run => commands::run(&app).await,
        Commands::Github {
            text,
            keywords,
            language,
            location,
            role,
            summary_wait,
        } => {
            let hints = SearchParams {
                keywords,
                role,
                language,
                location,
            };
            commands::github(
                &app,
                cli.output,
                text,
                hints,
                Duration::from_secs(summary_wait),
            )
            .await
        }
        Commands::Linkedin { text, summary_wait } => {
            commands::linkedin(&app, cli.output, text, Duration::from_secs(summary_wait)).await
        }
        Commands::Status { task_id } => commands::status(&app, cli.output, task_id).await,
        Commands::Cancel { task_id } => commands::cancel(&app, cli.output, task_id).await,
    }
}
