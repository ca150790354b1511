// Command implementations

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use scout_durable::directory::SearchParams;
use scout_durable::{QueryService, RankedMatch, TaskSnapshot, TaskStatus};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::bootstrap::App;
use crate::output::{self, OutputFormat};

/// How often a followed task is polled
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Serialize)]
struct TaskReport {
    task: TaskSnapshot,
    matches: Vec<RankedMatch>,
}

/// Keep stepping resumed tasks until interrupted
pub async fn run(app: &App) -> Result<()> {
    app.resume().await?;
    info!("worker running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!(
        active_actors = app.service.scheduler().active_actors().len(),
        "shutdown requested, pending tasks resume on next start"
    );
    Ok(())
}

pub async fn github(
    app: &App,
    format: OutputFormat,
    text: String,
    hints: SearchParams,
    summary_wait: Duration,
) -> Result<()> {
    let task_id = app
        .service
        .start_contributors_match(&app.engine.actor, &text, hints, app.engine.contributors)
        .await
        .context("Failed to start contributors match")?;
    follow(&app.service, format, task_id, summary_wait).await
}

pub async fn linkedin(
    app: &App,
    format: OutputFormat,
    text: String,
    summary_wait: Duration,
) -> Result<()> {
    let task_id = app
        .service
        .start_profiles_match(&app.engine.actor, &text, app.engine.profiles)
        .await
        .context("Failed to start profiles match")?;
    follow(&app.service, format, task_id, summary_wait).await
}

pub async fn status(app: &App, format: OutputFormat, task_id: Uuid) -> Result<()> {
    let task = app
        .service
        .task_state(task_id)
        .await
        .with_context(|| format!("Failed to read task {task_id}"))?;
    let matches = app.service.matches(task_id).await?;

    if format.is_text() {
        output::print_snapshot(&task);
        println!();
        output::print_matches(&matches);
        return Ok(());
    }
    format.print_value(&TaskReport { task, matches })
}

pub async fn cancel(app: &App, format: OutputFormat, task_id: Uuid) -> Result<()> {
    let status = app
        .service
        .cancel_task(task_id)
        .await
        .with_context(|| format!("Failed to cancel task {task_id}"))?;

    if format.is_text() {
        output::print_field("Task", &task_id.to_string());
        output::print_field("Status", status.as_str());
        return Ok(());
    }
    format.print_value(&serde_json::json!({ "task_id": task_id, "status": status }))
}

/// Poll a task until it is terminal, then wait a bounded time for summaries
async fn follow(
    service: &QueryService,
    format: OutputFormat,
    task_id: Uuid,
    summary_wait: Duration,
) -> Result<()> {
    if format.is_text() {
        output::print_field("Task", &task_id.to_string());
    }

    let mut last_line = String::new();
    let task = loop {
        let snapshot = service.task_state(task_id).await?;
        if format.is_text() {
            let line = output::progress_line(&snapshot);
            if line != last_line {
                println!("{line}");
                last_line = line;
            }
        }
        if snapshot.status.is_terminal() {
            break snapshot;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    let deadline = Instant::now() + summary_wait;
    let matches = loop {
        let matches = service.matches(task_id).await?;
        let settled = task.status == TaskStatus::Cancelled
            || matches.iter().all(|m| m.summary.is_some());
        if settled || Instant::now() >= deadline {
            break matches;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    if format.is_text() {
        println!();
        output::print_matches(&matches);
        return Ok(());
    }
    format.print_value(&TaskReport { task, matches })
}
