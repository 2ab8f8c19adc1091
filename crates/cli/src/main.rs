//! Hive CLI entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Wire observability**: `tracing-subscriber` with a JSON layer and, when
//!    `OTEL_EXPORTER_OTLP_ENDPOINT` is set, an OpenTelemetry OTLP exporter.
//! 2. **Load configuration**: engine settings from `HIVE_*` variables and the
//!    provider connection from `HIVE_API_*` / `HIVE_MODEL`.
//! 3. **Construct infrastructure**: the OpenAI-compatible provider, the
//!    orchestrator, an in-memory task pool and the LLM workers.
//! 4. **Drain**: load the task file, run the swarm until the pool is empty,
//!    then print task outcomes and the cost report to stdout.
//!
//! Usage: `hive <tasks.json>` where the file holds a JSON array of
//! `{"title", "description", "priority"?, "metadata"?}` objects.

mod settings;
mod telemetry;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use domain::{NewTask, SystemClock, TaskFilter, TaskStatus};
use engine::{LlmWorker, Orchestrator, PriceTable, StartOptions, TaskPool, Worker};
use llm::{OpenAiCompatibleProvider, ProviderConfig};
use tracing::info;

use crate::settings::Settings;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let _telemetry = telemetry::init()?;

    let path = match std::env::args().nth(1) {
        Some(path) => path,
        None => bail!("usage: hive <tasks.json>"),
    };

    let settings = Settings::from_env().context("invalid HIVE_* settings")?;
    let provider_config = ProviderConfig::from_env().context("invalid provider settings")?;
    let model = provider_config.default_model.clone();
    info!(provider = ?provider_config, workers = settings.engine.swarm.workers, "Starting Hive");

    let provider = Arc::new(OpenAiCompatibleProvider::new(provider_config)?);
    let orchestrator = Arc::new(Orchestrator::new(
        provider,
        &settings.engine,
        PriceTable::with_defaults(),
        Arc::new(SystemClock),
    )?);

    let pool = Arc::new(TaskPool::in_memory());
    for input in load_tasks(Path::new(&path))? {
        pool.create_task(input).await?;
    }

    let workers = build_workers(&settings, &orchestrator, model)?;
    let summary = orchestrator
        .drain_pool(
            pool.clone(),
            workers,
            StartOptions::from(&settings.engine.swarm),
        )
        .await?;

    for task in pool.query(&TaskFilter::default()).await? {
        let detail = match task.status {
            TaskStatus::Completed => task
                .result
                .as_ref()
                .and_then(|r| r["content"].as_str())
                .unwrap_or_default()
                .to_string(),
            _ => task.error.clone().unwrap_or_default(),
        };
        println!("[{}] {} ({}): {}", task.status, task.title, task.id, detail.trim());
    }
    println!();
    println!("{}", orchestrator.costs().get_report());

    let stats = pool.get_stats().await?;
    println!(
        "Tasks: {} completed, {} failed, {} pending",
        stats.completed, stats.failed, stats.pending
    );
    info!(
        iterations = summary.iterations,
        dispatched = summary.dispatched,
        "Run finished"
    );

    Ok(if stats.failed > 0 || stats.pending > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn load_tasks(path: &Path) -> Result<Vec<NewTask>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read task file {}", path.display()))?;
    let tasks: Vec<NewTask> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse task file {}", path.display()))?;
    Ok(tasks)
}

fn build_workers(
    settings: &Settings,
    orchestrator: &Arc<Orchestrator>,
    model: domain::ModelName,
) -> Result<Vec<Arc<dyn Worker>>> {
    (0..settings.engine.swarm.workers)
        .map(|n| {
            let mut worker = LlmWorker::new(&format!("worker-{n}"), orchestrator.clone(), model.clone())?;
            if let Some(prompt) = &settings.system_prompt {
                worker = worker.with_system_prompt(prompt.clone());
            }
            if let Some(temperature) = settings.temperature {
                worker = worker.with_temperature(temperature);
            }
            if let Some(max_tokens) = settings.max_tokens {
                worker = worker.with_max_tokens(max_tokens);
            }
            Ok(Arc::new(worker) as Arc<dyn Worker>)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_tasks_parses_array() {
        let path = std::env::temp_dir().join(format!("hive-tasks-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"[
                {"title": "Summarize", "description": "the quarterly report", "priority": "high"},
                {"title": "Translate", "description": "the abstract", "metadata": {"required_capability": "french"}}
            ]"#,
        )
        .unwrap();
        let tasks = load_tasks(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].priority, Some(domain::Priority::High));
        assert_eq!(tasks[1].metadata["required_capability"], "french");
    }

    #[test]
    fn test_load_tasks_reports_missing_file() {
        let err = load_tasks(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read task file"));
    }
}
