mod config;
mod confine;
mod engine;
mod evaluator;
mod executor;
mod process;
mod sandbox;

use anyhow::{bail, Context, Result};
use arbiter_common::types::{CandidateReport, EvaluationReport, JobFile, ProblemJob};
use engine::ProcessEngine;
use futures_util::stream::{self, StreamExt};
use std::path::PathBuf;
use std::time::Instant;
use tokio::signal;
use tracing::{error, info, instrument, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Arbiter worker booting...");

    let config = config::load_default().map_err(|e| {
        error!("Failed to load runtime configuration: {:#}", e);
        error!("Check config/runtime.json or ARBITER_CONFIG");
        e
    })?;
    let parallel = config.max_parallel_problems;
    let engine = ProcessEngine::new(config)?;

    if !engine.is_available().await {
        warn!(
            interpreter = %engine.config().interpreter.command,
            "Interpreter did not answer --version; every candidate will fail"
        );
    }

    let job_path = PathBuf::from(std::env::var("JOB_FILE").unwrap_or_else(|_| "job.json".to_string()));
    let results_path =
        PathBuf::from(std::env::var("RESULTS_FILE").unwrap_or_else(|_| "results.json".to_string()));

    let content = std::fs::read_to_string(&job_path)
        .with_context(|| format!("Failed to read job file {}", job_path.display()))?;
    let job: JobFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse job file {}", job_path.display()))?;

    info!(
        job = %job_path.display(),
        problems = job.problems.len(),
        parallel,
        "Job loaded"
    );

    let start = Instant::now();
    let report = tokio::select! {
        report = run_job(&engine, job.problems, parallel) => report?,
        interrupted = signal::ctrl_c() => {
            interrupted.context("Failed to listen for shutdown signal")?;
            warn!("Received shutdown signal, abandoning job");
            bail!("Interrupted before the report was written");
        }
    };

    for (task_id, samples, correct) in report.pass_counts() {
        info!(task_id, samples, correct, "Problem evaluated");
    }

    let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
    std::fs::write(&results_path, json)
        .with_context(|| format!("Failed to write report {}", results_path.display()))?;

    info!(
        report = %results_path.display(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Worker finished"
    );
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    if std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false) {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Evaluate up to `parallel` problems at a time; results keep job order
async fn run_job(engine: &ProcessEngine, problems: Vec<ProblemJob>, parallel: usize) -> Result<EvaluationReport> {
    let outcomes: Vec<_> = stream::iter(problems)
        .map(|problem| run_problem(engine, problem))
        .buffered(parallel.max(1))
        .collect()
        .await;

    let mut report = EvaluationReport::new();
    for outcome in outcomes {
        let (task_id, reports) = outcome?;
        if report.results.insert(task_id.clone(), reports).is_some() {
            bail!("Duplicate task id in job file: {}", task_id);
        }
    }
    Ok(report)
}

#[instrument(skip_all, fields(task_id = %problem.task_id))]
async fn run_problem(
    engine: &ProcessEngine,
    problem: ProblemJob,
) -> Result<(String, Vec<CandidateReport>)> {
    let sources = executor::discover(&problem.candidates_dir, &engine.config().interpreter.file_extension)?;
    let suite = problem.suite();
    info!(
        candidates = sources.len(),
        cases = suite.cases.len(),
        fast_check = problem.fast_check,
        "Evaluating problem"
    );

    let reports = executor::evaluate_all(engine, &sources, &suite, problem.fast_check)
        .await
        .with_context(|| format!("Problem {} could not be evaluated", problem.task_id))?;
    Ok((problem.task_id, reports))
}
