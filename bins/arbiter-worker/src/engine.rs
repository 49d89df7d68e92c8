/// Execution Engine - Sandboxed Runner
///
/// **Core Responsibility:**
/// Run one candidate against an ordered test suite inside guarded worker
/// processes and resolve a coarse status plus a per-case outcome vector.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (processes, limits, deadlines, scratch dirs)
/// - Engine delegates every correctness decision to the Equivalence Checker
///
/// **Timing Rules:**
/// - Per-case limit: `max(50ms, 2 x ref_time)`
/// - Overall deadline: `min(5s, sum(ref_time) + 1s)`, plus 1s grace before the
///   worker is stopped and the candidate is reported `timed_out`
///
/// **Worker Rules:**
/// - Cases run strictly in order inside one worker
/// - A worker that hangs or crashes on a case is stopped and a fresh one is
///   started for the remaining cases
/// - The verdict future is the only result channel; its outcome is read once
///   the worker has been stopped
use crate::config::{harness_source, scratch_root};
use crate::confine::landlock_abi;
use crate::evaluator;
use crate::process::{file_name, CaseOutcome, SpawnFailure, Worker, CANDIDATE_FILE, HARNESS_FILE};
use crate::sandbox::{ResourceGuard, ScratchDir, TeardownCapability};
use anyhow::{anyhow, Context, Result};
use arbiter_common::config::RuntimeConfig;
use arbiter_common::types::{ExecutionResult, ExecutionStatus, TestSuite};
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Process-based execution engine for untrusted candidates
pub struct ProcessEngine {
    config: RuntimeConfig,
    harness: String,
    guard: ResourceGuard,
    scratch_root: PathBuf,
}

impl ProcessEngine {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let harness = harness_source(&config)?;
        let guard = ResourceGuard::from_config(&config.sandbox);
        let scratch_root = scratch_root(&config);
        if config.sandbox.confine_filesystem && landlock_abi().is_none() {
            warn!("Landlock unavailable; candidates can write outside their scratch directory");
        }
        Ok(Self {
            config,
            harness,
            guard,
            scratch_root,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Whether the configured interpreter can be started at all
    pub async fn is_available(&self) -> bool {
        tokio::process::Command::new(&self.config.interpreter.command)
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Evaluate `code` against `suite`
    ///
    /// Never fails: infrastructure problems are logged and reported as `failed`.
    #[instrument(skip_all, fields(entry_point = %suite.entry_point, cases = suite.cases.len()))]
    pub async fn run(&self, code: &str, suite: &TestSuite, fast_check: bool) -> ExecutionResult {
        let total = suite.cases.len();
        let budget = self.config.timing.budget(suite.ref_times());
        let start = Instant::now();

        let (scratch, capability) = match ScratchDir::create(&self.scratch_root) {
            Ok(created) => created,
            Err(e) => {
                warn!(error = %e, "Failed to prepare scratch directory");
                return ExecutionResult::resolve(Some(ExecutionStatus::Failed), Vec::new(), total);
            }
        };

        let mut session = Session {
            engine: self,
            code,
            entry_point: &suite.entry_point,
            scratch,
            capability: Some(capability),
            worker: None,
            details: Vec::with_capacity(total),
        };

        let verdict = match tokio::time::timeout(budget, session.run_cases(suite, fast_check)).await {
            Ok(status) => Some(status),
            Err(_) => {
                warn!(budget_ms = budget.as_millis() as u64, "Candidate exceeded its deadline");
                None
            }
        };

        let details = session.finish().await;
        let result = ExecutionResult::resolve(verdict, details, total);

        info!(
            status = %result.status,
            recorded = result.recorded,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Candidate evaluated"
        );
        result
    }
}

/// State of one candidate evaluation
struct Session<'a> {
    engine: &'a ProcessEngine,
    code: &'a str,
    entry_point: &'a str,
    scratch: ScratchDir,
    capability: Option<TeardownCapability>,
    worker: Option<Worker>,
    details: Vec<bool>,
}

impl Session<'_> {
    /// Per-case loop; the returned status is the raw worker verdict
    async fn run_cases(&mut self, suite: &TestSuite, fast_check: bool) -> ExecutionStatus {
        let engine = self.engine;
        let timing = &engine.config.timing;

        for (index, case) in suite.cases.iter().enumerate() {
            let limit = timing.case_limit(case.ref_time);

            let outcome = match self.ensure_worker().await {
                Ok(worker) => worker.invoke(&case.input, limit).await,
                Err(e) => {
                    debug!(case = index, error = %e, "Candidate could not be loaded");
                    return ExecutionStatus::Failed;
                }
            };

            let passed = match &outcome {
                CaseOutcome::Returned(observed) => evaluator::matches(
                    observed,
                    &case.expected,
                    suite.atol,
                    &suite.entry_point,
                    &case.input,
                ),
                _ => false,
            };

            if passed {
                self.details.push(true);
                continue;
            }

            debug!(case = index, outcome = ?outcome, "Case failed");
            if fast_check {
                return ExecutionStatus::Failed;
            }
            self.details.push(false);
            if outcome.poisons_worker() {
                self.retire_worker().await;
            }
        }

        ExecutionStatus::Success
    }

    /// Current worker, starting and handshaking a new one when needed
    async fn ensure_worker(&mut self) -> Result<&mut Worker> {
        if self.worker.is_none() {
            self.stage()?;
            let capability = self
                .capability
                .take()
                .ok_or_else(|| anyhow!("Teardown capability is held elsewhere"))?;

            let engine = self.engine;
            let worker = match Worker::spawn(
                &engine.config.interpreter,
                &engine.guard,
                &self.scratch,
                self.entry_point,
                capability,
            ) {
                Ok(worker) => worker,
                Err(SpawnFailure { error, capability }) => {
                    self.capability = Some(capability);
                    return Err(error);
                }
            };

            // Stored before the handshake so a deadline hit while loading
            // still leaves the worker for `finish` to stop
            self.worker.insert(worker).handshake().await?;
        }

        self.worker.as_mut().ok_or_else(|| anyhow!("Worker vanished"))
    }

    /// Write the harness and the candidate into the scratch directory.
    /// Rewritten before every spawn so an earlier worker cannot tamper with them.
    fn stage(&self) -> Result<()> {
        let extension = &self.engine.config.interpreter.file_extension;
        let dir = self.scratch.path();
        fs::write(dir.join(file_name(HARNESS_FILE, extension)), &self.engine.harness)
            .context("Failed to stage harness")?;
        fs::write(dir.join(file_name(CANDIDATE_FILE, extension)), self.code)
            .context("Failed to stage candidate")?;
        Ok(())
    }

    async fn retire_worker(&mut self) {
        let pause = self.engine.config.timing.terminate_pause();
        if let Some(worker) = self.worker.as_mut() {
            self.capability = worker.stop(pause).await;
            self.worker = None;
        }
    }

    /// Stop the worker, tear the scratch directory down, then hand out the details
    async fn finish(mut self) -> Vec<bool> {
        self.retire_worker().await;

        let details = std::mem::take(&mut self.details);
        match self.capability.take() {
            Some(capability) => {
                if let Err(e) = self.scratch.teardown(capability) {
                    warn!(error = %e, "Scratch teardown failed");
                }
            }
            None => warn!("Teardown capability lost; relying on drop cleanup"),
        }
        details
    }
}
