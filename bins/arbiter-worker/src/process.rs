// Worker process management: spawn, talk to the harness, terminate
use crate::sandbox::{ResourceGuard, ScratchDir, TeardownCapability};
use anyhow::{anyhow, Context, Result};
use arbiter_common::config::InterpreterConfig;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::Deserialize;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

pub const HARNESS_FILE: &str = "harness";
pub const CANDIDATE_FILE: &str = "candidate";

/// First line the harness writes once the candidate is loaded (or failed to load)
#[derive(Debug, Deserialize)]
struct Handshake {
    ready: bool,
    #[serde(default)]
    error: Option<String>,
}

/// One reply per invocation request
#[derive(Debug, Deserialize)]
struct Reply {
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
}

/// What happened to a single invocation
#[derive(Debug, Clone, PartialEq)]
pub enum CaseOutcome {
    Returned(Value),
    Raised(String),
    TimedOut,
    Crashed(String),
}

impl CaseOutcome {
    /// A worker that hung or broke protocol cannot serve further cases
    pub fn poisons_worker(&self) -> bool {
        matches!(self, CaseOutcome::TimedOut | CaseOutcome::Crashed(_))
    }
}

/// Spawn error; hands the teardown capability back to the caller
pub struct SpawnFailure {
    pub error: anyhow::Error,
    pub capability: TeardownCapability,
}

/// One guarded interpreter process running the harness.
///
/// Holds the scratch directory's teardown capability for as long as it lives.
pub struct Worker {
    child: Child,
    group: Option<Pid>,
    stdin: Option<ChildStdin>,
    replies: Lines<BufReader<ChildStdout>>,
    capability: Option<TeardownCapability>,
}

impl Worker {
    /// Start the interpreter inside `scratch` with `guard` applied
    pub fn spawn(
        interpreter: &InterpreterConfig,
        guard: &ResourceGuard,
        scratch: &ScratchDir,
        entry_point: &str,
        capability: TeardownCapability,
    ) -> std::result::Result<Self, SpawnFailure> {
        let mut command = Command::new(&interpreter.command);
        command
            .args(&interpreter.args)
            .arg(file_name(HARNESS_FILE, &interpreter.file_extension))
            .arg(file_name(CANDIDATE_FILE, &interpreter.file_extension))
            .arg(entry_point)
            .current_dir(scratch.path())
            .env_clear()
            .env("PATH", std::env::var_os("PATH").unwrap_or_else(|| "/usr/bin:/bin".into()))
            .env("HOME", scratch.path())
            .env("TMPDIR", scratch.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Err(error) = guard.install(&mut command, scratch.path()) {
            return Err(SpawnFailure { error, capability });
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Err(SpawnFailure {
                    error: anyhow!(e).context(format!("Failed to spawn '{}'", interpreter.command)),
                    capability,
                })
            }
        };

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(SpawnFailure {
                error: anyhow!("Worker pipes were not captured"),
                capability,
            });
        };
        let group = child.id().map(|pid| Pid::from_raw(pid as i32));
        debug!(pid = ?group, "Worker spawned");

        Ok(Self {
            child,
            group,
            stdin: Some(stdin),
            replies: BufReader::new(stdout).lines(),
            capability: Some(capability),
        })
    }

    /// Wait for the harness to load the candidate and resolve the entry point
    pub async fn handshake(&mut self) -> Result<()> {
        let line = self
            .replies
            .next_line()
            .await
            .context("Failed to read worker handshake")?
            .ok_or_else(|| anyhow!("Worker exited before loading the candidate"))?;
        let handshake: Handshake =
            serde_json::from_str(&line).context("Malformed worker handshake")?;

        if handshake.ready {
            Ok(())
        } else {
            Err(anyhow!(
                "Candidate failed to load: {}",
                handshake.error.unwrap_or_else(|| "unknown error".to_string())
            ))
        }
    }

    /// Invoke the entry point with `args`, waiting at most `limit` for the reply
    pub async fn invoke(&mut self, args: &[Value], limit: Duration) -> CaseOutcome {
        let request = match serde_json::to_string(args) {
            Ok(request) => request,
            Err(e) => return CaseOutcome::Crashed(format!("unencodable input: {}", e)),
        };

        match tokio::time::timeout(limit, self.exchange(request)).await {
            Err(_) => CaseOutcome::TimedOut,
            Ok(Err(e)) => CaseOutcome::Crashed(e.to_string()),
            Ok(Ok(reply)) if reply.ok => CaseOutcome::Returned(reply.value),
            Ok(Ok(reply)) => {
                CaseOutcome::Raised(reply.error.unwrap_or_else(|| "unknown error".to_string()))
            }
        }
    }

    async fn exchange(&mut self, mut request: String) -> Result<Reply> {
        request.push('\n');
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("Worker input already closed"))?;
        stdin.write_all(request.as_bytes()).await?;
        stdin.flush().await?;

        let line = self
            .replies
            .next_line()
            .await?
            .ok_or_else(|| anyhow!("Worker exited mid-case"))?;
        serde_json::from_str(&line).context("Malformed worker reply")
    }

    /// Stop the worker and give back the teardown capability.
    ///
    /// Closes the request channel and waits `pause` for a clean exit, then
    /// sends SIGTERM to the worker's process group, waits `pause` again and
    /// escalates to SIGKILL. Whatever is left of the group is killed last.
    /// Safe to call again if an earlier call was cancelled midway.
    pub async fn stop(&mut self, pause: Duration) -> Option<TeardownCapability> {
        drop(self.stdin.take());

        if tokio::time::timeout(pause, self.child.wait()).await.is_err() {
            self.signal_group(Signal::SIGTERM);
            if tokio::time::timeout(pause, self.child.wait()).await.is_err() {
                warn!(pid = ?self.group, "Worker ignored SIGTERM, killing");
                self.signal_group(Signal::SIGKILL);
                if let Err(e) = self.child.kill().await {
                    warn!(pid = ?self.group, error = %e, "Failed to kill worker");
                }
            }
        }

        // Descendants that left the leader behind still share its group
        self.signal_group(Signal::SIGKILL);
        self.group = None;
        self.capability.take()
    }

    fn signal_group(&self, signal: Signal) {
        if let Some(group) = self.group {
            // ESRCH only means the group is already gone
            let _ = killpg(group, signal);
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Dropped without `stop`: the leader is unreaped, so the group id is still ours
        if self.capability.is_some() {
            self.signal_group(Signal::SIGKILL);
        }
    }
}

pub fn file_name(stem: &str, extension: &str) -> String {
    format!("{}.{}", stem, extension.trim_start_matches('.'))
}
