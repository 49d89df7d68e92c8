// Runtime configuration shared by the worker and the CLI
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/runtime.json";

/// Tolerance used for float-valued expectations declared with `atol == 0`
pub const FLOAT_EPSILON: f64 = 1e-6;

const GIB: u64 = 1024 * 1024 * 1024;

/// Process cap per user: a fork bomb stops here
const DEFAULT_MAX_PROCESSES: u64 = 1024;

/// How the candidate payload is handed to its interpreter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    pub command: String,
    pub args: Vec<String>,
    pub file_extension: String,
    /// Replaces the built-in harness script when set
    #[serde(default)]
    pub harness_path: Option<PathBuf>,
}

/// Limits applied to every worker process before it execs the interpreter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub memory_limit_bytes: u64,
    pub file_size_limit_bytes: u64,
    /// RLIMIT_NPROC for the worker's user; `null` leaves the inherited limit
    pub max_processes: Option<u64>,
    pub isolate_network: bool,
    /// Deny writes outside the scratch directory (Landlock)
    pub confine_filesystem: bool,
    /// Refuse to start a worker when namespace isolation is unavailable
    #[serde(default)]
    pub strict_isolation: bool,
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,
}

/// Timing policy, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub min_case_limit: f64,
    pub ref_time_factor: f64,
    pub max_deadline: f64,
    pub deadline_slack: f64,
    pub grace: f64,
    pub terminate_pause: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub interpreter: InterpreterConfig,
    pub sandbox: SandboxConfig,
    pub timing: TimingConfig,
    pub max_parallel_problems: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            command: "python3".to_string(),
            args: vec!["-I".to_string(), "-u".to_string()],
            file_extension: "py".to_string(),
            harness_path: None,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: 4 * GIB,
            file_size_limit_bytes: 64 * 1024 * 1024,
            max_processes: Some(DEFAULT_MAX_PROCESSES),
            isolate_network: true,
            confine_filesystem: true,
            strict_isolation: false,
            scratch_root: None,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            min_case_limit: 0.05,
            ref_time_factor: 2.0,
            max_deadline: 5.0,
            deadline_slack: 1.0,
            grace: 1.0,
            terminate_pause: 0.1,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            interpreter: InterpreterConfig::default(),
            sandbox: SandboxConfig::default(),
            timing: TimingConfig::default(),
            max_parallel_problems: 1,
        }
    }
}

impl TimingConfig {
    /// Per-case limit: `max(min_case_limit, factor * ref_time)`
    pub fn case_limit(&self, ref_time: f64) -> Duration {
        secs(self.min_case_limit.max(self.ref_time_factor * ref_time))
    }

    /// Overall candidate deadline: `min(max_deadline, sum(ref_times) + slack)`
    pub fn deadline(&self, ref_times: impl IntoIterator<Item = f64>) -> Duration {
        let total: f64 = ref_times.into_iter().sum();
        secs(self.max_deadline.min(total + self.deadline_slack))
    }

    /// Time the supervisor waits for a verdict before stopping the worker
    pub fn budget(&self, ref_times: impl IntoIterator<Item = f64>) -> Duration {
        self.deadline(ref_times) + secs(self.grace)
    }

    pub fn terminate_pause(&self) -> Duration {
        secs(self.terminate_pause)
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl RuntimeConfig {
    /// Check the values a worker cannot run without
    pub fn validate(&self) -> Result<(), String> {
        if self.interpreter.command.trim().is_empty() {
            return Err("interpreter.command must not be empty".to_string());
        }
        if self.interpreter.file_extension.trim().is_empty() {
            return Err("interpreter.file_extension must not be empty".to_string());
        }
        if self.sandbox.memory_limit_bytes == 0 {
            return Err("sandbox.memory_limit_bytes must be positive".to_string());
        }
        if self.sandbox.max_processes == Some(0) {
            return Err("sandbox.max_processes must be positive or null".to_string());
        }
        if self.max_parallel_problems == 0 {
            return Err("max_parallel_problems must be at least 1".to_string());
        }

        let timings = [
            ("min_case_limit", self.timing.min_case_limit),
            ("ref_time_factor", self.timing.ref_time_factor),
            ("max_deadline", self.timing.max_deadline),
            ("deadline_slack", self.timing.deadline_slack),
            ("grace", self.timing.grace),
            ("terminate_pause", self.timing.terminate_pause),
        ];
        for (name, value) in timings {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("timing.{} must be a finite, non-negative number", name));
            }
        }

        Ok(())
    }
}
