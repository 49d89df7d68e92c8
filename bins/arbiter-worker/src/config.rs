// Runtime configuration loading for the Arbiter worker
use anyhow::{anyhow, Context, Result};
use arbiter_common::config::{RuntimeConfig, DEFAULT_CONFIG_PATH};
use std::fs;
use std::path::{Path, PathBuf};

/// Harness shipped with the worker, used unless the config names another one
pub const BUILTIN_HARNESS: &str = include_str!("../runtime/harness.py");

/// Load the runtime config from `path`, or the defaults when the file is absent
pub fn load(path: &Path) -> Result<RuntimeConfig> {
    let config = if path.exists() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?
    } else {
        tracing::info!(path = %path.display(), "Runtime config not found, using defaults");
        RuntimeConfig::default()
    };

    finish(config, |key| std::env::var(key).ok())
}

/// Load from `ARBITER_CONFIG`, falling back to `config/runtime.json`
pub fn load_default() -> Result<RuntimeConfig> {
    let path = std::env::var("ARBITER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    load(&path)
}

/// Apply environment overrides and validate
fn finish(mut config: RuntimeConfig, env: impl Fn(&str) -> Option<String>) -> Result<RuntimeConfig> {
    if let Some(interpreter) = env("ARBITER_INTERPRETER") {
        config.interpreter.command = interpreter;
    }
    if let Some(root) = env("ARBITER_SCRATCH_ROOT") {
        config.sandbox.scratch_root = Some(PathBuf::from(root));
    }
    if let Some(parallel) = env("MAX_PARALLEL_PROBLEMS") {
        config.max_parallel_problems = parallel
            .parse()
            .with_context(|| format!("Invalid MAX_PARALLEL_PROBLEMS: {}", parallel))?;
    }

    config
        .validate()
        .map_err(|e| anyhow!("Invalid runtime config: {}", e))?;
    Ok(config)
}

/// Source text of the harness the interpreter runs
pub fn harness_source(config: &RuntimeConfig) -> Result<String> {
    match &config.interpreter.harness_path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read harness {}", path.display())),
        None => Ok(BUILTIN_HARNESS.to_string()),
    }
}

/// Directory under which scratch directories are created
pub fn scratch_root(config: &RuntimeConfig) -> PathBuf {
    config
        .sandbox
        .scratch_root
        .clone()
        .unwrap_or_else(std::env::temp_dir)
}
