/// Batch Evaluator - High-Level Orchestration
///
/// **Responsibility:**
/// Run every candidate of one problem through the engine and collect the
/// per-candidate reports in rank order.
///
/// **Architecture:**
/// 1. Rank candidate files by the number in their file name
/// 2. Load each source; an unreadable file is that candidate's `failed`
/// 3. Hand the source to the ProcessEngine (engine.rs), which owns limits,
///    deadlines and equivalence
///
/// This module is the glue layer; it knows nothing about how code executes
/// or how outputs are judged.
use crate::engine::ProcessEngine;
use anyhow::{anyhow, Context, Result};
use arbiter_common::types::{Candidate, CandidateReport, ExecutionResult, ExecutionStatus, TestSuite};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Numeric rank of a candidate file: the basename up to its first `.`
pub fn candidate_rank(path: &Path) -> Result<u64> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("Candidate path has no file name: {}", path.display()))?;
    let stem = name.split('.').next().unwrap_or(name);
    stem.parse()
        .with_context(|| format!("Candidate file name is not numbered: {}", path.display()))
}

/// Candidate files with `extension` directly inside `dir`, unordered
pub fn discover(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let extension = extension.trim_start_matches('.');
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to list candidates in {}", dir.display()))?;

    let mut sources = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("Failed to list candidates in {}", dir.display()))?
            .path();
        if path.is_file() && path.extension().and_then(|ext| ext.to_str()) == Some(extension) {
            sources.push(path);
        }
    }
    Ok(sources)
}

/// Pair every path with its rank and sort ascending.
/// Fails on the first unnumbered path, before anything is evaluated.
fn rank_all(sources: &[PathBuf]) -> Result<Vec<(u64, PathBuf)>> {
    let mut ranked = sources
        .iter()
        .map(|path| Ok((candidate_rank(path)?, path.clone())))
        .collect::<Result<Vec<_>>>()?;
    ranked.sort_by_key(|(rank, _)| *rank);
    Ok(ranked)
}

/// Evaluate every source against `suite`, one after another, in rank order
pub async fn evaluate_all(
    engine: &ProcessEngine,
    sources: &[PathBuf],
    suite: &TestSuite,
    fast_check: bool,
) -> Result<Vec<CandidateReport>> {
    let ranked = rank_all(sources)?;
    let mut reports = Vec::with_capacity(ranked.len());

    for (id, path) in ranked {
        let result = match fs::read_to_string(&path) {
            Ok(source) => {
                let candidate = Candidate { id, path, source };
                evaluate_one(engine, &candidate, suite, fast_check).await
            }
            Err(e) => {
                warn!(candidate = id, path = %path.display(), error = %e, "Candidate source unreadable");
                ExecutionResult::resolve(Some(ExecutionStatus::Failed), Vec::new(), suite.cases.len())
            }
        };
        reports.push(CandidateReport::new(id, result));
    }

    Ok(reports)
}

async fn evaluate_one(
    engine: &ProcessEngine,
    candidate: &Candidate,
    suite: &TestSuite,
    fast_check: bool,
) -> ExecutionResult {
    info!(candidate = candidate.id, path = %candidate.path.display(), "Evaluating candidate");
    engine.run(&candidate.source, suite, fast_check).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_common::config::RuntimeConfig;
    use arbiter_common::types::TestCase;
    use serde_json::json;

    #[test]
    fn test_candidate_rank() {
        assert_eq!(candidate_rank(Path::new("samples/12.py")).unwrap(), 12);
        assert_eq!(candidate_rank(Path::new("3.src.bak")).unwrap(), 3);
        assert_eq!(candidate_rank(Path::new("/abs/dir/0")).unwrap(), 0);
        assert!(candidate_rank(Path::new("solution.py")).is_err());
        assert!(candidate_rank(Path::new("-1.py")).is_err());
    }

    #[test]
    fn test_rank_order_is_numeric() {
        let sources: Vec<PathBuf> = ["2.src", "10.src", "1.src"].iter().map(PathBuf::from).collect();
        let ranks: Vec<u64> = rank_all(&sources).unwrap().into_iter().map(|(rank, _)| rank).collect();
        assert_eq!(ranks, vec![1, 2, 10]);
    }

    #[test]
    fn test_unnumbered_source_rejects_batch() {
        let sources = vec![PathBuf::from("1.py"), PathBuf::from("best.py")];
        let err = rank_all(&sources).unwrap_err();
        assert!(err.to_string().contains("best.py"));
    }

    #[test]
    fn test_discover_filters_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("0.py"), "").unwrap();
        fs::write(dir.path().join("1.py"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::create_dir(dir.path().join("2.py")).unwrap();

        let mut found = discover(dir.path(), ".py").unwrap();
        found.sort();
        assert_eq!(found, vec![dir.path().join("0.py"), dir.path().join("1.py")]);
    }

    #[test]
    fn test_discover_missing_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover(&dir.path().join("absent"), "py").is_err());
    }

    #[tokio::test]
    async fn test_unreadable_candidate_is_failed_and_batch_continues() {
        let root = tempfile::tempdir().unwrap();
        let samples = tempfile::tempdir().unwrap();
        fs::write(samples.path().join("10.py"), "def f(x):\n    return x\n").unwrap();
        fs::write(samples.path().join("1.py"), "def f(x):\n    return x\n").unwrap();

        // No interpreter: every readable candidate fails at spawn, the missing one at load
        let mut config = RuntimeConfig::default();
        config.interpreter.command = "/nonexistent/arbiter-interpreter".to_string();
        config.sandbox.scratch_root = Some(root.path().to_path_buf());
        let engine = ProcessEngine::new(config).unwrap();

        let suite = TestSuite {
            entry_point: "f".to_string(),
            atol: 0.0,
            cases: vec![TestCase {
                input: vec![json!(1)],
                expected: json!(1),
                ref_time: 0.01,
            }],
        };
        let sources = vec![
            samples.path().join("10.py"),
            samples.path().join("2.py"),
            samples.path().join("1.py"),
        ];

        let reports = evaluate_all(&engine, &sources, &suite, false).await.unwrap();
        let ids: Vec<u64> = reports.iter().map(|r| r.candidate).collect();
        assert_eq!(ids, vec![1, 2, 10]);
        assert!(reports.iter().all(|r| r.status == ExecutionStatus::Failed));
        assert!(reports[1].details.is_empty());
    }
}
