// CLI commands for working with Arbiter reports and configuration
use anyhow::{bail, Context, Result};
use arbiter_common::config::{RuntimeConfig, DEFAULT_CONFIG_PATH};
use arbiter_common::passk::summarize_pass_at_k;
use arbiter_common::types::EvaluationReport;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Aggregate pass@k over every problem of one report
#[derive(Debug, Serialize)]
pub struct PassAtKSummary {
    pub problems: usize,
    pub min_samples: u64,
    pub estimates: BTreeMap<String, f64>,
    /// Requested k values larger than the smallest sample pool
    pub skipped: Vec<u64>,
}

fn load_report(path: &Path) -> Result<EvaluationReport> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read report {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse report {}", path.display()))
}

pub fn summarize(report: &EvaluationReport, ks: &[u64]) -> Result<PassAtKSummary> {
    let counts = report.pass_counts();
    if counts.is_empty() {
        bail!("Report contains no problems");
    }

    let samples: Vec<u64> = counts.iter().map(|(_, n, _)| *n).collect();
    let correct: Vec<u64> = counts.iter().map(|(_, _, c)| *c).collect();
    let min_samples = samples.iter().copied().min().unwrap_or(0);

    for (task_id, n, c) in &counts {
        tracing::debug!(task_id, samples = n, correct = c, "Problem counts");
    }

    let estimates = summarize_pass_at_k(&samples, &correct, ks)?
        .into_iter()
        .map(|(k, value)| (format!("pass@{}", k), value))
        .collect();
    let skipped = ks.iter().copied().filter(|&k| k > min_samples).collect();

    Ok(PassAtKSummary {
        problems: counts.len(),
        min_samples,
        estimates,
        skipped,
    })
}

pub fn pass_at_k(report_path: &Path, ks: &[u64], json: bool) -> Result<()> {
    let report = load_report(report_path)?;
    let summary = summarize(&report, ks)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("📊 {} ({} problems, evaluated {})", report_path.display(), summary.problems, report.evaluated_at);
    for (label, value) in &summary.estimates {
        println!("  {:<10} {:.4}", label, value);
    }
    for k in &summary.skipped {
        println!("  ⚠️  pass@{} skipped: some problems have only {} samples", k, summary.min_samples);
    }

    Ok(())
}

/// Create `config/runtime.json` under `path` with the built-in defaults
pub fn init_project(path: &Path, force: bool) -> Result<()> {
    println!("🚀 Initializing Arbiter project at: {}", path.display());

    let config_path = path.join(DEFAULT_CONFIG_PATH);
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    if config_path.exists() && !force {
        println!("  ⏭️  Kept existing: {}", DEFAULT_CONFIG_PATH);
        return Ok(());
    }

    let content = serde_json::to_string_pretty(&RuntimeConfig::default())?;
    fs::write(&config_path, content)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    println!("  ✅ Created: {}", DEFAULT_CONFIG_PATH);

    println!("\n📋 Next steps:");
    println!("  1. Point JOB_FILE at a job description and run arbiter-worker");
    println!("  2. Summarize: arbiter-cli pass-at-k --report results.json");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_common::types::{CandidateReport, ExecutionStatus};

    fn candidate(id: u64, status: ExecutionStatus) -> CandidateReport {
        CandidateReport {
            candidate: id,
            status,
            details: Vec::new(),
            recorded: 0,
        }
    }

    fn report() -> EvaluationReport {
        let mut report = EvaluationReport::new();
        report.results.insert(
            "task/0".to_string(),
            vec![
                candidate(0, ExecutionStatus::Success),
                candidate(1, ExecutionStatus::Failed),
            ],
        );
        report.results.insert(
            "task/1".to_string(),
            vec![
                candidate(0, ExecutionStatus::TimedOut),
                candidate(1, ExecutionStatus::Failed),
                candidate(2, ExecutionStatus::Success),
            ],
        );
        report
    }

    #[test]
    fn test_summary_over_report() {
        let summary = summarize(&report(), &[1, 2, 10]).unwrap();
        assert_eq!(summary.problems, 2);
        assert_eq!(summary.min_samples, 2);
        assert_eq!(summary.skipped, vec![10]);

        let pass1 = summary.estimates["pass@1"];
        assert!((pass1 - (0.5 + 1.0 / 3.0) / 2.0).abs() < 1e-12);
        // k = 2: task/0 is certain, task/1 is 1 - C(2,2)/C(3,2)
        let pass2 = summary.estimates["pass@2"];
        assert!((pass2 - (1.0 + 2.0 / 3.0) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_report_rejected() {
        assert!(summarize(&EvaluationReport::new(), &[1]).is_err());
    }

    #[test]
    fn test_pass_at_k_reads_report_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        fs::write(&path, serde_json::to_string(&report()).unwrap()).unwrap();

        assert!(pass_at_k(&path, &[1], true).is_ok());
        assert!(pass_at_k(&dir.path().join("missing.json"), &[1], false).is_err());
    }

    #[test]
    fn test_init_writes_default_config() {
        let dir = tempfile::tempdir().unwrap();
        init_project(dir.path(), false).unwrap();

        let written = fs::read_to_string(dir.path().join(DEFAULT_CONFIG_PATH)).unwrap();
        let parsed: RuntimeConfig = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed, RuntimeConfig::default());
    }

    #[test]
    fn test_init_keeps_existing_config_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join(DEFAULT_CONFIG_PATH);
        fs::create_dir_all(config_path.parent().unwrap()).unwrap();
        fs::write(&config_path, "{\"max_parallel_problems\": 8}").unwrap();

        init_project(dir.path(), false).unwrap();
        assert!(fs::read_to_string(&config_path).unwrap().contains('8'));

        init_project(dir.path(), true).unwrap();
        let parsed: RuntimeConfig = serde_json::from_str(&fs::read_to_string(&config_path).unwrap()).unwrap();
        assert_eq!(parsed.max_parallel_problems, 1);
    }
}
