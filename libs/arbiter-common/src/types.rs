use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// One reference test case: positional arguments, the expected return value
/// and the reference solution's running time in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub input: Vec<Value>,
    pub expected: Value,
    #[serde(default)]
    pub ref_time: f64,
}

/// Everything the runner needs to judge candidates of one problem.
/// Case order is significant: detail vectors align index-for-index with `cases`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuite {
    pub entry_point: String,
    #[serde(default)]
    pub atol: f64,
    pub cases: Vec<TestCase>,
}

impl TestSuite {
    pub fn ref_times(&self) -> impl Iterator<Item = f64> + '_ {
        self.cases.iter().map(|case| case.ref_time)
    }
}

/// A candidate program, ranked by the numeric id in its file name.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: u64,
    pub path: PathBuf,
    pub source: String,
}

/// Coarse per-candidate verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
    TimedOut,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of running one candidate against a suite.
///
/// **Consistency invariant:** `Success` only ever appears together with a full
/// vector of `true` entries. Build values through [`ExecutionResult::resolve`]
/// so the invariant holds by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub details: Vec<bool>,
    /// Entries populated before the run stopped. Kept even when a timeout
    /// discards the details themselves.
    pub recorded: usize,
}

impl ExecutionResult {
    /// Resolve the raw worker verdict into the final result.
    ///
    /// - `None` means the worker never produced a verdict: `TimedOut`, details dropped
    /// - `Success` with a short vector or any `false` entry is downgraded to `Failed`
    pub fn resolve(verdict: Option<ExecutionStatus>, details: Vec<bool>, expected_len: usize) -> Self {
        let recorded = details.len();
        match verdict {
            None | Some(ExecutionStatus::TimedOut) => Self {
                status: ExecutionStatus::TimedOut,
                details: Vec::new(),
                recorded,
            },
            Some(ExecutionStatus::Success)
                if details.len() == expected_len && details.iter().all(|passed| *passed) =>
            {
                Self {
                    status: ExecutionStatus::Success,
                    details,
                    recorded,
                }
            }
            Some(_) => Self {
                status: ExecutionStatus::Failed,
                details,
                recorded,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Result for one candidate as written to the report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateReport {
    pub candidate: u64,
    pub status: ExecutionStatus,
    pub details: Vec<bool>,
    pub recorded: usize,
}

impl CandidateReport {
    pub fn new(candidate: u64, result: ExecutionResult) -> Self {
        Self {
            candidate,
            status: result.status,
            details: result.details,
            recorded: result.recorded,
        }
    }
}

/// One problem inside a job file.
///
/// Not flattened from `TestSuite`: flattened fields are buffered before parsing
/// and lose arbitrary-precision numbers on the way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemJob {
    pub task_id: String,
    pub candidates_dir: PathBuf,
    #[serde(default)]
    pub fast_check: bool,
    pub entry_point: String,
    #[serde(default)]
    pub atol: f64,
    #[serde(alias = "cases")]
    pub tests: Vec<TestCase>,
}

impl ProblemJob {
    pub fn suite(&self) -> TestSuite {
        TestSuite {
            entry_point: self.entry_point.clone(),
            atol: self.atol,
            cases: self.tests.clone(),
        }
    }
}

/// Input consumed by the worker binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFile {
    pub problems: Vec<ProblemJob>,
}

/// Output produced by the worker binary, keyed by task id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub evaluated_at: DateTime<Utc>,
    pub results: BTreeMap<String, Vec<CandidateReport>>,
}

impl EvaluationReport {
    pub fn new() -> Self {
        Self {
            evaluated_at: Utc::now(),
            results: BTreeMap::new(),
        }
    }

    /// (samples, correct) per task, in task id order
    pub fn pass_counts(&self) -> Vec<(&str, u64, u64)> {
        self.results
            .iter()
            .map(|(task_id, reports)| {
                let correct = reports.iter().filter(|r| r.status == ExecutionStatus::Success).count();
                (task_id.as_str(), reports.len() as u64, correct as u64)
            })
            .collect()
    }
}

impl Default for EvaluationReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&ExecutionStatus::Success).unwrap(), "\"success\"");
        assert_eq!(serde_json::to_string(&ExecutionStatus::Failed).unwrap(), "\"failed\"");
        assert_eq!(serde_json::to_string(&ExecutionStatus::TimedOut).unwrap(), "\"timed_out\"");
        assert_eq!(ExecutionStatus::TimedOut.to_string(), "timed_out");
    }

    #[test]
    fn test_resolve_missing_verdict_times_out() {
        let result = ExecutionResult::resolve(None, vec![true, false], 3);
        assert_eq!(result.status, ExecutionStatus::TimedOut);
        assert!(result.details.is_empty());
        assert_eq!(result.recorded, 2);
    }

    #[test]
    fn test_resolve_short_vector_fails() {
        let result = ExecutionResult::resolve(Some(ExecutionStatus::Success), vec![true], 2);
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.details, vec![true]);
    }

    #[test]
    fn test_resolve_full_pass_succeeds() {
        let result = ExecutionResult::resolve(Some(ExecutionStatus::Success), vec![true, true], 2);
        assert!(result.is_success());
        assert_eq!(result.recorded, 2);
    }

    #[test]
    fn test_problem_job_builds_suite() {
        let job: ProblemJob = serde_json::from_value(json!({
            "task_id": "HumanEval/0",
            "candidates_dir": "samples/0",
            "entry_point": "has_close_elements",
            "atol": 0.0,
            "tests": [{"input": [[1.0, 2.0], 0.5], "expected": false, "ref_time": 0.01}]
        }))
        .unwrap();

        assert!(!job.fast_check);
        let suite = job.suite();
        assert_eq!(suite.entry_point, "has_close_elements");
        assert_eq!(suite.cases.len(), 1);
        assert_eq!(suite.ref_times().collect::<Vec<_>>(), vec![0.01]);
    }

    #[test]
    fn test_job_file_keeps_wide_integers() {
        let text = r#"{"problems": [{
            "task_id": "fib",
            "candidates_dir": "samples/fib",
            "entry_point": "fib",
            "cases": [{"input": [100], "expected": 354224848179261915075, "ref_time": 0.001}]
        }]}"#;
        let job: JobFile = serde_json::from_str(text).unwrap();

        let expected = &job.problems[0].tests[0].expected;
        assert_eq!(expected.to_string(), "354224848179261915075");
        assert_eq!(job.problems[0].atol, 0.0);
    }

    #[test]
    fn test_pass_counts() {
        let mut report = EvaluationReport::new();
        report.results.insert(
            "a".to_string(),
            vec![
                CandidateReport::new(0, ExecutionResult::resolve(Some(ExecutionStatus::Success), vec![true], 1)),
                CandidateReport::new(1, ExecutionResult::resolve(None, vec![], 1)),
            ],
        );
        assert_eq!(report.pass_counts(), vec![("a", 2, 1)]);
    }

    proptest! {
        #[test]
        fn success_never_carries_a_false_entry(
            details in proptest::collection::vec(any::<bool>(), 0..32),
            expected_len in 0usize..32,
        ) {
            let result = ExecutionResult::resolve(Some(ExecutionStatus::Success), details, expected_len);
            if result.status == ExecutionStatus::Success {
                prop_assert_eq!(result.details.len(), expected_len);
                prop_assert!(result.details.iter().all(|passed| *passed));
            }
        }
    }
}
