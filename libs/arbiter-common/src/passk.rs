/// Pass@k Estimator
///
/// Unbiased estimate of "at least one of k samples, drawn without replacement
/// from n generated samples of which c are correct, passes":
///
/// `1 - C(n - c, k) / C(n, k)`
///
/// computed as the running product `1 - prod_{i = n-c+1}^{n} (1 - k / i)` so
/// that large `n` never materializes a binomial coefficient.
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EstimateError {
    #[error("num_samples has {samples} entries but num_correct has {correct}")]
    ShapeMismatch { samples: usize, correct: usize },
}

/// Sample counts: one value shared by every problem, or one per problem
#[derive(Debug, Clone, Copy)]
pub enum NumSamples<'a> {
    Shared(u64),
    PerProblem(&'a [u64]),
}

impl From<u64> for NumSamples<'_> {
    fn from(n: u64) -> Self {
        NumSamples::Shared(n)
    }
}

impl<'a> From<&'a [u64]> for NumSamples<'a> {
    fn from(ns: &'a [u64]) -> Self {
        NumSamples::PerProblem(ns)
    }
}

impl<'a> From<&'a Vec<u64>> for NumSamples<'a> {
    fn from(ns: &'a Vec<u64>) -> Self {
        NumSamples::PerProblem(ns.as_slice())
    }
}

/// Estimate for a single problem
pub fn estimator(n: u64, c: u64, k: u64) -> f64 {
    if c > n || n - c < k {
        return 1.0;
    }
    let k = k as f64;
    let miss: f64 = (n - c + 1..=n).map(|i| 1.0 - k / i as f64).product();
    1.0 - miss
}

/// Estimate pass@k for every problem, aligned with `num_correct`
pub fn estimate_pass_at_k<'a>(
    num_samples: impl Into<NumSamples<'a>>,
    num_correct: &[u64],
    k: u64,
) -> Result<Vec<f64>, EstimateError> {
    match num_samples.into() {
        NumSamples::Shared(n) => Ok(num_correct.iter().map(|&c| estimator(n, c, k)).collect()),
        NumSamples::PerProblem(ns) => {
            if ns.len() != num_correct.len() {
                return Err(EstimateError::ShapeMismatch {
                    samples: ns.len(),
                    correct: num_correct.len(),
                });
            }
            Ok(ns
                .iter()
                .zip(num_correct)
                .map(|(&n, &c)| estimator(n, c, k))
                .collect())
        }
    }
}

/// Mean pass@k across problems for each requested k.
///
/// A k is only reported when every problem has at least k samples; smaller
/// pools would make the estimate meaningless.
pub fn summarize_pass_at_k(
    num_samples: &[u64],
    num_correct: &[u64],
    ks: &[u64],
) -> Result<Vec<(u64, f64)>, EstimateError> {
    if num_samples.len() != num_correct.len() {
        return Err(EstimateError::ShapeMismatch {
            samples: num_samples.len(),
            correct: num_correct.len(),
        });
    }
    if num_samples.is_empty() {
        return Ok(Vec::new());
    }

    let min_samples = num_samples.iter().copied().min().unwrap_or(0);
    let mut summary = Vec::new();
    for &k in ks.iter().filter(|&&k| k <= min_samples) {
        let estimates = estimate_pass_at_k(num_samples, num_correct, k)?;
        let mean = estimates.iter().sum::<f64>() / estimates.len() as f64;
        summary.push((k, mean));
    }
    Ok(summary)
}
