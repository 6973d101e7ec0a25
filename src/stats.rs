//! Weighted regime estimator and running bootstrap moments.

use crate::error::EstimateError;
use crate::regime::SubjectOutcome;

/// Compliance-weighted mean of the last-visit treatment indicator.
///
/// Formula: Σ(w_i·m_i·y_i) / Σ(w_i·m_i), where m_i is the compliance flag.
/// Non-compliant subjects enter with zero weight rather than being removed.
///
/// # Errors
/// * `EstimateError::DivisionUndefined` if the compliant weight sums to zero
pub fn weighted_mean(rows: &[SubjectOutcome]) -> Result<f64, EstimateError> {
    let mut numerator = 0.0;
    let mut denominator = 0.0;

    for row in rows {
        let m = if row.compliant { 1.0 } else { 0.0 };
        let y = if row.treated_last { 1.0 } else { 0.0 };
        let w = row.weight * m;
        numerator += w * y;
        denominator += w;
    }

    if denominator <= 0.0 {
        return Err(EstimateError::DivisionUndefined);
    }

    Ok(numerator / denominator)
}

/// Running statistics for Welford's online variance algorithm.
///
/// Reference: Welford, B. P. (1962). Note on a method for calculating
/// corrected sums of squares and products. Technometrics, 4(3), 419-420.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WelfordState {
    count: usize,
    mean: f64,
    /// Sum of squared differences from mean (M2)
    m2: f64,
}

impl WelfordState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / (self.count as f64);
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.mean
        }
    }

    /// Sample variance (n - 1 denominator); NaN with fewer than two values.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return f64::NAN;
        }
        self.m2 / ((self.count - 1) as f64)
    }

    pub fn standard_error(&self) -> f64 {
        self.variance().sqrt()
    }
}

impl FromIterator<f64> for WelfordState {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        iter.into_iter().fold(Self::new(), |mut state, v| {
            state.update(v);
            state
        })
    }
}
