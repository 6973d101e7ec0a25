//! Inverse-probability-of-treatment weights.
//!
//! Weight fitting is delegated to a [`WeightProvider`]. The crate ships
//! providers that read weights produced by an external IPW fit
//! ([`ColumnWeights`]) or assign unit weight ([`UniformWeights`]); any
//! propensity model can be plugged in by implementing the trait.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::WeightError;
use crate::panel::{ColumnMap, Panel};

/// Model description handed to a provider: exposure, covariate terms and the
/// id/time columns identifying the longitudinal structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSpec {
    pub exposure: String,
    pub covariates: Vec<String>,
    pub id: String,
    pub time: String,
}

impl WeightSpec {
    pub fn from_columns(columns: &ColumnMap) -> Self {
        Self {
            exposure: columns.treatment.clone(),
            covariates: columns.covariates.clone(),
            id: columns.id.clone(),
            time: columns.time.clone(),
        }
    }

    /// R-style formula, e.g. `trt ~ age + bili`.
    pub fn formula(&self) -> String {
        if self.covariates.is_empty() {
            format!("{} ~ 1", self.exposure)
        } else {
            format!("{} ~ {}", self.exposure, self.covariates.join(" + "))
        }
    }
}

/// Produces one weight per panel record, in record order.
pub trait WeightProvider: Send + Sync {
    fn fit(&self, panel: &Panel, spec: &WeightSpec) -> Result<Vec<f64>, WeightError>;

    fn name(&self) -> &str;
}

/// Whether bootstrap replicates reuse the weights fitted on the observed
/// panel or refit the provider on each replicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightPolicy {
    #[default]
    Reuse,
    Refit,
}

impl std::str::FromStr for WeightPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reuse" => Ok(WeightPolicy::Reuse),
            "refit" => Ok(WeightPolicy::Refit),
            _ => Err(format!(
                "weight_policy must be 'reuse' or 'refit', got: '{}'",
                s
            )),
        }
    }
}

/// Reads precomputed weights from a panel column.
#[derive(Debug, Clone)]
pub struct ColumnWeights {
    column: String,
}

impl ColumnWeights {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }
}

impl WeightProvider for ColumnWeights {
    fn fit(&self, panel: &Panel, _spec: &WeightSpec) -> Result<Vec<f64>, WeightError> {
        panel
            .column(&self.column)
            .ok_or_else(|| WeightError::MissingColumn(self.column.clone()))
    }

    fn name(&self) -> &str {
        "column"
    }
}

/// Every record gets weight 1.0, i.e. an unweighted analysis.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformWeights;

impl WeightProvider for UniformWeights {
    fn fit(&self, panel: &Panel, _spec: &WeightSpec) -> Result<Vec<f64>, WeightError> {
        Ok(vec![1.0; panel.n_records()])
    }

    fn name(&self) -> &str {
        "uniform"
    }
}

/// Check provider output: one finite, non-negative weight per record.
pub fn validate_weights(weights: &[f64], n_records: usize) -> Result<(), WeightError> {
    if weights.len() != n_records {
        return Err(WeightError::LengthMismatch {
            expected: n_records,
            found: weights.len(),
        });
    }
    if let Some((index, &value)) = weights
        .iter()
        .enumerate()
        .find(|(_, w)| !w.is_finite() || **w < 0.0)
    {
        return Err(WeightError::InvalidWeight { index, value });
    }
    Ok(())
}

/// Fit and validate weights for a panel.
pub fn fit_weights(
    provider: &dyn WeightProvider,
    panel: &Panel,
    spec: &WeightSpec,
) -> Result<Vec<f64>, WeightError> {
    debug!(
        provider = provider.name(),
        formula = %spec.formula(),
        records = panel.n_records(),
        "fitting weights"
    );
    let weights = provider.fit(panel, spec)?;
    validate_weights(&weights, panel.n_records())?;
    Ok(weights)
}
