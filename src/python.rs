use pyo3::prelude::*;

use crate::analysis::RegimeAnalysis;
use crate::cluster::BootstrapConfig;
use crate::error::RegimeError;
use crate::panel::{EventStatus, Panel, SubjectVisit};
use crate::regime::candidate_regimes;
use crate::report::EffectTable;
use crate::weights::{ColumnWeights, UniformWeights, WeightPolicy, WeightProvider, WeightSpec};

const WEIGHT_COLUMN: &str = "weight";

/// Main module for causal_regimes - regime estimation on Polars DataFrames
#[pymodule]
fn _causal_regimes(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<RegimeEffectResult>()?;
    m.add_function(wrap_pyfunction!(regime_bootstrap, m)?)?;
    Ok(())
}

impl From<RegimeError> for PyErr {
    fn from(err: RegimeError) -> PyErr {
        pyo3::exceptions::PyValueError::new_err(err.to_string())
    }
}

/// Result of a regime analysis, one entry per regime in every list.
/// A threshold of `None` is the never-treat regime.
#[pyclass]
#[derive(Debug, Clone)]
pub struct RegimeEffectResult {
    #[pyo3(get)]
    pub thresholds: Vec<Option<u32>>,
    #[pyo3(get)]
    pub point_estimates: Vec<Option<f64>>,
    #[pyo3(get)]
    pub standard_errors: Vec<Option<f64>>,
    #[pyo3(get)]
    pub n_compliant: Vec<usize>,
    #[pyo3(get)]
    pub n_valid_replicates: Vec<usize>,
    #[pyo3(get)]
    pub n_undefined_replicates: Vec<usize>,
    #[pyo3(get)]
    pub warnings: Vec<Vec<String>>,
    #[pyo3(get)]
    pub n_subjects: usize,
    #[pyo3(get)]
    pub seed: u64,
    #[pyo3(get)]
    pub summary: String,
}

impl From<&EffectTable> for RegimeEffectResult {
    fn from(table: &EffectTable) -> Self {
        Self {
            thresholds: table.rows.iter().map(|r| r.threshold).collect(),
            point_estimates: table.rows.iter().map(|r| r.point_estimate).collect(),
            standard_errors: table.rows.iter().map(|r| r.standard_error).collect(),
            n_compliant: table.rows.iter().map(|r| r.n_compliant).collect(),
            n_valid_replicates: table.rows.iter().map(|r| r.n_valid).collect(),
            n_undefined_replicates: table.rows.iter().map(|r| r.n_undefined).collect(),
            warnings: table
                .rows
                .iter()
                .map(|r| r.warnings.iter().map(|w| w.to_string()).collect())
                .collect(),
            n_subjects: table.n_subjects,
            seed: table.seed,
            summary: table.summary(),
        }
    }
}

#[pymethods]
impl RegimeEffectResult {
    fn __repr__(&self) -> String {
        format!(
            "RegimeEffectResult(regimes={}, n_subjects={}, seed={})",
            self.thresholds.len(),
            self.n_subjects,
            self.seed
        )
    }

    fn __str__(&self) -> String {
        self.summary.clone()
    }
}

/// Validate that a column name doesn't contain control characters
fn validate_column_name(name: &str) -> PyResult<()> {
    if name.bytes().any(|b| b < 0x20 || b == 0x7F) {
        return Err(pyo3::exceptions::PyValueError::new_err(format!(
            "Column name '{}' contains invalid characters",
            name
        )));
    }
    Ok(())
}

fn column_f64(py: Python, df: &PyObject, name: &str) -> PyResult<Vec<f64>> {
    let series = df.getattr(py, "get_column")?.call1(py, (name,))?;
    let null_count: usize = series.call_method0(py, "null_count")?.extract(py)?;
    if null_count > 0 {
        return Err(pyo3::exceptions::PyValueError::new_err(format!(
            "Column '{}' contains null values",
            name
        )));
    }
    series.call_method0(py, "to_numpy")?.extract(py)
}

fn column_i64(py: Python, df: &PyObject, name: &str) -> PyResult<Vec<i64>> {
    let series = df.getattr(py, "get_column")?.call1(py, (name,))?;
    let array = series.call_method0(py, "to_numpy")?;
    match array.extract::<Vec<i64>>(py) {
        Ok(v) => Ok(v),
        Err(_) => {
            // Float columns holding integral values are accepted
            let floats = column_f64(py, df, name)?;
            floats
                .iter()
                .map(|&x| {
                    if x.is_finite() && x.fract() == 0.0 {
                        Ok(x as i64)
                    } else {
                        Err(pyo3::exceptions::PyValueError::new_err(format!(
                            "Column '{}' must hold integers, found {}",
                            name, x
                        )))
                    }
                })
                .collect()
        }
    }
}

fn indicator(name: &str, value: f64) -> PyResult<bool> {
    if value == 1.0 {
        Ok(true)
    } else if value == 0.0 {
        Ok(false)
    } else {
        Err(pyo3::exceptions::PyValueError::new_err(format!(
            "Column '{}' must be 0/1, found {}",
            name, value
        )))
    }
}

/// Estimate threshold regimes with cluster-bootstrap standard errors.
///
/// Args:
///     df: Polars DataFrame in long format (one row per subject-visit)
///     id_col: Subject identifier column
///     time_col: Visit time column (0-indexed integers)
///     treatment_col: 0/1 treatment indicator column
///     weight_col: Precomputed IPW weights (None for unit weights)
///     status_col: 0/1 death indicator; rows after death are dropped
///     thresholds: Regime thresholds (None for every visit in follow-up)
///     include_never: Whether to add the never-treat regime (default: True)
///     bootstrap_iterations: Number of bootstrap replicates (default: 1000)
///     seed: Random seed for reproducibility (None for random)
///     weight_policy: "reuse" or "refit" (default: "reuse")
///
/// Returns:
///     RegimeEffectResult with point estimates and standard errors per regime
#[pyfunction]
#[pyo3(signature = (df, id_col, time_col, treatment_col, weight_col=None, status_col=None, thresholds=None, include_never=true, bootstrap_iterations=1000, seed=None, weight_policy="reuse"))]
// Mirrors the keyword arguments of the Python wrapper.
#[allow(clippy::too_many_arguments)]
fn regime_bootstrap(
    py: Python,
    df: PyObject,
    id_col: &str,
    time_col: &str,
    treatment_col: &str,
    weight_col: Option<&str>,
    status_col: Option<&str>,
    thresholds: Option<Vec<u32>>,
    include_never: bool,
    bootstrap_iterations: usize,
    seed: Option<u64>,
    weight_policy: &str,
) -> PyResult<RegimeEffectResult> {
    if bootstrap_iterations < 1 {
        return Err(pyo3::exceptions::PyValueError::new_err(
            "bootstrap_iterations must be at least 1",
        ));
    }
    let weight_policy: WeightPolicy = weight_policy
        .parse()
        .map_err(pyo3::exceptions::PyValueError::new_err)?;

    for name in [Some(id_col), Some(time_col), Some(treatment_col), weight_col, status_col]
        .into_iter()
        .flatten()
    {
        validate_column_name(name)?;
    }

    let ids = column_i64(py, &df, id_col)?;
    let times = column_i64(py, &df, time_col)?;
    let treatment = column_f64(py, &df, treatment_col)?;
    let weights = weight_col
        .map(|c| column_f64(py, &df, c))
        .transpose()?;
    let status = status_col
        .map(|c| column_f64(py, &df, c))
        .transpose()?;

    let n_rows = ids.len();
    for (name, len) in [(time_col, times.len()), (treatment_col, treatment.len())] {
        if len != n_rows {
            return Err(pyo3::exceptions::PyValueError::new_err(format!(
                "All columns must have the same length: {} has {}, expected {}",
                name, len, n_rows
            )));
        }
    }

    let mut records = Vec::with_capacity(n_rows);
    for i in 0..n_rows {
        let visit_time = u32::try_from(times[i]).map_err(|_| {
            pyo3::exceptions::PyValueError::new_err(format!(
                "Column '{}' must be non-negative, found {}",
                time_col, times[i]
            ))
        })?;
        let mut record = SubjectVisit::new(ids[i], visit_time, indicator(treatment_col, treatment[i])?);
        if let (Some(col), Some(values)) = (status_col, &status) {
            if indicator(col, values[i])? {
                record = record.with_status(EventStatus::Died);
            }
        }
        if let Some(values) = &weights {
            record = record.with_covariates(vec![values[i]]);
        }
        records.push(record);
    }

    let covariate_names = if weights.is_some() {
        vec![WEIGHT_COLUMN.to_string()]
    } else {
        Vec::new()
    };
    let panel = Panel::new(records, covariate_names).map_err(RegimeError::from)?;

    let column_provider = ColumnWeights::new(WEIGHT_COLUMN);
    let provider: &dyn WeightProvider = if weights.is_some() {
        &column_provider
    } else {
        &UniformWeights
    };
    let spec = WeightSpec {
        exposure: treatment_col.to_string(),
        covariates: Vec::new(),
        id: id_col.to_string(),
        time: time_col.to_string(),
    };
    let regimes = match thresholds {
        Some(t) => candidate_regimes(t, include_never),
        None => candidate_regimes(0..=panel.max_visit(), include_never),
    };

    let table = RegimeAnalysis::new(&panel, provider, spec)
        .regimes(regimes)
        .bootstrap(BootstrapConfig {
            iterations: bootstrap_iterations,
            seed,
            weight_policy,
            parallel: true,
        })
        .run()?;

    Ok(RegimeEffectResult::from(&table))
}
