//! Effect table: point estimates and bootstrap standard errors per regime.

use std::fmt;

use serde::Serialize;

use crate::cluster::{BootstrapSummary, ReplicateResult};
use crate::regime::Regime;
use crate::weights::WeightPolicy;

/// Point estimate of one regime on the observed panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointEstimate {
    pub regime: Regime,
    /// `None` when no compliant subject carries weight
    pub estimate: Option<f64>,
    pub n_compliant: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegimeWarning {
    /// Point estimate undefined on the observed panel
    DivisionUndefined,
    /// Fewer than two defined replicate estimates
    ResampleDegenerate { valid: usize },
}

impl fmt::Display for RegimeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegimeWarning::DivisionUndefined => write!(f, "no compliant subjects"),
            RegimeWarning::ResampleDegenerate { valid } => {
                write!(f, "degenerate resample ({} valid)", valid)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectRow {
    pub regime: Regime,
    pub threshold: Option<u32>,
    pub point_estimate: Option<f64>,
    pub n_compliant: usize,
    /// `None` when the bootstrap SE is undefined
    pub standard_error: Option<f64>,
    pub n_valid: usize,
    pub n_undefined: usize,
    pub n_failed: usize,
    pub warnings: Vec<RegimeWarning>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectTable {
    pub n_subjects: usize,
    pub seed: u64,
    pub iterations: usize,
    pub weight_policy: WeightPolicy,
    pub rows: Vec<EffectRow>,
    #[serde(skip)]
    pub replicates: Vec<ReplicateResult>,
}

impl EffectTable {
    /// Join point estimates with bootstrap summaries; both are ordered by
    /// regime.
    pub fn new(n_subjects: usize, points: Vec<PointEstimate>, bootstrap: BootstrapSummary) -> Self {
        debug_assert_eq!(points.len(), bootstrap.regimes.len());

        let rows = points
            .into_iter()
            .zip(bootstrap.regimes)
            .map(|(point, boot)| {
                let mut warnings = Vec::new();
                if point.estimate.is_none() {
                    warnings.push(RegimeWarning::DivisionUndefined);
                }
                if boot.degenerate {
                    warnings.push(RegimeWarning::ResampleDegenerate {
                        valid: boot.n_valid,
                    });
                }
                EffectRow {
                    regime: point.regime,
                    threshold: point.regime.threshold(),
                    point_estimate: point.estimate,
                    n_compliant: point.n_compliant,
                    standard_error: Some(boot.standard_error).filter(|se| se.is_finite()),
                    n_valid: boot.n_valid,
                    n_undefined: boot.n_undefined,
                    n_failed: boot.n_failed,
                    warnings,
                }
            })
            .collect();

        Self {
            n_subjects,
            seed: bootstrap.seed,
            iterations: bootstrap.iterations,
            weight_policy: bootstrap.weight_policy,
            rows,
            replicates: bootstrap.replicates,
        }
    }

    pub fn row(&self, regime: Regime) -> Option<&EffectRow> {
        self.rows.iter().find(|r| r.regime == regime)
    }

    /// Regimes sharing the highest defined point estimate.
    pub fn best_regimes(&self) -> Vec<Regime> {
        let best = self
            .rows
            .iter()
            .filter_map(|r| r.point_estimate)
            .fold(f64::NEG_INFINITY, f64::max);
        self.rows
            .iter()
            .filter(|r| r.point_estimate == Some(best))
            .map(|r| r.regime)
            .collect()
    }

    /// One-paragraph narrative of the table.
    pub fn summary(&self) -> String {
        let best = self.best_regimes();
        let mut text = if best.is_empty() {
            "No regime had compliant subjects; no estimate is available.".to_string()
        } else {
            let names: Vec<String> = best.iter().map(|r| r.to_string()).collect();
            let row = self.row(best[0]);
            let estimate = row.and_then(|r| r.point_estimate).unwrap_or(f64::NAN);
            let se = row
                .and_then(|r| r.standard_error)
                .map_or_else(|| "undefined".to_string(), |s| format!("{:.4}", s));
            format!(
                "Highest weighted estimate {:.4} (bootstrap SE {}) under: {}.",
                estimate,
                se,
                names.join(", ")
            )
        };

        let flagged = self.rows.iter().filter(|r| !r.warnings.is_empty()).count();
        if flagged > 0 {
            text.push_str(&format!(
                " {} of {} regimes carry warnings.",
                flagged,
                self.rows.len()
            ));
        }
        text
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "NA".to_string(), |v| format!("{:.4}", v))
}

impl fmt::Display for EffectTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} subjects, {} bootstrap replicates (seed {}, weights {:?})",
            self.n_subjects, self.iterations, self.seed, self.weight_policy
        )?;
        writeln!(
            f,
            "{:<22} {:>10} {:>9} {:>10} {:>7} {:>7} {:>7}  {}",
            "regime", "estimate", "compliant", "se", "valid", "undef", "failed", "warnings"
        )?;
        for row in &self.rows {
            let warnings: Vec<String> = row.warnings.iter().map(|w| w.to_string()).collect();
            writeln!(
                f,
                "{:<22} {:>10} {:>9} {:>10} {:>7} {:>7} {:>7}  {}",
                row.regime.to_string(),
                fmt_opt(row.point_estimate),
                row.n_compliant,
                fmt_opt(row.standard_error),
                row.n_valid,
                row.n_undefined,
                row.n_failed,
                warnings.join("; ")
            )?;
        }
        Ok(())
    }
}
