//! End-to-end regime analysis: fit weights once, estimate every regime on the
//! observed panel, then bootstrap standard errors.

use tracing::{info, warn};

use crate::cluster::{run_bootstrap, BootstrapConfig, WeightContext};
use crate::error::{Result, WeightError};
use crate::panel::Panel;
use crate::regime::{candidate_regimes, count_compliant, evaluate, Regime};
use crate::report::{EffectTable, PointEstimate};
use crate::stats::weighted_mean;
use crate::weights::{fit_weights, WeightProvider, WeightSpec};

pub struct RegimeAnalysis<'a> {
    panel: &'a Panel,
    provider: &'a dyn WeightProvider,
    spec: WeightSpec,
    regimes: Vec<Regime>,
    bootstrap: BootstrapConfig,
}

impl<'a> RegimeAnalysis<'a> {
    /// Analysis over every threshold `0..=max_visit` plus never-treat, with
    /// default bootstrap settings.
    pub fn new(panel: &'a Panel, provider: &'a dyn WeightProvider, spec: WeightSpec) -> Self {
        Self {
            panel,
            provider,
            spec,
            regimes: candidate_regimes(0..=panel.max_visit(), true),
            bootstrap: BootstrapConfig::default(),
        }
    }

    pub fn regimes(mut self, regimes: Vec<Regime>) -> Self {
        self.regimes = regimes;
        self
    }

    pub fn bootstrap(mut self, config: BootstrapConfig) -> Self {
        self.bootstrap = config;
        self
    }

    /// Estimate each regime on the observed panel with the given weights.
    ///
    /// # Errors
    /// Returns a `WeightError` if `weights` is not one valid weight per
    /// panel record.
    pub fn point_estimates(
        &self,
        weights: &[f64],
    ) -> std::result::Result<Vec<PointEstimate>, WeightError> {
        self.regimes
            .iter()
            .map(|&regime| {
                let rows = evaluate(self.panel, weights, regime)?;
                let estimate = weighted_mean(&rows).ok();
                if estimate.is_none() {
                    warn!(%regime, "no compliant subjects; point estimate undefined");
                }
                Ok(PointEstimate {
                    regime,
                    estimate,
                    n_compliant: count_compliant(&rows),
                })
            })
            .collect()
    }

    pub fn run(&self) -> Result<EffectTable> {
        info!(
            subjects = self.panel.n_subjects(),
            records = self.panel.n_records(),
            truncated = self.panel.truncated_rows(),
            provider = self.provider.name(),
            "starting regime analysis"
        );

        let weights = fit_weights(self.provider, self.panel, &self.spec)?;
        let points = self.point_estimates(&weights)?;

        let context = WeightContext {
            provider: self.provider,
            spec: &self.spec,
            observed: &weights,
        };
        let summary = run_bootstrap(self.panel, context, &self.regimes, &self.bootstrap)?;

        Ok(EffectTable::new(self.panel.n_subjects(), points, summary))
    }
}
