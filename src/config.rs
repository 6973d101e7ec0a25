//! TOML analysis configuration.
//!
//! ```toml
//! [data]
//! layout = "long"
//! id = "id"
//! time = "time"
//! treatment = "trt"
//! status = "status"
//! covariates = ["age", "sex", "edema", "bili", "albumin", "protime"]
//! weight = "ipw"
//!
//! [bootstrap]
//! iterations = 500
//! seed = 2024
//! weight_policy = "reuse"
//!
//! [regimes]
//! thresholds = [0, 1, 2, 3, 4, 5, 6]
//! include_never = true
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cluster::BootstrapConfig;
use crate::error::ConfigError;
use crate::panel::ColumnMap;
use crate::regime::{candidate_regimes, Regime};
use crate::weights::WeightPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    #[default]
    Long,
    Wide,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default)]
    pub layout: Layout,
    #[serde(flatten)]
    pub columns: ColumnMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapSettings {
    pub iterations: usize,
    pub seed: Option<u64>,
    pub weight_policy: WeightPolicy,
    pub parallel: bool,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        let defaults = BootstrapConfig::default();
        Self {
            iterations: defaults.iterations,
            seed: defaults.seed,
            weight_policy: defaults.weight_policy,
            parallel: defaults.parallel,
        }
    }
}

impl From<&BootstrapSettings> for BootstrapConfig {
    fn from(settings: &BootstrapSettings) -> Self {
        Self {
            iterations: settings.iterations,
            seed: settings.seed,
            weight_policy: settings.weight_policy,
            parallel: settings.parallel,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeSettings {
    /// Thresholds to evaluate; every visit in follow-up when absent
    pub thresholds: Option<Vec<u32>>,
    pub include_never: bool,
}

impl Default for RegimeSettings {
    fn default() -> Self {
        Self {
            thresholds: None,
            include_never: true,
        }
    }
}

impl RegimeSettings {
    pub fn candidates(&self, max_visit: u32) -> Vec<Regime> {
        match &self.thresholds {
            Some(thresholds) => candidate_regimes(thresholds.iter().copied(), self.include_never),
            None => candidate_regimes(0..=max_visit, self.include_never),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub bootstrap: BootstrapSettings,
    #[serde(default)]
    pub regimes: RegimeSettings,
}

impl AnalysisConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: AnalysisConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bootstrap.iterations == 0 {
            return Err(ConfigError::Invalid(
                "bootstrap.iterations must be at least 1".to_string(),
            ));
        }
        if matches!(&self.regimes.thresholds, Some(t) if t.is_empty()) && !self.regimes.include_never {
            return Err(ConfigError::Invalid(
                "regimes: no thresholds and include_never = false leaves nothing to estimate"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::default();
        assert_eq!(config.bootstrap.iterations, 1000);
        assert_eq!(config.bootstrap.weight_policy, WeightPolicy::Reuse);
        assert!(config.bootstrap.parallel);
        assert_eq!(config.data.layout, Layout::Long);
        assert_eq!(config.data.columns.id, "id");
        assert_eq!(config.regimes.candidates(2).len(), 4);
    }

    #[test]
    fn test_parse_full_config() {
        let text = r#"
[data]
layout = "wide"
id = "pid"
time = "year"
treatment = "tx"
covariates = ["age", "bili"]
weight = "sw"

[bootstrap]
iterations = 250
seed = 7
weight_policy = "refit"

[regimes]
thresholds = [1, 3]
include_never = false
"#;
        let config: AnalysisConfig = toml::from_str(text).unwrap();
        config.validate().unwrap();

        assert_eq!(config.data.layout, Layout::Wide);
        assert_eq!(config.data.columns.id, "pid");
        assert_eq!(config.data.columns.weight.as_deref(), Some("sw"));
        // unspecified status column keeps no default inside a [data] table
        assert_eq!(config.data.columns.status, None);
        assert_eq!(config.bootstrap.iterations, 250);
        assert_eq!(config.bootstrap.seed, Some(7));
        assert_eq!(config.bootstrap.weight_policy, WeightPolicy::Refit);
        assert!(config.bootstrap.parallel);
        assert_eq!(
            config.regimes.candidates(6),
            vec![Regime::TreatFrom(1), Regime::TreatFrom(3)]
        );
    }

    #[test]
    fn test_rejects_zero_iterations() {
        let config: AnalysisConfig = toml::from_str("[bootstrap]\niterations = 0\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[bootstrap]\nseed = 99").unwrap();
        let config = AnalysisConfig::from_file(file.path()).unwrap();
        assert_eq!(config.bootstrap.seed, Some(99));
        assert_eq!(config.bootstrap.iterations, 1000);
    }

    #[test]
    fn test_from_file_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[bootstrap\n").unwrap();
        assert!(matches!(
            AnalysisConfig::from_file(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
