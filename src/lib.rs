//! Regime compliance, IPW-weighted estimation and cluster bootstrap for
//! longitudinal treatment data.
//!
//! A [`Panel`] of subject-visit records is weighted once by a
//! [`WeightProvider`]; every threshold [`Regime`] ("treat from visit x") is
//! then estimated as a compliance-weighted mean, and a subject-level cluster
//! bootstrap supplies standard errors.
//!
//! ```no_run
//! use causal_regimes::{ColumnMap, ColumnWeights, Panel, RegimeAnalysis, WeightSpec};
//!
//! let columns = ColumnMap {
//!     weight: Some("ipw".into()),
//!     ..ColumnMap::default()
//! };
//! let panel = Panel::from_long_csv("pbc_long.csv".as_ref(), &columns)?;
//! let provider = ColumnWeights::new("ipw");
//! let table = RegimeAnalysis::new(&panel, &provider, WeightSpec::from_columns(&columns)).run()?;
//! println!("{}", table);
//! # Ok::<(), causal_regimes::RegimeError>(())
//! ```

pub mod analysis;
pub mod cluster;
pub mod config;
pub mod error;
pub mod panel;
#[cfg(feature = "python")]
mod python;
pub mod regime;
pub mod report;
pub mod stats;
pub mod weights;

pub use analysis::RegimeAnalysis;
pub use cluster::{run_bootstrap, BootstrapConfig, BootstrapSummary, WeightContext};
pub use config::{AnalysisConfig, Layout};
pub use error::{
    BootstrapError, ConfigError, DataShapeError, EstimateError, RegimeError, WeightError,
};
pub use panel::{ColumnMap, EventStatus, Panel, SubjectVisit};
pub use regime::{candidate_regimes, evaluate, Regime, SubjectOutcome};
pub use report::{EffectRow, EffectTable, RegimeWarning};
pub use stats::weighted_mean;
pub use weights::{
    ColumnWeights, UniformWeights, WeightPolicy, WeightProvider, WeightSpec,
};
