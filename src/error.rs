//! Error types for panel loading, weighting, estimation and bootstrap.

use thiserror::Error;

/// Structural problems with a longitudinal panel. Always fatal, raised before
/// any estimation starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataShapeError {
    #[error("Panel contains no records")]
    EmptyPanel,

    #[error("Missing required column '{0}'")]
    MissingColumn(String),

    #[error("Line {line}: expected {expected} fields, found {found}")]
    RaggedRow {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("Line {line}: malformed CSV: {message}")]
    MalformedCsv { line: usize, message: String },

    #[error("Line {line}: cannot parse '{value}' in column '{column}'")]
    InvalidCell {
        line: usize,
        column: String,
        value: String,
    },

    #[error("Subject {subject_id} has more than one record at visit {visit_time}")]
    DuplicateVisit { subject_id: i64, visit_time: u32 },

    #[error("Subject {subject_id}: visit {visit_time} follows visit {previous}; visit times must be strictly increasing")]
    NonMonotonicVisit {
        subject_id: i64,
        visit_time: u32,
        previous: u32,
    },

    #[error("Subject {subject_id}: follow-up starts at visit {first_visit}, expected 0")]
    MissingBaseline { subject_id: i64, first_visit: u32 },

    #[error("Line {line}: subject {subject_id} has no baseline treatment in column '{column}'")]
    MissingBaselineTreatment {
        line: usize,
        subject_id: i64,
        column: String,
    },

    #[error("Subject {subject_id}: treatment reverts to 0 at visit {visit_time} after being started")]
    TreatmentReverted { subject_id: i64, visit_time: u32 },

    #[error("Record has {found} covariate values but the panel declares {expected}")]
    CovariateArity { expected: usize, found: usize },
}

/// Failures producing or validating inverse-probability weights.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WeightError {
    #[error("Weight provider returned {found} weights for {expected} records")]
    LengthMismatch { expected: usize, found: usize },

    #[error("Weight at record {index} is {value}; weights must be finite and non-negative")]
    InvalidWeight { index: usize, value: f64 },

    #[error("Weight column '{0}' is not present in the panel")]
    MissingColumn(String),

    #[error("Weight provider does not support refitting: {0}")]
    RefitUnsupported(String),
}

/// Conditions raised by the weighted estimator.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum EstimateError {
    /// No compliant subject carries positive weight.
    #[error("Weighted mean is undefined: total compliant weight is zero")]
    DivisionUndefined,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BootstrapError {
    #[error("Cluster bootstrap requires at least 2 subjects; found {found}")]
    InsufficientClusters { found: usize },

    #[error("bootstrap_iterations must be at least 1")]
    NoIterations,

    #[error("At least one regime is required")]
    NoRegimes,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Umbrella error for a full regime analysis.
#[derive(Error, Debug)]
pub enum RegimeError {
    #[error("Data shape error: {0}")]
    DataShape(#[from] DataShapeError),

    #[error("Weight error: {0}")]
    Weight(#[from] WeightError),

    #[error("Bootstrap error: {0}")]
    Bootstrap(#[from] BootstrapError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RegimeError>;
