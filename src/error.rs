//! Error taxonomy shared across the crate.
//!
//! Configuration and shape problems are reported eagerly at construction or
//! first call. Numeric degeneracies (zero feature norms, vanishing
//! probabilities) are clamped in place by the estimators instead of being
//! surfaced as errors or NaN.

use thiserror::Error;

use crate::estimator::StrategyKind;
use crate::head::PoolType;

/// Invalid wiring detected while assembling wrappers or heads.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown random feature type '{0}', expected \"rff\" or \"orf\"")]
    UnknownRandomFeatureType(String),
    #[error("Unknown pooling type '{0}'")]
    UnknownPoolType(String),
    #[error("Pooling can only be disabled when the classifier is removed or convolutional")]
    IdentityPoolWithLinearHead,
    #[error("Ensemble heads are incompatible with '{pool}' pooling: it multiplies the pooled feature width by {mult}")]
    EnsembleWideningPool { pool: PoolType, mult: usize },
    #[error("{strategy} uncertainty needs dropout sampling or an ensemble head, the backbone offers neither")]
    NoSampleSource { strategy: StrategyKind },
    #[error("Covariance uncertainty needs a classifier that reports its predictive covariance")]
    NoCovarianceClassifier,
}

/// Array dimensions that disagree with the wrapped model's descriptor.
#[derive(Debug, Error)]
pub enum ShapeError {
    #[error("Expected {expected} input features, got {actual}")]
    FeatureWidth { expected: usize, actual: usize },
    #[error("Sample stack pass has shape {actual:?}, first pass had {expected:?}")]
    SampleStack {
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

/// Failures of the average-uncertainty calibration pass.
///
/// A failed pass never mutates the estimator's `unc_scaler`.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Calibration data source yielded {got} of {want} batches")]
    ExhaustedData { got: usize, want: usize },
    #[error("Average uncertainty over the calibration batches is zero")]
    ZeroAverage,
}

/// Umbrella error for everything an estimator call can surface.
#[derive(Debug, Error)]
pub enum UqError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    /// Failure reported by an external backbone implementation.
    #[error("Backbone error: {0}")]
    Backbone(String),
}
