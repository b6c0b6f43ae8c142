//! Post-hoc uncertainty estimation strategies over a wrapped backbone.
//!
//! Every strategy shares one forward contract: `(out, unc, features)` where
//! `features` is the pre-logits embedding, `out` is logits or
//! log-probabilities depending on the strategy, and `unc` is the raw
//! uncertainty scaled by the estimator's `unc_scaler`.

use std::fmt;

use ndarray::{Array1, Array2, Array3};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::backbone::{Backbone, SampleSource};
use crate::delegate::ModelDelegate;
use crate::error::{ConfigError, ShapeError, UqError};

pub mod calibrate;
pub mod entropy;
pub mod network;

pub use calibrate::DEFAULT_CALIBRATION_BATCHES;
pub use network::UncertaintyNetwork;

/// Feature norms below this are clamped before inversion, keeping the
/// norm-based uncertainty finite for degenerate embeddings.
pub const NORM_FLOOR: f32 = 1e-12;

/// Strategy selector, the serialization-facing face of [`Strategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Norm,
    Constant,
    Network,
    Entropy,
    Jsd,
    Covariance,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Norm => "norm",
            StrategyKind::Constant => "constant",
            StrategyKind::Network => "network",
            StrategyKind::Entropy => "entropy",
            StrategyKind::Jsd => "jsd",
            StrategyKind::Covariance => "covariance",
        }
    }

    /// Whether the strategy needs a genuine multi-sample logit stack.
    pub fn needs_sample_stack(&self) -> bool {
        matches!(self, StrategyKind::Entropy | StrategyKind::Jsd)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uncertainty estimation strategy, carrying per-strategy state where needed.
#[derive(Debug)]
pub enum Strategy {
    /// Inverse feature norm: large embeddings are treated as certain.
    Norm,
    /// Constant `1.0` per example; the calibration baseline.
    Constant,
    /// Learned MLP over the embedding.
    Network(UncertaintyNetwork),
    /// Predictive entropy of the mean distribution over a sample stack.
    Entropy,
    /// Jensen-Shannon disagreement term over a sample stack.
    Jsd,
    /// Log-determinant of the predictive covariance from a GP-capable
    /// classifier.
    Covariance,
}

impl Strategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Norm => StrategyKind::Norm,
            Strategy::Constant => StrategyKind::Constant,
            Strategy::Network(_) => StrategyKind::Network,
            Strategy::Entropy => StrategyKind::Entropy,
            Strategy::Jsd => StrategyKind::Jsd,
            Strategy::Covariance => StrategyKind::Covariance,
        }
    }
}

/// One estimator forward pass: strategy-dependent `out`
/// (logits or log-probabilities), scaled uncertainty, and the pre-logits
/// embedding.
#[derive(Debug, Clone)]
pub struct Estimate {
    pub out: Array2<f32>,
    pub unc: Array1<f32>,
    pub features: Array2<f32>,
}

/// A backbone with calibrated predictive-uncertainty estimates attached.
///
/// Wraps the model in a [`ModelDelegate`], owns the strategy and the single
/// piece of persistent estimator state, `unc_scaler` (default `1.0`, mutated
/// only by [`calibrate`]).
#[derive(Debug)]
pub struct UncertaintyModel<M: Backbone> {
    model: ModelDelegate<M>,
    strategy: Strategy,
    unc_scaler: f32,
}

impl<M: Backbone> UncertaintyModel<M> {
    /// Wraps `model` with `strategy`, validating the combination.
    ///
    /// Entropy/JSD require a backbone with dropout sampling or an ensemble
    /// head; covariance requires a GP-capable classifier. A silent
    /// single-sample fallback is never accepted.
    pub fn new(model: M, strategy: Strategy) -> Result<Self, ConfigError> {
        let delegate = ModelDelegate::new(model);
        let kind = strategy.kind();
        if kind.needs_sample_stack() && !delegate.sample_source().multi_sample() {
            return Err(ConfigError::NoSampleSource { strategy: kind });
        }
        if kind == StrategyKind::Covariance && !delegate.supports_covariance() {
            return Err(ConfigError::NoCovarianceClassifier);
        }
        Ok(Self {
            model: delegate,
            strategy,
            unc_scaler: 1.0,
        })
    }

    /// Builds the strategy from its selector; `seed` feeds the uncertainty
    /// network's initialization when `kind` is [`StrategyKind::Network`].
    pub fn with_kind(model: M, kind: StrategyKind, seed: u64) -> Result<Self, ConfigError> {
        let strategy = match kind {
            StrategyKind::Norm => Strategy::Norm,
            StrategyKind::Constant => Strategy::Constant,
            StrategyKind::Network => {
                use rand::SeedableRng;
                let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
                Strategy::Network(UncertaintyNetwork::with_default_width(
                    model.num_features(),
                    &mut rng,
                ))
            }
            StrategyKind::Entropy => Strategy::Entropy,
            StrategyKind::Jsd => Strategy::Jsd,
            StrategyKind::Covariance => Strategy::Covariance,
        };
        Self::new(model, strategy)
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// Current uncertainty scale; `1.0` until calibrated.
    pub fn unc_scaler(&self) -> f32 {
        self.unc_scaler
    }

    pub(crate) fn set_unc_scaler(&mut self, scaler: f32) {
        self.unc_scaler = scaler;
    }

    pub fn delegate(&self) -> &ModelDelegate<M> {
        &self.model
    }

    pub fn delegate_mut(&mut self) -> &mut ModelDelegate<M> {
        &mut self.model
    }

    pub fn is_training(&self) -> bool {
        self.model.is_training()
    }

    pub fn set_training(&mut self, training: bool) {
        self.model.set_training(training);
    }

    /// Runs the backbone and the strategy, returning
    /// `(out, unc_scaler × raw_uncertainty, features)`.
    pub fn forward(&self, input: &Array2<f32>) -> Result<Estimate, UqError> {
        let (out, raw, features) = match &self.strategy {
            Strategy::Norm => {
                let features = self.pre_logits(input)?;
                let out = self.model.classify(&features)?.mean_heads();
                let raw = inverse_feature_norm(&features);
                (out, raw, features)
            }
            Strategy::Constant => {
                let features = self.pre_logits(input)?;
                let out = self.model.classify(&features)?.mean_heads();
                let raw = Array1::ones(features.nrows());
                (out, raw, features)
            }
            Strategy::Network(net) => {
                let features = self.pre_logits(input)?;
                let out = self.model.classify(&features)?.mean_heads();
                let raw = net.forward(&features)?;
                (out, raw, features)
            }
            Strategy::Entropy => self.sampled_forward(input, false)?,
            Strategy::Jsd => self.sampled_forward(input, true)?,
            Strategy::Covariance => {
                let features = self.pre_logits(input)?;
                let (out, raw) = self
                    .model
                    .classify_with_covariance(&features)?
                    .ok_or(ConfigError::NoCovarianceClassifier)?;
                (out, raw, features)
            }
        };
        let unc = raw * self.unc_scaler;
        Ok(Estimate { out, unc, features })
    }

    fn pre_logits(&self, input: &Array2<f32>) -> Result<Array2<f32>, UqError> {
        let features = self.model.forward_features(input)?;
        self.model.forward_head(&features, true)
    }

    /// Shared entropy/JSD path. Builds the sample stack, averages its
    /// probabilities, and returns log-probabilities as `out`. A dropout
    /// backbone still in training mode falls back to a single pass: raw
    /// logits out, predictive entropy as the substitute uncertainty.
    fn sampled_forward(
        &self,
        input: &Array2<f32>,
        disagreement_only: bool,
    ) -> Result<(Array2<f32>, Array1<f32>, Array2<f32>), UqError> {
        match self.predictive_stack(input)? {
            StackOutcome::Stack { logits, features } => {
                let probs = entropy::softmax_stack(&logits);
                let mean = entropy::mean_probs(&probs);
                let out = mean.mapv(entropy::floored_ln);
                let raw = if disagreement_only {
                    let (entropy_of_mean, mean_of_entropy) = entropy::jsd_split(&probs);
                    entropy_of_mean - mean_of_entropy
                } else {
                    entropy::entropy_rows(mean.view())
                };
                Ok((out, raw, features))
            }
            StackOutcome::SinglePass { logits, features } => {
                let probs = entropy::softmax_rows(&logits);
                let raw = entropy::entropy_rows(probs.view());
                Ok((logits, raw, features))
            }
        }
    }

    fn predictive_stack(&self, input: &Array2<f32>) -> Result<StackOutcome, UqError> {
        match self.model.sample_source() {
            SampleSource::Ensemble { .. } => {
                let features = self.pre_logits(input)?;
                let logits = self.model.classify(&features)?.into_stack();
                Ok(StackOutcome::Stack { logits, features })
            }
            SampleSource::Dropout { samples } if !self.model.is_training() => {
                let mut passes: Vec<Array2<f32>> = Vec::with_capacity(samples);
                let mut features = None;
                for _ in 0..samples {
                    let pass_features = self.pre_logits(input)?;
                    passes.push(self.model.classify(&pass_features)?.mean_heads());
                    features = Some(pass_features);
                }
                let logits = stack_passes(passes)?;
                let features = features.unwrap_or_else(|| Array2::zeros((0, 0)));
                Ok(StackOutcome::Stack { logits, features })
            }
            SampleSource::Dropout { .. } => {
                let features = self.pre_logits(input)?;
                let logits = self.model.classify(&features)?.mean_heads();
                Ok(StackOutcome::SinglePass { logits, features })
            }
            SampleSource::Plain => Err(ConfigError::NoSampleSource {
                strategy: self.strategy.kind(),
            }
            .into()),
        }
    }
}

enum StackOutcome {
    /// Multi-sample logit stack `[samples, batch, classes]` plus the last
    /// pass's embedding.
    Stack {
        logits: Array3<f32>,
        features: Array2<f32>,
    },
    /// Training-mode dropout fallback: one deterministic pass.
    SinglePass {
        logits: Array2<f32>,
        features: Array2<f32>,
    },
}

fn inverse_feature_norm(features: &Array2<f32>) -> Array1<f32> {
    Array1::from_iter(features.rows().into_iter().map(|row| {
        let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm < NORM_FLOOR {
            warn!(norm, "degenerate feature norm clamped to {NORM_FLOOR}");
        }
        1.0 / norm.max(NORM_FLOOR)
    }))
}

fn stack_passes(passes: Vec<Array2<f32>>) -> Result<Array3<f32>, UqError> {
    let samples = passes.len().max(1);
    let expected = passes
        .first()
        .map(|p| p.dim())
        .unwrap_or((0, 0));
    for pass in &passes {
        if pass.dim() != expected {
            return Err(ShapeError::SampleStack {
                expected,
                actual: pass.dim(),
            }
            .into());
        }
    }
    Ok(Array3::from_shape_fn(
        (samples, expected.0, expected.1),
        |(s, b, c)| passes[s][[b, c]],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_kind_serializes_snake_case() {
        let json = serde_json::to_string(&StrategyKind::Jsd).expect("serialize");
        assert_eq!(json, "\"jsd\"");
        let kind: StrategyKind = serde_json::from_str("\"covariance\"").expect("deserialize");
        assert_eq!(kind, StrategyKind::Covariance);
    }

    #[test]
    fn only_entropy_and_jsd_need_sample_stacks() {
        assert!(StrategyKind::Entropy.needs_sample_stack());
        assert!(StrategyKind::Jsd.needs_sample_stack());
        assert!(!StrategyKind::Norm.needs_sample_stack());
        assert!(!StrategyKind::Constant.needs_sample_stack());
        assert!(!StrategyKind::Network.needs_sample_stack());
        assert!(!StrategyKind::Covariance.needs_sample_stack());
    }

    #[test]
    fn inverse_norm_clamps_zero_rows() {
        let features = ndarray::array![[0.0_f32, 0.0], [3.0, 4.0]];
        let unc = inverse_feature_norm(&features);
        assert!(unc[0].is_finite());
        assert!((unc[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn stack_passes_preserves_pass_order() {
        let passes = vec![
            ndarray::array![[1.0_f32, 2.0]],
            ndarray::array![[3.0_f32, 4.0]],
        ];
        let stack = stack_passes(passes).expect("stack");
        assert_eq!(stack.dim(), (2, 1, 2));
        assert_eq!(stack[[0, 0, 1]], 2.0);
        assert_eq!(stack[[1, 0, 0]], 3.0);
    }
}
