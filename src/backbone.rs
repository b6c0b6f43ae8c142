//! Capability surface a wrapped classification model must expose.
//!
//! Wrapped models are of unknown concrete type, so the wrappers never
//! inherit from them; they compose over this trait and forward each call
//! explicitly.

use ndarray::{Array1, Array2, Array3, Axis};

use crate::error::UqError;
use crate::head::PoolType;

/// Result of applying a model's final classifier to a pre-logits embedding.
///
/// Plain classifiers produce a single `[batch, classes]` logit set; shallow
/// ensembles produce a `[heads, batch, classes]` stack.
#[derive(Debug, Clone)]
pub enum HeadOutput {
    Single(Array2<f32>),
    Stacked(Array3<f32>),
}

impl HeadOutput {
    /// Number of parallel logit sets carried by this output.
    pub fn head_count(&self) -> usize {
        match self {
            HeadOutput::Single(_) => 1,
            HeadOutput::Stacked(stack) => stack.shape()[0],
        }
    }

    /// Collapses to `[batch, classes]`, averaging logits over heads.
    pub fn mean_heads(self) -> Array2<f32> {
        match self {
            HeadOutput::Single(logits) => logits,
            HeadOutput::Stacked(stack) => {
                let heads = stack.shape()[0].max(1) as f32;
                stack.sum_axis(Axis(0)) / heads
            }
        }
    }

    /// Expands to a `[samples, batch, classes]` stack (`samples == 1` for a
    /// single head).
    pub fn into_stack(self) -> Array3<f32> {
        match self {
            HeadOutput::Single(logits) => logits.insert_axis(Axis(0)),
            HeadOutput::Stacked(stack) => stack,
        }
    }
}

/// How an estimator obtains multiple predictive samples from a backbone.
///
/// Resolved once when the backbone is wrapped, so forward passes never
/// re-derive it from type checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleSource {
    /// Single deterministic pass only.
    Plain,
    /// Test-time dropout: `samples` stochastic passes in evaluation mode.
    Dropout { samples: usize },
    /// Shallow ensemble: `heads` parallel logit sets from one pass.
    Ensemble { heads: usize },
}

impl SampleSource {
    /// Reads the backbone's capabilities; ensemble structure wins over
    /// dropout support when both are present.
    pub fn resolve<M: Backbone + ?Sized>(model: &M) -> Self {
        if let Some(heads) = model.ensemble_heads().filter(|&h| h > 0) {
            SampleSource::Ensemble { heads }
        } else if let Some(samples) = model.num_dropout_samples().filter(|&s| s > 0) {
            SampleSource::Dropout { samples }
        } else {
            SampleSource::Plain
        }
    }

    /// Whether the source can yield a genuine multi-sample stack.
    pub fn multi_sample(&self) -> bool {
        !matches!(self, SampleSource::Plain)
    }
}

/// Minimal interface of a backbone: embedding extraction, a final
/// classifier, and the descriptor attributes the wrappers cache.
pub trait Backbone {
    /// Unpooled feature extraction for an input batch.
    fn forward_features(&self, input: &Array2<f32>) -> Result<Array2<f32>, UqError>;

    /// Head pass over extracted features; with `pre_logits` the pooled
    /// embedding is returned instead of logits.
    fn forward_head(&self, features: &Array2<f32>, pre_logits: bool)
    -> Result<Array2<f32>, UqError>;

    /// Applies the final classifier to a pre-logits embedding.
    fn classify(&self, features: &Array2<f32>) -> Result<HeadOutput, UqError>;

    /// Classifier pass that also reports the log-determinant of the
    /// predictive covariance, for GP-capable heads. `Ok(None)` when the
    /// classifier cannot.
    fn classify_with_covariance(
        &self,
        features: &Array2<f32>,
    ) -> Result<Option<(Array2<f32>, Array1<f32>)>, UqError> {
        let _ = features;
        Ok(None)
    }

    /// Whether `classify_with_covariance` returns covariance information.
    fn supports_covariance(&self) -> bool {
        false
    }

    /// Swaps the final classifier for a fresh one with `num_classes`
    /// outputs, optionally changing the pooling.
    fn reset_classifier(
        &mut self,
        num_classes: usize,
        pool: Option<PoolType>,
    ) -> Result<(), UqError>;

    fn num_features(&self) -> usize;

    fn num_classes(&self) -> usize;

    /// Present when the backbone supports test-time dropout sampling.
    fn num_dropout_samples(&self) -> Option<usize> {
        None
    }

    /// Present when the backbone carries a shallow ensemble head.
    fn ensemble_heads(&self) -> Option<usize> {
        None
    }

    fn pool_type(&self) -> PoolType {
        PoolType::Avg
    }

    fn drop_rate(&self) -> f32 {
        0.0
    }

    fn grad_checkpointing(&self) -> bool {
        false
    }

    /// Training/evaluation mode; shared mutable state, see the calibration
    /// notes in [`crate::estimator`].
    fn is_training(&self) -> bool;

    fn set_training(&mut self, training: bool);
}
