//! Generic forwarding wrapper around an arbitrary backbone.

use ndarray::{Array1, Array2};
use tracing::debug;

use crate::backbone::{Backbone, HeadOutput, SampleSource};
use crate::error::UqError;
use crate::head::PoolType;

/// Composes over a backbone and forwards every capability call, caching the
/// descriptor attributes (`num_classes`, `num_features`, `drop_rate`,
/// `grad_checkpointing`) and the resolved [`SampleSource`].
///
/// The caches are refreshed whenever the classifier is reset through the
/// delegate, so they can never go stale against the backbone.
#[derive(Debug)]
pub struct ModelDelegate<M: Backbone> {
    model: M,
    num_classes: usize,
    num_features: usize,
    drop_rate: f32,
    grad_checkpointing: bool,
    sample_source: SampleSource,
}

impl<M: Backbone> ModelDelegate<M> {
    pub fn new(model: M) -> Self {
        let num_classes = model.num_classes();
        let num_features = model.num_features();
        let drop_rate = model.drop_rate();
        let grad_checkpointing = model.grad_checkpointing();
        let sample_source = SampleSource::resolve(&model);
        Self {
            model,
            num_classes,
            num_features,
            drop_rate,
            grad_checkpointing,
            sample_source,
        }
    }

    /// Capability tag resolved at wrap time.
    pub fn sample_source(&self) -> SampleSource {
        self.sample_source
    }

    pub fn inner(&self) -> &M {
        &self.model
    }

    pub fn inner_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn into_inner(self) -> M {
        self.model
    }

    fn refresh_cache(&mut self) {
        self.num_classes = self.model.num_classes();
        self.num_features = self.model.num_features();
        self.drop_rate = self.model.drop_rate();
        self.grad_checkpointing = self.model.grad_checkpointing();
        self.sample_source = SampleSource::resolve(&self.model);
    }
}

impl<M: Backbone> Backbone for ModelDelegate<M> {
    fn forward_features(&self, input: &Array2<f32>) -> Result<Array2<f32>, UqError> {
        self.model.forward_features(input)
    }

    fn forward_head(
        &self,
        features: &Array2<f32>,
        pre_logits: bool,
    ) -> Result<Array2<f32>, UqError> {
        self.model.forward_head(features, pre_logits)
    }

    fn classify(&self, features: &Array2<f32>) -> Result<HeadOutput, UqError> {
        self.model.classify(features)
    }

    fn classify_with_covariance(
        &self,
        features: &Array2<f32>,
    ) -> Result<Option<(Array2<f32>, Array1<f32>)>, UqError> {
        self.model.classify_with_covariance(features)
    }

    fn supports_covariance(&self) -> bool {
        self.model.supports_covariance()
    }

    fn reset_classifier(
        &mut self,
        num_classes: usize,
        pool: Option<PoolType>,
    ) -> Result<(), UqError> {
        self.model.reset_classifier(num_classes, pool)?;
        self.refresh_cache();
        debug!(
            num_classes = self.num_classes,
            num_features = self.num_features,
            "classifier reset, delegate caches refreshed"
        );
        Ok(())
    }

    fn num_features(&self) -> usize {
        self.num_features
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn num_dropout_samples(&self) -> Option<usize> {
        self.model.num_dropout_samples()
    }

    fn ensemble_heads(&self) -> Option<usize> {
        self.model.ensemble_heads()
    }

    fn pool_type(&self) -> PoolType {
        self.model.pool_type()
    }

    fn drop_rate(&self) -> f32 {
        self.drop_rate
    }

    fn grad_checkpointing(&self) -> bool {
        self.grad_checkpointing
    }

    fn is_training(&self) -> bool {
        self.model.is_training()
    }

    fn set_training(&mut self, training: bool) {
        self.model.set_training(training);
    }
}
