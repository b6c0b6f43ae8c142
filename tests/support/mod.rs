//! Synthetic backbones for integration tests.
#![allow(dead_code)]

use std::cell::RefCell;

use ndarray::{Array1, Array2, Array3};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::Rng;
use uqwrap::backbone::{Backbone, HeadOutput};
use uqwrap::error::UqError;
use uqwrap::head::PoolType;

/// Minimal backbone whose input already is the embedding: feature
/// extraction is the identity and the classifier is one fixed linear map.
/// Optionally applies test-time dropout noise to the embedding and/or
/// reports a synthetic predictive covariance.
#[derive(Debug)]
pub struct ToyBackbone {
    weight: Array2<f32>,
    num_features: usize,
    num_classes: usize,
    training: bool,
    dropout_samples: Option<usize>,
    covariance: bool,
    rng: RefCell<StdRng>,
}

impl ToyBackbone {
    pub fn plain(num_features: usize, num_classes: usize) -> Self {
        Self {
            weight: deterministic_weight(num_features, num_classes),
            num_features,
            num_classes,
            training: false,
            dropout_samples: None,
            covariance: false,
            rng: RefCell::new(StdRng::seed_from_u64(0)),
        }
    }

    pub fn with_dropout(num_features: usize, num_classes: usize, samples: usize) -> Self {
        let mut backbone = Self::plain(num_features, num_classes);
        backbone.dropout_samples = Some(samples);
        backbone
    }

    pub fn with_covariance(num_features: usize, num_classes: usize) -> Self {
        let mut backbone = Self::plain(num_features, num_classes);
        backbone.covariance = true;
        backbone
    }

    fn dropout_active(&self) -> bool {
        self.dropout_samples.is_some() && !self.training
    }
}

fn deterministic_weight(num_features: usize, num_classes: usize) -> Array2<f32> {
    Array2::from_shape_fn((num_features, num_classes), |(i, j)| {
        ((i + 2 * j) as f32 * 0.37).sin() * 0.5
    })
}

impl Backbone for ToyBackbone {
    fn forward_features(&self, input: &Array2<f32>) -> Result<Array2<f32>, UqError> {
        Ok(input.clone())
    }

    fn forward_head(
        &self,
        features: &Array2<f32>,
        pre_logits: bool,
    ) -> Result<Array2<f32>, UqError> {
        let mut x = features.clone();
        if self.dropout_active() {
            let mut rng = self.rng.borrow_mut();
            x.mapv_inplace(|v| {
                if rng.random::<f32>() < 0.5 {
                    0.0
                } else {
                    2.0 * v
                }
            });
        }
        if pre_logits {
            Ok(x)
        } else {
            Ok(x.dot(&self.weight))
        }
    }

    fn classify(&self, features: &Array2<f32>) -> Result<HeadOutput, UqError> {
        Ok(HeadOutput::Single(features.dot(&self.weight)))
    }

    fn classify_with_covariance(
        &self,
        features: &Array2<f32>,
    ) -> Result<Option<(Array2<f32>, Array1<f32>)>, UqError> {
        if !self.covariance {
            return Ok(None);
        }
        let logits = features.dot(&self.weight);
        let log_det = Array1::from_iter(
            features
                .rows()
                .into_iter()
                .map(|row| (1.0 + row.iter().map(|v| v * v).sum::<f32>()).ln()),
        );
        Ok(Some((logits, log_det)))
    }

    fn supports_covariance(&self) -> bool {
        self.covariance
    }

    fn reset_classifier(
        &mut self,
        num_classes: usize,
        _pool: Option<PoolType>,
    ) -> Result<(), UqError> {
        self.num_classes = num_classes;
        self.weight = deterministic_weight(self.num_features, num_classes);
        Ok(())
    }

    fn num_features(&self) -> usize {
        self.num_features
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn num_dropout_samples(&self) -> Option<usize> {
        self.dropout_samples
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

/// Ensemble-shaped backbone whose heads all emit the same logits, so the
/// JSD disagreement term is exactly zero.
#[derive(Debug)]
pub struct AgreeingEnsemble {
    weight: Array2<f32>,
    num_features: usize,
    num_classes: usize,
    heads: usize,
    training: bool,
}

impl AgreeingEnsemble {
    pub fn new(num_features: usize, num_classes: usize, heads: usize) -> Self {
        Self {
            weight: deterministic_weight(num_features, num_classes),
            num_features,
            num_classes,
            heads,
            training: false,
        }
    }
}

impl Backbone for AgreeingEnsemble {
    fn forward_features(&self, input: &Array2<f32>) -> Result<Array2<f32>, UqError> {
        Ok(input.clone())
    }

    fn forward_head(
        &self,
        features: &Array2<f32>,
        pre_logits: bool,
    ) -> Result<Array2<f32>, UqError> {
        if pre_logits {
            Ok(features.clone())
        } else {
            Ok(features.dot(&self.weight))
        }
    }

    fn classify(&self, features: &Array2<f32>) -> Result<HeadOutput, UqError> {
        let logits = features.dot(&self.weight);
        let stack = Array3::from_shape_fn(
            (self.heads, logits.nrows(), logits.ncols()),
            |(_, b, c)| logits[[b, c]],
        );
        Ok(HeadOutput::Stacked(stack))
    }

    fn reset_classifier(
        &mut self,
        num_classes: usize,
        _pool: Option<PoolType>,
    ) -> Result<(), UqError> {
        self.num_classes = num_classes;
        self.weight = deterministic_weight(self.num_features, num_classes);
        Ok(())
    }

    fn num_features(&self) -> usize {
        self.num_features
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn ensemble_heads(&self) -> Option<usize> {
        Some(self.heads)
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

/// Fixed batch of embeddings with deterministic, non-degenerate values.
pub fn fixed_batch(batch: usize, num_features: usize) -> Array2<f32> {
    Array2::from_shape_fn((batch, num_features), |(b, f)| {
        ((b * num_features + f) as f32 * 0.11).cos() + 1.5
    })
}
