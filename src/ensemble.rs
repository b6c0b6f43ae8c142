//! Shallow ensembles: several classification heads over one shared embedding.

use ndarray::{Array1, Array2, Array3};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use tracing::debug;

use crate::backbone::{Backbone, HeadOutput};
use crate::delegate::ModelDelegate;
use crate::error::{ConfigError, ShapeError, UqError};
use crate::head::PoolType;

/// A single linear projection of width `heads × classes`, read back as
/// `heads` parallel classifiers.
#[derive(Debug)]
pub struct ShallowEnsembleHead {
    weight: Array2<f32>,
    bias: Array1<f32>,
    num_heads: usize,
    num_classes: usize,
}

impl ShallowEnsembleHead {
    pub fn new<R: Rng>(
        num_heads: usize,
        num_features: usize,
        num_classes: usize,
        rng: &mut R,
    ) -> Self {
        let scale = 1.0 / (num_features.max(1) as f32).sqrt();
        let weight = Array2::from_shape_fn((num_features, num_heads * num_classes), |_| {
            rng.sample::<f32, _>(StandardNormal) * scale
        });
        let bias = Array1::zeros(num_heads * num_classes);
        Self {
            weight,
            bias,
            num_heads,
            num_classes,
        }
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn num_features(&self) -> usize {
        self.weight.nrows()
    }

    /// Rebuilds the projection from scratch; no weight carry-over.
    pub fn reset<R: Rng>(&mut self, num_heads: Option<usize>, rng: &mut R) {
        let heads = num_heads.unwrap_or(self.num_heads);
        *self = Self::new(heads, self.num_features(), self.num_classes, rng);
    }

    /// Projects `[batch, features]` to `[batch, heads·classes]`, regroups to
    /// `[batch, heads, classes]`, and permutes to the ensemble-first layout
    /// `[heads, batch, classes]`.
    pub fn forward(&self, features: &Array2<f32>) -> Result<Array3<f32>, ShapeError> {
        if features.ncols() != self.weight.nrows() {
            return Err(ShapeError::FeatureWidth {
                expected: self.weight.nrows(),
                actual: features.ncols(),
            });
        }
        let flat = features.dot(&self.weight) + &self.bias;
        let (heads, classes) = (self.num_heads, self.num_classes);
        Ok(Array3::from_shape_fn(
            (heads, features.nrows(), classes),
            |(h, b, c)| flat[[b, h * classes + c]],
        ))
    }
}

/// Wraps a backbone and replaces its classifier with a
/// [`ShallowEnsembleHead`], turning one model into `heads` parallel
/// classifiers that share the pooled embedding.
#[derive(Debug)]
pub struct ShallowEnsembleWrapper<M: Backbone> {
    inner: ModelDelegate<M>,
    head: ShallowEnsembleHead,
    num_heads: usize,
    rng: StdRng,
}

impl<M: Backbone> ShallowEnsembleWrapper<M> {
    /// Builds the ensemble head against the backbone's pooled feature width.
    ///
    /// Pooling that widens the embedding after construction (concatenated
    /// avg+max) would desynchronize the head, so it is rejected outright.
    pub fn new(model: M, num_heads: usize, seed: u64) -> Result<Self, ConfigError> {
        let inner = ModelDelegate::new(model);
        Self::check_pool(inner.pool_type())?;
        let mut rng = StdRng::seed_from_u64(seed);
        let head = ShallowEnsembleHead::new(
            num_heads,
            inner.num_features(),
            inner.num_classes(),
            &mut rng,
        );
        Ok(Self {
            inner,
            head,
            num_heads,
            rng,
        })
    }

    fn check_pool(pool: PoolType) -> Result<(), ConfigError> {
        let mult = pool.feat_mult();
        if mult != 1 {
            return Err(ConfigError::EnsembleWideningPool { pool, mult });
        }
        Ok(())
    }

    pub fn head(&self) -> &ShallowEnsembleHead {
        &self.head
    }

    pub fn inner(&self) -> &ModelDelegate<M> {
        &self.inner
    }

    /// Rebuilds the ensemble head, optionally with a different head count.
    pub fn reset_heads(&mut self, num_heads: Option<usize>) {
        if let Some(heads) = num_heads {
            self.num_heads = heads;
        }
        self.head = ShallowEnsembleHead::new(
            self.num_heads,
            self.inner.num_features(),
            self.inner.num_classes(),
            &mut self.rng,
        );
        debug!(num_heads = self.num_heads, "ensemble head rebuilt");
    }
}

impl<M: Backbone> Backbone for ShallowEnsembleWrapper<M> {
    fn forward_features(&self, input: &Array2<f32>) -> Result<Array2<f32>, UqError> {
        // Ensembling changes nothing before the head.
        self.inner.forward_features(input)
    }

    /// Always pulls the pre-logits embedding from the inner model; the
    /// ensemble head only applies when logits were asked for. The `[B, C]`
    /// return contract is kept by averaging the heads — the full stack is
    /// available through [`Backbone::classify`].
    fn forward_head(
        &self,
        features: &Array2<f32>,
        pre_logits: bool,
    ) -> Result<Array2<f32>, UqError> {
        let embedding = self.inner.forward_head(features, true)?;
        if pre_logits {
            return Ok(embedding);
        }
        let stack = self.head.forward(&embedding)?;
        Ok(HeadOutput::Stacked(stack).mean_heads())
    }

    fn classify(&self, features: &Array2<f32>) -> Result<HeadOutput, UqError> {
        Ok(HeadOutput::Stacked(self.head.forward(features)?))
    }

    fn reset_classifier(
        &mut self,
        num_classes: usize,
        pool: Option<PoolType>,
    ) -> Result<(), UqError> {
        if let Some(pool) = pool {
            Self::check_pool(pool)?;
        }
        self.inner.reset_classifier(num_classes, pool)?;
        self.reset_heads(None);
        Ok(())
    }

    fn num_features(&self) -> usize {
        self.inner.num_features()
    }

    fn num_classes(&self) -> usize {
        self.inner.num_classes()
    }

    fn num_dropout_samples(&self) -> Option<usize> {
        self.inner.num_dropout_samples()
    }

    fn ensemble_heads(&self) -> Option<usize> {
        Some(self.num_heads)
    }

    fn pool_type(&self) -> PoolType {
        self.inner.pool_type()
    }

    fn drop_rate(&self) -> f32 {
        self.inner.drop_rate()
    }

    fn grad_checkpointing(&self) -> bool {
        self.inner.grad_checkpointing()
    }

    fn is_training(&self) -> bool {
        self.inner.is_training()
    }

    fn set_training(&mut self, training: bool) {
        self.inner.set_training(training);
    }
}
