//! Learned uncertainty head: a small MLP over the pre-logits embedding.

use ndarray::{Array1, Array2};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{ShapeError, UqError};

/// Default hidden width of the uncertainty MLP.
pub const DEFAULT_WIDTH: usize = 512;

/// Floor added to the softplus output so the uncertainty never reaches zero.
const EPS: f32 = 1e-6;

/// Negative-side slope of the leaky rectifier.
const LEAKY_SLOPE: f32 = 0.01;

#[derive(Debug)]
struct DenseLayer {
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl DenseLayer {
    fn new<R: Rng>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        // He-style scaling for the rectified hidden layers.
        let scale = (2.0 / in_features.max(1) as f32).sqrt();
        let weight = Array2::from_shape_fn((in_features, out_features), |_| {
            rng.sample::<f32, _>(StandardNormal) * scale
        });
        Self {
            weight,
            bias: Array1::zeros(out_features),
        }
    }

    fn forward(&self, input: &Array2<f32>) -> Array2<f32> {
        input.dot(&self.weight) + &self.bias
    }
}

fn leaky_relu(x: f32) -> f32 {
    if x >= 0.0 { x } else { LEAKY_SLOPE * x }
}

fn softplus(x: f32) -> f32 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

/// Three leaky-rectified hidden layers over the embedding, ending in a
/// single softplus unit: `unc = softplus(mlp(features)) + 1e-6`.
#[derive(Debug)]
pub struct UncertaintyNetwork {
    layers: Vec<DenseLayer>,
}

impl UncertaintyNetwork {
    pub fn new<R: Rng>(in_features: usize, width: usize, rng: &mut R) -> Self {
        let layers = vec![
            DenseLayer::new(in_features, width, rng),
            DenseLayer::new(width, width, rng),
            DenseLayer::new(width, width, rng),
            DenseLayer::new(width, 1, rng),
        ];
        Self { layers }
    }

    pub fn with_default_width<R: Rng>(in_features: usize, rng: &mut R) -> Self {
        Self::new(in_features, DEFAULT_WIDTH, rng)
    }

    pub fn in_features(&self) -> usize {
        self.layers[0].weight.nrows()
    }

    /// Per-example positive uncertainty for a `[batch, features]` embedding.
    pub fn forward(&self, features: &Array2<f32>) -> Result<Array1<f32>, UqError> {
        if features.ncols() != self.in_features() {
            return Err(ShapeError::FeatureWidth {
                expected: self.in_features(),
                actual: features.ncols(),
            }
            .into());
        }
        let mut x = features.clone();
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(&x);
            if i < last {
                x.mapv_inplace(leaky_relu);
            }
        }
        Ok(x.column(0).mapv(|v| softplus(v) + EPS))
    }
}
