//! Softmax/entropy primitives shared by the sampling-based strategies.

use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayViewMut1, Axis};

/// Floor for log-probabilities: the most negative finite value of the
/// element type, so `0 · ln 0` can never produce NaN.
pub const LOG_FLOOR: f32 = f32::MIN;

/// `ln(p)` floored at [`LOG_FLOOR`].
pub fn floored_ln(p: f32) -> f32 {
    p.ln().max(LOG_FLOOR)
}

fn softmax_row(mut row: ArrayViewMut1<f32>) {
    let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
    row.mapv_inplace(|v| (v - max).exp());
    let sum = row.sum();
    if sum > 0.0 {
        row.mapv_inplace(|v| v / sum);
    }
}

/// Row-wise numerically stable softmax over `[batch, classes]` logits.
pub fn softmax_rows(logits: &Array2<f32>) -> Array2<f32> {
    let mut out = logits.clone();
    for row in out.rows_mut() {
        softmax_row(row);
    }
    out
}

/// Softmax over the class axis of a `[samples, batch, classes]` stack.
pub fn softmax_stack(logits: &Array3<f32>) -> Array3<f32> {
    let mut out = logits.clone();
    for mut sample in out.outer_iter_mut() {
        for row in sample.rows_mut() {
            softmax_row(row);
        }
    }
    out
}

/// Shannon entropy of each probability row:
/// `-Σ_c p_c · max(ln p_c, LOG_FLOOR)`.
pub fn entropy_rows(probs: ArrayView2<f32>) -> Array1<f32> {
    Array1::from_iter(
        probs
            .rows()
            .into_iter()
            .map(|row| -row.iter().map(|&p| p * floored_ln(p)).sum::<f32>()),
    )
}

/// Mean probability distribution over the sample axis.
pub fn mean_probs(probs: &Array3<f32>) -> Array2<f32> {
    let samples = probs.shape()[0].max(1) as f32;
    probs.sum_axis(Axis(0)) / samples
}

/// Jensen-Shannon decomposition of a `[samples, batch, classes]` probability
/// stack: `(entropy_of_mean, mean_of_entropy)` per example.
///
/// Their difference is the disagreement among samples — epistemic
/// uncertainty, non-negative by Jensen's inequality and zero iff all samples
/// carry identical distributions.
pub fn jsd_split(probs: &Array3<f32>) -> (Array1<f32>, Array1<f32>) {
    let entropy_of_mean = entropy_rows(mean_probs(probs).view());
    let samples = probs.shape()[0].max(1) as f32;
    let batch = probs.shape()[1];
    let mut mean_of_entropy = Array1::<f32>::zeros(batch);
    for sample in probs.outer_iter() {
        mean_of_entropy += &entropy_rows(sample);
    }
    (entropy_of_mean, mean_of_entropy / samples)
}
