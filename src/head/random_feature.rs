//! Frozen random projection matrices for approximate-GP heads.
//!
//! Two sampling schemes: plain i.i.d. Gaussian features ("rff") and
//! orthogonal random features ("orf"), which enforce exactly orthogonal
//! columns while matching the column-norm distribution of an unconstrained
//! Gaussian draw. Orthogonality reduces the variance of the downstream
//! kernel approximation.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, Axis, s};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Standard deviation of the i.i.d. random feature entries.
pub const RFF_STDDEV: f32 = 0.05;

/// Residual norm below which a Gram-Schmidt column is redrawn.
const MIN_COLUMN_NORM: f32 = 1e-6;

/// Random feature sampling scheme for the frozen GP projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RandomFeatureKind {
    /// Independent `N(0, 0.05²)` entries.
    Rff,
    /// Orthogonal columns with Gaussian-typical norms.
    Orf,
}

impl RandomFeatureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RandomFeatureKind::Rff => "rff",
            RandomFeatureKind::Orf => "orf",
        }
    }
}

impl fmt::Display for RandomFeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RandomFeatureKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rff" => Ok(RandomFeatureKind::Rff),
            "orf" => Ok(RandomFeatureKind::Orf),
            other => Err(ConfigError::UnknownRandomFeatureType(other.to_string())),
        }
    }
}

/// Samples a `[rows, cols]` random feature matrix. Generated once at head
/// construction and frozen thereafter.
pub fn sample_matrix<R: Rng>(
    kind: RandomFeatureKind,
    rows: usize,
    cols: usize,
    rng: &mut R,
) -> Array2<f32> {
    match kind {
        RandomFeatureKind::Rff => scaled_normal(rows, cols, RFF_STDDEV, rng),
        RandomFeatureKind::Orf => orthogonal_features(rows, cols, rng),
    }
}

fn standard_normal<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> Array2<f32> {
    Array2::from_shape_fn((rows, cols), |_| rng.sample(StandardNormal))
}

fn scaled_normal<R: Rng>(rows: usize, cols: usize, stddev: f32, rng: &mut R) -> Array2<f32> {
    standard_normal(rows, cols, rng) * stddev
}

/// Orthogonalizes a Gaussian draw column by column (modified Gram-Schmidt),
/// then rescales each column by a Monte-Carlo estimate of the norm the
/// corresponding column of an unconstrained Gaussian matrix would have.
fn orthogonal_features<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> Array2<f32> {
    let mut ortho = if rows >= cols {
        orthonormal_columns(rows, cols, rng)
    } else {
        // Not enough dimensions for `cols` orthogonal columns: concatenate
        // square orthonormal blocks and truncate.
        let blocks = cols.div_ceil(rows);
        let mut wide = Array2::zeros((rows, blocks * rows));
        for b in 0..blocks {
            let block = orthonormal_columns(rows, rows, rng);
            wide.slice_mut(s![.., b * rows..(b + 1) * rows]).assign(&block);
        }
        wide.slice(s![.., ..cols]).to_owned()
    };

    let norms = standard_normal(rows, cols, rng);
    for (j, mut col) in ortho.columns_mut().into_iter().enumerate() {
        let norm = norms
            .column(j)
            .iter()
            .map(|v| v * v)
            .sum::<f32>()
            .sqrt();
        col.mapv_inplace(|v| v * norm);
    }
    ortho
}

/// Orthonormal columns of a `rows × cols` Gaussian draw, `rows >= cols`.
fn orthonormal_columns<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> Array2<f32> {
    debug_assert!(rows >= cols);
    let mut m = standard_normal(rows, cols, rng);
    for j in 0..cols {
        let (head, mut tail) = m.view_mut().split_at(Axis(1), j);
        let mut col = tail.column_mut(0);
        loop {
            for i in 0..j {
                let prev = head.column(i);
                let dot: f32 = prev.iter().zip(col.iter()).map(|(a, b)| a * b).sum();
                for (v, &u) in col.iter_mut().zip(prev.iter()) {
                    *v -= dot * u;
                }
            }
            let norm = col.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > MIN_COLUMN_NORM {
                for v in col.iter_mut() {
                    *v /= norm;
                }
                break;
            }
            // Degenerate residual: redraw the column and orthogonalize again.
            for v in col.iter_mut() {
                *v = rng.sample(StandardNormal);
            }
        }
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn column_dot(m: &Array2<f32>, a: usize, b: usize) -> f32 {
        m.column(a)
            .iter()
            .zip(m.column(b).iter())
            .map(|(x, y)| x * y)
            .sum()
    }

    #[test]
    fn orthonormal_columns_are_orthonormal() {
        let mut rng = StdRng::seed_from_u64(7);
        let m = orthonormal_columns(8, 5, &mut rng);
        for a in 0..5 {
            let norm = column_dot(&m, a, a).sqrt();
            assert!((norm - 1.0).abs() < 1e-4, "column {a} norm {norm}");
            for b in (a + 1)..5 {
                assert!(column_dot(&m, a, b).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn orf_tall_matrix_has_orthogonal_columns() {
        let mut rng = StdRng::seed_from_u64(11);
        let m = sample_matrix(RandomFeatureKind::Orf, 8, 5, &mut rng);
        assert_eq!(m.dim(), (8, 5));
        for a in 0..5 {
            for b in (a + 1)..5 {
                assert!(column_dot(&m, a, b).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn orf_wide_matrix_truncates_concatenated_blocks() {
        let mut rng = StdRng::seed_from_u64(13);
        // 3 blocks of 4 columns give 12 raw columns, truncated to 10.
        let m = sample_matrix(RandomFeatureKind::Orf, 4, 10, &mut rng);
        assert_eq!(m.dim(), (4, 10));
        // Columns within the same 4-wide block stay mutually orthogonal.
        for block in 0..2 {
            let base = block * 4;
            for a in base..base + 4 {
                for b in (a + 1)..base + 4 {
                    assert!(column_dot(&m, a, b).abs() < 1e-3, "block {block} ({a},{b})");
                }
            }
        }
    }

    #[test]
    fn rff_entries_have_expected_stddev() {
        let mut rng = StdRng::seed_from_u64(17);
        let m = sample_matrix(RandomFeatureKind::Rff, 64, 64, &mut rng);
        let n = m.len() as f32;
        let mean = m.sum() / n;
        let var = m.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
        let stddev = var.sqrt();
        assert!((stddev - RFF_STDDEV).abs() < 0.01, "stddev {stddev}");
    }

    #[test]
    fn sampling_is_deterministic_per_seed() {
        let a = sample_matrix(RandomFeatureKind::Orf, 6, 4, &mut StdRng::seed_from_u64(3));
        let b = sample_matrix(RandomFeatureKind::Orf, 6, 4, &mut StdRng::seed_from_u64(3));
        assert_eq!(a, b);
    }

    #[test]
    fn kind_parsing_rejects_unknown_types() {
        assert_eq!("rff".parse::<RandomFeatureKind>().expect("rff"), RandomFeatureKind::Rff);
        assert_eq!("orf".parse::<RandomFeatureKind>().expect("orf"), RandomFeatureKind::Orf);
        let err = "sinusoidal".parse::<RandomFeatureKind>().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownRandomFeatureType(name) if name == "sinusoidal"
        ));
    }
}
