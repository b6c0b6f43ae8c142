//! Boundary types for the external classifier-head factory.
//!
//! Pooling computation and the full Gaussian-Process covariance update live
//! outside this crate; what is owned here is the configuration surface the
//! factory consumes (pool selection, head kind, GP hyperparameters) and the
//! random feature initialization in [`random_feature`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub mod random_feature;

pub use random_feature::RandomFeatureKind;

/// Global pooling applied between feature extraction and the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolType {
    Avg,
    Max,
    AvgMax,
    CatAvgMax,
    /// Pass-through; legal only when the classifier is removed or
    /// convolutional, see [`validate_head`].
    Identity,
}

impl PoolType {
    /// Factor by which pooling multiplies the feature width
    /// (concatenated avg+max doubles it).
    pub fn feat_mult(&self) -> usize {
        match self {
            PoolType::CatAvgMax => 2,
            _ => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolType::Avg => "avg",
            PoolType::Max => "max",
            PoolType::AvgMax => "avgmax",
            PoolType::CatAvgMax => "catavgmax",
            PoolType::Identity => "",
        }
    }
}

impl fmt::Display for PoolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avg" => Ok(PoolType::Avg),
            "max" => Ok(PoolType::Max),
            "avgmax" => Ok(PoolType::AvgMax),
            "catavgmax" => Ok(PoolType::CatAvgMax),
            "" | "identity" => Ok(PoolType::Identity),
            other => Err(ConfigError::UnknownPoolType(other.to_string())),
        }
    }
}

/// Feature width after pooling.
pub fn pooled_width(num_features: usize, pool: PoolType) -> usize {
    num_features * pool.feat_mult()
}

/// Hyperparameters for an approximate-GP classifier head.
///
/// Consumed by the external head factory; this crate only provides the
/// random feature matrix ([`random_feature::sample_matrix`]) and the
/// `classify_with_covariance` call contract on [`crate::backbone::Backbone`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpHeadConfig {
    /// Number of inducing random features (columns of the frozen projection).
    pub num_inducing: usize,
    pub kernel_scale: f32,
    pub output_bias: bool,
    pub input_normalization: bool,
    pub random_feature_kind: RandomFeatureKind,
    /// Covariance moving-average momentum; negative means exact averaging.
    pub cov_momentum: f32,
    pub cov_ridge_penalty: f32,
    /// Initialize the output layer the way the ImageNet reference does.
    pub imagenet_output_init: bool,
}

impl Default for GpHeadConfig {
    fn default() -> Self {
        Self {
            num_inducing: 1024,
            kernel_scale: 1.0,
            output_bias: false,
            input_normalization: false,
            random_feature_kind: RandomFeatureKind::Orf,
            cov_momentum: -1.0,
            cov_ridge_penalty: 1.0,
            imagenet_output_init: false,
        }
    }
}

/// Classifier head variant requested from the factory.
#[derive(Debug, Clone)]
pub enum HeadKind {
    Linear,
    Conv,
    Gp(GpHeadConfig),
}

/// Rejects illegal pooling/classifier combinations.
///
/// Identity (disabled) pooling leaves spatial structure in place, which only
/// a convolutional classifier — or no classifier at all — can consume.
pub fn validate_head(
    num_classes: usize,
    pool: PoolType,
    kind: &HeadKind,
) -> Result<(), ConfigError> {
    if pool == PoolType::Identity && num_classes > 0 && !matches!(kind, HeadKind::Conv) {
        return Err(ConfigError::IdentityPoolWithLinearHead);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_type_parses_known_names() {
        assert_eq!("avg".parse::<PoolType>().expect("avg"), PoolType::Avg);
        assert_eq!(
            "catavgmax".parse::<PoolType>().expect("catavgmax"),
            PoolType::CatAvgMax
        );
        assert_eq!("".parse::<PoolType>().expect("empty"), PoolType::Identity);
    }

    #[test]
    fn pool_type_rejects_unknown_names() {
        let err = "gem".parse::<PoolType>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPoolType(name) if name == "gem"));
    }

    #[test]
    fn catavgmax_doubles_pooled_width() {
        assert_eq!(pooled_width(512, PoolType::CatAvgMax), 1024);
        assert_eq!(pooled_width(512, PoolType::Avg), 512);
    }

    #[test]
    fn identity_pool_needs_conv_or_no_classifier() {
        assert!(validate_head(10, PoolType::Identity, &HeadKind::Linear).is_err());
        assert!(validate_head(0, PoolType::Identity, &HeadKind::Linear).is_ok());
        assert!(validate_head(10, PoolType::Identity, &HeadKind::Conv).is_ok());
        assert!(validate_head(10, PoolType::Avg, &HeadKind::Linear).is_ok());
    }

    #[test]
    fn gp_config_serde_round_trip() {
        let config = GpHeadConfig::default();
        let json = serde_json::to_string(&config).expect("serialize");
        assert!(json.contains("\"random_feature_kind\":\"orf\""));
        let back: GpHeadConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.num_inducing, config.num_inducing);
        assert_eq!(back.random_feature_kind, RandomFeatureKind::Orf);
    }
}
