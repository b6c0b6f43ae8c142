//! Post-hoc predictive-uncertainty estimation for classification backbones.
//!
//! Augments an already-trained model with calibrated uncertainty estimates
//! and alternative classification heads without touching its learned
//! weights: a generic delegating wrapper, a shallow-ensemble head, a family
//! of interchangeable uncertainty strategies, scalar calibration, and the
//! random feature initialization behind approximate-GP heads.

/// Backbone capability surface shared by every wrapper.
pub mod backbone;
/// Generic forwarding wrapper with cached descriptor attributes.
pub mod delegate;
/// Shallow-ensemble head and wrapper.
pub mod ensemble;
/// Error taxonomy.
pub mod error;
/// Uncertainty strategies, numeric primitives, and calibration.
pub mod estimator;
/// Classifier-head factory boundary and random feature initialization.
pub mod head;
