//! Scalar calibration of an estimator's average uncertainty.
//!
//! The wrapped backbone's training/evaluation mode is shared mutable state;
//! concurrent calibration or dropout-sampling calls on the same backbone
//! must be serialized by the caller. The prior mode is restored on every
//! exit path, success or failure.

use ndarray::Array2;
use tracing::debug;

use crate::backbone::Backbone;
use crate::error::{CalibrationError, UqError};
use crate::estimator::UncertaintyModel;

/// Default number of batches averaged by a calibration pass.
pub const DEFAULT_CALIBRATION_BATCHES: usize = 10;

impl<M: Backbone> UncertaintyModel<M> {
    /// Rescales the estimator so its batch-mean uncertainty matches
    /// `target_avg_unc`.
    ///
    /// Switches the model to evaluation mode, measures the raw (scaler reset
    /// to `1.0`, so repeated calibrations never compound) average uncertainty
    /// over exactly `n_batches` batches from `batches`, restores the prior
    /// mode, then sets `unc_scaler = target_avg_unc / observed`. On failure
    /// — too few batches, or a zero observed average — the previous scaler
    /// is left in place and an error is returned.
    ///
    /// Returns the new scaler.
    pub fn initialize_avg_uncertainty<I>(
        &mut self,
        batches: I,
        target_avg_unc: f32,
        n_batches: usize,
    ) -> Result<f32, UqError>
    where
        I: IntoIterator<Item = Array2<f32>>,
    {
        let prev_training = self.is_training();
        let prev_scaler = self.unc_scaler();
        self.set_unc_scaler(1.0);
        self.set_training(false);
        let measured = self.measure_avg_uncertainty(batches, n_batches);
        self.set_training(prev_training);
        match measured {
            Ok(observed) if observed > 0.0 => {
                let scaler = target_avg_unc / observed;
                debug!(observed, target = target_avg_unc, scaler, "uncertainty calibrated");
                self.set_unc_scaler(scaler);
                Ok(scaler)
            }
            Ok(_) => {
                self.set_unc_scaler(prev_scaler);
                Err(CalibrationError::ZeroAverage.into())
            }
            Err(err) => {
                self.set_unc_scaler(prev_scaler);
                Err(err)
            }
        }
    }

    fn measure_avg_uncertainty<I>(&self, batches: I, n_batches: usize) -> Result<f32, UqError>
    where
        I: IntoIterator<Item = Array2<f32>>,
    {
        let mut total = 0.0_f32;
        let mut drawn = 0_usize;
        for batch in batches.into_iter().take(n_batches) {
            let estimate = self.forward(&batch)?;
            let batch_size = estimate.unc.len().max(1) as f32;
            total += estimate.unc.sum() / batch_size;
            drawn += 1;
        }
        if drawn < n_batches {
            return Err(CalibrationError::ExhaustedData {
                got: drawn,
                want: n_batches,
            }
            .into());
        }
        Ok(total / n_batches.max(1) as f32)
    }
}
