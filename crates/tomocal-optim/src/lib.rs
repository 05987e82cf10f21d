//! Calibration of scalar acquisition-geometry parameters.
//!
//! [`ScalarCalibrator`] minimises a user supplied cost over one scalar with a
//! coarse-to-fine grid search and parabolic refinement. [`ModifierCost`]
//! provides the usual cost for tomography: the (negative) sharpness of a
//! reduced reconstruction produced by a [`Reconstructor`] for the trial
//! geometry.
//!
//! # Example
//!
//! ```no_run
//! use tomocal_core::CancelToken;
//! use tomocal_optim::{CalibratorOptions, ScalarCalibrator};
//!
//! let calibrator = ScalarCalibrator::new(CalibratorOptions {
//!     max_subscale: 8,
//!     ..Default::default()
//! });
//! let trace = calibrator
//!     .calibrate(0.0, 0.1, |x| Ok((x - 0.37).powi(2)), &CancelToken::new())
//!     .unwrap();
//! println!("axis offset: {:.4} mm", trace.value);
//! ```

mod calibrator;
mod cost;

pub use calibrator::*;
pub use cost::*;
pub use tomocal_core::{Reconstructor, Sampling};
