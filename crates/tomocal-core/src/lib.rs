//! Core volume and geometry primitives for `tomocal`.
//!
//! This crate provides the building blocks shared by the registration,
//! mosaic and calibration crates of the workspace:
//!
//! - linear algebra type aliases (`Real`, `Vec3`, `Mat3`, and friends),
//! - a dense `(Z, Y, X)` volume container and rigid poses acting on it,
//! - trilinear/bilinear resampling, Gaussian smoothing and distance transforms,
//! - intensity statistics and automatic thresholds,
//! - a cooperative cancellation token and the acquisition geometry record.
//!
//! All vectors and voxel coordinates are ordered `(z, y, x)`. A pose maps the
//! moving volume into the fixed frame as
//! `out(o) = moving(R · (o - c - T) + c)`, where `c = shape / 2`.
//!
//! # Modules
//!
//! - \[`math`\]: type aliases and rotation helpers.
//! - \[`volume`\]: the [`Volume`] container.
//! - \[`resample`\]: [`affine`], [`translate`] and [`shift_image`].
//! - \[`threshold`\]: [`ThresholdMode`] and friends.
//! - \[`synthetic`\]: deterministic synthetic data helpers (tests/benchmarks).
//!
//! # Example
//!
//! ```no_run
//! use tomocal_core::{affine, rms_difference, Mat3, Pose, Vec3, Volume};
//!
//! let v = Volume::from_fn([16, 16, 16], |z, y, x| (z + y + x) as f32);
//! let same = affine(&v, &Pose::new(Mat3::identity(), Vec3::zeros()));
//! assert!(rms_difference(&v, &same).unwrap() < 1e-6);
//! ```

/// Cooperative cancellation.
mod cancel;
/// Euclidean distance transform.
mod distance;
/// Gaussian smoothing, Laplacian and gradients.
mod filter;
/// Named acquisition geometry fields.
mod geometry;
/// Histograms, percentiles, equalisation and bounding boxes.
mod intensity;
/// Linear algebra type aliases and helpers.
mod math;
mod pose;
/// Projection-to-volume interface implemented by external reconstructors.
mod reconstruct;
/// Rigid resampling and sub-pixel shifts.
mod resample;
/// Deterministic synthetic data generation helpers.
///
/// Public so integration tests across the workspace can build phantoms.
pub mod synthetic;
mod threshold;
mod volume;

pub use cancel::*;
pub use distance::*;
pub use filter::*;
pub use geometry::*;
pub use intensity::*;
pub use math::*;
pub use pose::*;
pub use reconstruct::*;
pub use resample::*;
pub use threshold::*;
pub use volume::*;
