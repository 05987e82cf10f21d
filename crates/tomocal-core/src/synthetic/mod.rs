//! Deterministic synthetic data generation helpers.
//!
//! Small building blocks for constructing synthetic calibration problems used
//! in tests and benchmarks:
//! - analytic phantoms (ellipsoids with an off-axis feature),
//! - Gaussian blobs for sub-pixel shift checks,
//! - seeded smooth random textures.
//!
//! Every generator takes an explicit seed or is fully analytic, so datasets are
//! stable between runs.
//!
//! # Example
//!
//! ```no_run
//! use tomocal_core::{synthetic::volumes, Vec3};
//!
//! let phantom = volumes::phantom([64, 64, 64]);
//! let blob = volumes::gaussian_blob([32, 32, 32], &Vec3::new(16.0, 12.0, 20.0), 3.0);
//! assert_eq!(phantom.shape(), blob.shape());
//! ```

pub mod volumes;
