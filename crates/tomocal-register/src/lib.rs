//! Rigid registration of tomographic volumes.
//!
//! The registration pipeline aligns a moving volume to a fixed one in three
//! stages:
//!
//! 1. [`estimate_pose`] derives each volume's centroid and principal axes
//!    from intensity moments,
//! 2. [`resolve_flip`] removes the sign ambiguity of the principal axes by
//!    scoring a fixed set of ten orientation candidates,
//! 3. an optional [`ContinuousRefiner`] polishes the result locally.
//!
//! [`register_volumes`] runs the whole pipeline and [`transform_to_geometry`]
//! folds the resulting pose into an acquisition geometry.
//!
//! # Example
//!
//! ```no_run
//! use tomocal_core::{affine, synthetic::volumes, CancelToken, Mat3, Pose, Vec3};
//! use tomocal_register::{register_volumes, RegistrationOptions};
//!
//! let fixed = volumes::phantom([64, 64, 64]);
//! let turn = Mat3::from_diagonal(&Vec3::new(1.0, -1.0, -1.0));
//! let moving = affine(&fixed, &Pose::new(turn, Vec3::new(3.0, 0.0, 0.0)));
//!
//! let opts = RegistrationOptions { use_refine: false, ..Default::default() };
//! let res = register_volumes(&fixed, &moving, &opts, None, &CancelToken::new()).unwrap();
//! println!("rotation: {}, translation: {}", res.pose.rotation, res.pose.translation);
//! ```

mod flips;
mod geometry;
mod moments;
mod refine;
mod register;

pub use flips::*;
pub use geometry::*;
pub use moments::*;
pub use refine::{ContinuousRefiner, PyramidLevel, RefineError, RefineOutcome, RefineSchedule};
pub use register::*;
