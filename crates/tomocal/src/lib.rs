//! High-level entry crate for the `tomocal` toolbox.
//!
//! The toolbox covers three related calibration problems of volumetric
//! imaging:
//!
//! - **Registration**: rigidly align two volumes of the same object from
//!   intensity moments, an orientation search over the principal-axis sign
//!   flips and an optional pluggable local refiner.
//! - **Mosaics**: measure the sub-pixel offset of a projection tile against a
//!   growing mosaic and blend it in with distance-based weights.
//! - **Geometry parameters**: tune one scalar of the acquisition geometry
//!   (rotation-axis offset, detector shift, ...) by a coarse-to-fine search
//!   over a user cost.
//!
//! ```no_run
//! use tomocal::core::{affine, synthetic::volumes, CancelToken, Mat3, Pose, Vec3};
//! use tomocal::register::{register_volumes, RegistrationOptions};
//!
//! let fixed = volumes::phantom([64, 64, 64]);
//! let turn = Mat3::from_diagonal(&Vec3::new(1.0, -1.0, -1.0));
//! let moving = affine(&fixed, &Pose::new(turn, Vec3::new(3.0, 0.0, 0.0)));
//! let opts = RegistrationOptions { use_refine: false, ..Default::default() };
//! let res = register_volumes(&fixed, &moving, &opts, None, &CancelToken::new()).unwrap();
//! println!("L2 {:.3e} -> {:.3e}", res.l2_before, res.l2_after);
//! ```

/// Volumes, poses, resampling, filters, thresholds and geometry records.
pub mod core {
    pub use tomocal_core::*;
}

/// Moment-based rigid registration and orientation disambiguation.
pub mod register {
    pub use tomocal_register::*;
}

/// Phase correlation, robust tile shifts and mosaic blending.
pub mod mosaic {
    pub use tomocal_mosaic::*;
}

/// Scalar parameter calibration and reconstruction sharpness costs.
pub mod optim {
    pub use tomocal_optim::*;
}

/// Convenient re-exports for common use cases.
///
/// Import with `use tomocal::prelude::*;`.
pub mod prelude {
    pub use crate::core::{
        CancelToken, GeometryDescriptor, Mat3, Pose, Real, ThresholdMode, Vec2, Vec3, Volume,
    };
    pub use crate::mosaic::{append_tile, estimate_shift, MosaicOptions, MosaicState, ShiftOptions};
    pub use crate::optim::{CalibratorOptions, Reconstructor, ScalarCalibrator};
    pub use crate::register::{
        register_reconstructions, register_volumes, ContinuousRefiner, RegistrationOptions,
        RegistrationResult,
    };
}
