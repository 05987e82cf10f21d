//! Rigid registration of two volumes of the same object.
//!
//! Pipeline: subsample, optional shared threshold, principal-axis alignment
//! with orientation search, optional continuous refinement. Geometric failures
//! degrade to the best pose found so far and are reported as warnings; only
//! structurally invalid inputs are errors.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tomocal_core::{
    affine, rms_difference, soft_threshold, threshold_sample, CancelToken, GeometryDescriptor,
    Pose, Real, Reconstructor, Sampling, ThresholdError, ThresholdMode, Volume, VolumeError,
};

use crate::{
    estimate_pose, refine::refine_if_better, resolve_flip, ContinuousRefiner, FlipSearchOptions,
    RefineError, RefineSchedule,
};

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Volume(#[from] VolumeError),
    #[error(transparent)]
    Threshold(#[from] ThresholdError),
    #[error(transparent)]
    Refine(#[from] RefineError),
    #[error("volume has no positive intensity to compute moments from")]
    DegenerateInput,
    #[error("invalid registration options: {0}")]
    Validation(String),
    #[error("registration cancelled")]
    Cancelled,
    #[error("reconstruction failed: {0}")]
    Reconstruction(anyhow::Error),
}

/// Non-fatal problems encountered during registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegistrationWarning {
    /// Refinement was requested but no refiner was supplied.
    RefinerUnavailable,
    /// The refiner failed; the previous pose was kept.
    RefineFailed(String),
    /// The refined pose did not lower the RMS difference; the previous pose was kept.
    RefineNotImproved { before: Real, after: Real },
    /// The best orientation candidate did not lower the RMS difference of the
    /// unaligned volumes; the identity pose was kept.
    FlipNotImproved { before: Real, after: Real },
}

/// Options for [`register_volumes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationOptions {
    /// Stride applied to both volumes before anything else.
    pub subsample: usize,
    /// Align centroids and principal axes.
    pub use_moments: bool,
    /// Run the refiner once more after orientation is settled.
    pub use_refine: bool,
    /// Refine every orientation candidate before scoring it.
    pub use_flip_search: bool,
    /// Shared threshold applied to both volumes; `None` disables it.
    pub threshold: Option<ThresholdMode>,
    pub flip: FlipSearchOptions,
    /// Schedule of the last refinement pass.
    pub refine_schedule: RefineSchedule,
}

impl Default for RegistrationOptions {
    fn default() -> Self {
        Self {
            subsample: 2,
            use_moments: true,
            use_refine: true,
            use_flip_search: false,
            threshold: Some(ThresholdMode::Otsu),
            flip: FlipSearchOptions::default(),
            refine_schedule: RefineSchedule::final_pass(),
        }
    }
}

/// Outcome of [`register_volumes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResult {
    /// Pose of `moving` in full-resolution voxels; see [`tomocal_core::affine`].
    pub pose: Pose,
    /// RMS difference on the preprocessed volumes before alignment.
    pub l2_before: Real,
    /// RMS difference on the preprocessed volumes under `pose`.
    pub l2_after: Real,
    /// Static `xyz` Euler angles of the rotation (radians).
    pub euler: (Real, Real, Real),
    /// Threshold applied to both volumes, if any.
    pub threshold: Option<f32>,
    /// Winning orientation candidate when moments were used and it improved
    /// on the unaligned volumes.
    pub flip_index: Option<usize>,
    pub warnings: Vec<RegistrationWarning>,
}

/// Register `moving` onto `fixed`.
///
/// Both volumes must share a shape. The returned pose resamples `moving`
/// into the frame of `fixed` via [`tomocal_core::affine`]. Refinement steps
/// need a `refiner`; without one they are skipped with a warning.
pub fn register_volumes(
    fixed: &Volume,
    moving: &Volume,
    opts: &RegistrationOptions,
    refiner: Option<&dyn ContinuousRefiner>,
    cancel: &CancelToken,
) -> Result<RegistrationResult, RegistrationError> {
    fixed.ensure_same_shape(moving)?;
    if opts.subsample == 0 {
        return Err(RegistrationError::Validation(
            "subsample must be >= 1".into(),
        ));
    }

    let mut warnings = Vec::new();
    let mut fixed0 = fixed.subsample(opts.subsample)?;
    let mut moving0 = moving.subsample(opts.subsample)?;

    // One threshold for both volumes so they lose the same intensity band.
    let threshold = match opts.threshold {
        Some(mode) => {
            let mut union = threshold_sample(&fixed0);
            union.extend(threshold_sample(&moving0));
            let t = mode.compute(&union)?;
            soft_threshold(&mut fixed0, t);
            soft_threshold(&mut moving0, t);
            Some(t)
        }
        None => None,
    };

    let l2_before = rms_difference(&fixed0, &moving0)?;
    info!("L2 before registration: {l2_before:.4e}");

    if cancel.is_cancelled() {
        return Err(RegistrationError::Cancelled);
    }

    let mut flip_index = None;
    let mut pose = if opts.use_moments {
        let pose_fixed = estimate_pose(&fixed0, 1)?;
        let pose_moving = estimate_pose(&moving0, 1)?;
        let candidate_refiner = if opts.use_flip_search { refiner } else { None };
        if opts.use_flip_search && refiner.is_none() {
            warn!("flip search refinement requested without a refiner; scoring closed-form candidates");
            warnings.push(RegistrationWarning::RefinerUnavailable);
        }
        let search = resolve_flip(
            &fixed0,
            &moving0,
            &pose_fixed,
            &pose_moving,
            candidate_refiner,
            &opts.flip,
            cancel,
        )?;
        let after = rms_difference(&fixed0, &affine(&moving0, &search.best))?;
        // Identical inputs leave nothing to improve on.
        if l2_before > 0.0 && after >= l2_before {
            warn!(
                "best orientation candidate gives L2 {after:.4e}, not below {l2_before:.4e}; keeping identity"
            );
            warnings.push(RegistrationWarning::FlipNotImproved {
                before: l2_before,
                after,
            });
            Pose::identity()
        } else {
            flip_index = Some(search.best_index);
            search.best
        }
    } else {
        Pose::identity()
    };

    if opts.use_refine {
        match refiner {
            Some(r) => {
                let l2 = rms_difference(&fixed0, &affine(&moving0, &pose))?;
                info!("L2 before refinement: {l2:.4e}");
                let (refined, warning) =
                    refine_if_better(r, &fixed0, &moving0, &pose, &opts.refine_schedule, cancel)?;
                pose = refined;
                warnings.extend(warning);
            }
            None => {
                warn!("refinement requested without a refiner; keeping the moments pose");
                if !warnings.contains(&RegistrationWarning::RefinerUnavailable) {
                    warnings.push(RegistrationWarning::RefinerUnavailable);
                }
            }
        }
    }

    let l2_after = rms_difference(&fixed0, &affine(&moving0, &pose))?;
    info!("L2 after registration: {l2_after:.4e}");

    let pose = pose.scale_translation(opts.subsample as Real);
    let euler = pose.euler_angles();
    info!(
        "registration: translation = [{:.3}, {:.3}, {:.3}], euler = [{:.4}, {:.4}, {:.4}]",
        pose.translation[0], pose.translation[1], pose.translation[2], euler.0, euler.1, euler.2
    );

    Ok(RegistrationResult {
        pose,
        l2_before,
        l2_after,
        euler,
        threshold,
        flip_index,
        warnings,
    })
}

/// Register two scans of the same object given as projections.
///
/// Both stacks are reconstructed at full resolution with their own geometry,
/// zero-padded about their centres to a common shape and passed to
/// [`register_volumes`]. The pose is expressed in voxels of that common grid.
#[allow(clippy::too_many_arguments)]
pub fn register_reconstructions<R: Reconstructor + ?Sized>(
    reconstructor: &R,
    proj_fixed: &Volume,
    proj_moving: &Volume,
    geom_fixed: &GeometryDescriptor,
    geom_moving: &GeometryDescriptor,
    opts: &RegistrationOptions,
    refiner: Option<&dyn ContinuousRefiner>,
    cancel: &CancelToken,
) -> Result<RegistrationResult, RegistrationError> {
    let fixed = reconstructor
        .reconstruct(proj_fixed, geom_fixed, Sampling::full())
        .map_err(RegistrationError::Reconstruction)?;
    if cancel.is_cancelled() {
        return Err(RegistrationError::Cancelled);
    }
    let moving = reconstructor
        .reconstruct(proj_moving, geom_moving, Sampling::full())
        .map_err(RegistrationError::Reconstruction)?;

    let (a, b) = (fixed.shape(), moving.shape());
    let shape = [a[0].max(b[0]), a[1].max(b[1]), a[2].max(b[2])];
    if a != b {
        info!("padding reconstructions {a:?} and {b:?} to {shape:?}");
    }
    let fixed = fixed.pad_centred(shape)?;
    let moving = moving.pad_centred(shape)?;
    register_volumes(&fixed, &moving, opts, refiner, cancel)
}
