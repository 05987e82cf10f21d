//! Resolution of the principal-axis sign ambiguity by exhaustive scoring.
//!
//! Principal axes fix the orientation of a volume only up to half turns about
//! each axis (and up to quarter turns when two moments are nearly equal). The
//! search below tries the identity and quarter, half and three-quarter turns
//! about each principal axis of the fixed volume, scores every trial pose by
//! the RMS intensity difference and keeps the first minimum.

use std::f64::consts::FRAC_PI_2;

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tomocal_core::{
    affine, gaussian_filter3, rms_difference, rotation_about_axis, CancelToken, Mat3, Pose, Real,
    Vec3, Volume,
};

use crate::{ContinuousRefiner, RefineError, RefineSchedule, RegistrationError};

/// Options of the orientation search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlipSearchOptions {
    /// Stride applied to both volumes before scoring.
    pub subsample: usize,
    /// Gaussian sigma (voxels of the subsampled grid) applied before scoring.
    pub smoothing: Real,
    /// Schedule handed to the refiner for each candidate.
    pub refine_schedule: RefineSchedule,
}

impl Default for FlipSearchOptions {
    fn default() -> Self {
        Self {
            subsample: 2,
            smoothing: 2.0,
            refine_schedule: RefineSchedule::per_candidate(),
        }
    }
}

/// One scored orientation candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlipCandidate {
    /// Position in [`candidate_rotations`].
    pub index: usize,
    /// Trial pose in full-resolution voxel units.
    pub pose: Pose,
    /// RMS difference on the preconditioned volumes.
    pub score: Real,
    /// Whether the refiner's answer replaced the closed-form trial.
    pub refined: bool,
}

/// Outcome of [`resolve_flip`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlipSearch {
    pub best: Pose,
    pub best_index: usize,
    /// Every candidate in evaluation order.
    pub candidates: Vec<FlipCandidate>,
}

/// The ten orientation candidates built from the fixed principal axes.
///
/// Order: identity, then for each axis `rfix.row(i)` the rotations by
/// 90°, 180° and 270°.
pub fn candidate_rotations(rfix: &Mat3) -> Vec<Mat3> {
    let mut out = Vec::with_capacity(10);
    out.push(Mat3::identity());
    for i in 0..3 {
        let axis: Vec3 = rfix.row(i).transpose();
        for j in 0..3 {
            out.push(rotation_about_axis(&axis, (j + 1) as Real * FRAC_PI_2));
        }
    }
    out
}

/// Closed-form trial pose for candidate `c`.
///
/// `R = Rmovᵀ · Rfix · C` and `T = Tfix − Rᵀ · Tmov`.
fn trial_pose(pose_fixed: &Pose, pose_moving: &Pose, c: &Mat3) -> Pose {
    let r = pose_moving.rotation.transpose() * pose_fixed.rotation * c;
    let t = pose_fixed.translation - r.transpose() * pose_moving.translation;
    Pose::new(r, t)
}

fn precondition(volume: &Volume, opts: &FlipSearchOptions) -> Result<Volume, RegistrationError> {
    let sampled = volume.subsample(opts.subsample)?;
    Ok(gaussian_filter3(&sampled, opts.smoothing))
}

/// Pick the orientation that best aligns `moving` with `fixed`.
///
/// `pose_fixed` and `pose_moving` are the principal frames from
/// [`crate::estimate_pose`]. With a `refiner` every candidate is refined
/// locally before scoring; a failing refiner leaves the closed-form trial in
/// place. Candidates are scored in parallel but the first minimum in
/// candidate order wins, so the result does not depend on scheduling.
pub fn resolve_flip(
    fixed: &Volume,
    moving: &Volume,
    pose_fixed: &Pose,
    pose_moving: &Pose,
    refiner: Option<&dyn ContinuousRefiner>,
    opts: &FlipSearchOptions,
    cancel: &CancelToken,
) -> Result<FlipSearch, RegistrationError> {
    fixed.ensure_same_shape(moving)?;
    if opts.subsample == 0 {
        return Err(RegistrationError::Validation(
            "flip search subsample must be >= 1".into(),
        ));
    }
    if refiner.is_some() {
        opts.refine_schedule.validate()?;
    }

    let scale = opts.subsample as Real;
    let f = precondition(fixed, opts)?;
    let m = precondition(moving, opts)?;

    let candidates: Vec<FlipCandidate> = candidate_rotations(&pose_fixed.rotation)
        .par_iter()
        .enumerate()
        .map(|(index, c)| {
            if cancel.is_cancelled() {
                return Err(RegistrationError::Cancelled);
            }
            let trial = trial_pose(pose_fixed, pose_moving, c).scale_translation(1.0 / scale);
            let (pose, refined) = match refiner {
                Some(r) => match r.refine(&f, &m, &trial, &opts.refine_schedule, cancel) {
                    Ok(outcome) => (outcome.pose, true),
                    Err(RefineError::Cancelled) => return Err(RegistrationError::Cancelled),
                    Err(err) => {
                        warn!("candidate {index}: refinement failed ({err}), scoring closed-form pose");
                        (trial, false)
                    }
                },
                None => (trial, false),
            };
            let score = rms_difference(&f, &affine(&m, &pose))?;
            Ok(FlipCandidate {
                index,
                pose: pose.scale_translation(scale),
                score,
                refined,
            })
        })
        .collect::<Result<_, _>>()?;

    let mut best = 0;
    for c in &candidates {
        debug!("flip candidate {}: L2 = {:.4e}", c.index, c.score);
        if c.score < candidates[best].score {
            best = c.index;
        }
    }
    info!(
        "best flip: candidate {} (L2 = {:.4e})",
        best, candidates[best].score
    );

    Ok(FlipSearch {
        best: candidates[best].pose,
        best_index: best,
        candidates,
    })
}
