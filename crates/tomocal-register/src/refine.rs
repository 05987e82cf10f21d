//! Contract for continuous (gradient-based) pose refinement.
//!
//! No optimiser is bundled with this crate. Callers plug one in by
//! implementing [`ContinuousRefiner`]; the registration code only decides
//! when to call it and whether to trust the answer.

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tomocal_core::{affine, rms_difference, CancelToken, Pose, Real, Volume};

use crate::{RegistrationError, RegistrationWarning};

/// One level of a coarse-to-fine pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PyramidLevel {
    /// Downsampling factor (>= 1).
    pub shrink: usize,
    /// Gaussian smoothing sigma in voxels at this level (>= 0).
    pub smoothing: Real,
}

impl PyramidLevel {
    pub fn new(shrink: usize, smoothing: Real) -> Self {
        Self { shrink, smoothing }
    }
}

/// Coarse-to-fine refinement schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefineSchedule {
    pub levels: Vec<PyramidLevel>,
}

impl RefineSchedule {
    pub fn new(levels: Vec<PyramidLevel>) -> Self {
        Self { levels }
    }

    /// Short single-level schedule used for every orientation candidate.
    pub fn per_candidate() -> Self {
        Self::new(vec![PyramidLevel::new(2, 4.0)])
    }

    /// Schedule of the last refinement pass after orientation is settled.
    pub fn final_pass() -> Self {
        Self::new(vec![
            PyramidLevel::new(8, 8.0),
            PyramidLevel::new(2, 2.0),
            PyramidLevel::new(1, 0.0),
        ])
    }

    pub fn validate(&self) -> Result<(), RefineError> {
        if self.levels.is_empty() {
            return Err(RefineError::EmptySchedule);
        }
        for (index, level) in self.levels.iter().enumerate() {
            if level.shrink == 0 || !(level.smoothing >= 0.0) {
                return Err(RefineError::InvalidLevel { index });
            }
        }
        Ok(())
    }
}

impl Default for RefineSchedule {
    fn default() -> Self {
        Self::final_pass()
    }
}

/// Locally refined pose and the refiner's own residual.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RefineOutcome {
    pub pose: Pose,
    pub residual: Real,
}

#[derive(Debug, Error)]
pub enum RefineError {
    #[error("refinement schedule is empty")]
    EmptySchedule,
    #[error("pyramid level {index} needs shrink >= 1 and smoothing >= 0")]
    InvalidLevel { index: usize },
    #[error("refinement cancelled")]
    Cancelled,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Local optimiser of a rigid pose between two volumes.
///
/// Implementations receive volumes in the same `(z, y, x)` convention as
/// [`tomocal_core::affine`] and must return a pose in that convention. They
/// are expected to poll `cancel` between iterations and return
/// [`RefineError::Cancelled`] when it is set. Candidates may be refined from
/// several threads at once, hence the `Sync` bound.
pub trait ContinuousRefiner: Sync {
    fn refine(
        &self,
        fixed: &Volume,
        moving: &Volume,
        initial: &Pose,
        schedule: &RefineSchedule,
        cancel: &CancelToken,
    ) -> Result<RefineOutcome, RefineError>;
}

/// Refine `initial` and keep the result only if it lowers the RMS difference.
///
/// Backend failures and non-improving results fall back to `initial` and are
/// reported as a warning; cancellation is propagated.
pub(crate) fn refine_if_better(
    refiner: &dyn ContinuousRefiner,
    fixed: &Volume,
    moving: &Volume,
    initial: &Pose,
    schedule: &RefineSchedule,
    cancel: &CancelToken,
) -> Result<(Pose, Option<RegistrationWarning>), RegistrationError> {
    schedule.validate()?;
    let outcome = match refiner.refine(fixed, moving, initial, schedule, cancel) {
        Ok(outcome) => outcome,
        Err(RefineError::Cancelled) => return Err(RegistrationError::Cancelled),
        Err(err) => {
            warn!("refinement failed, keeping initial pose: {err}");
            return Ok((
                *initial,
                Some(RegistrationWarning::RefineFailed(err.to_string())),
            ));
        }
    };

    let before = rms_difference(fixed, &affine(moving, initial))?;
    if !outcome.pose.is_valid(1e-6) {
        warn!("refiner returned a non-orthonormal rotation, keeping initial pose");
        return Ok((
            *initial,
            Some(RegistrationWarning::RefineFailed(
                "non-orthonormal rotation".into(),
            )),
        ));
    }
    let after = rms_difference(fixed, &affine(moving, &outcome.pose))?;
    if after < before {
        Ok((outcome.pose, None))
    } else {
        warn!("refinement did not improve L2 ({before:.4e} -> {after:.4e}), keeping initial pose");
        Ok((
            *initial,
            Some(RegistrationWarning::RefineNotImproved { before, after }),
        ))
    }
}
