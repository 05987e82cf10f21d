//! Robust estimation of a residual 2D shift between a tile and a mosaic.
//!
//! Slices are taken across the stack at a fixed stride. Each slice pair gives
//! one sub-pixel shift sample from phase correlation of the Laplacians of the
//! common support; the samples are then reduced to a consensus shift that
//! falls back to zero whenever the samples disagree.

use log::{debug, info};
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tomocal_core::{laplace, Real, Vec2, Volume, VolumeError};

use crate::phase_correlate;

#[derive(Debug, Error)]
pub enum ShiftError {
    #[error(transparent)]
    Volume(#[from] VolumeError),
    #[error(
        "tile of size {tile:?} at offset {offset:?} does not fit in reference of size {reference:?}"
    )]
    OutOfBounds {
        offset: (i64, i64),
        tile: (usize, usize),
        reference: (usize, usize),
    },
    #[error("invalid shift options: {0}")]
    Validation(String),
}

/// Options of [`estimate_shift`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiftOptions {
    /// Axis along which slices are taken (the angle axis of a projection stack).
    pub axis: usize,
    /// Stride between sampled slices.
    pub step: usize,
    /// Sub-pixel resolution of phase correlation is `1 / upsample`.
    pub upsample: usize,
    /// Samples with a weaker normalised correlation peak are discarded.
    /// `0` keeps every sample.
    pub min_peak: Real,
    /// Fewer surviving samples than this yield a zero shift. `1` accepts a
    /// lone consistent sample, so short stacks still get a correction.
    pub min_consensus_samples: usize,
}

impl Default for ShiftOptions {
    fn default() -> Self {
        Self {
            axis: 1,
            step: 10,
            upsample: 10,
            min_peak: 0.0,
            min_consensus_samples: 1,
        }
    }
}

/// Shift measured on one slice pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShiftSample {
    pub slice: usize,
    /// `(row, col)` correction to add to the nominal offset.
    pub shift: Vec2,
    /// Normalised cross-correlation peak.
    pub peak: Real,
}

/// Consensus shift with the samples it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftEstimate {
    pub shift: Vec2,
    pub samples: Vec<ShiftSample>,
}

/// Keep the rows and columns in which `mask` has any `true` entry.
fn select_support(image: &DMatrix<Real>, mask: &DMatrix<bool>) -> DMatrix<Real> {
    let (rows, cols) = mask.shape();
    let keep_rows: Vec<usize> = (0..rows)
        .filter(|&r| (0..cols).any(|c| mask[(r, c)]))
        .collect();
    let keep_cols: Vec<usize> = (0..cols)
        .filter(|&c| (0..rows).any(|r| mask[(r, c)]))
        .collect();
    DMatrix::from_fn(keep_rows.len(), keep_cols.len(), |i, j| {
        let (r, c) = (keep_rows[i], keep_cols[j]);
        if mask[(r, c)] {
            image[(r, c)]
        } else {
            0.0
        }
    })
}

/// Shift sample of one slice pair, `None` when the crops share no support.
fn slice_sample(
    reference: &DMatrix<Real>,
    slave: &DMatrix<Real>,
    offset: (usize, usize),
    slice: usize,
    upsample: usize,
) -> Option<ShiftSample> {
    let (rows, cols) = slave.shape();
    let crop = reference.view(offset, (rows, cols)).clone_owned();
    let mask = crop.zip_map(slave, |a, b| a * b != 0.0);
    if !mask.iter().any(|&m| m) {
        return None;
    }
    let a = laplace(&select_support(&crop, &mask));
    let b = laplace(&select_support(slave, &mask));
    let pc = phase_correlate(&a, &b, upsample)?;
    Some(ShiftSample {
        slice,
        shift: pc.shift,
        peak: pc.peak,
    })
}

/// Residual shift of `slave` relative to `reference` placed at `nominal`.
///
/// `nominal` is the `(row, col)` position of the slave's first pixel inside
/// each reference slice. The returned shift is a correction to add to it.
/// Slices whose crops have no common nonzero support are skipped.
pub fn estimate_shift(
    reference: &Volume,
    slave: &Volume,
    nominal: (i64, i64),
    opts: &ShiftOptions,
) -> Result<ShiftEstimate, ShiftError> {
    if opts.step == 0 {
        return Err(ShiftError::Validation("slice step must be >= 1".into()));
    }
    let ref_dims = reference.slice_shape(opts.axis)?;
    let tile_dims = slave.slice_shape(opts.axis)?;
    let fits = nominal.0 >= 0
        && nominal.1 >= 0
        && nominal.0 as usize + tile_dims.0 <= ref_dims.0
        && nominal.1 as usize + tile_dims.1 <= ref_dims.1;
    if !fits {
        return Err(ShiftError::OutOfBounds {
            offset: nominal,
            tile: tile_dims,
            reference: ref_dims,
        });
    }
    let offset = (nominal.0 as usize, nominal.1 as usize);

    let slices: Vec<usize> = (0..slave.shape()[opts.axis]).step_by(opts.step).collect();
    let samples: Vec<ShiftSample> = slices
        .par_iter()
        .map(|&i| -> Result<Option<ShiftSample>, ShiftError> {
            let r = reference.slice(opts.axis, i)?;
            let s = slave.slice(opts.axis, i)?;
            Ok(slice_sample(&r, &s, offset, i, opts.upsample))
        })
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .flatten()
        .collect();

    for s in &samples {
        debug!(
            "slice {}: shift = [{:.2}, {:.2}], peak = {:.3}",
            s.slice, s.shift[0], s.shift[1], s.peak
        );
    }
    let shift = consensus_shift(&samples, opts);
    info!("consensus shift = [{:.2}, {:.2}]", shift[0], shift[1]);
    Ok(ShiftEstimate { shift, samples })
}

/// Reduce per-slice samples to one shift, or zero when they disagree.
///
/// Weak samples (`peak < min_peak`) are dropped first. Samples farther from
/// the mean than the mean's own length are discarded; the survivors' mean is
/// accepted only if at least `min_consensus_samples` remain, their standard
/// deviation is at most half the mean length and the mean is at least one
/// pixel long.
pub fn consensus_shift(samples: &[ShiftSample], opts: &ShiftOptions) -> Vec2 {
    let strong: Vec<Vec2> = samples
        .iter()
        .filter(|s| s.peak >= opts.min_peak)
        .map(|s| s.shift)
        .collect();
    if strong.is_empty() {
        return Vec2::zeros();
    }

    let mean = strong.iter().sum::<Vec2>() / strong.len() as Real;
    let radius = mean.norm();
    let kept: Vec<Vec2> = strong
        .into_iter()
        .filter(|s| (s - mean).norm() < radius)
        .collect();
    if kept.is_empty() || kept.len() < opts.min_consensus_samples {
        debug!("shift rejected: {} consistent samples", kept.len());
        return Vec2::zeros();
    }

    let n = kept.len() as Real;
    let mean = kept.iter().sum::<Vec2>() / n;
    let var = kept
        .iter()
        .map(|s| (s - mean).component_mul(&(s - mean)))
        .sum::<Vec2>()
        / n;
    let std = var.map(Real::sqrt);
    if std.norm() > mean.norm() / 2.0 || mean.norm() < 1.0 {
        debug!(
            "shift rejected: mean = [{:.2}, {:.2}], std = [{:.2}, {:.2}]",
            mean[0], mean[1], std[0], std[1]
        );
        return Vec2::zeros();
    }
    mean
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(slice: usize, r: Real, c: Real) -> ShiftSample {
        ShiftSample {
            slice,
            shift: Vec2::new(r, c),
            peak: 0.5,
        }
    }

    #[test]
    fn no_samples_give_zero() {
        assert_eq!(consensus_shift(&[], &ShiftOptions::default()), Vec2::zeros());
    }

    #[test]
    fn consistent_samples_give_their_mean() {
        let s = [sample(0, 2.0, -3.0), sample(10, 2.2, -3.0), sample(20, 1.8, -3.0)];
        let shift = consensus_shift(&s, &ShiftOptions::default());
        assert!((shift - Vec2::new(2.0, -3.0)).norm() < 1e-12);
    }

    #[test]
    fn outliers_are_pruned_before_averaging() {
        let s = [
            sample(0, 2.0, 2.0),
            sample(10, 2.0, 2.0),
            sample(20, 2.0, 2.0),
            sample(30, 2.0, 2.0),
            sample(40, 9.0, -3.0),
        ];
        // Mean (3.4, 1.0): the outlier lies 6.3 away, beyond |mean| = 3.54.
        let shift = consensus_shift(&s, &ShiftOptions::default());
        assert!((shift - Vec2::new(2.0, 2.0)).norm() < 1e-12);
    }

    #[test]
    fn sub_pixel_or_scattered_shifts_are_rejected() {
        let small = [sample(0, 0.5, 0.2), sample(10, 0.5, 0.3)];
        assert_eq!(consensus_shift(&small, &ShiftOptions::default()), Vec2::zeros());

        let scattered = [sample(0, 1.0, 0.0), sample(10, 5.0, 0.0), sample(20, 3.0, 3.0)];
        assert_eq!(consensus_shift(&scattered, &ShiftOptions::default()), Vec2::zeros());
    }

    #[test]
    fn single_sample_is_accepted_by_default() {
        let shift = consensus_shift(&[sample(0, 2.0, -3.0)], &ShiftOptions::default());
        assert_eq!(shift, Vec2::new(2.0, -3.0));
    }

    #[test]
    fn weak_and_lonely_samples_are_rejected_when_requested() {
        let mut weak = sample(0, 4.0, 0.0);
        weak.peak = 0.01;
        let samples = [weak, sample(10, 4.0, 0.0)];
        assert_eq!(
            consensus_shift(&samples, &ShiftOptions::default()),
            Vec2::new(4.0, 0.0)
        );

        let strict = ShiftOptions {
            min_peak: 0.1,
            min_consensus_samples: 2,
            ..ShiftOptions::default()
        };
        assert_eq!(consensus_shift(&samples, &strict), Vec2::zeros());

        let lonely = ShiftOptions {
            min_consensus_samples: 1,
            ..strict
        };
        assert_eq!(consensus_shift(&samples, &lonely), Vec2::new(4.0, 0.0));
    }

    #[test]
    fn support_selection_drops_empty_rows_and_columns() {
        let img = DMatrix::from_fn(3, 4, |r, c| (r * 4 + c) as Real + 1.0);
        let mask = DMatrix::from_fn(3, 4, |r, c| r != 1 && c >= 2);
        let out = select_support(&img, &mask);
        assert_eq!(out.shape(), (2, 2));
        assert_eq!(out[(0, 0)], 3.0);
        assert_eq!(out[(1, 1)], 12.0);
    }
}
