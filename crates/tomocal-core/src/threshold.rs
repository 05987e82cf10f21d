//! Global intensity thresholds for suppressing low-intensity noise.
//!
//! Three strategies are available through [`ThresholdMode`]:
//! - Otsu's bimodal split on a 256-bin histogram,
//! - a histogram heuristic that looks for the first shoulder after the air
//!   peak of the log-smoothed histogram,
//! - a caller supplied constant.

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{gaussian_filter1d, histogram, Real, Volume};

/// Number of histogram bins used by both automatic strategies.
pub const THRESHOLD_BINS: usize = 256;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ThresholdError {
    #[error("cannot compute a threshold from an empty sample")]
    Empty,
    #[error("histogram has no local minimum after the air peak")]
    NoHistogramFeature,
}

/// Strategy for picking a global threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    /// Otsu's method (maximal between-class variance).
    Otsu,
    /// First shoulder after the dominant (air) histogram peak.
    Histogram,
    /// Fixed value.
    Constant { value: f32 },
}

impl ThresholdMode {
    /// Compute the threshold for an arbitrary sample of intensities.
    pub fn compute(&self, values: &[f32]) -> Result<f32, ThresholdError> {
        let t = match self {
            ThresholdMode::Otsu => otsu_threshold(values)?,
            ThresholdMode::Histogram => histogram_threshold(values)?,
            ThresholdMode::Constant { value } => *value,
        };
        debug!("threshold ({:?}) = {:.4e}", self, t);
        Ok(t)
    }
}

/// Every second voxel along each axis; the sample used for automatic thresholds.
pub fn threshold_sample(volume: &Volume) -> Vec<f32> {
    let [nz, ny, nx] = volume.shape();
    let mut out = Vec::with_capacity(volume.len() / 8 + 1);
    for z in (0..nz).step_by(2) {
        for y in (0..ny).step_by(2) {
            for x in (0..nx).step_by(2) {
                out.push(volume.at(z, y, x));
            }
        }
    }
    out
}

/// Otsu threshold on a 256-bin histogram spanning `[min, max]` of `values`.
///
/// A constant sample returns its value.
pub fn otsu_threshold(values: &[f32]) -> Result<f32, ThresholdError> {
    let (lo, hi) = values
        .iter()
        .fold(None, |acc: Option<(f32, f32)>, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
        .ok_or(ThresholdError::Empty)?;
    if lo == hi {
        return Ok(lo);
    }

    let (centres, counts) = histogram(values, THRESHOLD_BINS, Some((lo as Real, hi as Real)));
    let n = counts.len();
    let hist: Vec<Real> = counts.iter().map(|&c| c as Real).collect();

    let mut weight1 = vec![0.0; n];
    let mut mean1 = vec![0.0; n];
    let (mut w, mut m) = (0.0, 0.0);
    for i in 0..n {
        w += hist[i];
        m += hist[i] * centres[i];
        weight1[i] = w;
        mean1[i] = if w > 0.0 { m / w } else { 0.0 };
    }
    let mut weight2 = vec![0.0; n];
    let mut mean2 = vec![0.0; n];
    let (mut w, mut m) = (0.0, 0.0);
    for i in (0..n).rev() {
        w += hist[i];
        m += hist[i] * centres[i];
        weight2[i] = w;
        mean2[i] = if w > 0.0 { m / w } else { 0.0 };
    }

    let mut best = (0usize, Real::NEG_INFINITY);
    for i in 0..n - 1 {
        let d = mean1[i] - mean2[i + 1];
        let var = weight1[i] * weight2[i + 1] * d * d;
        if var > best.1 {
            best = (i, var);
        }
    }
    Ok(centres[best.0] as f32)
}

/// First strict local minima of `y`, endpoints excluded.
fn first_local_min(y: &[Real]) -> Option<usize> {
    (1..y.len().saturating_sub(1)).find(|&i| y[i] < y[i - 1] && y[i] < y[i + 1])
}

/// Threshold at the first shoulder after the air peak.
///
/// The histogram is log-compressed and smoothed; the air peak is its global
/// maximum. If the first extremum of the slope coincides with a minimum of the
/// histogram itself the threshold sits there; otherwise the shoulder belongs
/// to another material and the threshold moves a quarter of the way back
/// towards the air peak.
pub fn histogram_threshold(values: &[f32]) -> Result<f32, ThresholdError> {
    if values.is_empty() {
        return Err(ThresholdError::Empty);
    }
    let (x, counts) = histogram(values, THRESHOLD_BINS, None);
    let y: Vec<Real> = counts.iter().map(|&c| (c as Real + 1.0).ln()).collect();
    let y = gaussian_filter1d(&y, 1.0);

    let air = y
        .iter()
        .enumerate()
        .fold((0usize, Real::NEG_INFINITY), |best, (i, &v)| {
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        })
        .0;

    let slope: Vec<Real> = y.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    let slope = slope.get(air..).unwrap_or(&[]);
    let tail = &y[air..];
    let x = &x[air..];

    let ind = first_local_min(slope).ok_or(ThresholdError::NoHistogramFeature)?;
    let min_ind = first_local_min(tail).ok_or(ThresholdError::NoHistogramFeature)?;

    let t = if ind.abs_diff(min_ind) < 2 {
        x[ind]
    } else {
        x[ind] - (x[ind] - x[0]).abs() / 4.0
    };
    Ok(t as f32)
}

/// Zero every sample below `threshold`, in place.
pub fn soft_threshold(volume: &mut Volume, threshold: f32) {
    volume
        .as_mut_slice()
        .iter_mut()
        .filter(|v| **v < threshold)
        .for_each(|v| *v = 0.0);
}

/// Compute a threshold for `volume` with `mode` and apply it in place.
///
/// Returns the threshold that was applied.
pub fn apply_threshold(volume: &mut Volume, mode: ThresholdMode) -> Result<f32, ThresholdError> {
    let t = mode.compute(&threshold_sample(volume))?;
    soft_threshold(volume, t);
    Ok(t)
}
