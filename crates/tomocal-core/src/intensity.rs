//! Histogram statistics, intensity equalisation and bounding boxes.

use serde::{Deserialize, Serialize};

use crate::{
    gaussian_filter1d, gaussian_filter3, otsu_threshold, soft_threshold, threshold_sample,
    ThresholdError, Real, Volume,
};

/// Histogram of `values` with `nbins` equal bins.
///
/// Returns bin centres and counts. Without an explicit range the histogram
/// spans `[min(min(values), 0), percentile(values, 99.99)]`. Values outside
/// the range are ignored; the last bin includes its right edge.
pub fn histogram(
    values: &[f32],
    nbins: usize,
    range: Option<(Real, Real)>,
) -> (Vec<Real>, Vec<usize>) {
    let nbins = nbins.max(1);
    let (lo, hi) = match range {
        Some(r) => r,
        None => {
            let lo = values
                .iter()
                .fold(0.0_f32, |acc, &v| acc.min(v)) as Real;
            let hi = percentile(values, 99.99).unwrap_or(lo);
            (lo, hi)
        }
    };
    // A degenerate range still produces a usable unit-width histogram.
    let (lo, hi) = if hi > lo { (lo, hi) } else { (lo - 0.5, lo + 0.5) };
    let width = (hi - lo) / nbins as Real;

    let centres = (0..nbins)
        .map(|i| lo + (i as Real + 0.5) * width)
        .collect();
    let mut counts = vec![0usize; nbins];
    for &v in values {
        let v = v as Real;
        if v < lo || v > hi {
            continue;
        }
        let bin = (((v - lo) / width) as usize).min(nbins - 1);
        counts[bin] += 1;
    }
    (centres, counts)
}

/// `q`-th percentile (`0..=100`) with linear interpolation between order
/// statistics. `None` for an empty sample.
pub fn percentile(values: &[f32], q: Real) -> Option<Real> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<f32> = values.to_vec();
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));
    let pos = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as Real;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as Real;
    Some(sorted[lo] as Real * (1.0 - frac) + sorted[hi] as Real * frac)
}

/// Characteristic intensities of a volume derived from its histogram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntensityRange {
    /// Position of the highest histogram spike (typically air).
    pub air: Real,
    /// 99.99th percentile.
    pub high: Real,
    /// Histogram centre of mass between `air + (high - air) / 10` and `high`.
    pub centre: Real,
}

pub fn intensity_range(values: &[f32]) -> Result<IntensityRange, ThresholdError> {
    let high = percentile(values, 99.99).ok_or(ThresholdError::Empty)?;
    let (x, counts) = histogram(values, 256, None);
    let y: Vec<Real> = counts.iter().map(|&c| (c as Real + 0.1).ln()).collect();
    let y = gaussian_filter1d(&y, 1.0);

    let mut peak = 0;
    for (i, &v) in y.iter().enumerate() {
        if v > y[peak] {
            peak = i;
        }
    }
    let air = x[peak];

    let lower = air + (high - air) / 10.0;
    let (mut num, mut den) = (0.0, 0.0);
    for (&xi, &yi) in x.iter().zip(&y) {
        if xi > lower && xi < high {
            num += xi * yi;
            den += yi;
        }
    }
    if den == 0.0 {
        return Err(ThresholdError::NoHistogramFeature);
    }
    Ok(IntensityRange {
        air,
        high,
        centre: num / den,
    })
}

/// How [`equalize_intensity`] matches two volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EqualizeMode {
    /// Match the 99.99th percentiles.
    #[default]
    Percentile,
    /// Match the histogram centres of mass of [`intensity_range`].
    Histogram,
}

/// Rescale `slave` in place so its intensity scale matches `master`.
///
/// Returns the applied scale factor.
pub fn equalize_intensity(
    master: &Volume,
    slave: &mut Volume,
    mode: EqualizeMode,
) -> Result<Real, ThresholdError> {
    let (m, s) = match mode {
        EqualizeMode::Percentile => (
            percentile(master.as_slice(), 99.99).ok_or(ThresholdError::Empty)?,
            percentile(slave.as_slice(), 99.99).ok_or(ThresholdError::Empty)?,
        ),
        EqualizeMode::Histogram => (
            intensity_range(&threshold_sample(master))?.centre,
            intensity_range(&threshold_sample(slave))?.centre,
        ),
    };
    if s == 0.0 {
        return Err(ThresholdError::NoHistogramFeature);
    }
    let factor = m / s;
    slave
        .as_mut_slice()
        .iter_mut()
        .for_each(|v| *v = (*v as Real * factor) as f32);
    Ok(factor)
}

/// Half-open voxel ranges `[start, end)` along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub z: (usize, usize),
    pub y: (usize, usize),
    pub x: (usize, usize),
}

/// 2×2×2 mean binning; odd trailing samples are dropped.
fn bin2(volume: &Volume) -> Volume {
    let [nz, ny, nx] = volume.shape().map(|n| (n / 2).max(1));
    let src = volume.shape();
    Volume::from_fn([nz, ny, nx], |z, y, x| {
        let mut acc = 0.0f32;
        let mut n = 0.0f32;
        for dz in 0..2 {
            for dy in 0..2 {
                for dx in 0..2 {
                    let (zz, yy, xx) = (2 * z + dz, 2 * y + dy, 2 * x + dx);
                    if zz < src[0] && yy < src[1] && xx < src[2] {
                        acc += volume.at(zz, yy, xx);
                        n += 1.0;
                    }
                }
            }
        }
        if n > 0.0 {
            acc / n
        } else {
            0.0
        }
    })
}

/// Rows (`by_rows == true`) or columns of a 2D projection with any signal.
fn occupied_span(img: &Volume, by_rows: bool) -> Option<(usize, usize)> {
    let [_, rows, cols] = img.shape();
    let (outer, inner) = if by_rows { (rows, cols) } else { (cols, rows) };
    let hit = |i: usize| {
        (0..inner).any(|j| {
            let v = if by_rows { img.at(0, i, j) } else { img.at(0, j, i) };
            v != 0.0
        })
    };
    let first = (0..outer).find(|&i| hit(i))?;
    let last = (0..outer).rev().find(|&i| hit(i))?;
    Some((first, last))
}

/// Project the binned volume along `axis`, smooth it and drop faint signal.
fn denoised_projection(binned: &Volume, axis: usize) -> Volume {
    let [nz, ny, nx] = binned.shape();
    let (rows, cols) = if axis == 0 { (ny, nx) } else { (nz, nx) };
    let proj = Volume::from_fn([1, rows, cols], |_, r, c| {
        let n = if axis == 0 { nz } else { ny };
        (0..n)
            .map(|k| {
                if axis == 0 {
                    binned.at(k, r, c)
                } else {
                    binned.at(r, k, c)
                }
            })
            .sum()
    });
    let mut proj = gaussian_filter3(&proj, 10.0);
    let positive: Vec<f32> = proj.as_slice().iter().copied().filter(|&v| v > 0.0).collect();
    if !positive.is_empty() {
        let mean = positive.iter().map(|&v| v as Real).sum::<Real>() / positive.len() as Real;
        soft_threshold(&mut proj, (mean / 10.0) as f32);
    }
    proj
}

/// Intensity-based bounding box of the object in `volume` (for auto-cropping).
///
/// Works on a 4× reduced copy thresholded with Otsu's method, adds a 5%
/// margin on each side and clamps to the volume. `None` if nothing survives
/// the threshold.
pub fn bounding_box(volume: &Volume) -> Option<BoundingBox> {
    let reduced = volume.subsample(2).ok()?;
    let mut binned = bin2(&reduced);
    let t = otsu_threshold(binned.as_slice()).ok()?;
    soft_threshold(&mut binned, t);

    let yx = denoised_projection(&binned, 0);
    let (y0, y1) = occupied_span(&yx, true)?;
    let (x0, x1) = occupied_span(&yx, false)?;
    let zx = denoised_projection(&binned, 1);
    let (z0, z1) = occupied_span(&zx, true)?;

    let shape = volume.shape();
    let expand = |(lo, hi): (usize, usize), n: usize| {
        let margin = (hi - lo) / 20;
        let lo = lo.saturating_sub(margin) * 4;
        let hi = ((hi + margin) * 4).min(n);
        (lo.min(n), hi)
    };
    Some(BoundingBox {
        z: expand((z0, z1), shape[0]),
        y: expand((y0, y1), shape[1]),
        x: expand((x0, x1), shape[2]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_counts_and_centres() {
        let (x, y) = histogram(&[0.0, 0.1, 0.9, 1.0], 2, Some((0.0, 1.0)));
        assert_eq!(y, vec![2, 2]);
        assert!((x[0] - 0.25).abs() < 1e-12 && (x[1] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn percentile_interpolates() {
        let v = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(percentile(&v, 0.0), Some(1.0));
        assert_eq!(percentile(&v, 100.0), Some(4.0));
        assert!((percentile(&v, 50.0).unwrap() - 2.5).abs() < 1e-12);
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn equalize_matches_percentiles() {
        let master = Volume::from_fn([4, 4, 4], |z, y, x| (z + y + x) as f32);
        let mut slave = Volume::from_fn([4, 4, 4], |z, y, x| 0.5 * (z + y + x) as f32);
        let f = equalize_intensity(&master, &mut slave, EqualizeMode::Percentile).unwrap();
        assert!((f - 2.0).abs() < 1e-9);
        assert!((slave.at(3, 3, 3) - master.at(3, 3, 3)).abs() < 1e-5);
    }

    #[test]
    fn bounding_box_encloses_cube() {
        let v = Volume::from_fn([64, 64, 64], |z, y, x| {
            if (16..40).contains(&z) && (20..44).contains(&y) && (8..48).contains(&x) {
                1.0
            } else {
                0.0
            }
        });
        let bb = bounding_box(&v).unwrap();
        assert!(bb.z.0 <= 16 && bb.z.1 >= 40);
        assert!(bb.y.0 <= 20 && bb.y.1 >= 44);
        assert!(bb.x.0 <= 8 && bb.x.1 >= 48);
        assert!(bounding_box(&Volume::zeros([8, 8, 8])).is_none());
    }
}
