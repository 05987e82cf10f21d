//! Sub-pixel translation estimate by cross-correlation with upsampled DFT
//! refinement.
//!
//! 1. mean removal and 2D FFT of both images,
//! 2. cross-power spectrum `F_ref · conj(F_tgt)`,
//! 3. integer peak of its inverse FFT,
//! 4. local refinement by evaluating the inverse transform on a grid
//!    `upsample` times finer around the integer peak (matrix-multiply DFT,
//!    Guizar-Sicairos et al., "Efficient subpixel image registration
//!    algorithms", 2008).
//!
//! The spectrum is not whitened: the wrap-around edge of a non-periodic crop
//! would dominate it and pull the peak to zero.

use std::f64::consts::PI;

use nalgebra::DMatrix;
use rustfft::{num_complex::Complex, FftPlanner};
use tomocal_core::{Real, Vec2};

/// Spectral energies below this mean the image carries no signal.
const ENERGY_EPS: Real = 1e-24;

/// Translation estimate from [`phase_correlate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseCorrelation {
    /// `(row, col)` shift that moves `target` onto `reference`:
    /// `target(p) ≈ reference(p + shift)`.
    pub shift: Vec2,
    /// Correlation peak normalised by the image energies, in `[0, 1]`; `1`
    /// for a pure periodic translation.
    pub peak: Real,
}

type Spectrum = DMatrix<Complex<Real>>;

fn fft2(data: &mut Spectrum, inverse: bool, planner: &mut FftPlanner<Real>) {
    let (rows, cols) = data.shape();
    let (row_fft, col_fft) = if inverse {
        (planner.plan_fft_inverse(cols), planner.plan_fft_inverse(rows))
    } else {
        (planner.plan_fft_forward(cols), planner.plan_fft_forward(rows))
    };

    let mut buf = vec![Complex::new(0.0, 0.0); rows.max(cols)];
    for r in 0..rows {
        for c in 0..cols {
            buf[c] = data[(r, c)];
        }
        row_fft.process(&mut buf[..cols]);
        for c in 0..cols {
            data[(r, c)] = buf[c];
        }
    }
    for c in 0..cols {
        for r in 0..rows {
            buf[r] = data[(r, c)];
        }
        col_fft.process(&mut buf[..rows]);
        for r in 0..rows {
            data[(r, c)] = buf[r];
        }
    }
}

fn to_spectrum(image: &DMatrix<Real>, planner: &mut FftPlanner<Real>) -> Spectrum {
    let mean = image.mean();
    let mut s = image.map(|v| Complex::new(v - mean, 0.0));
    fft2(&mut s, false, planner);
    s
}

/// Signed DFT frequency index, `numpy.fft.fftfreq(n) * n`.
#[inline]
fn freq(i: usize, n: usize) -> Real {
    if i < n.div_ceil(2) {
        i as Real
    } else {
        i as Real - n as Real
    }
}

/// Position and magnitude of the largest `|value|`; first one on ties.
fn argmax_abs(m: &Spectrum) -> ((usize, usize), Real) {
    let mut best = ((0, 0), Real::NEG_INFINITY);
    for c in 0..m.ncols() {
        for r in 0..m.nrows() {
            let v = m[(r, c)].norm();
            if v > best.1 {
                best = ((r, c), v);
            }
        }
    }
    best
}

/// Inverse DFT of `spectrum` evaluated on a `region × region` grid with
/// spacing `1 / upsample`, starting at `-offset / upsample` along each axis.
fn upsampled_idft(spectrum: &Spectrum, region: usize, upsample: Real, offset: &Vec2) -> Spectrum {
    let (rows, cols) = spectrum.shape();

    // Columns first: partial[k, b] = Σ_l S[k, l] · e^{i2π f(l)(b - off1) / (cols · up)}
    let mut partial = Spectrum::zeros(rows, region);
    for l in 0..cols {
        let fl = freq(l, cols);
        for b in 0..region {
            let theta = 2.0 * PI * fl * (b as Real - offset[1]) / (cols as Real * upsample);
            let w = Complex::from_polar(1.0, theta);
            for k in 0..rows {
                partial[(k, b)] += spectrum[(k, l)] * w;
            }
        }
    }

    let mut out = Spectrum::zeros(region, region);
    for k in 0..rows {
        let fk = freq(k, rows);
        for a in 0..region {
            let theta = 2.0 * PI * fk * (a as Real - offset[0]) / (rows as Real * upsample);
            let w = Complex::from_polar(1.0, theta);
            for b in 0..region {
                out[(a, b)] += w * partial[(k, b)];
            }
        }
    }
    out
}

/// Estimate the translation between two equally sized images.
///
/// The shift is resolved to `1 / upsample` pixels (`upsample <= 1` gives the
/// integer peak only). Returns `None` for empty, flat or mismatched images.
pub fn phase_correlate(
    reference: &DMatrix<Real>,
    target: &DMatrix<Real>,
    upsample: usize,
) -> Option<PhaseCorrelation> {
    if reference.shape() != target.shape() || reference.is_empty() {
        return None;
    }
    let (rows, cols) = reference.shape();

    let mut planner = FftPlanner::new();
    let f_ref = to_spectrum(reference, &mut planner);
    let f_tgt = to_spectrum(target, &mut planner);
    // The unscaled inverse FFT of the product is `N · Σ ref · tgt`, and
    // Parseval gives `Σ |F|² = N · Σ image²`, so this bounds the peak by 1.
    let energy = |f: &Spectrum| f.iter().map(|v| v.norm_sqr()).sum::<Real>();
    let norm = (energy(&f_ref) * energy(&f_tgt)).sqrt();
    if !norm.is_finite() || norm <= ENERGY_EPS {
        return None;
    }
    let product = f_ref.zip_map(&f_tgt, |a, b| a * b.conj());

    let mut corr = product.clone();
    fft2(&mut corr, true, &mut planner);
    let ((pr, pc), peak) = argmax_abs(&corr);
    let wrap = |i: usize, len: usize| {
        if i > len / 2 {
            i as Real - len as Real
        } else {
            i as Real
        }
    };
    let mut shift = Vec2::new(wrap(pr, rows), wrap(pc, cols));

    if upsample <= 1 {
        return Some(PhaseCorrelation {
            shift,
            peak: peak / norm,
        });
    }

    let up = upsample as Real;
    let region = (1.5 * up).ceil() as usize;
    let centre = (region / 2) as Real;
    let offset = Vec2::repeat(centre) - shift * up;
    let fine = upsampled_idft(&product, region, up, &offset);
    let ((a, b), fine_peak) = argmax_abs(&fine);
    shift += Vec2::new(a as Real - centre, b as Real - centre) / up;

    Some(PhaseCorrelation {
        shift,
        peak: fine_peak / norm,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tomocal_core::{laplace, synthetic::volumes};

    /// Periodic sub-pixel shift through the Fourier domain:
    /// `out(p) = image(p + shift)`. Odd sizes keep the result real.
    fn fourier_shift(image: &DMatrix<Real>, shift: &Vec2) -> DMatrix<Real> {
        let (rows, cols) = image.shape();
        let mut planner = FftPlanner::new();
        let mut s = to_spectrum(image, &mut planner);
        for r in 0..rows {
            for c in 0..cols {
                let theta = 2.0 * PI
                    * (freq(r, rows) * shift[0] / rows as Real
                        + freq(c, cols) * shift[1] / cols as Real);
                s[(r, c)] *= Complex::from_polar(1.0, theta);
            }
        }
        fft2(&mut s, true, &mut planner);
        s.map(|v| v.re / (rows * cols) as Real)
    }

    fn texture(rows: usize, cols: usize) -> DMatrix<Real> {
        volumes::smooth_noise_image(rows, cols, 2.0, 11)
    }

    #[test]
    fn integer_shift_of_blob() {
        let reference = volumes::gaussian_blob_image(48, 64, &Vec2::new(24.0, 30.0), 2.0);
        // target(p) = reference(p + (3, -5))
        let target = volumes::gaussian_blob_image(48, 64, &Vec2::new(21.0, 35.0), 2.0);
        let pc = phase_correlate(&reference, &target, 1).unwrap();
        assert_eq!(pc.shift, Vec2::new(3.0, -5.0));
        assert!(pc.peak > 0.5);
    }

    #[test]
    fn subpixel_shift_is_resolved_to_a_tenth() {
        let reference = texture(63, 65);
        let s = Vec2::new(1.3, -2.7);
        let target = fourier_shift(&reference, &s);
        let pc = phase_correlate(&reference, &target, 10).unwrap();
        assert!((pc.shift - s).abs().max() < 0.051, "shift {}", pc.shift);
        assert!(pc.peak > 0.5);
    }

    #[test]
    fn negative_wrap_and_identity() {
        let reference = texture(31, 33);
        let pc = phase_correlate(&reference, &reference, 10).unwrap();
        assert!(pc.shift.norm() < 1e-12);
        assert!(pc.peak > 0.5 && pc.peak <= 1.0 + 1e-9);

        let target = fourier_shift(&reference, &Vec2::new(-4.0, 6.0));
        let pc = phase_correlate(&reference, &target, 1).unwrap();
        assert_eq!(pc.shift, Vec2::new(-4.0, 6.0));
    }

    #[test]
    fn cropped_smooth_texture_keeps_its_offset() {
        let scene = texture(80, 100);
        let reference = laplace(&scene.view((10, 20), (48, 64)).clone_owned());
        // target(p) = scene(p + (12, 17)) = reference crop at p + (2, -3)
        let target = laplace(&scene.view((12, 17), (48, 64)).clone_owned());
        let pc = phase_correlate(&reference, &target, 10).unwrap();
        assert!(
            (pc.shift - Vec2::new(2.0, -3.0)).abs().max() < 0.11,
            "shift {}",
            pc.shift
        );
        assert!(pc.peak > 0.5 && pc.peak <= 1.0 + 1e-9);
    }

    #[test]
    fn flat_images_have_no_peak() {
        let flat = DMatrix::from_element(8, 8, 3.0);
        assert!(phase_correlate(&flat, &texture(8, 8), 10).is_none());
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let a = DMatrix::zeros(4, 4);
        let b = DMatrix::zeros(4, 5);
        assert!(phase_correlate(&a, &b, 10).is_none());
        assert!(phase_correlate(&DMatrix::zeros(0, 0), &DMatrix::zeros(0, 0), 10).is_none());
    }
}
