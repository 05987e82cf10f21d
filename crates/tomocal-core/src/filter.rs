//! Separable Gaussian smoothing, the discrete Laplacian and image gradients.
//!
//! Borders use symmetric reflection (`d c b a | a b c d | d c b a`).

use nalgebra::DMatrix;

use crate::{Real, Volume};

/// Gaussian kernels are truncated at this many standard deviations.
pub const GAUSSIAN_TRUNCATE: Real = 4.0;

/// Map an out-of-range index into `0..n` by symmetric reflection.
#[inline]
fn reflect(mut i: i64, n: usize) -> usize {
    let n = n as i64;
    if n == 1 {
        return 0;
    }
    loop {
        if i < 0 {
            i = -i - 1;
        } else if i >= n {
            i = 2 * n - i - 1;
        } else {
            return i as usize;
        }
    }
}

/// Normalised 1D Gaussian kernel of radius `round(truncate · sigma)`.
pub fn gaussian_kernel(sigma: Real) -> Vec<Real> {
    if sigma <= 0.0 {
        return vec![1.0];
    }
    let radius = (GAUSSIAN_TRUNCATE * sigma + 0.5) as i64;
    let mut k: Vec<Real> = (-radius..=radius)
        .map(|x| (-0.5 * (x * x) as Real / (sigma * sigma)).exp())
        .collect();
    let sum: Real = k.iter().sum();
    k.iter_mut().for_each(|w| *w /= sum);
    k
}

fn convolve_line(line: &[Real], kernel: &[Real], out: &mut [Real]) {
    let radius = (kernel.len() / 2) as i64;
    let n = line.len();
    for (i, o) in out.iter_mut().enumerate() {
        let mut acc = 0.0;
        for (j, &w) in kernel.iter().enumerate() {
            let src = reflect(i as i64 + j as i64 - radius, n);
            acc += w * line[src];
        }
        *o = acc;
    }
}

/// 1D Gaussian smoothing of a signal.
pub fn gaussian_filter1d(signal: &[Real], sigma: Real) -> Vec<Real> {
    if signal.is_empty() || sigma <= 0.0 {
        return signal.to_vec();
    }
    let kernel = gaussian_kernel(sigma);
    let mut out = vec![0.0; signal.len()];
    convolve_line(signal, &kernel, &mut out);
    out
}

/// Isotropic 3D Gaussian smoothing, applied separably along each axis.
pub fn gaussian_filter3(volume: &Volume, sigma: Real) -> Volume {
    if sigma <= 0.0 || volume.is_empty() {
        return volume.clone();
    }
    let kernel = gaussian_kernel(sigma);
    let shape = volume.shape();
    let mut data: Vec<Real> = volume.as_slice().iter().map(|&v| v as Real).collect();
    let strides = [shape[1] * shape[2], shape[2], 1];

    for axis in 0..3 {
        let n = shape[axis];
        if n < 2 {
            continue;
        }
        let stride = strides[axis];
        let mut line = vec![0.0; n];
        let mut out = vec![0.0; n];
        // Every line along `axis` starts at an index whose `axis` component is zero.
        for start in 0..data.len() {
            if (start / stride) % n != 0 {
                continue;
            }
            for (k, l) in line.iter_mut().enumerate() {
                *l = data[start + k * stride];
            }
            convolve_line(&line, &kernel, &mut out);
            for (k, &o) in out.iter().enumerate() {
                data[start + k * stride] = o;
            }
        }
    }

    let smoothed = data.into_iter().map(|v| v as f32).collect();
    Volume::from_vec(shape, smoothed)
        .map(|v| v.with_voxel_size(volume.voxel_size()))
        .unwrap_or_else(|_| volume.clone())
}

/// Discrete Laplacian: the sum of `[1, -2, 1]` second differences along rows
/// and columns.
pub fn laplace(image: &DMatrix<f64>) -> DMatrix<f64> {
    let (rows, cols) = image.shape();
    DMatrix::from_fn(rows, cols, |r, c| {
        let (ri, ci) = (r as i64, c as i64);
        let up = image[(reflect(ri - 1, rows), c)];
        let down = image[(reflect(ri + 1, rows), c)];
        let left = image[(r, reflect(ci - 1, cols))];
        let right = image[(r, reflect(ci + 1, cols))];
        up + down + left + right - 4.0 * image[(r, c)]
    })
}

/// Second-order accurate gradient `(d/drow, d/dcol)`: central differences in
/// the interior, one-sided differences on the border.
pub fn gradient(image: &DMatrix<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
    let (rows, cols) = image.shape();
    let diff = |n: usize, i: usize, at: &dyn Fn(usize) -> f64| -> f64 {
        if n < 2 {
            0.0
        } else if i == 0 {
            at(1) - at(0)
        } else if i == n - 1 {
            at(n - 1) - at(n - 2)
        } else {
            0.5 * (at(i + 1) - at(i - 1))
        }
    };
    let d_row = DMatrix::from_fn(rows, cols, |r, c| diff(rows, r, &|i| image[(i, c)]));
    let d_col = DMatrix::from_fn(rows, cols, |r, c| diff(cols, c, &|j| image[(r, j)]));
    (d_row, d_col)
}
