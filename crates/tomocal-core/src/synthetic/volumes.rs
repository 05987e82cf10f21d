//! Synthetic volumes and projection images.

use nalgebra::DMatrix;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{gaussian_filter3, Real, Vec2, Vec3, Volume};

/// Solid ellipsoid of intensity `value` with semi-axes `radii` (voxels,
/// `(z, y, x)` order) centred at `centre + offset`.
pub fn ellipsoid(shape: [usize; 3], radii: &Vec3, offset: &Vec3, value: f32) -> Volume {
    let mut v = Volume::zeros(shape);
    let c = v.centre() + offset;
    add_ellipsoid(&mut v, &c, radii, value);
    v
}

fn add_ellipsoid(volume: &mut Volume, centre: &Vec3, radii: &Vec3, value: f32) {
    let [nz, ny, nx] = volume.shape();
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let d = Vec3::new(
                    (z as Real - centre[0]) / radii[0],
                    (y as Real - centre[1]) / radii[1],
                    (x as Real - centre[2]) / radii[2],
                );
                if d.norm_squared() <= 1.0 {
                    *volume.at_mut(z, y, x) = value;
                }
            }
        }
    }
}

/// Elongated ellipsoid with a bright off-axis bump.
///
/// The three semi-axes are distinct and the bump breaks every mirror and
/// half-turn symmetry, so any of the 24 axis-aligned orientations of the
/// phantom is distinguishable from the others.
pub fn phantom(shape: [usize; 3]) -> Volume {
    let n = shape.iter().copied().min().unwrap_or(0) as Real;
    let radii = Vec3::new(0.36 * n, 0.26 * n, 0.16 * n);
    let mut v = ellipsoid(shape, &radii, &Vec3::zeros(), 1.0);
    let bump = v.centre() + Vec3::new(0.18 * n, 0.12 * n, 0.06 * n);
    add_ellipsoid(&mut v, &bump, &Vec3::repeat(0.1 * n), 3.0);
    v
}

/// Isotropic Gaussian blob of unit peak at fractional `centre`.
pub fn gaussian_blob(shape: [usize; 3], centre: &Vec3, sigma: Real) -> Volume {
    let s2 = 2.0 * sigma * sigma;
    Volume::from_fn(shape, |z, y, x| {
        let d = Vec3::new(z as Real, y as Real, x as Real) - centre;
        (-d.norm_squared() / s2).exp() as f32
    })
}

/// 2D Gaussian blob of unit peak at fractional `(row, col)` centre.
pub fn gaussian_blob_image(rows: usize, cols: usize, centre: &Vec2, sigma: Real) -> DMatrix<f64> {
    let s2 = 2.0 * sigma * sigma;
    DMatrix::from_fn(rows, cols, |r, c| {
        let d = Vec2::new(r as Real - centre[0], c as Real - centre[1]);
        (-d.norm_squared() / s2).exp()
    })
}

/// Uniform `[0, 1)` noise smoothed with a Gaussian of width `sigma`.
pub fn smooth_noise(shape: [usize; 3], sigma: Real, seed: u64) -> Volume {
    let mut rng = StdRng::seed_from_u64(seed);
    let raw = Volume::from_fn(shape, |_, _, _| rng.random::<f32>());
    gaussian_filter3(&raw, sigma)
}

/// Smooth random texture image with values around `1.0`.
pub fn smooth_noise_image(rows: usize, cols: usize, sigma: Real, seed: u64) -> DMatrix<f64> {
    let v = smooth_noise([1, rows, cols], sigma, seed);
    let mean = v.sum() / v.len().max(1) as Real;
    let mut img = DMatrix::from_fn(rows, cols, |r, c| v.at(0, r, c) as Real);
    // Stretch the contrast lost to smoothing.
    img.iter_mut().for_each(|p| *p = 1.0 + 10.0 * (*p - mean));
    img
}
