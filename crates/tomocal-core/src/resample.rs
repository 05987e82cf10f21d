//! Linear interpolation, rigid resampling and sub-pixel shifts.
//!
//! Samples outside the input grid read as zero, so content moved out of the
//! field of view is lost and uncovered regions are filled with zeros.

use nalgebra::DMatrix;
use rayon::prelude::*;

use crate::{Pose, Real, Vec2, Vec3, Volume};

/// Trilinear sample of `volume` at fractional `(z, y, x)` coordinates.
pub fn trilinear(volume: &Volume, p: &Vec3) -> Real {
    let [nz, ny, nx] = volume.shape();
    let z0 = p[0].floor();
    let y0 = p[1].floor();
    let x0 = p[2].floor();
    let fz = p[0] - z0;
    let fy = p[1] - y0;
    let fx = p[2] - x0;
    let (z0, y0, x0) = (z0 as i64, y0 as i64, x0 as i64);

    let sample = |z: i64, y: i64, x: i64| -> Real {
        if z < 0 || y < 0 || x < 0 || z >= nz as i64 || y >= ny as i64 || x >= nx as i64 {
            0.0
        } else {
            volume.at(z as usize, y as usize, x as usize) as Real
        }
    };

    let mut acc = 0.0;
    for (dz, wz) in [(0, 1.0 - fz), (1, fz)] {
        if wz == 0.0 {
            continue;
        }
        for (dy, wy) in [(0, 1.0 - fy), (1, fy)] {
            if wy == 0.0 {
                continue;
            }
            for (dx, wx) in [(0, 1.0 - fx), (1, fx)] {
                if wx == 0.0 {
                    continue;
                }
                acc += wz * wy * wx * sample(z0 + dz, y0 + dy, x0 + dx);
            }
        }
    }
    acc
}

/// Resample `moving` under `pose`: `out(o) = moving(R · (o - c - T) + c)`.
pub fn affine(moving: &Volume, pose: &Pose) -> Volume {
    let shape = moving.shape();
    let centre = moving.centre();
    let r = pose.rotation;
    // out(o) = moving(R·o + offset)
    let offset = centre - r * (centre + pose.translation);
    let plane = shape[1] * shape[2];

    let mut out = Volume::zeros(shape).with_voxel_size(moving.voxel_size());
    if plane == 0 {
        return out;
    }
    out.as_mut_slice()
        .par_chunks_mut(plane)
        .enumerate()
        .for_each(|(z, chunk)| {
            for y in 0..shape[1] {
                for x in 0..shape[2] {
                    let o = Vec3::new(z as Real, y as Real, x as Real);
                    let p = r * o + offset;
                    chunk[y * shape[2] + x] = trilinear(moving, &p) as f32;
                }
            }
        });
    out
}

/// Translate a volume by `shift` voxels: `out(o) = input(o - shift)`.
pub fn translate(volume: &Volume, shift: &Vec3) -> Volume {
    affine(volume, &Pose::new(crate::Mat3::identity(), *shift))
}

/// Bilinear shift of a 2D image by `shift = (rows, cols)`:
/// `out(r, c) = input(r - shift.0, c - shift.1)`.
pub fn shift_image(image: &DMatrix<f64>, shift: &Vec2) -> DMatrix<f64> {
    let (rows, cols) = image.shape();
    if shift[0] == 0.0 && shift[1] == 0.0 {
        return image.clone();
    }
    let sample = |r: i64, c: i64| -> f64 {
        if r < 0 || c < 0 || r >= rows as i64 || c >= cols as i64 {
            0.0
        } else {
            image[(r as usize, c as usize)]
        }
    };
    DMatrix::from_fn(rows, cols, |r, c| {
        let pr = r as f64 - shift[0];
        let pc = c as f64 - shift[1];
        let r0 = pr.floor();
        let c0 = pc.floor();
        let fr = pr - r0;
        let fc = pc - c0;
        let (r0, c0) = (r0 as i64, c0 as i64);
        (1.0 - fr) * ((1.0 - fc) * sample(r0, c0) + fc * sample(r0, c0 + 1))
            + fr * ((1.0 - fc) * sample(r0 + 1, c0) + fc * sample(r0 + 1, c0 + 1))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation_about_axis;
    use std::f64::consts::PI;

    fn blob(shape: [usize; 3], centre: Vec3) -> Volume {
        Volume::from_fn(shape, |z, y, x| {
            let d = Vec3::new(z as Real, y as Real, x as Real) - centre;
            (-d.norm_squared() / 8.0).exp() as f32
        })
    }

    #[test]
    fn trilinear_interpolates_between_voxels() {
        let v = Volume::from_fn([2, 2, 2], |z, _, _| z as f32);
        assert!((trilinear(&v, &Vec3::new(0.25, 0.5, 0.5)) - 0.25).abs() < 1e-12);
        assert_eq!(trilinear(&v, &Vec3::new(-3.0, 0.0, 0.0)), 0.0);
    }

    #[test]
    fn identity_pose_is_a_copy() {
        let v = blob([8, 9, 10], Vec3::new(4.0, 4.0, 5.0));
        let out = affine(&v, &Pose::identity());
        assert_eq!(out, v);
    }

    #[test]
    fn translation_moves_content_forward() {
        let v = blob([16, 16, 16], Vec3::new(8.0, 8.0, 8.0));
        let moved = translate(&v, &Vec3::new(2.0, 0.0, -1.0));
        assert!((moved.at(10, 8, 7) - v.at(8, 8, 8)).abs() < 1e-6);
    }

    #[test]
    fn half_turn_about_centre_maps_offsets() {
        let v = blob([16, 16, 16], Vec3::new(8.0, 5.0, 11.0));
        let pose = Pose::new(rotation_about_axis(&Vec3::new(1.0, 0.0, 0.0), PI), Vec3::zeros());
        let out = affine(&v, &pose);
        // A half turn about Z maps (y, x) = (5, 11) to (11, 5) around (8, 8).
        assert!((out.at(8, 11, 5) - v.at(8, 5, 11)).abs() < 1e-5);
    }

    #[test]
    fn shift_image_moves_pixels() {
        let img = DMatrix::from_fn(5, 5, |r, c| (r * 5 + c) as f64);
        let out = shift_image(&img, &Vec2::new(1.0, 2.0));
        assert_eq!(out[(3, 4)], img[(2, 2)]);
        assert_eq!(out[(0, 0)], 0.0);
        let half = shift_image(&img, &Vec2::new(0.0, 0.5));
        assert!((half[(2, 2)] - 0.5 * (img[(2, 1)] + img[(2, 2)])).abs() < 1e-12);
    }
}
