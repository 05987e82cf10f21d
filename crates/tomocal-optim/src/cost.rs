//! Reconstruction-based sharpness cost for geometry parameters.
//!
//! A wrong rotation-axis offset (or detector shift, tilt, ...) smears the
//! reconstruction. [`ModifierCost`] writes a trial value into one geometry
//! field, reconstructs a reduced volume through a caller supplied
//! [`Reconstructor`] and scores it with [`gradient_energy`].

use log::{debug, warn};
use nalgebra::DMatrix;
use tomocal_core::{
    gradient, keys, CancelToken, GeometryDescriptor, Real, Reconstructor, Sampling, Volume,
};

use crate::{CalibrateError, CalibrationTrace, CalibratorOptions, ScalarCalibrator};

/// Negative sharpness of a volume; lower is sharper.
///
/// Negative samples are clamped to zero. For every slice along the first axis
/// the squared gradient magnitude is averaged over the pixels where it is
/// positive, and the slice averages are summed.
pub fn gradient_energy(volume: &Volume) -> Real {
    let [nz, ny, nx] = volume.shape();
    let mut total = 0.0;
    for z in 0..nz {
        let slice = DMatrix::from_fn(ny, nx, |y, x| volume.at(z, y, x).max(0.0) as Real);
        let (gr, gc) = gradient(&slice);
        let (mut sum, mut count) = (0.0, 0usize);
        for (a, b) in gr.iter().zip(gc.iter()) {
            let g = a * a + b * b;
            if g > 0.0 {
                sum += g;
                count += 1;
            }
        }
        if count > 0 {
            total += sum / count as Real;
        }
    }
    -total
}

/// Cost of one scalar geometry field measured by reconstruction sharpness.
pub struct ModifierCost<'a, R: Reconstructor> {
    pub reconstructor: &'a R,
    pub projections: &'a Volume,
    pub geometry: &'a GeometryDescriptor,
    /// Geometry field that receives the trial value.
    pub key: String,
    /// Fixed vertical reduction; the horizontal one follows the subscale.
    pub vertical_sampling: usize,
}

impl<'a, R: Reconstructor> ModifierCost<'a, R> {
    pub fn new(
        reconstructor: &'a R,
        projections: &'a Volume,
        geometry: &'a GeometryDescriptor,
        key: &str,
    ) -> Self {
        Self {
            reconstructor,
            projections,
            geometry,
            key: key.to_owned(),
            vertical_sampling: 20,
        }
    }

    pub fn evaluate(&self, value: Real, subscale: usize) -> anyhow::Result<Real> {
        let mut geometry = self.geometry.clone();
        geometry.set_scalar(&self.key, value);
        let sampling = Sampling::new(self.vertical_sampling.max(1), subscale.max(1));
        let volume = self
            .reconstructor
            .reconstruct(self.projections, &geometry, sampling)?;
        let cost = gradient_energy(&volume);
        debug!("{} = {value:.6}: sharpness cost {cost:.6e}", self.key);
        Ok(cost)
    }
}

/// Initial guess of the horizontal rotation-axis offset in mm.
///
/// Uses the centre of mass of the squared projection intensity along the
/// detector columns (every second sample on each axis), converted from pixels
/// relative to the detector centre with `img_pixel`. Blank projections fall
/// back to the descriptor's current `axs_hrz`.
pub fn rotation_axis_guess(
    projections: &Volume,
    geometry: &GeometryDescriptor,
) -> Result<Real, CalibrateError> {
    let pixel = geometry.scalar(keys::IMG_PIXEL)?;
    let [rows, angles, cols] = projections.shape();
    let (mut mass, mut moment) = (0.0, 0.0);
    for r in (0..rows).step_by(2) {
        for a in (0..angles).step_by(2) {
            for c in (0..cols).step_by(2) {
                let v = projections.at(r, a, c) as Real;
                mass += v * v;
                moment += v * v * c as Real;
            }
        }
    }
    if mass <= 0.0 {
        warn!("projections carry no signal, keeping the current axis offset");
        return Ok(geometry.scalar(keys::AXS_HRZ)?);
    }
    let centre = moment / mass;
    Ok((centre - (cols / 2) as Real) * pixel)
}

/// Calibrate `axs_hrz` by reconstruction sharpness.
///
/// Starts from `guess` or the descriptor's `axs_hrz` and searches with a step
/// of `img_pixel`.
pub fn calibrate_rotation_axis<R: Reconstructor>(
    reconstructor: &R,
    projections: &Volume,
    geometry: &GeometryDescriptor,
    guess: Option<Real>,
    options: CalibratorOptions,
    cancel: &CancelToken,
) -> Result<CalibrationTrace, CalibrateError> {
    let initial = match guess {
        Some(g) => g,
        None => geometry.scalar(keys::AXS_HRZ)?,
    };
    let pixel = geometry.scalar(keys::IMG_PIXEL)?;
    let cost = ModifierCost::new(reconstructor, projections, geometry, keys::AXS_HRZ);
    ScalarCalibrator::new(options).calibrate_subsampled(
        initial,
        pixel,
        |v, s| cost.evaluate(v, s),
        cancel,
    )
}
