//! Distance-weighted stitching of projection tiles into a larger mosaic.
//!
//! Stacks are laid out `(rows, angles, cols)`. A tile is placed at the offset
//! implied by the detector positions, optionally corrected by
//! [`estimate_shift`], and blended into every angle slice with weights equal
//! to each pixel's distance from the edge of its own footprint. Overlaps thus
//! fade smoothly from one tile to the other.

use log::{debug, info};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tomocal_core::{
    distance_to_background, keys, shift_image, CancelToken, GeometryDescriptor, GeometryError,
    Real, Vec2, Volume, VolumeError,
};

use crate::{estimate_shift, ShiftError, ShiftOptions};

/// Index of the angle axis in projection stacks.
pub const ANGLE_AXIS: usize = 1;

#[derive(Debug, Error)]
pub enum MosaicError {
    /// Size mismatch along the angle axis: the tile and the mosaic must
    /// hold the same number of projections.
    #[error("tile has {tile} angles, mosaic has {mosaic}")]
    AngleMismatch { mosaic: usize, tile: usize },
    #[error("tile footprint {tile:?} exceeds mosaic footprint {mosaic:?}")]
    TileTooLarge {
        mosaic: (usize, usize),
        tile: (usize, usize),
    },
    #[error("detector pixel size must be positive, got {0}")]
    InvalidPixel(Real),
    #[error("cancelled after blending {rows_done} angle slices")]
    Cancelled { rows_done: usize },
    #[error(transparent)]
    Shift(#[from] ShiftError),
    #[error(transparent)]
    Volume(#[from] VolumeError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Detector placement of a tile or of the mosaic (mm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileGeometry {
    /// Horizontal detector centre offset.
    pub det_hrz: Real,
    /// Vertical detector centre offset.
    pub det_vrt: Real,
    /// Detector pixel size.
    pub det_pixel: Real,
}

impl TileGeometry {
    pub fn from_descriptor(geometry: &GeometryDescriptor) -> Result<Self, GeometryError> {
        Ok(Self {
            det_hrz: geometry.scalar(keys::DET_HRZ)?,
            det_vrt: geometry.scalar(keys::DET_VRT)?,
            det_pixel: geometry.scalar(keys::DET_PIXEL)?,
        })
    }

    fn validate(&self) -> Result<(), MosaicError> {
        if self.det_pixel > 0.0 && self.det_pixel.is_finite() {
            Ok(())
        } else {
            Err(MosaicError::InvalidPixel(self.det_pixel))
        }
    }
}

/// Options of [`append_tile`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MosaicOptions {
    /// Correct the nominal offset with [`estimate_shift`].
    pub refine_shift: bool,
    /// Angle stride used when building the occupancy mask of the mosaic.
    pub weight_stride: usize,
    pub shift: ShiftOptions,
}

impl Default for MosaicOptions {
    fn default() -> Self {
        Self {
            refine_shift: true,
            weight_stride: 100,
            shift: ShiftOptions::default(),
        }
    }
}

/// Accumulated projection mosaic.
#[derive(Debug, Clone)]
pub struct MosaicState {
    volume: Volume,
    geometry: TileGeometry,
    base_dist: DMatrix<Real>,
    new_dist: DMatrix<Real>,
}

impl MosaicState {
    pub fn new(volume: Volume, geometry: TileGeometry) -> Result<Self, MosaicError> {
        geometry.validate()?;
        let (rows, cols) = volume.slice_shape(ANGLE_AXIS)?;
        Ok(Self {
            volume,
            geometry,
            base_dist: DMatrix::zeros(rows, cols),
            new_dist: DMatrix::zeros(rows, cols),
        })
    }

    /// Empty mosaic of `(rows, angles, cols)`.
    pub fn zeros(shape: [usize; 3], geometry: TileGeometry) -> Result<Self, MosaicError> {
        Self::new(Volume::zeros(shape), geometry)
    }

    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    pub fn into_volume(self) -> Volume {
        self.volume
    }

    pub fn geometry(&self) -> &TileGeometry {
        &self.geometry
    }

    /// Blending weights of the accumulated data used by the last append.
    pub fn base_dist(&self) -> &DMatrix<Real> {
        &self.base_dist
    }

    /// Blending weights of the last appended tile.
    pub fn new_dist(&self) -> &DMatrix<Real> {
        &self.new_dist
    }
}

/// What [`append_tile`] did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendReport {
    /// Offset implied by the detector positions, `(row, col)`.
    pub nominal_offset: (i64, i64),
    /// Residual correction from shift estimation (zero when disabled).
    pub shift: Vec2,
    /// Offset actually used for blending.
    pub offset: Vec2,
    /// Number of angle slices blended.
    pub slices: usize,
}

/// Integer `(row, col)` position of a tile's first pixel in the mosaic.
///
/// Both footprints are centred on their detector offsets; sizes are
/// `shape × pixel` and the result is expressed in tile pixels.
pub fn nominal_offset(
    mosaic_dims: (usize, usize),
    mosaic: &TileGeometry,
    tile_dims: (usize, usize),
    tile: &TileGeometry,
) -> (i64, i64) {
    let mosaic_size = (
        mosaic_dims.0 as Real * mosaic.det_pixel,
        mosaic_dims.1 as Real * mosaic.det_pixel,
    );
    let tile_size = (
        tile_dims.0 as Real * tile.det_pixel,
        tile_dims.1 as Real * tile.det_pixel,
    );
    let row = ((tile.det_vrt - mosaic.det_vrt) + mosaic_size.0 / 2.0 - tile_size.0 / 2.0)
        / tile.det_pixel;
    let col = ((tile.det_hrz - mosaic.det_hrz) + mosaic_size.1 / 2.0 - tile_size.1 / 2.0)
        / tile.det_pixel;
    (row.round() as i64, col.round() as i64)
}

/// Distance to the mask edge minus one, floored at zero.
///
/// A mask without background has no edge; its weight is capped at the
/// largest distance the footprint could have.
fn edge_weights(mask: &DMatrix<bool>) -> DMatrix<Real> {
    let (rows, cols) = mask.shape();
    let cap = (rows + cols) as Real;
    distance_to_background(mask).map(|d| (d.min(cap) - 1.0).max(0.0))
}

/// Place `tile` on a zero canvas of `dims` and shift it by `offset`.
fn place(tile: &DMatrix<Real>, dims: (usize, usize), offset: &Vec2) -> DMatrix<Real> {
    let mut canvas = DMatrix::zeros(dims.0, dims.1);
    canvas
        .view_mut((0, 0), tile.shape())
        .copy_from(tile);
    if offset[0] != 0.0 || offset[1] != 0.0 {
        canvas = shift_image(&canvas, offset);
    }
    canvas
}

/// Weighted average `(wa · a + wb · b) / norm` with `norm = ∞` where it is zero.
pub fn blend(
    base: &DMatrix<Real>,
    new: &DMatrix<Real>,
    base_dist: &DMatrix<Real>,
    new_dist: &DMatrix<Real>,
) -> DMatrix<Real> {
    DMatrix::from_fn(base.nrows(), base.ncols(), |r, c| {
        let norm = base_dist[(r, c)] + new_dist[(r, c)];
        let norm = if norm == 0.0 { Real::INFINITY } else { norm };
        (base_dist[(r, c)] * base[(r, c)] + new_dist[(r, c)] * new[(r, c)]) / norm
    })
}

/// Blend `tile` into the mosaic.
///
/// The mosaic is modified one angle slice at a time; cancellation is only
/// observed between slices, so on [`MosaicError::Cancelled`] the first
/// `rows_done` slices hold the blended result and the rest are untouched.
/// Appending the same tile twice blends it twice.
pub fn append_tile(
    state: &mut MosaicState,
    tile: &Volume,
    tile_geometry: &TileGeometry,
    opts: &MosaicOptions,
    cancel: &CancelToken,
) -> Result<AppendReport, MosaicError> {
    tile_geometry.validate()?;
    let angles = state.volume.shape()[ANGLE_AXIS];
    if tile.shape()[ANGLE_AXIS] != angles {
        return Err(MosaicError::AngleMismatch {
            mosaic: angles,
            tile: tile.shape()[ANGLE_AXIS],
        });
    }
    let dims = state.volume.slice_shape(ANGLE_AXIS)?;
    let tile_dims = tile.slice_shape(ANGLE_AXIS)?;
    if tile_dims.0 > dims.0 || tile_dims.1 > dims.1 {
        return Err(MosaicError::TileTooLarge {
            mosaic: dims,
            tile: tile_dims,
        });
    }

    let nominal = nominal_offset(dims, &state.geometry, tile_dims, tile_geometry);
    let shift = if opts.refine_shift {
        let shift_opts = ShiftOptions {
            axis: ANGLE_AXIS,
            ..opts.shift.clone()
        };
        estimate_shift(&state.volume, tile, nominal, &shift_opts)?.shift
    } else {
        Vec2::zeros()
    };
    let offset = Vec2::new(nominal.0 as Real, nominal.1 as Real) + shift;
    info!(
        "appending tile at [{:.2}, {:.2}] (nominal [{}, {}])",
        offset[0], offset[1], nominal.0, nominal.1
    );

    // Occupancy of the accumulated data, sampled across angles.
    let stride = opts.weight_stride.max(1);
    let sampled: Vec<usize> = (0..angles).step_by(stride).collect();
    let mut coverage = DMatrix::zeros(dims.0, dims.1);
    for &a in &sampled {
        coverage += state.volume.slice(ANGLE_AXIS, a)?;
    }
    let base_mask = coverage.map(|v| v != 0.0);
    let footprint = place(&DMatrix::from_element(tile_dims.0, tile_dims.1, 1.0), dims, &offset);
    let new_mask = footprint.map(|v| v > 0.0);

    state.base_dist = edge_weights(&base_mask);
    state.new_dist = edge_weights(&new_mask);
    debug!(
        "blend weights: base max {:.1}, tile max {:.1}",
        state.base_dist.max(),
        state.new_dist.max()
    );

    for a in 0..angles {
        if cancel.is_cancelled() {
            return Err(MosaicError::Cancelled { rows_done: a });
        }
        let new = place(&tile.slice(ANGLE_AXIS, a)?, dims, &offset);
        let base = state.volume.slice(ANGLE_AXIS, a)?;
        let blended = blend(&base, &new, &state.base_dist, &state.new_dist);
        state.volume.set_slice(ANGLE_AXIS, a, &blended)?;
    }

    Ok(AppendReport {
        nominal_offset: nominal,
        shift,
        offset,
        slices: angles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_geometry() -> TileGeometry {
        TileGeometry {
            det_hrz: 0.0,
            det_vrt: 0.0,
            det_pixel: 1.0,
        }
    }

    #[test]
    fn centred_tile_offset() {
        let g = unit_geometry();
        assert_eq!(nominal_offset((40, 80), &g, (20, 30), &g), (10, 25));
        let moved = TileGeometry {
            det_hrz: -15.0,
            det_vrt: -5.0,
            ..g
        };
        assert_eq!(nominal_offset((40, 80), &g, (20, 30), &moved), (5, 10));
    }

    #[test]
    fn offset_is_expressed_in_tile_pixels() {
        let mosaic = TileGeometry {
            det_pixel: 0.5,
            ..unit_geometry()
        };
        let tile = TileGeometry {
            det_hrz: 2.0,
            ..mosaic
        };
        // 2 mm to the right is 4 pixels of 0.5 mm.
        assert_eq!(nominal_offset((10, 40), &mosaic, (10, 20), &tile), (0, 14));
    }

    #[test]
    fn equal_weights_average() {
        let base = DMatrix::from_element(2, 2, 2.0);
        let new = DMatrix::from_element(2, 2, 4.0);
        let w = DMatrix::from_element(2, 2, 3.0);
        let zero = DMatrix::zeros(2, 2);
        assert!(blend(&base, &new, &w, &w).iter().all(|&v| (v - 3.0).abs() < 1e-12));
        assert!(blend(&base, &new, &w, &zero).iter().all(|&v| v == 2.0));
        assert!(blend(&base, &new, &zero, &zero).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn full_mask_weight_is_finite() {
        let w = edge_weights(&DMatrix::from_element(3, 5, true));
        assert!(w.iter().all(|&v| v == 7.0));
    }

    #[test]
    fn geometry_from_descriptor() {
        let d = GeometryDescriptor::new()
            .with_scalar(keys::DET_HRZ, 1.5)
            .with_scalar(keys::DET_VRT, -2.0)
            .with_scalar(keys::DET_PIXEL, 0.1);
        let g = TileGeometry::from_descriptor(&d).unwrap();
        assert_eq!(g.det_pixel, 0.1);
        assert!(TileGeometry::from_descriptor(&GeometryDescriptor::new()).is_err());
    }
}
