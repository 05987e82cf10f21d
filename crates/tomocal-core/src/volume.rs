//! Dense 3D scalar volumes.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Real, Vec3};

/// Errors raised by structurally invalid volume operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VolumeError {
    /// Two volumes that must share a shape do not.
    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: [usize; 3],
        found: [usize; 3],
    },
    /// Buffer length does not match the requested shape.
    #[error("data length {found} does not match shape {shape:?} ({expected} voxels)")]
    DataLength {
        shape: [usize; 3],
        expected: usize,
        found: usize,
    },
    /// A shape with a zero-sized axis.
    #[error("volume has an empty axis: {0:?}")]
    Empty([usize; 3]),
    /// Sub-sampling stride must be at least 1.
    #[error("invalid sub-sampling stride {0}")]
    InvalidStride(usize),
    /// Axis index outside `0..3`.
    #[error("invalid axis {0}")]
    InvalidAxis(usize),
    /// Slice index outside the axis length.
    #[error("slice {index} out of range for axis {axis} of length {len}")]
    SliceOutOfRange { axis: usize, index: usize, len: usize },
    /// Padding target smaller than the volume along some axis.
    #[error("cannot pad volume of shape {shape:?} to {target:?}")]
    PadTooSmall {
        shape: [usize; 3],
        target: [usize; 3],
    },
    /// A 2D slice with the wrong footprint was written into a volume.
    #[error("slice shape {found:?} does not match expected {expected:?}")]
    SliceShape {
        expected: (usize, usize),
        found: (usize, usize),
    },
}

/// Dense `(Z, Y, X)` scalar field with `f32` samples and an isotropic voxel size.
///
/// Samples are stored row-major with X varying fastest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    shape: [usize; 3],
    voxel_size: Real,
    data: Vec<f32>,
}

impl Volume {
    /// Zero-filled volume with unit voxel size.
    pub fn zeros(shape: [usize; 3]) -> Self {
        Self {
            shape,
            voxel_size: 1.0,
            data: vec![0.0; shape[0] * shape[1] * shape[2]],
        }
    }

    /// Wrap an existing buffer. Fails if the length does not match `shape`
    /// or if any axis is empty.
    pub fn from_vec(shape: [usize; 3], data: Vec<f32>) -> Result<Self, VolumeError> {
        if shape.contains(&0) {
            return Err(VolumeError::Empty(shape));
        }
        let expected = shape[0] * shape[1] * shape[2];
        if data.len() != expected {
            return Err(VolumeError::DataLength {
                shape,
                expected,
                found: data.len(),
            });
        }
        Ok(Self {
            shape,
            voxel_size: 1.0,
            data,
        })
    }

    /// Build a volume by evaluating `f(z, y, x)` at every voxel.
    pub fn from_fn(shape: [usize; 3], mut f: impl FnMut(usize, usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(shape[0] * shape[1] * shape[2]);
        for z in 0..shape[0] {
            for y in 0..shape[1] {
                for x in 0..shape[2] {
                    data.push(f(z, y, x));
                }
            }
        }
        Self {
            shape,
            voxel_size: 1.0,
            data,
        }
    }

    pub fn with_voxel_size(mut self, voxel_size: Real) -> Self {
        self.voxel_size = voxel_size;
        self
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn voxel_size(&self) -> Real {
        self.voxel_size
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    #[inline]
    pub fn index_of(&self, z: usize, y: usize, x: usize) -> usize {
        (z * self.shape[1] + y) * self.shape[2] + x
    }

    #[inline]
    pub fn at(&self, z: usize, y: usize, x: usize) -> f32 {
        self.data[self.index_of(z, y, x)]
    }

    #[inline]
    pub fn at_mut(&mut self, z: usize, y: usize, x: usize) -> &mut f32 {
        let idx = self.index_of(z, y, x);
        &mut self.data[idx]
    }

    /// Geometric centre `shape // 2`, the origin of every [`crate::Pose`].
    pub fn centre(&self) -> Vec3 {
        Vec3::new(
            (self.shape[0] / 2) as Real,
            (self.shape[1] / 2) as Real,
            (self.shape[2] / 2) as Real,
        )
    }

    /// Fail with [`VolumeError::ShapeMismatch`] unless `other` has the same shape.
    pub fn ensure_same_shape(&self, other: &Volume) -> Result<(), VolumeError> {
        if self.shape != other.shape {
            return Err(VolumeError::ShapeMismatch {
                expected: self.shape,
                found: other.shape,
            });
        }
        Ok(())
    }

    /// Strided copy `v[::s, ::s, ::s]`. The voxel size grows by `stride`.
    pub fn subsample(&self, stride: usize) -> Result<Volume, VolumeError> {
        if stride == 0 {
            return Err(VolumeError::InvalidStride(stride));
        }
        if stride == 1 {
            return Ok(self.clone());
        }
        let shape = self.shape.map(|n| n.div_ceil(stride));
        let mut data = Vec::with_capacity(shape[0] * shape[1] * shape[2]);
        for z in (0..self.shape[0]).step_by(stride) {
            for y in (0..self.shape[1]).step_by(stride) {
                for x in (0..self.shape[2]).step_by(stride) {
                    data.push(self.at(z, y, x));
                }
            }
        }
        Ok(Volume {
            shape,
            voxel_size: self.voxel_size * stride as Real,
            data,
        })
    }

    /// Zero-pad to `target` keeping [`Volume::centre`] on the new centre.
    pub fn pad_centred(&self, target: [usize; 3]) -> Result<Volume, VolumeError> {
        if (0..3).any(|a| target[a] < self.shape[a]) {
            return Err(VolumeError::PadTooSmall {
                shape: self.shape,
                target,
            });
        }
        let lo: [usize; 3] = std::array::from_fn(|a| target[a] / 2 - self.shape[a] / 2);
        let mut out = Volume::zeros(target).with_voxel_size(self.voxel_size);
        for z in 0..self.shape[0] {
            for y in 0..self.shape[1] {
                let src = self.index_of(z, y, 0);
                let dst = out.index_of(z + lo[0], y + lo[1], lo[2]);
                out.data[dst..dst + self.shape[2]]
                    .copy_from_slice(&self.data[src..src + self.shape[2]]);
            }
        }
        Ok(out)
    }

    /// Shape of a slice taken perpendicular to `axis`, as `(rows, cols)`.
    pub fn slice_shape(&self, axis: usize) -> Result<(usize, usize), VolumeError> {
        match axis {
            0 => Ok((self.shape[1], self.shape[2])),
            1 => Ok((self.shape[0], self.shape[2])),
            2 => Ok((self.shape[0], self.shape[1])),
            _ => Err(VolumeError::InvalidAxis(axis)),
        }
    }

    fn slice_voxel(&self, axis: usize, index: usize, r: usize, c: usize) -> usize {
        match axis {
            0 => self.index_of(index, r, c),
            1 => self.index_of(r, index, c),
            _ => self.index_of(r, c, index),
        }
    }

    fn check_slice(&self, axis: usize, index: usize) -> Result<(usize, usize), VolumeError> {
        let dims = self.slice_shape(axis)?;
        if index >= self.shape[axis] {
            return Err(VolumeError::SliceOutOfRange {
                axis,
                index,
                len: self.shape[axis],
            });
        }
        Ok(dims)
    }

    /// Copy the 2D slice at `index` along `axis`. The remaining two axes keep
    /// their order: rows are the lower axis, columns the higher one.
    pub fn slice(&self, axis: usize, index: usize) -> Result<DMatrix<f64>, VolumeError> {
        let (rows, cols) = self.check_slice(axis, index)?;
        Ok(DMatrix::from_fn(rows, cols, |r, c| {
            self.data[self.slice_voxel(axis, index, r, c)] as f64
        }))
    }

    /// Overwrite the slice at `index` along `axis`.
    pub fn set_slice(
        &mut self,
        axis: usize,
        index: usize,
        image: &DMatrix<f64>,
    ) -> Result<(), VolumeError> {
        let (rows, cols) = self.check_slice(axis, index)?;
        if image.shape() != (rows, cols) {
            return Err(VolumeError::SliceShape {
                expected: (rows, cols),
                found: image.shape(),
            });
        }
        for c in 0..cols {
            for r in 0..rows {
                let idx = self.slice_voxel(axis, index, r, c);
                self.data[idx] = image[(r, c)] as f32;
            }
        }
        Ok(())
    }

    /// Sum of all samples, accumulated in `f64`.
    pub fn sum(&self) -> Real {
        self.data.iter().map(|&v| v as Real).sum()
    }

    /// `(min, max)` over all samples, or `None` for an empty buffer.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        let mut it = self.data.iter().copied();
        let first = it.next()?;
        Some(it.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }
}

/// Root-mean-square difference `sqrt(mean((a - b)²))` between two volumes.
pub fn rms_difference(a: &Volume, b: &Volume) -> Result<Real, VolumeError> {
    a.ensure_same_shape(b)?;
    if a.is_empty() {
        return Ok(0.0);
    }
    let ss: Real = a
        .as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(&u, &v)| {
            let d = (u - v) as Real;
            d * d
        })
        .sum();
    Ok((ss / a.len() as Real).sqrt())
}
