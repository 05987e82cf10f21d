use serde::{Deserialize, Serialize};

use crate::{GeometryDescriptor, Volume};

/// Per-axis reduction requested from a [`Reconstructor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sampling {
    /// Detector rows (and volume slices) stride.
    pub vertical: usize,
    /// Detector columns (and in-slice voxels) stride.
    pub horizontal: usize,
}

impl Sampling {
    pub fn new(vertical: usize, horizontal: usize) -> Self {
        Self {
            vertical,
            horizontal,
        }
    }

    /// No reduction on either axis.
    pub fn full() -> Self {
        Self::new(1, 1)
    }
}

/// Turns projections into a volume for a given geometry.
///
/// Projections are stored as `(rows, angles, cols)`. Implementations must be
/// deterministic: the calibrator compares costs of different trial values and
/// assumes every difference comes from the geometry.
pub trait Reconstructor {
    fn reconstruct(
        &self,
        projections: &Volume,
        geometry: &GeometryDescriptor,
        sampling: Sampling,
    ) -> anyhow::Result<Volume>;
}
