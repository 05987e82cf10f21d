//! Stitching of projection tiles into a larger mosaic.
//!
//! - [`phase_correlate`]: sub-pixel translation between two images,
//! - [`estimate_shift`]: robust residual shift of a tile against the mosaic,
//!   aggregated over many slices,
//! - [`append_tile`]: distance-weighted blending of a tile into the mosaic.
//!
//! Projection stacks are `(rows, angles, cols)` volumes; tiles and mosaic
//! must share the number of angles.
//!
//! # Example
//!
//! ```no_run
//! use tomocal_core::{CancelToken, Volume};
//! use tomocal_mosaic::{append_tile, MosaicOptions, MosaicState, TileGeometry};
//!
//! let geom = TileGeometry { det_hrz: 0.0, det_vrt: 0.0, det_pixel: 0.1 };
//! let mut mosaic = MosaicState::zeros([200, 90, 400], geom).unwrap();
//! let tile = Volume::zeros([100, 90, 200]);
//! let left = TileGeometry { det_hrz: -10.0, ..geom };
//! let report = append_tile(&mut mosaic, &tile, &left, &MosaicOptions::default(), &CancelToken::new()).unwrap();
//! println!("tile placed at {}", report.offset);
//! ```

mod mosaic;
mod phase_correlation;
mod shift;

pub use mosaic::*;
pub use phase_correlation::*;
pub use shift::*;
