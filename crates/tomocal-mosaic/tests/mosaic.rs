use nalgebra::DMatrix;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tomocal_core::{synthetic::volumes, CancelToken, Real, Vec2, Volume};
use tomocal_mosaic::{
    append_tile, estimate_shift, MosaicError, MosaicOptions, MosaicState, ShiftError,
    ShiftOptions, TileGeometry,
};

const UNIT: TileGeometry = TileGeometry {
    det_hrz: 0.0,
    det_vrt: 0.0,
    det_pixel: 1.0,
};

/// Copy `[r0, r0 + rows) × all angles × [c0, c0 + cols)` out of a stack.
fn crop(v: &Volume, r0: usize, rows: usize, c0: usize, cols: usize) -> Volume {
    Volume::from_fn([rows, v.shape()[1], cols], |r, a, c| v.at(r0 + r, a, c0 + c))
}

/// Random Gaussian blobs over an `80 × 112` scene, sampled on a grid whose
/// first pixel sits at `origin`. Fractional origins sample the same scene.
fn blob_scene(rows: usize, cols: usize, origin: Vec2, seed: u64) -> DMatrix<Real> {
    const SIGMA: Real = 1.5;
    let reach = 4.0 * SIGMA;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = DMatrix::from_element(rows, cols, 1.0);
    for _ in 0..900 {
        let centre = Vec2::new(rng.random_range(0.0..80.0), rng.random_range(0.0..112.0));
        let amplitude: Real = rng.random_range(-1.0..1.0);
        let local = centre - origin;
        let r0 = (local[0] - reach).ceil().max(0.0) as usize;
        let c0 = (local[1] - reach).ceil().max(0.0) as usize;
        let r1 = ((local[0] + reach).floor() + 1.0).clamp(0.0, rows as Real) as usize;
        let c1 = ((local[1] + reach).floor() + 1.0).clamp(0.0, cols as Real) as usize;
        for r in r0..r1 {
            for c in c0..c1 {
                let d = Vec2::new(r as Real, c as Real) - local;
                img[(r, c)] += amplitude * (-d.norm_squared() / (2.0 * SIGMA * SIGMA)).exp();
            }
        }
    }
    img
}

/// Stack of blob scenes, one scene per angle.
fn blob_stack(rows: usize, angles: usize, cols: usize, origin: Vec2) -> Volume {
    let slices: Vec<DMatrix<Real>> = (0..angles)
        .map(|a| blob_scene(rows, cols, origin, 40 + a as u64))
        .collect();
    Volume::from_fn([rows, angles, cols], |r, a, c| slices[a][(r, c)] as f32)
}

fn no_refine() -> MosaicOptions {
    MosaicOptions {
        refine_shift: false,
        ..MosaicOptions::default()
    }
}

#[test]
fn known_shift_is_recovered() {
    let scene = volumes::smooth_noise([64, 12, 96], 2.0, 3);
    let slave = crop(&scene, 12, 40, 30, 60);
    // Nominal (10, 33); true placement (12, 30).
    let est = estimate_shift(&scene, &slave, (10, 33), &ShiftOptions::default()).unwrap();
    assert_eq!(est.samples.len(), 2);
    assert!(
        (est.shift - Vec2::new(2.0, -3.0)).abs().max() < 0.11,
        "shift {}",
        est.shift
    );
}

#[test]
fn single_slice_stack_is_enough() {
    let scene = volumes::smooth_noise([64, 8, 96], 2.0, 3);
    let slave = crop(&scene, 12, 40, 30, 60);
    let est = estimate_shift(&scene, &slave, (10, 33), &ShiftOptions::default()).unwrap();
    assert_eq!(est.samples.len(), 1);
    assert!(
        (est.shift - Vec2::new(2.0, -3.0)).abs().max() < 0.11,
        "shift {}",
        est.shift
    );
}

#[test]
fn sub_pixel_shift_is_recovered() {
    let reference = blob_stack(64, 12, 96, Vec2::zeros());
    // Nominal (10, 33); the tile really starts at (11.5, 30.5).
    let slave = blob_stack(40, 12, 60, Vec2::new(11.5, 30.5));
    let est = estimate_shift(&reference, &slave, (10, 33), &ShiftOptions::default()).unwrap();
    assert_eq!(est.samples.len(), 2);
    assert!(
        (est.shift - Vec2::new(1.5, -2.5)).abs().max() < 0.11,
        "shift {}",
        est.shift
    );
}

#[test]
fn disjoint_support_gives_zero_shift() {
    let scene = volumes::smooth_noise([32, 4, 32], 2.0, 5);
    let mut reference = scene.clone();
    reference
        .as_mut_slice()
        .iter_mut()
        .for_each(|v| *v = 0.0);
    let slave = crop(&scene, 0, 16, 0, 16);
    let opts = ShiftOptions {
        step: 1,
        ..ShiftOptions::default()
    };
    let est = estimate_shift(&reference, &slave, (4, 4), &opts).unwrap();
    assert!(est.samples.is_empty());
    assert_eq!(est.shift, Vec2::zeros());
}

#[test]
fn uncorrelated_noise_gives_zero_shift() {
    let reference = volumes::smooth_noise([48, 30, 72], 1.0, 21);
    let slave = volumes::smooth_noise([40, 30, 60], 1.0, 22);
    let strict = ShiftOptions {
        min_peak: 0.5,
        min_consensus_samples: 2,
        ..ShiftOptions::default()
    };
    let est = estimate_shift(&reference, &slave, (4, 6), &strict).unwrap();
    assert_eq!(est.samples.len(), 3);
    assert_eq!(est.shift, Vec2::zeros());
}

#[test]
fn tile_outside_reference_is_an_error() {
    let reference = Volume::zeros([20, 3, 20]);
    let slave = Volume::zeros([10, 3, 10]);
    let res = estimate_shift(&reference, &slave, (12, 0), &ShiftOptions::default());
    assert!(matches!(res, Err(ShiftError::OutOfBounds { .. })));
    let res = estimate_shift(&reference, &slave, (0, -1), &ShiftOptions::default());
    assert!(matches!(res, Err(ShiftError::OutOfBounds { .. })));
}

#[test]
fn first_tile_is_copied_inside_its_footprint() {
    let mut mosaic = MosaicState::zeros([40, 5, 80], UNIT).unwrap();
    let tile = Volume::from_fn([20, 5, 30], |r, a, c| 1.0 + (r + a + c) as f32 * 0.1);
    let geom = TileGeometry {
        det_hrz: -15.0,
        det_vrt: -5.0,
        ..UNIT
    };
    let report = append_tile(&mut mosaic, &tile, &geom, &no_refine(), &CancelToken::new()).unwrap();
    assert_eq!(report.nominal_offset, (5, 10));
    assert_eq!(report.slices, 5);

    let v = mosaic.volume();
    for a in 0..5 {
        // Interior pixels (two or more pixels from the footprint edge).
        for r in 1..19 {
            for c in 1..29 {
                assert!((v.at(5 + r, a, 10 + c) - tile.at(r, a, c)).abs() < 1e-5);
            }
        }
        assert_eq!(v.at(2, a, 2), 0.0);
        assert_eq!(v.at(30, a, 60), 0.0);
    }
}

#[test]
fn overlap_blends_by_edge_distance() {
    // Accumulated data covers columns 0..40, the new tile columns 21..60.
    let mut base = Volume::zeros([20, 3, 60]);
    for r in 0..20 {
        for a in 0..3 {
            for c in 0..40 {
                *base.at_mut(r, a, c) = 2.0;
            }
        }
    }
    let mut mosaic = MosaicState::new(base, UNIT).unwrap();
    let tile = Volume::from_fn([20, 3, 39], |_, _, _| 4.0);
    let geom = TileGeometry {
        det_hrz: 10.5,
        ..UNIT
    };
    let report = append_tile(&mut mosaic, &tile, &geom, &no_refine(), &CancelToken::new()).unwrap();
    assert_eq!(report.nominal_offset, (0, 21));

    let v = mosaic.volume();
    for a in 0..3 {
        // Equal distance to both edges at column 30.
        assert!((v.at(10, a, 30) - 3.0).abs() < 1e-6);
        assert!((v.at(10, a, 5) - 2.0).abs() < 1e-6);
        assert!((v.at(10, a, 55) - 4.0).abs() < 1e-6);
    }
    let w: &DMatrix<f64> = mosaic.base_dist();
    assert_eq!(w[(10, 30)], mosaic.new_dist()[(10, 30)]);
}

#[test]
fn refined_append_follows_the_content() {
    let scene = volumes::smooth_noise([64, 12, 96], 2.0, 9);
    let mut base = scene.clone();
    for r in 0..64 {
        for a in 0..12 {
            for c in 60..96 {
                *base.at_mut(r, a, c) = 0.0;
            }
        }
    }
    let mut mosaic = MosaicState::new(base, UNIT).unwrap();
    let tile = crop(&scene, 12, 40, 30, 60);
    // Nominal offset (10, 33); the tile really sits at (12, 30).
    let geom = TileGeometry {
        det_hrz: 15.0,
        det_vrt: -2.0,
        ..UNIT
    };
    let report =
        append_tile(&mut mosaic, &tile, &geom, &MosaicOptions::default(), &CancelToken::new())
            .unwrap();
    assert_eq!(report.nominal_offset, (10, 33));
    assert!((report.shift - Vec2::new(2.0, -3.0)).abs().max() < 0.11);

    // Where both contributions exist they agree with the scene.
    let v = mosaic.volume();
    for &(r, c) in &[(30, 45), (25, 55), (40, 70)] {
        assert!(
            (v.at(r, 0, c) - scene.at(r, 0, c)).abs() < 0.005,
            "({r}, {c}): {} vs {}",
            v.at(r, 0, c),
            scene.at(r, 0, c)
        );
    }
}

#[test]
fn angle_mismatch_is_rejected() {
    let mut mosaic = MosaicState::zeros([10, 4, 10], UNIT).unwrap();
    let tile = Volume::zeros([5, 3, 5]);
    let res = append_tile(&mut mosaic, &tile, &UNIT, &no_refine(), &CancelToken::new());
    assert!(matches!(
        res,
        Err(MosaicError::AngleMismatch { mosaic: 4, tile: 3 })
    ));
}

#[test]
fn cancellation_leaves_mosaic_untouched_before_first_slice() {
    let mut mosaic = MosaicState::zeros([10, 4, 10], UNIT).unwrap();
    let tile = Volume::from_fn([5, 4, 5], |_, _, _| 1.0);
    let cancel = CancelToken::new();
    cancel.cancel();
    let res = append_tile(&mut mosaic, &tile, &UNIT, &no_refine(), &cancel);
    assert!(matches!(res, Err(MosaicError::Cancelled { rows_done: 0 })));
    assert_eq!(mosaic.volume().sum(), 0.0);
}
