use tomocal::core::{keys, synthetic::volumes};
use tomocal::mosaic::TileGeometry;
use tomocal::prelude::*;
use tomocal::register::transform_to_geometry;

#[test]
fn self_registration_leaves_geometry_unchanged() -> anyhow::Result<()> {
    let fixed = volumes::phantom([32, 32, 32]);
    let opts = RegistrationOptions {
        use_refine: false,
        ..Default::default()
    };
    let res = register_volumes(&fixed, &fixed, &opts, None, &CancelToken::new())?;
    assert!(res.l2_after < 1e-6);

    let geometry = GeometryDescriptor::new()
        .with_scalar(keys::IMG_PIXEL, 0.1)
        .with_vector(keys::VOL_TRA, vec![1.0, 2.0, 3.0]);
    let out = transform_to_geometry(&res.pose, &geometry)?;
    let tra = out.vector(keys::VOL_TRA)?;
    for (a, b) in tra.iter().zip([1.0, 2.0, 3.0]) {
        assert!((a - b).abs() < 1e-6);
    }
    assert!(out.vector(keys::VOL_ROT)?.iter().all(|a| a.abs() < 1e-6));
    Ok(())
}

#[test]
fn centred_tile_fills_mosaic_interior() -> anyhow::Result<()> {
    let geometry = TileGeometry {
        det_hrz: 0.0,
        det_vrt: 0.0,
        det_pixel: 1.0,
    };
    let mut state = MosaicState::zeros([20, 3, 20], geometry)?;
    let tile = Volume::from_fn([10, 3, 10], |_, _, _| 5.0);
    let opts = MosaicOptions {
        refine_shift: false,
        ..Default::default()
    };
    let report = append_tile(&mut state, &tile, &geometry, &opts, &CancelToken::new())?;
    assert_eq!(report.nominal_offset, (5, 5));
    assert!((state.volume().at(10, 1, 10) - 5.0).abs() < 1e-6);
    assert_eq!(state.volume().at(1, 1, 1), 0.0);
    Ok(())
}

#[test]
fn calibrator_through_prelude() -> anyhow::Result<()> {
    let calibrator = ScalarCalibrator::new(CalibratorOptions {
        max_subscale: 2,
        ..Default::default()
    });
    let trace = calibrator.calibrate(1.0, 0.5, |x| Ok((x - 1.6).powi(2)), &CancelToken::new())?;
    assert!((trace.value - 1.6).abs() < 1e-9);
    Ok(())
}
