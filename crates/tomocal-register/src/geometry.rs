//! Conversion of a registration pose into acquisition geometry fields.

use tomocal_core::{keys, GeometryDescriptor, GeometryError, Pose, Vec3};

/// Return a copy of `geometry` with the pose folded into the volume fields.
///
/// `vol_rot` becomes the static `xyz` Euler angles of `Rᵀ`. `vol_tra` (zero
/// when absent) is decremented by `R · T`, reordered `(z, x, y)` and scaled by
/// `img_pixel`.
pub fn transform_to_geometry(
    pose: &Pose,
    geometry: &GeometryDescriptor,
) -> Result<GeometryDescriptor, GeometryError> {
    let img_pixel = geometry.scalar(keys::IMG_PIXEL)?;
    let tra = if geometry.contains(keys::VOL_TRA) {
        let v = geometry.vector(keys::VOL_TRA)?;
        if v.len() != 3 {
            return Err(GeometryError::WrongKind {
                key: keys::VOL_TRA.to_owned(),
                expected: "3-vector",
            });
        }
        Vec3::new(v[0], v[1], v[2])
    } else {
        Vec3::zeros()
    };

    let (rx, ry, rz) = tomocal_core::euler_xyz(&pose.rotation.transpose());
    let rt = pose.rotation * pose.translation;
    let tra = tra - Vec3::new(rt[0], rt[2], rt[1]) * img_pixel;

    let mut out = geometry.clone();
    out.set_vector(keys::VOL_ROT, vec![rx, ry, rz]);
    out.set_vector(keys::VOL_TRA, tra.iter().copied().collect());
    Ok(out)
}
