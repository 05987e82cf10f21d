//! Acquisition geometry records shared with reconstruction collaborators.
//!
//! A [`GeometryDescriptor`] is a flat map of named scalar or vector fields.
//! The calibration code only reads and writes the handful of keys listed in
//! [`keys`]; everything else is carried through untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Real;

/// Well-known geometry field names.
pub mod keys {
    /// Detector pixel size (mm).
    pub const DET_PIXEL: &str = "det_pixel";
    /// Horizontal detector offset (mm).
    pub const DET_HRZ: &str = "det_hrz";
    /// Vertical detector offset (mm).
    pub const DET_VRT: &str = "det_vrt";
    /// In-plane detector rotation (tilt).
    pub const DET_ROT: &str = "det_rot";
    /// Horizontal rotation-axis offset (mm).
    pub const AXS_HRZ: &str = "axs_hrz";
    /// Reconstruction voxel size (mm).
    pub const IMG_PIXEL: &str = "img_pixel";
    /// Volume rotation as Euler angles.
    pub const VOL_ROT: &str = "vol_rot";
    /// Volume translation (mm).
    pub const VOL_TRA: &str = "vol_tra";
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("geometry field `{0}` is missing")]
    Missing(String),
    #[error("geometry field `{key}` is not a {expected}")]
    WrongKind { key: String, expected: &'static str },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GeometryValue {
    Scalar(Real),
    Vector(Vec<Real>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeometryDescriptor {
    fields: BTreeMap<String, GeometryValue>,
}

impl GeometryDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scalar(mut self, key: &str, value: Real) -> Self {
        self.set_scalar(key, value);
        self
    }

    pub fn with_vector(mut self, key: &str, value: Vec<Real>) -> Self {
        self.set_vector(key, value);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&GeometryValue> {
        self.fields.get(key)
    }

    pub fn scalar(&self, key: &str) -> Result<Real, GeometryError> {
        match self.fields.get(key) {
            Some(GeometryValue::Scalar(v)) => Ok(*v),
            Some(GeometryValue::Vector(_)) => Err(GeometryError::WrongKind {
                key: key.to_owned(),
                expected: "scalar",
            }),
            None => Err(GeometryError::Missing(key.to_owned())),
        }
    }

    pub fn vector(&self, key: &str) -> Result<&[Real], GeometryError> {
        match self.fields.get(key) {
            Some(GeometryValue::Vector(v)) => Ok(v),
            Some(GeometryValue::Scalar(_)) => Err(GeometryError::WrongKind {
                key: key.to_owned(),
                expected: "vector",
            }),
            None => Err(GeometryError::Missing(key.to_owned())),
        }
    }

    pub fn set_scalar(&mut self, key: &str, value: Real) {
        self.fields
            .insert(key.to_owned(), GeometryValue::Scalar(value));
    }

    pub fn set_vector(&mut self, key: &str, value: Vec<Real>) {
        self.fields
            .insert(key.to_owned(), GeometryValue::Vector(value));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &GeometryValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}
