use std::fmt;

use crate::error::GeometryError;
use crate::geometry::{CoordinateSystem3D, Vector};

/// Canonical resampling orientations of an axial volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeProjection {
    Axial,
    Coronal,
    Sagittal,
}

impl VolumeProjection {
    pub const ALL: [VolumeProjection; 3] = [
        VolumeProjection::Axial,
        VolumeProjection::Coronal,
        VolumeProjection::Sagittal,
    ];

    /// Plane of the first slice of this projection, and the direction along
    /// which the following slices are stacked.
    ///
    /// `axial` is the plane of the first axial slice and `axial_extent` the
    /// distance between the first and the last axial slices. Coronal and
    /// sagittal images are read top-down, so their origin lies on the last
    /// axial slice and their vertical axis points against the axial normal:
    ///
    /// ```text
    ///   projection   axis_x     axis_y     origin                      stacking
    ///   axial        x          y          o                           n
    ///   coronal      x          -n         o + extent * n              y
    ///   sagittal     y          -n         o + extent * n              x
    /// ```
    pub(crate) fn frame(
        self,
        axial: &CoordinateSystem3D,
        axial_extent: f64,
    ) -> Result<(CoordinateSystem3D, Vector), GeometryError> {
        let normal = *axial.normal();
        let top = *axial.origin() + axial_extent * normal;

        match self {
            VolumeProjection::Axial => Ok((axial.clone(), normal)),
            VolumeProjection::Coronal => Ok((
                CoordinateSystem3D::new(top, *axial.axis_x(), -normal)?,
                *axial.axis_y(),
            )),
            VolumeProjection::Sagittal => Ok((
                CoordinateSystem3D::new(top, *axial.axis_y(), -normal)?,
                *axial.axis_x(),
            )),
        }
    }
}

impl fmt::Display for VolumeProjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VolumeProjection::Axial => "axial",
            VolumeProjection::Coronal => "coronal",
            VolumeProjection::Sagittal => "sagittal",
        };
        f.write_str(name)
    }
}
