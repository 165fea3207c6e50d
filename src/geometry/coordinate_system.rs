use super::toolbox::{is_close_to_zero, is_near, parse_vector, Vector};
use crate::error::GeometryError;

/// Placement of a 2D plane in patient space.
///
/// The normal is the cross product of the two in-plane axes, so the triple
/// `(axis_x, axis_y, normal)` is right-handed:
///
/// ```text
///         normal
///           ^
///           |
///           o------> axis_x        world(x, y) = origin + x * axis_x + y * axis_y
///          /
///         v axis_y
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateSystem3D {
    origin: Vector,
    axis_x: Vector,
    axis_y: Vector,
    normal: Vector,
}

impl CoordinateSystem3D {
    /// Build a coordinate system, checking the axes are unit and orthogonal.
    pub fn new(origin: Vector, axis_x: Vector, axis_y: Vector) -> Result<Self, GeometryError> {
        // DICOM direction cosines must be unit vectors...
        for axis in [&axis_x, &axis_y] {
            let norm = axis.norm();
            if !is_near(norm, 1.0) {
                return Err(GeometryError::NonUnitAxis { norm });
            }
        }

        // ...and orthogonal
        let dot = axis_x.dot(&axis_y);
        if !is_close_to_zero(dot) {
            return Err(GeometryError::NonOrthogonalAxes { dot });
        }

        Ok(Self {
            origin,
            axis_x,
            axis_y,
            normal: axis_x.cross(&axis_y),
        })
    }

    /// Axial plane through the world origin.
    pub fn canonical() -> Self {
        Self {
            origin: Vector::zeros(),
            axis_x: Vector::x(),
            axis_y: Vector::y(),
            normal: Vector::z(),
        }
    }

    /// Parse `ImagePositionPatient` and `ImageOrientationPatient`.
    pub fn from_dicom(position: &str, orientation: &str) -> Result<Self, GeometryError> {
        let origin = parse_vector(position)?;
        let cosines = parse_vector(orientation)?;

        if origin.len() != 3 {
            return Err(GeometryError::InvalidVector(position.to_string()));
        }
        if cosines.len() != 6 {
            return Err(GeometryError::InvalidVector(orientation.to_string()));
        }

        Self::new(
            Vector::new(origin[0], origin[1], origin[2]),
            Vector::new(cosines[0], cosines[1], cosines[2]),
            Vector::new(cosines[3], cosines[4], cosines[5]),
        )
    }

    pub fn origin(&self) -> &Vector {
        &self.origin
    }

    pub fn axis_x(&self) -> &Vector {
        &self.axis_x
    }

    pub fn axis_y(&self) -> &Vector {
        &self.axis_y
    }

    pub fn normal(&self) -> &Vector {
        &self.normal
    }

    /// Same axes, moved to a new origin.
    pub fn with_origin(&self, origin: Vector) -> Self {
        Self {
            origin,
            ..self.clone()
        }
    }

    /// World coordinates of the in-plane point `(x, y)` (in mm).
    pub fn map_slice_to_world(&self, x: f64, y: f64) -> Vector {
        self.origin + x * self.axis_x + y * self.axis_y
    }

    /// Signed position of `point` along the normal.
    pub fn project_along_normal(&self, point: &Vector) -> f64 {
        point.dot(&self.normal)
    }

    /// In-plane coordinates of the orthogonal projection of `point`.
    pub fn project_point(&self, point: &Vector) -> (f64, f64) {
        let offset = point - self.origin;
        (offset.dot(&self.axis_x), offset.dot(&self.axis_y))
    }

    /// Signed distance from `point` to the plane.
    pub fn distance_to_plane(&self, point: &Vector) -> f64 {
        (point - self.origin).dot(&self.normal)
    }
}

impl Default for CoordinateSystem3D {
    fn default() -> Self {
        Self::canonical()
    }
}
