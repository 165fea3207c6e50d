use super::VolumeProjection;
use crate::error::{GeometryError, StoneError};
use crate::geometry::{is_parallel_or_opposite, CoordinateSystem3D, Vector};
use crate::slice::{DicomFrameConverter, Slice};

/// Geometry of a sorted axial stack, resampled along one projection.
///
/// For an axial stack of `w x h x n` voxels with pixel spacing `(sx, sy)`
/// and slice thickness `t`:
///
/// ```text
///   projection   width  height  depth   spacing   thickness
///   axial        w      h       n       (sx, sy)  t
///   coronal      w      n       h       (sx, t)   sy
///   sagittal     h      n       w       (sy, t)   sx
/// ```
#[derive(Debug, Clone)]
pub struct VolumeImageGeometry {
    projection: VolumeProjection,
    width: u32,
    height: u32,
    depth: usize,
    pixel_spacing_x: f64,
    pixel_spacing_y: f64,
    slice_thickness: f64,
    reference: CoordinateSystem3D,
    stacking: Vector,
    converter: DicomFrameConverter,
}

impl VolumeImageGeometry {
    /// Build the geometry of `projection` from slices sorted along their
    /// normal.
    pub fn from_slices(slices: &[Slice], projection: VolumeProjection) -> Result<Self, StoneError> {
        let axial = slices.first().ok_or(GeometryError::Empty)?;
        let thickness = axial_thickness(slices)?;
        let extent = (slices.len() - 1) as f64 * thickness;
        let (reference, stacking) = projection.frame(axial.geometry(), extent)?;

        let n = slices.len() as u32;
        let (width, height, depth, pixel_spacing_x, pixel_spacing_y, slice_thickness) =
            match projection {
                VolumeProjection::Axial => (
                    axial.width(),
                    axial.height(),
                    slices.len(),
                    axial.pixel_spacing_x(),
                    axial.pixel_spacing_y(),
                    thickness,
                ),
                VolumeProjection::Coronal => (
                    axial.width(),
                    n,
                    axial.height() as usize,
                    axial.pixel_spacing_x(),
                    thickness,
                    axial.pixel_spacing_y(),
                ),
                VolumeProjection::Sagittal => (
                    axial.height(),
                    n,
                    axial.width() as usize,
                    axial.pixel_spacing_y(),
                    thickness,
                    axial.pixel_spacing_x(),
                ),
            };

        Ok(Self {
            projection,
            width,
            height,
            depth,
            pixel_spacing_x,
            pixel_spacing_y,
            slice_thickness,
            reference,
            stacking,
            converter: axial.converter().clone(),
        })
    }

    pub fn projection(&self) -> VolumeProjection {
        self.projection
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of slices along this projection.
    pub fn slice_count(&self) -> usize {
        self.depth
    }

    pub fn pixel_spacing_x(&self) -> f64 {
        self.pixel_spacing_x
    }

    pub fn pixel_spacing_y(&self) -> f64 {
        self.pixel_spacing_y
    }

    pub fn slice_thickness(&self) -> f64 {
        self.slice_thickness
    }

    /// Plane of the first slice.
    pub fn reference(&self) -> &CoordinateSystem3D {
        &self.reference
    }

    pub fn normal(&self) -> &Vector {
        self.reference.normal()
    }

    /// Index of the slice nearest to `plane`.
    ///
    /// `None` if `plane` is not parallel to this projection, or falls
    /// outside of the volume.
    pub fn lookup_slice(&self, plane: &CoordinateSystem3D) -> Option<usize> {
        is_parallel_or_opposite(self.reference.normal(), plane.normal())?;

        let z = (plane.origin() - self.reference.origin()).dot(&self.stacking)
            / self.slice_thickness;
        let index = z.round();

        if index < 0.0 || index >= self.depth as f64 {
            return None;
        }
        Some(index as usize)
    }

    /// Synthetic slice `index` of this projection.
    pub fn slice(&self, index: usize) -> Result<Slice, StoneError> {
        if index >= self.depth {
            return Err(StoneError::ParameterOutOfRange {
                index,
                size: self.depth,
            });
        }

        let origin =
            *self.reference.origin() + index as f64 * self.slice_thickness * self.stacking;
        Ok(Slice::new(
            self.reference.with_origin(origin),
            self.pixel_spacing_x,
            self.pixel_spacing_y,
            self.slice_thickness,
            self.width,
            self.height,
            self.converter.clone(),
        ))
    }
}

/// Distance between successive axial slices, from the span of the stack.
fn axial_thickness(slices: &[Slice]) -> Result<f64, GeometryError> {
    let thickness = match slices {
        [] => return Err(GeometryError::Empty),
        [single] => single.thickness(),
        [first, .., last] => {
            let reference = first.geometry();
            (reference.project_along_normal(last.geometry().origin())
                - reference.project_along_normal(first.geometry().origin()))
                / (slices.len() - 1) as f64
        }
    };

    // The loader sorts slices by increasing position along the normal
    if thickness <= 0.0 {
        return Err(GeometryError::NonPositiveThickness(thickness));
    }
    Ok(thickness)
}
