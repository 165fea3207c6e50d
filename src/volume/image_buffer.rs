//! Dense voxel storage.
//!
//! Voxels are stored as an `ndarray` array indexed `[z, y, x]`, where `z` is
//! the index of the axial slice:
//!
//! ```text
//!            x ──>
//!        ┌──────────┐
//!   y    │  axial   │  z = 0 .. depth
//!   │    │  slice z │
//!   v    └──────────┘
//!
//!   coronal slice y  = voxels[depth-1 ..= 0, y, ..]   (width  x depth)
//!   sagittal slice x = voxels[depth-1 ..= 0, .., x]   (height x depth)
//! ```
//!
//! Coronal and sagittal images are read top-down: their first row is the
//! last axial slice.

use ndarray::{s, Array2, Array3};
use tracing::info;

use super::VolumeProjection;
use crate::error::{GeometryError, StoneError};
use crate::geometry::{is_parallel_or_opposite, CoordinateSystem3D, Vector};
use crate::slice::{PixelData, PixelFormat, SliceImage};

#[derive(Debug, Clone)]
enum VoxelData {
    Grayscale8(Array3<u8>),
    Grayscale16(Array3<u16>),
    SignedGrayscale16(Array3<i16>),
    Grayscale32(Array3<u32>),
    Float32(Array3<f32>),
    Rgb24(Array3<[u8; 3]>),
}

macro_rules! for_each_variant {
    ($data:expr, $array:ident => $body:expr) => {
        match $data {
            VoxelData::Grayscale8($array) => $body,
            VoxelData::Grayscale16($array) => $body,
            VoxelData::SignedGrayscale16($array) => $body,
            VoxelData::Grayscale32($array) => $body,
            VoxelData::Float32($array) => $body,
            VoxelData::Rgb24($array) => $body,
        }
    };
}

/// A stack of axial slices sharing one pixel format.
#[derive(Debug, Clone)]
pub struct ImageBuffer3D {
    voxels: VoxelData,
    format: PixelFormat,
    axial_geometry: CoordinateSystem3D,
    voxel_dimensions: Vector,
}

impl ImageBuffer3D {
    /// Zero-filled buffer with unit voxels placed on the canonical axial plane.
    pub fn new(format: PixelFormat, width: u32, height: u32, depth: usize) -> Self {
        let shape = (depth, height as usize, width as usize);
        let voxels = match format {
            PixelFormat::Grayscale8 => VoxelData::Grayscale8(Array3::zeros(shape)),
            PixelFormat::Grayscale16 => VoxelData::Grayscale16(Array3::zeros(shape)),
            PixelFormat::SignedGrayscale16 => VoxelData::SignedGrayscale16(Array3::zeros(shape)),
            PixelFormat::Grayscale32 => VoxelData::Grayscale32(Array3::zeros(shape)),
            PixelFormat::Float32 => VoxelData::Float32(Array3::zeros(shape)),
            PixelFormat::Rgb24 => VoxelData::Rgb24(Array3::from_elem(shape, [0; 3])),
        };

        let buffer = Self {
            voxels,
            format,
            axial_geometry: CoordinateSystem3D::canonical(),
            voxel_dimensions: Vector::new(1.0, 1.0, 1.0),
        };
        info!(
            "Created a {}x{}x{} volume of {:?} ({} MB)",
            width,
            height,
            depth,
            format,
            buffer.estimated_memory_size() / (1024 * 1024)
        );
        buffer
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        for_each_variant!(&self.voxels, array => array.dim().2 as u32)
    }

    pub fn height(&self) -> u32 {
        for_each_variant!(&self.voxels, array => array.dim().1 as u32)
    }

    /// Number of axial slices.
    pub fn depth(&self) -> usize {
        for_each_variant!(&self.voxels, array => array.dim().0)
    }

    pub fn estimated_memory_size(&self) -> u64 {
        let voxels = for_each_variant!(&self.voxels, array => array.len());
        voxels as u64 * self.format.bytes_per_pixel() as u64
    }

    /// Reset every voxel to zero.
    pub fn clear(&mut self) {
        for_each_variant!(&mut self.voxels, array => array.fill(Default::default()))
    }

    // =========================================================================
    // Geometry
    // =========================================================================

    pub fn set_axial_geometry(&mut self, geometry: CoordinateSystem3D) {
        self.axial_geometry = geometry;
    }

    /// Plane of the first axial slice.
    pub fn axial_geometry(&self) -> &CoordinateSystem3D {
        &self.axial_geometry
    }

    /// Size of a voxel in millimeters, along x, y and z.
    pub fn set_voxel_dimensions(&mut self, x: f64, y: f64, z: f64) -> Result<(), GeometryError> {
        if x <= 0.0 || y <= 0.0 || z <= 0.0 {
            return Err(GeometryError::InvalidVoxelDimensions { x, y, z });
        }
        self.voxel_dimensions = Vector::new(x, y, z);
        Ok(())
    }

    /// Voxel size as seen from `projection`: in-plane x, in-plane y, then
    /// the distance between slices.
    pub fn voxel_dimensions(&self, projection: VolumeProjection) -> Vector {
        let v = &self.voxel_dimensions;
        match projection {
            VolumeProjection::Axial => *v,
            VolumeProjection::Coronal => Vector::new(v.x, v.z, v.y),
            VolumeProjection::Sagittal => Vector::new(v.y, v.z, v.x),
        }
    }

    /// `(width, height)` of the images of `projection`.
    pub fn slice_size(&self, projection: VolumeProjection) -> (u32, u32) {
        let depth = self.depth() as u32;
        match projection {
            VolumeProjection::Axial => (self.width(), self.height()),
            VolumeProjection::Coronal => (self.width(), depth),
            VolumeProjection::Sagittal => (self.height(), depth),
        }
    }

    /// Number of images of `projection`.
    pub fn slice_count(&self, projection: VolumeProjection) -> usize {
        match projection {
            VolumeProjection::Axial => self.depth(),
            VolumeProjection::Coronal => self.height() as usize,
            VolumeProjection::Sagittal => self.width() as usize,
        }
    }

    /// Plane of image `index` of `projection`.
    pub fn slice_geometry(
        &self,
        projection: VolumeProjection,
        index: usize,
    ) -> Result<CoordinateSystem3D, StoneError> {
        self.check_index(projection, index)?;

        let extent = self.depth().saturating_sub(1) as f64 * self.voxel_dimensions.z;
        let (first, stacking) = projection.frame(&self.axial_geometry, extent)?;
        let step = self.voxel_dimensions(projection).z;

        Ok(first.with_origin(*first.origin() + index as f64 * step * stacking))
    }

    /// Projection whose planes are parallel to `plane`, if any.
    pub fn detect_projection(&self, plane: &CoordinateSystem3D) -> Option<VolumeProjection> {
        VolumeProjection::ALL.into_iter().find(|projection| {
            projection
                .frame(&self.axial_geometry, 0.0)
                .map(|(first, _)| is_parallel_or_opposite(first.normal(), plane.normal()).is_some())
                .unwrap_or(false)
        })
    }

    // =========================================================================
    // Pixels
    // =========================================================================

    /// Copy a decoded frame into axial slice `z`.
    pub fn write_axial_slice(&mut self, z: usize, image: &SliceImage) -> Result<(), StoneError> {
        self.check_index(VolumeProjection::Axial, z)?;

        if image.width() != self.width() || image.height() != self.height() {
            return Err(GeometryError::DimensionsMismatch {
                index: z,
                width: self.width(),
                height: self.height(),
                actual_width: image.width(),
                actual_height: image.height(),
            }
            .into());
        }

        match (&mut self.voxels, image.pixels()) {
            (VoxelData::Grayscale8(v), PixelData::Grayscale8(p)) => assign(v, z, p),
            (VoxelData::Grayscale16(v), PixelData::Grayscale16(p)) => assign(v, z, p),
            (VoxelData::SignedGrayscale16(v), PixelData::SignedGrayscale16(p)) => assign(v, z, p),
            (VoxelData::Grayscale32(v), PixelData::Grayscale32(p)) => assign(v, z, p),
            (VoxelData::Float32(v), PixelData::Float32(p)) => assign(v, z, p),
            (VoxelData::Rgb24(v), PixelData::Rgb24(p)) => assign(v, z, p),
            _ => return Err(StoneError::IncompatibleImageFormat(image.format())),
        }
        Ok(())
    }

    /// Copy of image `index` of `projection`.
    pub fn extract_slice(
        &self,
        projection: VolumeProjection,
        index: usize,
    ) -> Result<SliceImage, StoneError> {
        self.check_index(projection, index)?;

        let pixels = match &self.voxels {
            VoxelData::Grayscale8(v) => PixelData::Grayscale8(extract(v, projection, index)),
            VoxelData::Grayscale16(v) => PixelData::Grayscale16(extract(v, projection, index)),
            VoxelData::SignedGrayscale16(v) => {
                PixelData::SignedGrayscale16(extract(v, projection, index))
            }
            VoxelData::Grayscale32(v) => PixelData::Grayscale32(extract(v, projection, index)),
            VoxelData::Float32(v) => PixelData::Float32(extract(v, projection, index)),
            VoxelData::Rgb24(v) => PixelData::Rgb24(extract(v, projection, index)),
        };
        Ok(SliceImage::new(pixels))
    }

    /// Minimum and maximum voxel values. `None` for color or empty volumes.
    pub fn value_range(&self) -> Option<(f32, f32)> {
        match &self.voxels {
            VoxelData::Grayscale8(v) => range(v.iter().map(|x| f32::from(*x))),
            VoxelData::Grayscale16(v) => range(v.iter().map(|x| f32::from(*x))),
            VoxelData::SignedGrayscale16(v) => range(v.iter().map(|x| f32::from(*x))),
            VoxelData::Grayscale32(v) => range(v.iter().map(|x| *x as f32)),
            VoxelData::Float32(v) => range(v.iter().copied()),
            VoxelData::Rgb24(_) => None,
        }
    }

    fn check_index(&self, projection: VolumeProjection, index: usize) -> Result<(), StoneError> {
        let size = self.slice_count(projection);
        if index >= size {
            return Err(StoneError::ParameterOutOfRange { index, size });
        }
        Ok(())
    }
}

fn assign<T: Clone>(voxels: &mut Array3<T>, z: usize, pixels: &Array2<T>) {
    voxels.slice_mut(s![z, .., ..]).assign(pixels);
}

fn extract<T: Clone>(voxels: &Array3<T>, projection: VolumeProjection, index: usize) -> Array2<T> {
    match projection {
        VolumeProjection::Axial => voxels.slice(s![index, .., ..]).to_owned(),
        VolumeProjection::Coronal => voxels.slice(s![..;-1, index, ..]).to_owned(),
        VolumeProjection::Sagittal => voxels.slice(s![..;-1, .., index]).to_owned(),
    }
}

fn range(mut values: impl Iterator<Item = f32>) -> Option<(f32, f32)> {
    let first = values.next()?;
    Some(values.fold((first, first), |(low, high), v| (low.min(v), high.max(v))))
}
