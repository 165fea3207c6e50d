use tracing::error;

use super::converter::DicomFrameConverter;
use super::dataset::{tags, DicomDataset};
use crate::error::SliceError;
use crate::geometry::{
    is_close_to_zero, is_near_with, is_parallel_or_opposite, CoordinateSystem3D, Vector,
};

/// SOP class UID of RT-DOSE instances.
pub const RT_DOSE_SOP_CLASS_UID: &str = "1.2.840.10008.5.1.4.1.1.481.2";

/// Value used for the thickness of a slice that does not declare one.
pub const DEFAULT_SLICE_THICKNESS: f64 = 100.0 * f64::EPSILON;

/// How the pixels of a slice are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceKind {
    /// Frame that Orthanc can decode to PNG/PAM/JPEG.
    DecodableFrame,
    /// Frame that must be downloaded as raw samples (RT-DOSE).
    RawFrame,
    /// Slice computed from a volume, not backed by an Orthanc instance.
    Standalone,
}

/// One 2D image plane with its placement in patient space.
///
/// Immutable once built; `Clone` produces the copies kept by caches.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    kind: SliceKind,
    instance_id: String,
    sop_class_uid: String,
    frame: u32,
    frame_count: u32,
    geometry: CoordinateSystem3D,
    pixel_spacing_x: f64,
    pixel_spacing_y: f64,
    thickness: f64,
    width: u32,
    height: u32,
    converter: DicomFrameConverter,
}

impl Slice {
    /// Build a standalone slice (e.g. a reslice of a volume).
    pub fn new(
        geometry: CoordinateSystem3D,
        pixel_spacing_x: f64,
        pixel_spacing_y: f64,
        thickness: f64,
        width: u32,
        height: u32,
        converter: DicomFrameConverter,
    ) -> Self {
        Self {
            kind: SliceKind::Standalone,
            instance_id: String::new(),
            sop_class_uid: String::new(),
            frame: 0,
            frame_count: 1,
            geometry,
            pixel_spacing_x,
            pixel_spacing_y,
            thickness,
            width,
            height,
            converter,
        }
    }

    /// Parse the geometry of one frame from the tags of an Orthanc instance.
    ///
    /// # Arguments
    /// * `dataset` - Tags of the instance
    /// * `instance_id` - Orthanc identifier of the instance
    /// * `frame` - Frame index, must be below `NumberOfFrames`
    pub fn parse_orthanc_frame(
        dataset: &DicomDataset<'_>,
        instance_id: &str,
        frame: u32,
    ) -> Result<Self, SliceError> {
        let sop_class_uid = dataset
            .non_empty_string(tags::SOP_CLASS_UID)
            .ok_or(SliceError::MissingTag(tags::SOP_CLASS_UID.name()))?
            .to_string();

        let frame_count = dataset.parse_u32(tags::NUMBER_OF_FRAMES)?.unwrap_or(1);
        if frame >= frame_count {
            return Err(SliceError::FrameOutOfRange {
                frame,
                count: frame_count,
            });
        }

        let width = dataset
            .parse_u32(tags::COLUMNS)?
            .ok_or(SliceError::MissingTag(tags::COLUMNS.name()))?;
        let height = dataset
            .parse_u32(tags::ROWS)?
            .ok_or(SliceError::MissingTag(tags::ROWS.name()))?;

        let thickness = dataset
            .parse_f64(tags::SLICE_THICKNESS)?
            .unwrap_or(DEFAULT_SLICE_THICKNESS);

        let converter = DicomFrameConverter::read_parameters(dataset)?;
        let (pixel_spacing_x, pixel_spacing_y) = pixel_spacing(dataset)?;

        let mut slice = Self {
            kind: SliceKind::DecodableFrame,
            instance_id: instance_id.to_string(),
            sop_class_uid,
            frame,
            frame_count,
            geometry: CoordinateSystem3D::canonical(),
            pixel_spacing_x,
            pixel_spacing_y,
            thickness,
            width,
            height,
            converter,
        };

        if let (Some(position), Some(orientation)) = (
            dataset.string(tags::IMAGE_POSITION_PATIENT),
            dataset.string(tags::IMAGE_ORIENTATION_PATIENT),
        ) {
            slice.geometry = CoordinateSystem3D::from_dicom(position, orientation)?;

            if slice.sop_class_uid == RT_DOSE_SOP_CLASS_UID {
                slice.kind = SliceKind::RawFrame;
                if let Err(e) = slice.compute_rt_dose_geometry(dataset) {
                    error!(
                        "Cannot deduce the 3D location of frame {} in instance {}: {}",
                        frame, instance_id, e
                    );
                    return Err(e);
                }
            }
        }

        Ok(slice)
    }

    /// Frames of an RT-DOSE are stacked along the normal, at the offsets of
    /// `GridFrameOffsetVector` relative to the first frame.
    fn compute_rt_dose_geometry(&mut self, dataset: &DicomDataset<'_>) -> Result<(), SliceError> {
        let increment = dataset
            .string(tags::FRAME_INCREMENT_POINTER)
            .map(str::to_uppercase)
            .ok_or_else(|| SliceError::RtDose("missing FrameIncrementPointer".into()))?;
        if increment != "3004,000C" {
            return Err(SliceError::RtDose(format!(
                "unsupported FrameIncrementPointer {}",
                increment
            )));
        }

        let offsets = dataset
            .parse_vector(tags::GRID_FRAME_OFFSET_VECTOR)?
            .filter(|offsets| !offsets.is_empty())
            .ok_or_else(|| SliceError::RtDose("missing GridFrameOffsetVector".into()))?;

        if self.frame_count <= 1
            || offsets.len() != self.frame_count as usize
            || self.frame >= self.frame_count
        {
            return Err(SliceError::RtDose(format!(
                "{} offset(s) for {} frame(s)",
                offsets.len(),
                self.frame_count
            )));
        }

        if !is_close_to_zero(offsets[0]) {
            return Err(SliceError::RtDose(
                "GridFrameOffsetVector must start at zero".into(),
            ));
        }

        let z = offsets[self.frame as usize];
        let origin = *self.geometry.origin() + z * *self.geometry.normal();
        self.geometry = self.geometry.with_origin(origin);
        self.thickness = (offsets[1] - offsets[0]).abs();
        Ok(())
    }

    pub fn kind(&self) -> SliceKind {
        self.kind
    }

    /// Orthanc identifier of the instance (empty for standalone slices).
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn sop_class_uid(&self) -> &str {
        &self.sop_class_uid
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Number of frames of the instance this slice belongs to.
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn geometry(&self) -> &CoordinateSystem3D {
        &self.geometry
    }

    pub fn pixel_spacing_x(&self) -> f64 {
        self.pixel_spacing_x
    }

    pub fn pixel_spacing_y(&self) -> f64 {
        self.pixel_spacing_y
    }

    pub fn thickness(&self) -> f64 {
        self.thickness
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn converter(&self) -> &DicomFrameConverter {
        &self.converter
    }

    /// Cache key `instance:frame`.
    pub fn key(&self) -> String {
        frame_key(&self.instance_id, self.frame)
    }

    /// Whether `plane` cuts through this slice: same orientation (up to
    /// sign) and closer than half the thickness along the normal.
    pub fn contains_plane(&self, plane: &CoordinateSystem3D) -> bool {
        is_parallel_or_opposite(self.geometry.normal(), plane.normal()).is_some()
            && is_near_with(
                self.geometry.project_along_normal(self.geometry.origin()),
                self.geometry.project_along_normal(plane.origin()),
                self.thickness / 2.0,
            )
    }

    /// World coordinates of the four corners of the pixel grid.
    pub fn extent(&self) -> [Vector; 4] {
        let sx = self.pixel_spacing_x;
        let sy = self.pixel_spacing_y;
        let w = f64::from(self.width);
        let h = f64::from(self.height);

        [
            self.geometry.map_slice_to_world(-0.5 * sx, -0.5 * sy),
            self.geometry.map_slice_to_world((w - 0.5) * sx, -0.5 * sy),
            self.geometry.map_slice_to_world(-0.5 * sx, (h - 0.5) * sy),
            self.geometry.map_slice_to_world((w - 0.5) * sx, (h - 0.5) * sy),
        ]
    }
}

/// Cache key of a frame: `instance:frame`.
pub fn frame_key(instance_id: &str, frame: u32) -> String {
    format!("{}:{}", instance_id, frame)
}

/// `PixelSpacing` is `row spacing \ column spacing`; defaults to 1 mm.
fn pixel_spacing(dataset: &DicomDataset<'_>) -> Result<(f64, f64), SliceError> {
    match dataset.parse_vector(tags::PIXEL_SPACING)?.as_deref() {
        Some([row, column]) if *row > 0.0 && *column > 0.0 => Ok((*column, *row)),
        Some([both]) if *both > 0.0 => Ok((*both, *both)),
        Some(_) => Err(SliceError::InvalidTag {
            tag: tags::PIXEL_SPACING.name(),
            value: dataset
                .string(tags::PIXEL_SPACING)
                .unwrap_or_default()
                .to_string(),
        }),
        None => Ok((1.0, 1.0)),
    }
}
