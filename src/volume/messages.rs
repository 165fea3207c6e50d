use crate::messages::{Message, ObservableId};
use crate::slice::Slice;

/// The voxel buffer is allocated; pixels are streamed in the background.
#[derive(Debug, Clone)]
pub struct VolumeGeometryReadyMessage {
    pub origin: ObservableId,
}

impl Message for VolumeGeometryReadyMessage {}

/// The slices do not form a consistent volume. Terminal.
#[derive(Debug, Clone)]
pub struct VolumeGeometryErrorMessage {
    pub origin: ObservableId,
}

impl Message for VolumeGeometryErrorMessage {}

/// Axial slice `slice_index` was written into the voxel buffer.
#[derive(Debug, Clone)]
pub struct SliceContentChangedMessage {
    pub origin: ObservableId,
    pub slice_index: usize,
    pub slice: Slice,
}

impl Message for SliceContentChangedMessage {}

/// Every slice was downloaded.
#[derive(Debug, Clone)]
pub struct VolumeReadyMessage {
    pub origin: ObservableId,
}

impl Message for VolumeReadyMessage {}

/// Every download has completed, but some slices could not be loaded. Their
/// voxels are left at zero.
#[derive(Debug, Clone)]
pub struct VolumeDegradedMessage {
    pub origin: ObservableId,
    pub failed_slices: Vec<usize>,
}

impl Message for VolumeDegradedMessage {}
