use std::sync::Arc;

use super::SliceImageQuality;
use crate::messages::{Message, ObservableId};
use crate::slice::{Slice, SliceImage};

/// The loader has sorted the slices of its series, instance or frame.
#[derive(Debug, Clone)]
pub struct SliceGeometryReadyMessage {
    pub origin: ObservableId,
}

impl Message for SliceGeometryReadyMessage {}

/// The geometry could not be fetched, parsed or reconciled.
#[derive(Debug, Clone)]
pub struct SliceGeometryErrorMessage {
    pub origin: ObservableId,
}

impl Message for SliceGeometryErrorMessage {}

/// The pixels of one slice were downloaded and decoded.
#[derive(Debug, Clone)]
pub struct SliceImageReadyMessage {
    pub origin: ObservableId,
    pub slice_index: usize,
    pub slice: Slice,
    pub image: Arc<SliceImage>,
    /// Encoding actually used, which may differ from the requested one.
    pub quality: SliceImageQuality,
}

impl Message for SliceImageReadyMessage {}

/// The pixels of one slice could not be downloaded or decoded.
#[derive(Debug, Clone)]
pub struct SliceImageErrorMessage {
    pub origin: ObservableId,
    pub slice_index: usize,
    pub slice: Slice,
    pub quality: SliceImageQuality,
}

impl Message for SliceImageErrorMessage {}
