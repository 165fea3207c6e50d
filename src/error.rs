use thiserror::Error;

use crate::slice::PixelFormat;

/// Errors returned by the web layer when fetching from Orthanc
#[derive(Debug, Clone, Error)]
pub enum WebError {
    /// Server answered with a non-success status code
    #[error("HTTP status {status} for {uri}")]
    Status { uri: String, status: u16 },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The body could not be interpreted (e.g. invalid JSON)
    #[error("Invalid response body from {uri}: {message}")]
    InvalidBody { uri: String, message: String },

    /// The base URL or a relative URI could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Errors raised while building or validating 3D geometry
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeometryError {
    /// A DICOM axis is not a unit vector
    #[error("Axis is not a unit vector (norm = {norm})")]
    NonUnitAxis { norm: f64 },

    /// The two in-plane axes are not orthogonal
    #[error("In-plane axes are not orthogonal (dot product = {dot})")]
    NonOrthogonalAxes { dot: f64 },

    /// A backslash-separated vector could not be parsed
    #[error("Invalid vector syntax: {0:?}")]
    InvalidVector(String),

    /// No slices to reconcile
    #[error("The series contains no slice")]
    Empty,

    /// The slices do not share a common normal
    #[error("Unable to select a common normal for {count} slice(s)")]
    NoCommonNormal { count: usize },

    /// Sorting was requested before a normal was chosen
    #[error("Cannot sort slices before a normal is set")]
    NormalNotSet,

    /// A slice is not parallel to the first slice
    #[error("Slice {index} is not parallel to the others")]
    NotParallel { index: usize },

    /// A slice has a different pixel format than the first slice
    #[error("Pixel format changes at slice {index}: expected {expected:?}, got {actual:?}")]
    PixelFormatMismatch {
        index: usize,
        expected: PixelFormat,
        actual: PixelFormat,
    },

    /// A slice has different dimensions than the first slice
    #[error("Slice {index} is {actual_width}x{actual_height}, expected {width}x{height}")]
    DimensionsMismatch {
        index: usize,
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// A slice has a different pixel spacing than the first slice
    #[error("Pixel spacing changes at slice {index}")]
    PixelSpacingMismatch { index: usize },

    /// The distance between two successive slices is not constant
    #[error("Spacing between slices {index} and {next} is {actual} mm, expected {expected} mm")]
    NonUniformSpacing {
        index: usize,
        next: usize,
        expected: f64,
        actual: f64,
    },

    /// Slices are not sorted along the normal (thickness must be positive)
    #[error("Computed slice thickness is not positive: {0}")]
    NonPositiveThickness(f64),

    /// Voxel dimensions must be strictly positive
    #[error("Invalid voxel dimensions: {x} x {y} x {z}")]
    InvalidVoxelDimensions { x: f64, y: f64, z: f64 },
}

/// Errors raised while parsing the DICOM tags of a frame
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SliceError {
    /// The tags of the instance are not a JSON object
    #[error("Instance tags are not a JSON object")]
    InvalidDataset,

    /// Required tag is missing or empty
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has a value that cannot be parsed
    #[error("Invalid value for tag {tag}: {value:?}")]
    InvalidTag { tag: &'static str, value: String },

    /// The requested frame does not exist in the instance
    #[error("Frame {frame} out of range (instance has {count} frame(s))")]
    FrameOutOfRange { frame: u32, count: u32 },

    /// The RT-DOSE grid geometry cannot be deduced
    #[error("Cannot deduce the 3D location of RT-DOSE frame: {0}")]
    RtDose(String),

    /// Bits stored value not handled for RT-DOSE
    #[error("Unsupported bits stored for RT-DOSE: {0}")]
    UnsupportedBitsStored(u32),

    /// Invalid geometry tags
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),
}

/// Errors raised while decoding slice pixel data
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The image codec rejected the payload
    #[error("Image codec error: {0}")]
    Codec(String),

    /// The decoded image does not have the size of the slice
    #[error("Decoded image is {actual_width}x{actual_height}, slice is {width}x{height}")]
    SizeMismatch {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// The decoded image cannot be used for the expected pixel format
    #[error("Decoded {actual:?} pixels cannot populate a {expected:?} slice")]
    FormatMismatch {
        expected: PixelFormat,
        actual: PixelFormat,
    },

    /// The web viewer JSON answer is malformed
    #[error("Invalid web viewer answer: {0}")]
    InvalidWebViewerAnswer(String),

    /// The stretch range cannot be represented on 16 bits
    #[error("Stretch range [{low}, {high}] cannot be represented on 16 bits")]
    UnrepresentableStretch { low: i64, high: i64 },

    /// Raw frame has an unexpected number of bytes
    #[error("Raw frame has {actual} bytes, expected {expected}")]
    RawLength { expected: usize, actual: usize },
}

/// Framework-level errors
///
/// These correspond to misuse of the loaders, promises and widgets, plus
/// wrapped lower-level failures.
#[derive(Debug, Clone, Error)]
pub enum StoneError {
    /// Operation invoked in a state where it is not allowed
    #[error("Bad sequence of calls: {0}")]
    BadSequenceOfCalls(&'static str),

    /// Index outside of the valid range
    #[error("Parameter out of range: index {index}, size {size}")]
    ParameterOutOfRange { index: usize, size: usize },

    /// A widget layer was inserted past the end of the layer list
    #[error("Can only add one layer at a time: index {index}, layer count {count}")]
    CanOnlyAddOneLayerAtATime { index: usize, count: usize },

    /// `then`/`otherwise` called twice on the same promise
    #[error("Promise already has a {0} continuation")]
    PromiseAlreadyConfigured(&'static str),

    /// `success`/`failure` called on a promise without the continuation
    #[error("Promise has no {0} continuation")]
    PromiseNotConfigured(&'static str),

    /// `success`/`failure` called on a promise that is already settled
    #[error("Promise is already settled")]
    PromiseAlreadySettled,

    /// Pixel format not handled by the requested operation
    #[error("Incompatible image format: {0:?}")]
    IncompatibleImageFormat(PixelFormat),

    /// Geometry error
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    /// DICOM tag error
    #[error("Slice error: {0}")]
    Slice(#[from] SliceError),

    /// Decoding error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// HTTP error
    #[error("Web error: {0}")]
    Web(#[from] WebError),
}
