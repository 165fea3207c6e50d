//! 3D geometry of DICOM planes.

mod coordinate_system;
mod toolbox;

pub use coordinate_system::CoordinateSystem3D;
pub use toolbox::{
    is_close_to_zero, is_near, is_near_with, is_parallel, is_parallel_or_opposite, parse_vector,
    parse_vector3, Vector, DEFAULT_NEAR_THRESHOLD,
};
