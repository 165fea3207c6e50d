//! Floating-point helpers for DICOM geometry.
//!
//! DICOM stores positions and orientations as decimal strings that are
//! usually produced from single-precision values, so comparisons use a
//! tolerance derived from the `f32` machine epsilon.

use nalgebra::Vector3;

use crate::error::GeometryError;

/// 3D vector in patient coordinates (millimeters).
pub type Vector = Vector3<f64>;

/// Default tolerance of [`is_near`]: ten times the `f32` epsilon.
pub const DEFAULT_NEAR_THRESHOLD: f64 = 10.0 * f32::EPSILON as f64;

/// `|x - y| < threshold`
#[inline]
pub fn is_near_with(x: f64, y: f64, threshold: f64) -> bool {
    (x - y).abs() < threshold
}

/// `|x - y| < 10 * f32::EPSILON`
#[inline]
pub fn is_near(x: f64, y: f64) -> bool {
    is_near_with(x, y, DEFAULT_NEAR_THRESHOLD)
}

#[inline]
pub fn is_close_to_zero(x: f64) -> bool {
    is_near(x, 0.0)
}

/// Compare the directions of two vectors.
///
/// Returns `Some(false)` if they point in the same direction, `Some(true)` if
/// they point in opposite directions, and `None` if they are not collinear
/// (or one of them is null).
pub fn is_parallel_or_opposite(u: &Vector, v: &Vector) -> Option<bool> {
    let norm_u = u.norm();
    let norm_v = v.norm();

    if is_close_to_zero(norm_u) || is_close_to_zero(norm_v) {
        return None;
    }

    // cos(angle) must be 1 (parallel) or -1 (opposite)
    let cos_angle = u.dot(v) / (norm_u * norm_v);

    if is_close_to_zero(cos_angle - 1.0) {
        Some(false)
    } else if is_close_to_zero(cos_angle.abs() - 1.0) {
        Some(true)
    } else {
        None
    }
}

/// Same direction, opposite directions excluded.
pub fn is_parallel(u: &Vector, v: &Vector) -> bool {
    is_parallel_or_opposite(u, v) == Some(false)
}

/// Parse a backslash-separated list of decimals (`"1\\0\\0"`).
///
/// Surrounding spaces are ignored; an empty string yields an empty list.
pub fn parse_vector(value: &str) -> Result<Vec<f64>, GeometryError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(Vec::new());
    }

    value
        .split('\\')
        .map(|item| {
            item.trim()
                .parse::<f64>()
                .map_err(|_| GeometryError::InvalidVector(value.to_string()))
        })
        .collect()
}

/// Parse exactly three backslash-separated decimals.
pub fn parse_vector3(value: &str) -> Result<Vector, GeometryError> {
    match parse_vector(value)?.as_slice() {
        [x, y, z] => Ok(Vector::new(*x, *y, *z)),
        _ => Err(GeometryError::InvalidVector(value.to_string())),
    }
}
