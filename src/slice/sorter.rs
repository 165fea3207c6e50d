use super::slice::Slice;
use crate::error::{GeometryError, StoneError};
use crate::geometry::{is_parallel, CoordinateSystem3D, Vector};

/// Number of distinct normals tracked by [`SlicesSorter::select_normal`].
const MAX_NORMAL_CANDIDATES: usize = 2;

struct SliceWithDepth {
    slice: Slice,
    depth: f64,
}

/// Orders the slices of a series along their common normal.
///
/// ```text
///   add_slice* ──> select_normal ──> filter_normal ──> set_normal ──> sort
/// ```
#[derive(Default)]
pub struct SlicesSorter {
    slices: Vec<SliceWithDepth>,
    has_normal: bool,
}

impl SlicesSorter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_slice(&mut self, slice: Slice) {
        self.slices.push(SliceWithDepth { slice, depth: 0.0 });
    }

    pub fn slice_count(&self) -> usize {
        self.slices.len()
    }

    pub fn slice(&self, index: usize) -> Result<&Slice, StoneError> {
        self.slices
            .get(index)
            .map(|s| &s.slice)
            .ok_or(StoneError::ParameterOutOfRange {
                index,
                size: self.slices.len(),
            })
    }

    pub fn slices(&self) -> impl Iterator<Item = &Slice> {
        self.slices.iter().map(|s| &s.slice)
    }

    /// Find the normal shared by the series.
    ///
    /// A normal is accepted if all slices, or all slices but one, share it.
    /// The exception allows a series to embed a single out-of-plane frame,
    /// such as a generated preview.
    pub fn select_normal(&self) -> Option<Vector> {
        let mut candidates: Vec<(Vector, usize)> = Vec::new();

        for slice in self.slices() {
            let normal = slice.geometry().normal();
            let len = candidates.len();
            match candidates.iter_mut().find(|(c, _)| is_parallel(normal, c)) {
                Some((_, count)) => *count += 1,
                None if len < MAX_NORMAL_CANDIDATES => {
                    candidates.push((*normal, 1));
                }
                None => {}
            }
        }

        let n = self.slice_count();
        candidates
            .into_iter()
            .find(|(_, count)| *count == n || *count + 1 == n)
            .map(|(normal, _)| normal)
    }

    /// Drop the slices whose normal is not parallel to `normal`.
    pub fn filter_normal(&mut self, normal: &Vector) {
        self.slices
            .retain(|s| is_parallel(normal, s.slice.geometry().normal()));
    }

    /// Compute the depth of every slice along `normal`.
    pub fn set_normal(&mut self, normal: &Vector) {
        for s in &mut self.slices {
            s.depth = s.slice.geometry().origin().dot(normal);
        }
        self.has_normal = true;
    }

    /// Sort by increasing depth. Requires [`SlicesSorter::set_normal`].
    pub fn sort(&mut self) -> Result<(), StoneError> {
        if !self.has_normal {
            return Err(StoneError::Geometry(GeometryError::NormalNotSet));
        }
        self.slices.sort_by(|a, b| a.depth.total_cmp(&b.depth));
        Ok(())
    }

    /// Index of the first slice containing `plane`.
    pub fn lookup_slice(&self, plane: &CoordinateSystem3D) -> Option<usize> {
        // TODO: binary search on depth once sorting is tracked
        self.slices
            .iter()
            .position(|s| s.slice.contains_plane(plane))
    }

    /// Consume the sorter, keeping the current order.
    pub fn into_slices(self) -> Vec<Slice> {
        self.slices.into_iter().map(|s| s.slice).collect()
    }
}
