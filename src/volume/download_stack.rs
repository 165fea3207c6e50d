use crate::error::StoneError;

#[derive(Debug, Clone, Copy)]
struct Node {
    prev: Option<usize>,
    next: Option<usize>,
    dequeued: bool,
}

/// Work list of slice indices, popped in order unless reprioritized.
///
/// A doubly linked list threaded through a vector, so that moving any
/// pending index to the top is O(1):
///
/// ```text
///   first ─> [3] <─> [0] <─> [1] <─> [2] ─> None      (after set_top_node(3))
/// ```
#[derive(Debug, Clone)]
pub struct DownloadStack {
    nodes: Vec<Node>,
    first: Option<usize>,
}

impl DownloadStack {
    /// A stack holding `0..size`, with `0` on top.
    pub fn new(size: usize) -> Self {
        let nodes = (0..size)
            .map(|i| Node {
                prev: i.checked_sub(1),
                next: (i + 1 < size).then_some(i + 1),
                dequeued: false,
            })
            .collect();

        Self {
            nodes,
            first: (size > 0).then_some(0),
        }
    }

    /// Number of indices the stack was created with.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    /// Remove and return the top index.
    pub fn pop(&mut self) -> Option<usize> {
        let value = self.first?;
        let node = &mut self.nodes[value];
        node.dequeued = true;
        self.first = node.next;

        if let Some(next) = self.first {
            self.nodes[next].prev = None;
        }
        Some(value)
    }

    /// Move `value` to the top. Indices already popped are left alone.
    pub fn set_top_node(&mut self, value: usize) -> Result<(), StoneError> {
        if value >= self.nodes.len() {
            return Err(StoneError::ParameterOutOfRange {
                index: value,
                size: self.nodes.len(),
            });
        }
        self.move_to_top(value);
        Ok(())
    }

    /// Like [`DownloadStack::set_top_node`], silently ignoring invalid
    /// indices (e.g. computed from a viewport outside of the volume).
    pub fn set_top_node_permissive(&mut self, value: i64) {
        if let Ok(value) = usize::try_from(value) {
            if value < self.nodes.len() {
                self.move_to_top(value);
            }
        }
    }

    fn move_to_top(&mut self, value: usize) {
        let node = self.nodes[value];
        if node.dequeued {
            return;
        }

        let Some(prev) = node.prev else {
            // Already on top
            return;
        };

        // Unlink
        self.nodes[prev].next = node.next;
        if let Some(next) = node.next {
            self.nodes[next].prev = Some(prev);
        }

        // Relink on top; `first` is set since `value` has a predecessor
        if let Some(first) = self.first {
            self.nodes[first].prev = Some(value);
        }
        self.nodes[value].prev = None;
        self.nodes[value].next = self.first;
        self.first = Some(value);
    }
}
