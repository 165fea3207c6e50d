//! Registry of live observers.
//!
//! Every observer owns a slot in the broker for its whole lifetime. A slot is
//! identified by its index plus a generation counter, so that a stale
//! [`ObserverId`] is never mistaken for the object that later reuses the same
//! slot:
//!
//! ```text
//!   register()  -> ObserverId { slot: 3, generation: 0 }   alive
//!   unregister(ObserverId { slot: 3, generation: 0 })      dead, slot freed
//!   register()  -> ObserverId { slot: 3, generation: 1 }   alive
//!   is_active(ObserverId { slot: 3, generation: 0 })  == false
//! ```
//!
//! The broker is an explicit context: clone it into every component of the
//! same session. Clones share the same registry.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

// =============================================================================
// Identities
// =============================================================================

/// Stable identity of an observer, valid until the observer is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId {
    slot: u32,
    generation: u32,
}

impl ObserverId {
    /// Slot index inside the broker registry.
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// Generation of the slot at registration time.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}.{}", self.slot, self.generation)
    }
}

/// Identity of an emitter, carried by messages to name their origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObservableId(u64);

impl fmt::Display for ObservableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observable#{}", self.0)
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    alive: bool,
}

#[derive(Debug, Default)]
struct Registry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    active: usize,
}

#[derive(Debug, Default)]
struct Inner {
    registry: Mutex<Registry>,
    next_observable: AtomicU64,
}

/// Tracks which observers are currently alive.
///
/// Dispatch code consults [`MessageBroker::is_active`] before invoking a
/// callback, so that a message never reaches an observer that has been
/// dropped.
#[derive(Debug, Clone, Default)]
pub struct MessageBroker {
    inner: Arc<Inner>,
}

impl MessageBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh observer identity and mark it alive.
    pub fn register(&self) -> ObserverId {
        let mut registry = self.registry();

        let id = match registry.free.pop() {
            Some(slot) => {
                let entry = &mut registry.slots[slot as usize];
                entry.alive = true;
                ObserverId {
                    slot,
                    generation: entry.generation,
                }
            }
            None => {
                let slot = registry.slots.len() as u32;
                registry.slots.push(Slot {
                    generation: 0,
                    alive: true,
                });
                ObserverId {
                    slot,
                    generation: 0,
                }
            }
        };

        registry.active += 1;
        trace!("registered {}", id);
        id
    }

    /// Mark an observer as dead.
    ///
    /// Unregistering an unknown or already dead identity is a no-op. This is
    /// called from `Drop` implementations and never panics, even if another
    /// thread poisoned the registry lock.
    pub fn unregister(&self, id: ObserverId) {
        let mut registry = self.registry();

        let Some(entry) = registry.slots.get_mut(id.slot as usize) else {
            return;
        };

        if !entry.alive || entry.generation != id.generation {
            return;
        }

        entry.alive = false;
        entry.generation = entry.generation.wrapping_add(1);
        registry.free.push(id.slot);
        registry.active -= 1;
        trace!("unregistered {}", id);
    }

    /// Check whether an observer is still alive. O(1).
    pub fn is_active(&self, id: ObserverId) -> bool {
        let registry = self.registry();
        registry
            .slots
            .get(id.slot as usize)
            .is_some_and(|entry| entry.alive && entry.generation == id.generation)
    }

    /// Number of observers currently alive.
    pub fn active_count(&self) -> usize {
        self.registry().active
    }

    /// Allocate an identity for a new emitter.
    pub fn next_observable_id(&self) -> ObservableId {
        ObservableId(self.inner.next_observable.fetch_add(1, Ordering::Relaxed))
    }

    /// Whether two handles share the same registry.
    pub fn same_broker(&self, other: &MessageBroker) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
