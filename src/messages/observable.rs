//! Message emitters.
//!
//! An [`Observable`] owns the callables registered on it, indexed by message
//! type. Dispatch walks a snapshot of the callables registered for the type,
//! so a callback may register new callables (or drop observers) without
//! invalidating the iteration; callables added during a dispatch only see
//! later messages. Callables of dead observers are skipped by dispatch and
//! released on the next registration.
//!
//! ```text
//!   Observable
//!   ├── SliceGeometryReadyMessage -> [volume.on_geometry_ready, slicer.on_geometry_ready]
//!   ├── SliceImageReadyMessage    -> [volume.on_image_ready]
//!   └── forwarders                -> [ObserverId, ...]   (unregistered on drop)
//! ```

use std::any::type_name;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use super::broker::{MessageBroker, ObservableId, ObserverId};
use super::callable::{Callable, Message, MessageIdentifier};

type CallableList = Vec<Arc<dyn Callable>>;

/// Emitter side of the publish/subscribe pair.
pub struct Observable {
    broker: MessageBroker,
    id: ObservableId,
    callables: Mutex<HashMap<MessageIdentifier, CallableList>>,
    forwarders: Mutex<Vec<ObserverId>>,
}

impl Observable {
    /// Create an emitter with no subscriber.
    pub fn new(broker: &MessageBroker) -> Self {
        Self {
            broker: broker.clone(),
            id: broker.next_observable_id(),
            callables: Mutex::new(HashMap::new()),
            forwarders: Mutex::new(Vec::new()),
        }
    }

    /// Identity of this emitter, stamped on the messages it emits.
    pub fn id(&self) -> ObservableId {
        self.id
    }

    /// The broker this emitter dispatches through.
    pub fn broker(&self) -> &MessageBroker {
        &self.broker
    }

    /// Take ownership of `callable` and index it under its message type.
    ///
    /// Registration order is preserved within a message type. Callables of
    /// observers that are gone are released here, so an emitter outliving
    /// many short-lived observers does not accumulate them.
    pub fn register_observer_callback(&self, callable: Box<dyn Callable>) {
        let identifier = callable.message_identifier();
        trace!(
            "{} registers {} for {:?}",
            self.id,
            callable.observer(),
            identifier
        );

        // Released once the lock is dropped: a callable may own the last
        // reference to an object that emits through this observable
        let pruned = {
            let mut callables = lock(&self.callables);
            let pruned = self.prune(&mut callables);
            callables
                .entry(identifier)
                .or_default()
                .push(Arc::from(callable));
            pruned
        };
        if !pruned.is_empty() {
            trace!("{} released {} dead callable(s)", self.id, pruned.len());
        }
    }

    /// Deliver `message` to every live observer registered for its type.
    ///
    /// All callables are invoked before this returns.
    pub fn broadcast_message<M: Message>(&self, message: &M) {
        for callable in self.snapshot::<M>() {
            if self.broker.is_active(callable.observer()) {
                callable.apply(message);
            }
        }
    }

    /// Deliver `message` only to the callables bound to `target`.
    pub fn emit_message<M: Message>(&self, target: ObserverId, message: &M) {
        if !self.broker.is_active(target) {
            trace!("{} not delivered: {} is gone", type_name::<M>(), target);
            return;
        }

        for callable in self.snapshot::<M>() {
            if callable.observer() == target {
                callable.apply(message);
            }
        }
    }

    /// Track a forwarder so it is unregistered when this emitter is dropped.
    pub fn register_forwarder(&self, forwarder: ObserverId) {
        lock(&self.forwarders).push(forwarder);
    }

    /// Number of callables registered for message type `M`, including those
    /// of dead observers not yet released.
    pub fn callable_count<M: Message>(&self) -> usize {
        lock(&self.callables)
            .get(&MessageIdentifier::of::<M>())
            .map_or(0, Vec::len)
    }

    /// Whether at least one live observer listens to `M`.
    pub fn has_observers<M: Message>(&self) -> bool {
        self.snapshot::<M>()
            .iter()
            .any(|callable| self.broker.is_active(callable.observer()))
    }

    fn prune(&self, callables: &mut HashMap<MessageIdentifier, CallableList>) -> CallableList {
        let mut pruned = Vec::new();
        for list in callables.values_mut() {
            let (live, dead): (CallableList, CallableList) = std::mem::take(list)
                .into_iter()
                .partition(|callable| self.broker.is_active(callable.observer()));
            *list = live;
            pruned.extend(dead);
        }
        callables.retain(|_, list| !list.is_empty());
        pruned
    }

        fn snapshot<M: Message>(&self) -> CallableList {
        lock(&self.callables)
            .get(&MessageIdentifier::of::<M>())
            .cloned()
            .unwrap_or_default()
    }
}

impl Drop for Observable {
    fn drop(&mut self) {
        let callables = std::mem::take(
            self.callables
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        drop(callables);

        let forwarders = std::mem::take(
            self.forwarders
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for forwarder in forwarders {
            self.broker.unregister(forwarder);
        }
    }
}

/// Access to the emitter embedded in a component.
pub trait AsObservable {
    /// The component's emitter.
    fn observable(&self) -> &Observable;
}

impl AsObservable for Observable {
    fn observable(&self) -> &Observable {
        self
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
