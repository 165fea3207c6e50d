//! Typed bindings between an observer method and a message type.
//!
//! A callable is owned by the emitter side. It only holds a `Weak` reference
//! to its observer, plus the observer's broker identity, so that:
//!
//! - the emitter can test liveness with the broker before dispatching
//! - a dispatch racing with the observer's destruction degrades to a no-op

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use tracing::{error, trace};

use super::broker::ObserverId;
use super::observer::Observer;

// =============================================================================
// Message Types
// =============================================================================

/// Marker for types that can travel through an observable.
pub trait Message: Any + Send + Sync {}

/// Dispatch tag of a message type.
///
/// Derived from the Rust type itself, so two distinct message types can never
/// share a tag.
#[derive(Clone, Copy)]
pub struct MessageIdentifier {
    type_id: TypeId,
    name: &'static str,
}

impl MessageIdentifier {
    /// The tag of message type `M`.
    pub fn of<M: Message>() -> Self {
        Self {
            type_id: TypeId::of::<M>(),
            name: type_name::<M>(),
        }
    }

    /// Type name, for logging.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for MessageIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for MessageIdentifier {}

impl Hash for MessageIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for MessageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// =============================================================================
// Callable Traits
// =============================================================================

/// Type-erased callable stored by an [`Observable`](super::Observable).
pub trait Callable: Send + Sync {
    /// Deliver a message. `message` must be of the type named by
    /// [`Callable::message_identifier`].
    fn apply(&self, message: &dyn Any);

    /// Tag of the message type this callable accepts.
    fn message_identifier(&self) -> MessageIdentifier;

    /// Identity of the bound observer, used for liveness checks.
    fn observer(&self) -> ObserverId;
}

/// Statically typed callable, used for point-to-point continuations
/// (HTTP completions, promises) where no runtime tag lookup is needed.
pub trait MessageHandler<M: Message>: Callable {
    /// Deliver a message of the bound type.
    fn handle(&self, message: &M);
}

// =============================================================================
// Observer Callable
// =============================================================================

type BoundFunction<O, M> = Box<dyn Fn(&O, &M) + Send + Sync>;

/// Binds a method (or closure) of observer `O` to message type `M`.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use orthanc_stone::messages::{
///     Message, MessageBroker, Observable, Observer, ObserverCallable, ObserverHandle,
/// };
///
/// struct Ping;
/// impl Message for Ping {}
///
/// struct Counter {
///     handle: ObserverHandle,
/// }
///
/// impl Observer for Counter {
///     fn observer_handle(&self) -> &ObserverHandle {
///         &self.handle
///     }
/// }
///
/// impl Counter {
///     fn on_ping(&self, _: &Ping) {}
/// }
///
/// let broker = MessageBroker::new();
/// let counter = Arc::new(Counter { handle: ObserverHandle::new(&broker) });
/// let observable = Observable::new(&broker);
/// observable.register_observer_callback(Box::new(ObserverCallable::new(&counter, Counter::on_ping)));
/// observable.broadcast_message(&Ping);
/// ```
pub struct ObserverCallable<O, M> {
    observer: Weak<O>,
    observer_id: ObserverId,
    function: BoundFunction<O, M>,
}

impl<O: Observer, M: Message> ObserverCallable<O, M> {
    /// Bind `function` to a live observer.
    pub fn new<F>(observer: &Arc<O>, function: F) -> Self
    where
        F: Fn(&O, &M) + Send + Sync + 'static,
    {
        Self {
            observer: Arc::downgrade(observer),
            observer_id: observer.observer_id(),
            function: Box::new(function),
        }
    }

    /// Bind `function` to an observer that is still under construction
    /// (e.g. inside `Arc::new_cyclic`).
    pub fn from_weak<F>(observer: Weak<O>, observer_id: ObserverId, function: F) -> Self
    where
        F: Fn(&O, &M) + Send + Sync + 'static,
    {
        Self {
            observer,
            observer_id,
            function: Box::new(function),
        }
    }

    fn invoke(&self, message: &M) {
        match self.observer.upgrade() {
            Some(observer) => (self.function)(&observer, message),
            None => trace!(
                "dropping {} for destroyed {}",
                type_name::<M>(),
                self.observer_id
            ),
        }
    }
}

impl<O: Observer, M: Message> Callable for ObserverCallable<O, M> {
    fn apply(&self, message: &dyn Any) {
        match message.downcast_ref::<M>() {
            Some(message) => self.invoke(message),
            None => {
                if cfg!(debug_assertions) {
                    panic!("callable for {} received another message type", type_name::<M>());
                }
                error!(
                    "callable for {} received another message type",
                    type_name::<M>()
                );
            }
        }
    }

    fn message_identifier(&self) -> MessageIdentifier {
        MessageIdentifier::of::<M>()
    }

    fn observer(&self) -> ObserverId {
        self.observer_id
    }
}

impl<O: Observer, M: Message> MessageHandler<M> for ObserverCallable<O, M> {
    fn handle(&self, message: &M) {
        self.invoke(message);
    }
}
