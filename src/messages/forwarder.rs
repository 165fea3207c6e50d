use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::error;

use super::broker::{MessageBroker, ObserverId};
use super::callable::{Callable, Message, MessageIdentifier};
use super::observable::{AsObservable, Observable};
use super::observer::{Observer, ObserverHandle};

/// Re-emits every `M` received from an emitter through its own observable.
///
/// Subscribers of the forwarder see the message as if the forwarder had
/// emitted it, which allows `A -> B -> C` chains without a dedicated handler
/// in `B`:
///
/// ```text
///   emitter ──M──> [forwarding callable] ──> forwarder.observable ──M──> subscribers
/// ```
///
/// The forwarding callable lives in the emitter and holds the forwarder
/// strongly, so the emitter owns the forwarder. When the emitter is dropped
/// the callable goes away with it and the forwarder identity is unregistered
/// from the broker: nothing can be re-emitted afterwards.
pub struct MessageForwarder<M: Message> {
    handle: ObserverHandle,
    observable: Observable,
    _message: PhantomData<fn(&M)>,
}

impl<M: Message> MessageForwarder<M> {
    /// Create a forwarder attached to `emitter`.
    pub fn new(broker: &MessageBroker, emitter: &Observable) -> Arc<Self> {
        let forwarder = Arc::new(Self {
            handle: ObserverHandle::new(broker),
            observable: Observable::new(broker),
            _message: PhantomData,
        });

        emitter.register_observer_callback(Box::new(ForwardingCallable {
            forwarder: Arc::clone(&forwarder),
        }));
        emitter.register_forwarder(forwarder.observer_id());

        forwarder
    }

    fn forward(&self, message: &M) {
        self.observable.broadcast_message(message);
    }
}

impl<M: Message> Observer for MessageForwarder<M> {
    fn observer_handle(&self) -> &ObserverHandle {
        &self.handle
    }
}

impl<M: Message> AsObservable for MessageForwarder<M> {
    fn observable(&self) -> &Observable {
        &self.observable
    }
}

struct ForwardingCallable<M: Message> {
    forwarder: Arc<MessageForwarder<M>>,
}

impl<M: Message> Callable for ForwardingCallable<M> {
    fn apply(&self, message: &dyn Any) {
        match message.downcast_ref::<M>() {
            Some(message) => self.forwarder.forward(message),
            None => error!(
                "forwarder for {:?} received another message type",
                self.message_identifier()
            ),
        }
    }

    fn message_identifier(&self) -> MessageIdentifier {
        MessageIdentifier::of::<M>()
    }

    fn observer(&self) -> ObserverId {
        self.forwarder.observer_id()
    }
}
