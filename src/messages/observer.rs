use super::broker::{MessageBroker, ObserverId};

/// Registration token of an observer.
///
/// Creating the handle registers a fresh identity with the broker, dropping it
/// unregisters that identity. Embed one in every type that receives messages:
/// as soon as the owning value is dropped, all callables bound to it become
/// inert.
#[derive(Debug)]
pub struct ObserverHandle {
    broker: MessageBroker,
    id: ObserverId,
}

impl ObserverHandle {
    /// Register a new observer identity with `broker`.
    pub fn new(broker: &MessageBroker) -> Self {
        Self {
            broker: broker.clone(),
            id: broker.register(),
        }
    }

    /// The identity registered with the broker.
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// The broker this observer lives in.
    pub fn broker(&self) -> &MessageBroker {
        &self.broker
    }

    /// Whether the broker still considers this observer alive.
    pub fn is_active(&self) -> bool {
        self.broker.is_active(self.id)
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.broker.unregister(self.id);
    }
}

/// Capability of receiving messages.
///
/// Implementors are shared through `Arc` and expose their registration token;
/// callables keep a `Weak` reference plus the identity.
pub trait Observer: Send + Sync + 'static {
    /// Registration token of this observer.
    fn observer_handle(&self) -> &ObserverHandle;

    /// Identity of this observer in the broker.
    fn observer_id(&self) -> ObserverId {
        self.observer_handle().id()
    }

    /// The broker this observer is registered with.
    fn broker(&self) -> &MessageBroker {
        self.observer_handle().broker()
    }
}
