//! Publish/subscribe core.
//!
//! All cross-component communication goes through this module:
//!
//! - [`MessageBroker`] tracks which observers are alive
//! - [`ObserverHandle`] registers an observer for as long as it lives
//! - [`Observable`] owns typed callables and dispatches messages to them
//! - [`ObserverCallable`] binds an observer method to one message type
//! - [`MessageForwarder`] re-emits a message on behalf of another emitter
//! - [`Promise`] is a single-shot success/failure continuation pair
//!
//! Dispatch is synchronous: [`Observable::broadcast_message`] invokes every
//! live callable before returning. Callables reaching an observer that was
//! dropped are skipped, which is the only form of cancellation.

mod broker;
mod callable;
mod forwarder;
mod observable;
mod observer;
mod promise;

pub use broker::{MessageBroker, ObservableId, ObserverId};
pub use callable::{Callable, Message, MessageHandler, MessageIdentifier, ObserverCallable};
pub use forwarder::MessageForwarder;
pub use observable::{AsObservable, Observable};
pub use observer::{Observer, ObserverHandle};
pub use promise::{Promise, PromiseState};
