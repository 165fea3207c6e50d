//! Message dispatch integration tests.
//!
//! Tests verify:
//! - Dropped observers never receive messages
//! - Broadcasts reach every live observer of the message type, and only them
//! - Forwarders re-emit messages unchanged, exactly once
//! - Promises settle once and run a single continuation

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use orthanc_stone::error::StoneError;
use orthanc_stone::messages::{
    AsObservable, Message, MessageBroker, MessageForwarder, Observable, Observer,
    ObserverCallable, ObserverHandle, Promise, PromiseState,
};

#[derive(Debug, Clone, PartialEq)]
struct Ping(u32);

impl Message for Ping {}

#[derive(Debug, Clone, PartialEq)]
struct Pong(String);

impl Message for Pong {}

/// Records what it receives.
struct Counter {
    handle: ObserverHandle,
    pings: AtomicUsize,
    pongs: AtomicUsize,
    last: Mutex<Option<u32>>,
}

impl Observer for Counter {
    fn observer_handle(&self) -> &ObserverHandle {
        &self.handle
    }
}

impl Counter {
    fn new(broker: &MessageBroker) -> Arc<Self> {
        Arc::new(Self {
            handle: ObserverHandle::new(broker),
            pings: AtomicUsize::new(0),
            pongs: AtomicUsize::new(0),
            last: Mutex::new(None),
        })
    }

    fn subscribe(self: &Arc<Self>, observable: &Observable) {
        observable.register_observer_callback(Box::new(ObserverCallable::new(self, Self::on_ping)));
    }

    fn on_ping(&self, message: &Ping) {
        self.pings.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(message.0);
    }

    fn on_pong(&self, _: &Pong) {
        self.pongs.fetch_add(1, Ordering::SeqCst);
    }

    fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Liveness
// =============================================================================

#[test]
fn test_dropped_observer_is_not_called() {
    let broker = MessageBroker::new();
    let emitter = Observable::new(&broker);

    let alive = Counter::new(&broker);
    let dropped = Counter::new(&broker);
    alive.subscribe(&emitter);
    dropped.subscribe(&emitter);

    let dropped_id = dropped.observer_id();
    let witness = Arc::downgrade(&dropped);
    drop(dropped);

    assert!(witness.upgrade().is_none());
    assert!(!broker.is_active(dropped_id));

    emitter.broadcast_message(&Ping(1));
    assert_eq!(alive.pings(), 1);
}

#[test]
fn test_observer_dropped_during_dispatch_window() {
    let broker = MessageBroker::new();
    let emitter = Observable::new(&broker);

    for _ in 0..8 {
        let counter = Counter::new(&broker);
        counter.subscribe(&emitter);
    }
    assert_eq!(broker.active_count(), 0);

    emitter.broadcast_message(&Ping(2));
}

#[test]
fn test_dropped_emitter_discards_callables() {
    let broker = MessageBroker::new();
    let counter = Counter::new(&broker);

    {
        let emitter = Observable::new(&broker);
        counter.subscribe(&emitter);
        assert_eq!(emitter.callable_count::<Ping>(), 1);
    }

    // The counter survives its emitter
    assert!(broker.is_active(counter.observer_id()));
}

// =============================================================================
// Fan-out
// =============================================================================

#[test]
fn test_broadcast_reaches_every_live_observer() {
    let broker = MessageBroker::new();
    let emitter = Observable::new(&broker);

    let counters: Vec<_> = (0..5).map(|_| Counter::new(&broker)).collect();
    for counter in &counters {
        counter.subscribe(&emitter);
    }

    emitter.broadcast_message(&Ping(42));

    for counter in &counters {
        assert_eq!(counter.pings(), 1);
        assert_eq!(*counter.last.lock().unwrap(), Some(42));
    }
}

#[test]
fn test_broadcast_filters_by_message_type() {
    let broker = MessageBroker::new();
    let emitter = Observable::new(&broker);

    let ping_only = Counter::new(&broker);
    ping_only.subscribe(&emitter);

    let pong_only = Counter::new(&broker);
    emitter.register_observer_callback(Box::new(ObserverCallable::new(
        &pong_only,
        Counter::on_pong,
    )));

    emitter.broadcast_message(&Pong("hello".into()));

    assert_eq!(ping_only.pings(), 0);
    assert_eq!(ping_only.pongs.load(Ordering::SeqCst), 0);
    assert_eq!(pong_only.pongs.load(Ordering::SeqCst), 1);
    assert_eq!(pong_only.pings(), 0);
}

#[test]
fn test_emit_targets_a_single_observer() {
    let broker = MessageBroker::new();
    let emitter = Observable::new(&broker);

    let target = Counter::new(&broker);
    let bystander = Counter::new(&broker);
    target.subscribe(&emitter);
    bystander.subscribe(&emitter);

    emitter.emit_message(target.observer_id(), &Ping(3));

    assert_eq!(target.pings(), 1);
    assert_eq!(bystander.pings(), 0);
}

// =============================================================================
// Forwarders
// =============================================================================

#[test]
fn test_forwarder_reemits_once() {
    let broker = MessageBroker::new();
    let emitter = Observable::new(&broker);
    let forwarder = MessageForwarder::<Ping>::new(&broker, &emitter);

    let counter = Counter::new(&broker);
    counter.subscribe(forwarder.observable());

    emitter.broadcast_message(&Ping(7));

    assert_eq!(counter.pings(), 1);
    assert_eq!(*counter.last.lock().unwrap(), Some(7));
}

#[test]
fn test_forwarder_chain() {
    let broker = MessageBroker::new();
    let emitter = Observable::new(&broker);
    let first = MessageForwarder::<Ping>::new(&broker, &emitter);
    let second = MessageForwarder::<Ping>::new(&broker, first.observable());

    let counter = Counter::new(&broker);
    counter.subscribe(second.observable());

    emitter.broadcast_message(&Ping(9));
    emitter.broadcast_message(&Pong("ignored".into()));

    assert_eq!(counter.pings(), 1);
}

#[test]
fn test_forwarder_dies_with_emitter() {
    let broker = MessageBroker::new();
    let emitter = Observable::new(&broker);
    let forwarder = MessageForwarder::<Ping>::new(&broker, &emitter);
    let forwarder_id = forwarder.observer_id();
    drop(forwarder);

    assert!(broker.is_active(forwarder_id));
    drop(emitter);
    assert!(!broker.is_active(forwarder_id));
}

// =============================================================================
// Promises
// =============================================================================

#[test]
fn test_promise_success_runs_only_success() {
    let broker = MessageBroker::new();
    let success = Counter::new(&broker);
    let failure = Counter::new(&broker);

    let mut promise: Promise<Ping> = Promise::new(&broker);
    promise
        .then(Box::new(ObserverCallable::new(&success, Counter::on_ping)))
        .unwrap()
        .otherwise(Box::new(ObserverCallable::new(&failure, Counter::on_ping)))
        .unwrap();

    promise.success(&Ping(5)).unwrap();

    assert_eq!(promise.state(), PromiseState::Succeeded);
    assert_eq!(success.pings(), 1);
    assert_eq!(*success.last.lock().unwrap(), Some(5));
    assert_eq!(failure.pings(), 0);

    assert!(matches!(
        promise.success(&Ping(6)),
        Err(StoneError::PromiseAlreadySettled)
    ));
    assert!(matches!(
        promise.failure(&Ping(6)),
        Err(StoneError::PromiseAlreadySettled)
    ));
    assert_eq!(success.pings(), 1);
}

#[test]
fn test_promise_failure_runs_only_failure() {
    let broker = MessageBroker::new();
    let success = Counter::new(&broker);
    let failure = Counter::new(&broker);

    let mut promise: Promise<Ping, Pong> = Promise::new(&broker);
    promise
        .then(Box::new(ObserverCallable::new(&success, Counter::on_ping)))
        .unwrap()
        .otherwise(Box::new(ObserverCallable::new(&failure, Counter::on_pong)))
        .unwrap();

    promise.failure(&Pong("boom".into())).unwrap();

    assert_eq!(promise.state(), PromiseState::Failed);
    assert_eq!(success.pings(), 0);
    assert_eq!(failure.pongs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_promise_misuse_is_reported() {
    let broker = MessageBroker::new();
    let counter = Counter::new(&broker);

    let mut promise: Promise<Ping> = Promise::new(&broker);
    assert!(matches!(
        promise.success(&Ping(1)),
        Err(StoneError::PromiseNotConfigured("success"))
    ));

    promise
        .then(Box::new(ObserverCallable::new(&counter, Counter::on_ping)))
        .unwrap();
    assert!(matches!(
        promise.then(Box::new(ObserverCallable::new(&counter, Counter::on_ping))),
        Err(StoneError::PromiseAlreadyConfigured("success"))
    ));
    assert_eq!(promise.state(), PromiseState::Pending);
}

#[test]
fn test_promise_skips_dropped_observer() {
    let broker = MessageBroker::new();
    let counter = Counter::new(&broker);

    let mut promise: Promise<Ping> = Promise::new(&broker);
    promise
        .then(Box::new(ObserverCallable::new(&counter, Counter::on_ping)))
        .unwrap();
    drop(counter);

    assert!(promise.success(&Ping(1)).is_ok());
    assert_eq!(promise.state(), PromiseState::Succeeded);
}
