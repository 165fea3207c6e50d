use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

/// Deferred delivery of an HTTP answer.
pub(crate) type Completion = Box<dyn FnOnce() + Send>;

/// The single logical thread on which HTTP answers are delivered.
///
/// Fetches run concurrently on the tokio runtime, but their completions are
/// queued here and executed one at a time by whoever drives the loop. Every
/// observer callback triggered by network activity therefore runs
/// sequentially, never concurrently with another one.
///
/// ```text
///   OrthancApiClient ──spawn──> fetch ──send──> [ channel ] ──> MessageLoop::run_*
///                                                                 └─> handler.handle(msg)
/// ```
pub struct MessageLoop {
    receiver: mpsc::UnboundedReceiver<Completion>,
    outstanding: Arc<AtomicUsize>,
}

impl MessageLoop {
    pub(crate) fn new(
        receiver: mpsc::UnboundedReceiver<Completion>,
        outstanding: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            receiver,
            outstanding,
        }
    }

    /// Number of requests issued but not delivered yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Deliver answers until no request is outstanding.
    ///
    /// Requests issued by the handlers themselves are waited for as well.
    /// Returns the number of answers delivered.
    pub async fn run_until_idle(&mut self) -> usize {
        let mut delivered = 0;
        while self.outstanding() > 0 {
            match self.receiver.recv().await {
                Some(completion) => {
                    self.run(completion);
                    delivered += 1;
                }
                None => break,
            }
        }
        trace!("message loop idle after {} answer(s)", delivered);
        delivered
    }

    /// Wait for the next answer and deliver it.
    ///
    /// Returns `false` if nothing is outstanding.
    pub async fn run_one(&mut self) -> bool {
        if self.outstanding() == 0 {
            return false;
        }
        match self.receiver.recv().await {
            Some(completion) => {
                self.run(completion);
                true
            }
            None => false,
        }
    }

    /// Deliver the answers already received, without waiting.
    pub fn run_pending(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(completion) = self.receiver.try_recv() {
            self.run(completion);
            delivered += 1;
        }
        delivered
    }

    fn run(&self, completion: Completion) {
        // The request stops counting as outstanding before its handler runs,
        // so requests issued by the handler are measured against the others
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        completion();
    }
}
