use std::fmt;

use tracing::trace;

use super::broker::MessageBroker;
use super::callable::{Message, MessageHandler};
use crate::error::StoneError;

/// Settlement state of a [`Promise`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Succeeded,
    Failed,
}

/// Single-shot success/failure continuation pair.
///
/// The creator of an asynchronous exchange hands the promise out, the caller
/// configures one continuation of each kind, then the creator settles it
/// exactly once:
///
/// ```text
///   Pending ──success(msg)──> Succeeded
///      └─────failure(msg)──> Failed
/// ```
///
/// Misuse is reported as an error: configuring a continuation twice, settling
/// a promise twice, or settling without the matching continuation.
pub struct Promise<S: Message, F: Message = S> {
    broker: MessageBroker,
    on_success: Option<Box<dyn MessageHandler<S>>>,
    on_failure: Option<Box<dyn MessageHandler<F>>>,
    state: PromiseState,
}

impl<S: Message, F: Message> Promise<S, F> {
    /// Create an unconfigured promise.
    pub fn new(broker: &MessageBroker) -> Self {
        Self {
            broker: broker.clone(),
            on_success: None,
            on_failure: None,
            state: PromiseState::Pending,
        }
    }

    /// Register the success continuation.
    pub fn then(&mut self, handler: Box<dyn MessageHandler<S>>) -> Result<&mut Self, StoneError> {
        if self.on_success.is_some() {
            return Err(StoneError::PromiseAlreadyConfigured("success"));
        }
        self.on_success = Some(handler);
        Ok(self)
    }

    /// Register the failure continuation.
    pub fn otherwise(
        &mut self,
        handler: Box<dyn MessageHandler<F>>,
    ) -> Result<&mut Self, StoneError> {
        if self.on_failure.is_some() {
            return Err(StoneError::PromiseAlreadyConfigured("failure"));
        }
        self.on_failure = Some(handler);
        Ok(self)
    }

    /// Settle the promise successfully and run the success continuation.
    ///
    /// The continuation is skipped if its observer is gone.
    pub fn success(&mut self, message: &S) -> Result<(), StoneError> {
        self.ensure_pending()?;
        if self.on_success.is_none() {
            return Err(StoneError::PromiseNotConfigured("success"));
        }

        self.state = PromiseState::Succeeded;
        let Some(handler) = self.on_success.as_deref() else {
            return Ok(());
        };
        if self.broker.is_active(handler.observer()) {
            handler.handle(message);
        } else {
            trace!("promise success dropped: {} is gone", handler.observer());
        }
        Ok(())
    }

    /// Settle the promise as failed and run the failure continuation.
    pub fn failure(&mut self, message: &F) -> Result<(), StoneError> {
        self.ensure_pending()?;
        if self.on_failure.is_none() {
            return Err(StoneError::PromiseNotConfigured("failure"));
        }

        self.state = PromiseState::Failed;
        let Some(handler) = self.on_failure.as_deref() else {
            return Ok(());
        };
        if self.broker.is_active(handler.observer()) {
            handler.handle(message);
        } else {
            trace!("promise failure dropped: {} is gone", handler.observer());
        }
        Ok(())
    }

    /// Current settlement state.
    pub fn state(&self) -> PromiseState {
        self.state
    }

    fn ensure_pending(&self) -> Result<(), StoneError> {
        match self.state {
            PromiseState::Pending => Ok(()),
            _ => Err(StoneError::PromiseAlreadySettled),
        }
    }
}

impl<S: Message, F: Message> fmt::Debug for Promise<S, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.state)
            .field("has_success", &self.on_success.is_some())
            .field("has_failure", &self.on_failure.is_some())
            .finish()
    }
}
