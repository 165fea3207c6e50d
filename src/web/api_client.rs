use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use super::message_loop::{Completion, MessageLoop};
use super::WebService;
use crate::error::WebError;
use crate::messages::{Message, MessageBroker, MessageHandler};

/// Opaque caller context echoed back in the answer message.
pub type Payload = Box<dyn Any + Send + Sync>;

// =============================================================================
// Answer Messages
// =============================================================================

/// A JSON resource was fetched.
pub struct JsonResponseReadyMessage {
    uri: String,
    json: Value,
    payload: Option<Payload>,
}

impl Message for JsonResponseReadyMessage {}

impl JsonResponseReadyMessage {
    #[cfg(test)]
    pub(crate) fn new(uri: &str, json: Value, payload: Option<Payload>) -> Self {
        Self {
            uri: uri.to_string(),
            json,
            payload,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn json(&self) -> &Value {
        &self.json
    }

    /// The payload given with the request, if it has type `T`.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref()?.downcast_ref()
    }
}

/// A binary resource was fetched.
pub struct BinaryResponseReadyMessage {
    uri: String,
    body: Bytes,
    payload: Option<Payload>,
}

impl Message for BinaryResponseReadyMessage {}

impl BinaryResponseReadyMessage {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The payload given with the request, if it has type `T`.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref()?.downcast_ref()
    }
}

/// A request failed.
pub struct HttpErrorMessage {
    uri: String,
    error: WebError,
    payload: Option<Payload>,
}

impl Message for HttpErrorMessage {}

impl HttpErrorMessage {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn error(&self) -> &WebError {
        &self.error
    }

    /// The payload given with the request, if it has type `T`.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref()?.downcast_ref()
    }
}

// =============================================================================
// Client
// =============================================================================

/// Asynchronous access to the Orthanc REST API.
///
/// Each request is fetched on the tokio runtime and its answer delivered
/// through the [`MessageLoop`] returned by [`OrthancApiClient::new`]. The
/// answer reaches its handler only if the handler's observer is still
/// registered with the broker at delivery time; otherwise it is dropped.
///
/// Cloning the client is cheap and shares the loop and the counters.
#[derive(Clone)]
pub struct OrthancApiClient {
    broker: MessageBroker,
    service: Arc<dyn WebService>,
    completions: mpsc::UnboundedSender<Completion>,
    outstanding: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    issued: Arc<AtomicUsize>,
}

impl OrthancApiClient {
    /// Create a client and the loop delivering its answers.
    pub fn new(broker: &MessageBroker, service: Arc<dyn WebService>) -> (Self, MessageLoop) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let outstanding = Arc::new(AtomicUsize::new(0));

        let client = Self {
            broker: broker.clone(),
            service,
            completions: sender,
            outstanding: Arc::clone(&outstanding),
            peak: Arc::new(AtomicUsize::new(0)),
            issued: Arc::new(AtomicUsize::new(0)),
        };

        (client, MessageLoop::new(receiver, outstanding))
    }

    pub fn broker(&self) -> &MessageBroker {
        &self.broker
    }

    pub fn service(&self) -> &Arc<dyn WebService> {
        &self.service
    }

    /// Requests issued but not delivered yet.
    pub fn outstanding_requests(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously outstanding requests so far.
    pub fn peak_outstanding_requests(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Requests issued since creation.
    pub fn issued_requests(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    /// Fetch `uri` as JSON.
    ///
    /// `on_success` receives a [`JsonResponseReadyMessage`]; `on_failure`, if
    /// any, an [`HttpErrorMessage`]. Both carry `payload`.
    pub fn get_json_async(
        &self,
        uri: impl Into<String>,
        on_success: Box<dyn MessageHandler<JsonResponseReadyMessage>>,
        on_failure: Option<Box<dyn MessageHandler<HttpErrorMessage>>>,
        payload: Option<Payload>,
    ) {
        let uri = uri.into();
        let service = Arc::clone(&self.service);
        let target = uri.clone();
        let fetch = async move { service.get_json(&target).await };

        self.spawn_request(
            uri,
            fetch,
            |uri, json, payload| JsonResponseReadyMessage { uri, json, payload },
            on_success,
            on_failure,
            payload,
        );
    }

    /// Fetch `uri` as raw bytes, with extra request `headers`.
    ///
    /// `on_success` receives a [`BinaryResponseReadyMessage`]; `on_failure`,
    /// if any, an [`HttpErrorMessage`]. Both carry `payload`.
    pub fn get_binary_async(
        &self,
        uri: impl Into<String>,
        headers: HeaderMap,
        on_success: Box<dyn MessageHandler<BinaryResponseReadyMessage>>,
        on_failure: Option<Box<dyn MessageHandler<HttpErrorMessage>>>,
        payload: Option<Payload>,
    ) {
        let uri = uri.into();
        let service = Arc::clone(&self.service);
        let target = uri.clone();
        let fetch = async move { service.get_binary(&target, &headers).await };

        self.spawn_request(
            uri,
            fetch,
            |uri, body, payload| BinaryResponseReadyMessage { uri, body, payload },
            on_success,
            on_failure,
            payload,
        );
    }

    fn spawn_request<R, M, F>(
        &self,
        uri: String,
        fetch: F,
        build: fn(String, R, Option<Payload>) -> M,
        on_success: Box<dyn MessageHandler<M>>,
        on_failure: Option<Box<dyn MessageHandler<HttpErrorMessage>>>,
        payload: Option<Payload>,
    ) where
        R: Send + 'static,
        M: Message,
        F: Future<Output = Result<R, WebError>> + Send + 'static,
    {
        let current = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        self.issued.fetch_add(1, Ordering::SeqCst);
        trace!("GET {} ({} outstanding)", uri, current);

        let broker = self.broker.clone();
        let completions = self.completions.clone();

        tokio::spawn(async move {
            let result = fetch.await;

            let completion: Completion = Box::new(move || match result {
                Ok(value) => deliver(&broker, on_success.as_ref(), &build(uri, value, payload)),
                Err(error) => {
                    warn!("GET {} failed: {}", uri, error);
                    if let Some(on_failure) = on_failure {
                        let message = HttpErrorMessage {
                            uri,
                            error,
                            payload,
                        };
                        deliver(&broker, on_failure.as_ref(), &message);
                    }
                }
            });

            if completions.send(completion).is_err() {
                trace!("message loop is gone, dropping answer");
            }
        });
    }
}

fn deliver<M: Message>(broker: &MessageBroker, handler: &dyn MessageHandler<M>, message: &M) {
    if broker.is_active(handler.observer()) {
        handler.handle(message);
    } else {
        trace!("answer dropped: {} is gone", handler.observer());
    }
}
