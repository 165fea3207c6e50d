//! Asynchronous access to the Orthanc REST API.
//!
//! - [`WebService`] abstracts the HTTP transport
//! - [`OrthancHttpService`] talks to a live server through `reqwest`
//! - [`InMemoryWebService`] answers from canned responses
//! - [`OrthancApiClient`] issues requests and routes each answer to a typed
//!   handler, through the [`MessageLoop`]

mod api_client;
mod http_service;
mod memory;
mod message_loop;
mod service;

pub use api_client::{
    BinaryResponseReadyMessage, HttpErrorMessage, JsonResponseReadyMessage, OrthancApiClient,
    Payload,
};
pub use http_service::OrthancHttpService;
pub use memory::InMemoryWebService;
pub use message_loop::MessageLoop;
pub use service::{SystemInfo, WebService};
