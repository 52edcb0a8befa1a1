//! Handler module - request routing and responses.
//!
//! Provides:
//! - [`Dispatcher`] - maps request paths to handlers
//! - [`Responder`] - one-shot reply handle correlated with the request
//! - [`RecordSink`] - where encoded responses go
//!
//! # Example
//!
//! ```
//! use serialwire::codec::Code;
//! use serialwire::handler::Dispatcher;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Toggle {
//!     on: bool,
//! }
//!
//! let mut dispatcher = Dispatcher::new();
//!
//! dispatcher.register("/a", |_req, responder| async move {
//!     responder.respond(Code::CONTENT, "Hello World").await
//! });
//!
//! dispatcher.register_json("/led", |body: Toggle, responder| async move {
//!     let code = if body.on { Code::CHANGED } else { Code::VALID };
//!     responder.respond(code, "").await
//! });
//! ```

mod context;
mod registry;

pub use context::{RecordSink, Responder};
pub use registry::{
    normalize_path, BoxFuture, Dispatcher, FnHandler, Handler, HandlerResult, JsonHandler,
};
