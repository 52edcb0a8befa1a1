//! Dispatcher mapping request paths to handlers.
//!
//! Paths are normalized on registration (`"a/b"`, `"/a/b/"` and `"/a/b"` are
//! the same route) and matched exactly against the request's Uri-Path.
//!
//! # Example
//!
//! ```
//! use serialwire::codec::Code;
//! use serialwire::handler::Dispatcher;
//!
//! let mut dispatcher = Dispatcher::new();
//!
//! dispatcher.register("/a", |_req, responder| async move {
//!     responder.respond(Code::CONTENT, "Hello World").await
//! });
//!
//! assert!(dispatcher.contains("/a"));
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use serde::de::DeserializeOwned;

use super::Responder;
use crate::codec::{Code, Message};
use crate::error::{Result, SerialwireError};

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for request handlers.
pub trait Handler: Send + Sync + 'static {
    /// Handle one request.
    fn call(&self, request: Message, responder: Responder) -> BoxFuture<'static, HandlerResult>;
}

/// Handler built from an async closure over the whole message.
pub struct FnHandler<F, Fut>
where
    F: Fn(Message, Responder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(Message, Responder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new closure handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Handler for FnHandler<F, Fut>
where
    F: Fn(Message, Responder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, request: Message, responder: Responder) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(request, responder))
    }
}

/// Wrapper that deserializes a JSON payload before calling the handler.
///
/// A payload that does not parse is answered with `4.00 Bad Request` and the
/// parse error is returned.
pub struct JsonHandler<F, T, Fut>
where
    F: Fn(T, Responder) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, Fut> JsonHandler<F, T, Fut>
where
    F: Fn(T, Responder) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new JSON handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, Fut> Handler for JsonHandler<F, T, Fut>
where
    F: Fn(T, Responder) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, request: Message, responder: Responder) -> BoxFuture<'static, HandlerResult> {
        let parsed: T = match request.json() {
            Ok(v) => v,
            Err(e) => {
                return Box::pin(async move {
                    responder
                        .respond(Code::BAD_REQUEST, e.to_string().into_bytes())
                        .await?;
                    Err(e)
                })
            }
        };

        Box::pin((self.handler)(parsed, responder))
    }
}

/// Canonical form of a route path.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// Registry mapping paths to handlers.
pub struct Dispatcher {
    /// Handlers by normalized path.
    routes: HashMap<String, Box<dyn Handler>>,
}

impl Dispatcher {
    /// Create a new empty dispatcher.
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Register a handler for `path`, replacing any previous one.
    pub fn register<F, Fut>(&mut self, path: &str, handler: F)
    where
        F: Fn(Message, Responder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_handler(path, FnHandler::new(handler));
    }

    /// Register a handler that receives the JSON-decoded payload.
    pub fn register_json<F, T, Fut>(&mut self, path: &str, handler: F)
    where
        F: Fn(T, Responder) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_handler(path, JsonHandler::new(handler));
    }

    /// Register any [`Handler`] implementation.
    pub fn register_handler(&mut self, path: &str, handler: impl Handler) {
        let path = normalize_path(path);
        if self.routes.insert(path.clone(), Box::new(handler)).is_some() {
            tracing::debug!(path = %path, "Replaced handler");
        }
    }

    /// Get a handler by path.
    pub fn get_handler(&self, path: &str) -> Option<&dyn Handler> {
        self.routes.get(&normalize_path(path)).map(|h| h.as_ref())
    }

    /// Returns true if a handler is registered for `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.get_handler(path).is_some()
    }

    /// Registered paths, in no particular order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(|p| p.as_str())
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatch a request to the handler for its path.
    ///
    /// The handler runs to completion before this returns. No response is
    /// sent when nothing matches.
    ///
    /// # Errors
    ///
    /// `NoRoute` if no handler matches, otherwise the handler's result.
    pub async fn dispatch(&self, request: Message, responder: Responder) -> Result<()> {
        let path = request.path();
        let handler = match self.routes.get(&path) {
            Some(h) => h,
            None => {
                tracing::warn!(path = %path, code = %request.code, "No route for request");
                return Err(SerialwireError::NoRoute(path));
            }
        };

        tracing::debug!(
            path = %path,
            code = %request.code,
            message_id = request.message_id,
            "Dispatching request"
        );
        handler.call(request, responder).await
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
