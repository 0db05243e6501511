use std::collections::HashMap;
use std::io::Write;
use std::net::TcpStream;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::error::Result;
use crate::http::{Request, NOT_FOUND};

/// A request handler. It owns the connection from here on: it writes the
/// response and closes the stream, or upgrades it.
pub type Handler<C> = Arc<dyn Fn(&C, TcpStream, &Request) -> Result<()> + Send + Sync>;

/// Exact-match path table. `C` is whatever context handlers are given.
pub struct Router<C> {
    handlers: RwLock<HashMap<String, Handler<C>>>,
}

impl<C> Router<C> {
    pub fn new() -> Router<C> {
        Router {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `handler` for `path`, replacing any earlier one.
    pub fn register<F>(&self, path: &str, handler: F)
    where
        F: Fn(&C, TcpStream, &Request) -> Result<()> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.insert(path.to_owned(), Arc::new(handler));
    }

    pub fn handler(&self, path: &str) -> Option<Handler<C>> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(path).cloned()
    }

    pub fn clear(&self) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.clear();
    }

    pub fn paths(&self) -> Vec<String> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        let mut paths: Vec<String> = handlers.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Hands the connection to the handler registered for the request's path.
    ///
    /// Unknown paths and unparsable request lines get a 404.
    pub fn dispatch(&self, context: &C, stream: TcpStream, raw_request: String) -> Result<()> {
        let request = match Request::parse(raw_request) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "rejecting request");
                return not_found(stream);
            }
        };

        debug!(path = %request.path, "request");

        // Not holding the table lock while the handler runs; handlers register paths too.
        match self.handler(&request.path) {
            Some(handler) => handler(context, stream, &request),
            None => not_found(stream),
        }
    }
}

impl<C> Default for Router<C> {
    fn default() -> Self {
        Router::new()
    }
}

pub fn not_found(mut stream: TcpStream) -> Result<()> {
    stream.write_all(NOT_FOUND.as_bytes())?;
    stream.flush()?;
    Ok(())
}
