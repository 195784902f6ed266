//! # Server Factory
//!
//! Routes requests of a multi-client test to the fake server of the client
//! that issued them. The client is the part of the operation id before the
//! first `.` (`"WidgetsClient.Get"` goes to `"WidgetsClient"`).
//!
//! Servers can be registered ready-made or as a constructor that runs on
//! the first request for that client.

use crate::dispatcher::{Dispatcher, Transport};
use crate::error::DispatchError;
use crate::request::RequestExt;
use crate::synth::SimResponse;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

type Init = Box<dyn Fn() -> Dispatcher + Send + Sync>;

struct ClientSlot {
    init: Option<Init>,
    server: OnceCell<Dispatcher>,
}

impl ClientSlot {
    fn server(&self, client: &str) -> Option<&Dispatcher> {
        if let Some(server) = self.server.get() {
            return Some(server);
        }
        let init = self.init.as_ref()?;
        Some(self.server.get_or_init(|| {
            debug!(client = %client, "Initializing fake server");
            init()
        }))
    }
}

/// Fake servers keyed by client name.
#[derive(Default)]
pub struct ServerFactory {
    clients: HashMap<Arc<str>, ClientSlot>,
}

impl ServerFactory {
    /// Empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a ready server for `client`.
    pub fn add_client(&mut self, client: &str, server: Dispatcher) -> &mut Self {
        let slot = ClientSlot {
            init: None,
            server: OnceCell::with_value(server),
        };
        self.clients.insert(Arc::from(client), slot);
        self
    }

    /// Register a server for `client`, built on first use.
    pub fn add_client_with<F>(&mut self, client: &str, init: F) -> &mut Self
    where
        F: Fn() -> Dispatcher + Send + Sync + 'static,
    {
        let slot = ClientSlot {
            init: Some(Box::new(init)),
            server: OnceCell::new(),
        };
        self.clients.insert(Arc::from(client), slot);
        self
    }

    /// Registered client names, sorted.
    #[must_use]
    pub fn clients(&self) -> Vec<&str> {
        let mut clients: Vec<&str> = self.clients.keys().map(AsRef::as_ref).collect();
        clients.sort_unstable();
        clients
    }

    /// The server of `client`, building it if needed.
    #[must_use]
    pub fn server(&self, client: &str) -> Option<&Dispatcher> {
        self.clients.get(client)?.server(client)
    }

    /// Route `request` to the server of its client.
    ///
    /// # Errors
    ///
    /// [`DispatchError::MissingOperationContext`] when the request carries no
    /// operation id, [`DispatchError::NotImplemented`] when its client is not
    /// registered, otherwise whatever the client's server returns.
    pub fn dispatch(&self, request: http::Request<Vec<u8>>) -> Result<SimResponse, DispatchError> {
        let Some(operation) = request.operation_id() else {
            return Err(DispatchError::MissingOperationContext);
        };
        let client = operation.client();
        match self.server(client) {
            Some(server) => server.dispatch(request),
            None => {
                error!(
                    client = %client,
                    operation = %operation,
                    registered_clients = ?self.clients(),
                    "Unhandled client"
                );
                Err(DispatchError::NotImplemented {
                    operation: Arc::clone(operation.as_arc()),
                    reason: format!("unhandled client {client}"),
                })
            }
        }
    }
}

impl Transport for ServerFactory {
    fn send(&self, request: http::Request<Vec<u8>>) -> Result<SimResponse, DispatchError> {
        self.dispatch(request)
    }
}

impl fmt::Debug for ServerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerFactory")
            .field("clients", &self.clients())
            .finish()
    }
}
