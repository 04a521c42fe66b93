//! Protocol controllers: one resource, its operations keyed by verb, mounted
//! either as HTTP routes or as a single WebSocket route.

mod http;
mod writer;
mod ws;

use std::sync::Arc;

use axum::Router;
use docintake_core::{Transport, Verb};

use super::error::ConfigError;
use super::operation::Operation;
use super::schema::SchemaRegistry;
use crate::network::AppState;

pub use writer::{FrameSink, SocketWriter};
pub use ws::{run_session, SessionContext};

#[cfg(test)]
pub(crate) use writer::mock;

/// Lifecycle of a [`Controller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Unregistered,
    Registered(Transport),
    /// Routes handed to a router; the pool is empty from here on.
    Subscribed(Transport),
}

/// A named resource at one url with at most one operation per verb.
pub struct Controller {
    name: String,
    url: String,
    operations: [Option<Operation>; Verb::COUNT],
    state: ControllerState,
}

impl Controller {
    #[must_use]
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            operations: Default::default(),
            state: ControllerState::Unregistered,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Verbs with a registered operation, in slot order.
    #[must_use]
    pub fn verbs(&self) -> Vec<Verb> {
        Verb::ALL
            .into_iter()
            .filter(|verb| self.operations[verb.index()].is_some())
            .collect()
    }

    /// Adds `operation` under its verb.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::CollidingVerbs` when GET and MESSAGE would share
    /// the url, `DuplicateVerb` for a taken slot, `VerbTransportMismatch` for
    /// an HTTP handler under MESSAGE, and `MixedTransports` when HTTP and
    /// WebSocket operations are combined.
    pub fn register(&mut self, operation: Operation) -> Result<&mut Self, ConfigError> {
        let verb = operation.verb();
        let slot = verb.index();
        let taken = |v: Verb| self.operations[v.index()].is_some();

        if (verb == Verb::Get && taken(Verb::Message)) || (verb == Verb::Message && taken(Verb::Get)) {
            return Err(ConfigError::CollidingVerbs {
                controller: self.name.clone(),
            });
        }
        if operation.transport() != verb.transport() {
            return Err(ConfigError::VerbTransportMismatch {
                controller: self.name.clone(),
                verb,
            });
        }
        if taken(verb) {
            return Err(ConfigError::DuplicateVerb {
                controller: self.name.clone(),
                verb,
            });
        }
        if let ControllerState::Registered(existing) = self.state {
            if existing != operation.transport() {
                return Err(ConfigError::MixedTransports {
                    controller: self.name.clone(),
                });
            }
        }

        self.state = ControllerState::Registered(operation.transport());
        self.operations[slot] = Some(operation);
        Ok(self)
    }

    /// Builder-style [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register).
    pub fn with(mut self, operation: Operation) -> Result<Self, ConfigError> {
        self.register(operation)?;
        Ok(self)
    }

    /// Re-checks the verb invariants over the whole pool.
    fn validate(&self) -> Result<Transport, ConfigError> {
        let transport = match self.state {
            ControllerState::Registered(transport) => transport,
            ControllerState::Subscribed(_) => {
                return Err(ConfigError::AlreadySubscribed {
                    controller: self.name.clone(),
                })
            }
            ControllerState::Unregistered => {
                return Err(ConfigError::NoOperations {
                    controller: self.name.clone(),
                })
            }
        };

        let present: Vec<&Operation> = self.operations.iter().flatten().collect();
        if present.is_empty() {
            return Err(ConfigError::NoOperations {
                controller: self.name.clone(),
            });
        }
        if self.operations[Verb::Get.index()].is_some()
            && self.operations[Verb::Message.index()].is_some()
        {
            return Err(ConfigError::CollidingVerbs {
                controller: self.name.clone(),
            });
        }
        if present.iter().any(|op| op.transport() != transport) {
            return Err(ConfigError::MixedTransports {
                controller: self.name.clone(),
            });
        }
        Ok(transport)
    }

    /// Mounts the controller on `router`.
    ///
    /// HTTP controllers register their wire schemas in `schemas` and install
    /// one route on the url with a handler per verb. WebSocket controllers
    /// install a `GET` upgrade route on the url.
    ///
    /// The operations move into the router and the controller ends in
    /// [`ControllerState::Subscribed`]; subscribing again is an error.
    ///
    /// # Errors
    ///
    /// Returns the first violated verb invariant, or a schema registration
    /// failure.
    pub fn subscribe(
        &mut self,
        router: Router<AppState>,
        schemas: &SchemaRegistry,
    ) -> Result<Router<AppState>, ConfigError> {
        let transport = self.validate()?;
        let name: Arc<str> = Arc::from(self.name.as_str());
        let operations: Vec<Operation> = self.operations.iter_mut().filter_map(Option::take).collect();

        let router = match transport {
            Transport::Http => http::mount(&name, &self.url, operations, router, schemas)?,
            Transport::Ws => {
                let Some(operation) = operations.into_iter().next() else {
                    return Err(ConfigError::NoOperations {
                        controller: self.name.clone(),
                    });
                };
                ws::mount(name, &self.url, operation, router)
            }
        };

        self.state = ControllerState::Subscribed(transport);
        tracing::info!(controller = %self.name, url = %self.url, %transport, "controller subscribed");
        Ok(router)
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("verbs", &self.verbs())
            .field("state", &self.state)
            .finish()
    }
}
