//! Method name → handler lookup, built once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use shared_types::Request;
use tracing::info;

use super::Handler;
use crate::domain::error::{GatewayError, HandlerError};

/// Explicit handler registry.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn Handler>>,
    by_method: HashMap<String, usize>,
}

impl HandlerRegistry {
    /// Build from `handlers`. A method claimed twice fails construction.
    pub fn new(handlers: Vec<Arc<dyn Handler>>) -> Result<Self, GatewayError> {
        let mut by_method = HashMap::new();
        for (index, handler) in handlers.iter().enumerate() {
            for method in handler.methods() {
                if by_method.insert(method.clone(), index).is_some() {
                    return Err(GatewayError::DuplicateMethod(method));
                }
            }
        }
        Ok(Self {
            handlers,
            by_method,
        })
    }

    /// Handler for exactly `method`.
    pub fn get(&self, method: &str) -> Option<&Arc<dyn Handler>> {
        self.by_method.get(method).map(|&index| &self.handlers[index])
    }

    /// Handler for `method`, falling back to its `service.` prefix.
    pub fn resolve(&self, method: &str) -> Option<&Arc<dyn Handler>> {
        self.get(method).or_else(|| {
            let (service, _) = method.split_once('.')?;
            self.get(service)
        })
    }

    /// Handler for a JSON-RPC request.
    pub fn resolve_request(&self, request: &Request) -> Option<&Arc<dyn Handler>> {
        self.get(&request.method)
            .or_else(|| self.get(request.service_name()))
    }

    /// Registered method names.
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.by_method.keys().map(String::as_str)
    }

    /// Number of handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// `true` when no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Start every handler, stopping at the first failure.
    pub async fn start_all(&self) -> Result<(), HandlerError> {
        for handler in &self.handlers {
            handler.start().await?;
        }
        info!(handlers = self.handlers.len(), "Handlers started");
        Ok(())
    }

    /// Close every handler and join the errors.
    pub async fn close_all(&self) -> Result<(), HandlerError> {
        let results = join_all(self.handlers.iter().map(|handler| handler.close())).await;
        let mut errors: Vec<HandlerError> = results.into_iter().filter_map(Result::err).collect();
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(HandlerError::Joined(errors)),
        }
    }
}
