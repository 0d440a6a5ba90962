//! Handler registry: configured name → layout strategy.
//!
//! The registry maps a handler name (the string a repository configuration
//! carries) to a factory producing a [`StorageHandler`] for a given
//! repository root. The facade resolves its handler through an injected
//! registry instance at construction time; there is no process-wide mutable
//! registry, and an unknown name fails the operation up front with
//! [`RegistryError::UnknownHandler`].
//!
//! [`HandlerRegistry::with_builtins`] registers the two built-in layouts
//! (`"simple"`, `"hive"`); external callers can register additional
//! strategies under their own names.

use std::collections::HashMap;
use std::sync::Arc;

use snafu::{Backtrace, prelude::*};

use crate::handlers::{hive, simple, StorageHandler};
use crate::storage::RepoLocation;

/// Factory producing a handler instance for a repository root.
pub type HandlerFactory = Arc<dyn Fn(RepoLocation) -> Arc<dyn StorageHandler> + Send + Sync>;

/// Registry of named handler factories.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    /// An empty registry with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in `"simple"` and `"hive"` layouts.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(simple::HANDLER_NAME, |root| {
            Arc::new(simple::SimpleFileHandler::new(root))
        });
        registry.register(hive::HANDLER_NAME, |root| {
            Arc::new(hive::HivePartitionHandler::new(root))
        });
        registry
    }

    /// Register (or replace) a handler factory under `name`.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(RepoLocation) -> Arc<dyn StorageHandler> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Resolve `name` into a live handler for `root`.
    pub fn resolve(
        &self,
        name: &str,
        root: RepoLocation,
    ) -> Result<Arc<dyn StorageHandler>, RegistryError> {
        let factory = self.factories.get(name).context(UnknownHandlerSnafu {
            name: name.to_string(),
        })?;
        Ok(factory(root))
    }

    /// Names of all registered handlers, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

/// Errors raised during handler resolution.
#[derive(Debug, Snafu)]
pub enum RegistryError {
    /// The configuration names a handler no factory supplies.
    #[snafu(display("No handler registered under name '{name}'"))]
    UnknownHandler {
        /// The unresolved handler name.
        name: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },
}
