//! Explicit mapping from configuration types to handler factories.

use std::collections::HashMap;

use crate::config::HandlerConfig;
use crate::error::SinkError;
use crate::handler::Handler;
use crate::handlers::binary_file::{BinaryFileHandler, BinaryFileHandlerConfig};

/// Factory building a handler out of its configuration value.
///
/// Returning `None` rejects the value (the configuration is skipped with a
/// pump diagnostic, the rest still applies).
pub type HandlerFactory =
    Box<dyn Fn(&dyn HandlerConfig) -> Option<Box<dyn Handler>> + Send + Sync>;

/// Registration table consulted when a configuration is applied.
///
/// Populated at startup; the pump only reads it afterwards.
#[derive(Default)]
pub struct HandlerRegistry {
    factories: HashMap<&'static str, HandlerFactory>,
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in handlers registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(BinaryFileHandlerConfig::TYPE_NAME, |config| {
            let config = config.as_any().downcast_ref::<BinaryFileHandlerConfig>()?;
            Some(Box::new(BinaryFileHandler::new(config.clone())) as Box<dyn Handler>)
        });
        registry
    }

    /// Registers a factory for a configuration type name, replacing any
    /// previous registration.
    pub fn register(
        &mut self,
        type_name: &'static str,
        factory: impl Fn(&dyn HandlerConfig) -> Option<Box<dyn Handler>> + Send + Sync + 'static,
    ) {
        self.factories.insert(type_name, Box::new(factory));
    }

    /// Builds a handler for `config`.
    pub fn create(&self, config: &dyn HandlerConfig) -> Result<Box<dyn Handler>, SinkError> {
        let name = config.type_name();
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| SinkError::UnknownHandlerType(name.to_string()))?;
        factory(config).ok_or_else(|| {
            SinkError::InvalidConfiguration(format!("factory rejected a {:?} value", name))
        })
    }
}
