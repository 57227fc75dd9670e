//! Configuration values consumed by the pump.

use std::any::Any;
use std::fmt::Debug;
use std::time::Duration;

use ckmon::{LogFilter, LogLevelFilter, Tags};

/// Period of the handler timer when a configuration does not override it.
pub const DEFAULT_TIMER_DURATION: Duration = Duration::from_millis(500);

/// One handler's configuration value.
///
/// The concrete type selects the handler: the pump looks the
/// [`type_name`](HandlerConfig::type_name) up in its
/// [`HandlerRegistry`](crate::HandlerRegistry) and hands the value to the
/// factory found there. During reconfiguration, a live handler whose
/// configuration shares the type name is offered the new value first
/// (`apply_configuration`) so it can keep its state.
pub trait HandlerConfig: Any + Debug + Send + Sync {
    /// Stable name of this configuration type, the registry key.
    fn type_name(&self) -> &'static str;

    /// Downcast support for handlers inspecting their own configuration.
    fn as_any(&self) -> &dyn Any;

    /// Clones the boxed value.
    fn clone_box(&self) -> Box<dyn HandlerConfig>;
}

impl Clone for Box<dyn HandlerConfig> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Target state handed to [`GrandOutput::apply_configuration`](crate::GrandOutput::apply_configuration).
///
/// Handler order is operator order and is preserved through delivery (a
/// handler listed before another sees every entry first).
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Period of the handler `on_timer` tick.
    pub timer_duration: Duration,

    /// Ordered handler set.
    pub handlers: Vec<Box<dyn HandlerConfig>>,

    /// Lower bound pushed to every bound monitor. `UNDEFINED` retains the
    /// previously applied value.
    pub minimal_filter: LogFilter,

    /// Gate for contextless logs. `Undefined` retains the previously applied
    /// value.
    pub external_log_level_filter: LogLevelFilter,

    /// Per-tag overrides of the minimal filter; when several matchers overlap
    /// an entry's tags, the most verbose filter wins.
    pub tag_filters: Vec<(Tags, LogFilter)>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            timer_duration: DEFAULT_TIMER_DURATION,
            handlers: Vec::new(),
            minimal_filter: LogFilter::UNDEFINED,
            external_log_level_filter: LogLevelFilter::Undefined,
            tag_filters: Vec::new(),
        }
    }
}

impl SinkConfig {
    /// Appends a handler configuration, preserving order.
    pub fn add_handler(mut self, config: impl HandlerConfig) -> Self {
        self.handlers.push(Box::new(config));
        self
    }
}
