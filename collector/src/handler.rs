//! The handler contract and the narrowed pump reference handed to handlers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ckmon::{ExceptionData, LogEntry, LogLevel, Tags};
use tokio::sync::mpsc;

use crate::config::HandlerConfig;
use crate::dispatcher::Input;
use crate::grand_output::DisposingToken;

/// Failure reported by a handler.
///
/// A failing [`activate`](Handler::activate) drops the handler with a pump
/// diagnostic; a failing [`handle`](Handler::handle) or
/// [`on_timer`](Handler::on_timer) evicts it permanently.
#[derive(Debug, Clone)]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl std::error::Error for HandlerError {}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        HandlerError(err.to_string())
    }
}

impl From<ckmon::Error> for HandlerError {
    fn from(err: ckmon::Error) -> Self {
        HandlerError(err.to_string())
    }
}

/// Result type alias for handler operations.
pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

/// Capability-narrowed reference to the pump, handed to handlers.
///
/// Handlers never hold the pump itself; they get this context, which lets
/// them write diagnostics into the pump's own monitor stream and observe the
/// shutdown signal, nothing more.
#[derive(Clone)]
pub struct SinkContext {
    tx: mpsc::Sender<Input>,
    grand_output_id: Arc<str>,
    disposing: DisposingToken,
}

impl SinkContext {
    pub(crate) fn new(
        tx: mpsc::Sender<Input>,
        grand_output_id: Arc<str>,
        disposing: DisposingToken,
    ) -> Self {
        Self {
            tx,
            grand_output_id,
            disposing,
        }
    }

    /// Id of the pump, which is also the id of its internal monitor.
    pub fn grand_output_id(&self) -> &str {
        &self.grand_output_id
    }

    /// Signal flipped when the pump starts stopping.
    pub fn disposing_token(&self) -> DisposingToken {
        self.disposing.clone()
    }

    /// Writes a line into the pump's own monitor stream.
    ///
    /// The line travels the regular pipeline and reaches every handler. This
    /// never blocks: when the channel is saturated the line is dropped with
    /// an out-of-band warning.
    pub fn log(
        &self,
        level: LogLevel,
        tags: Tags,
        text: impl Into<String>,
        exception: Option<ExceptionData>,
    ) {
        let input = Input::PumpLog {
            level,
            tags,
            text: text.into(),
            exception,
        };
        if self.tx.try_send(input).is_err() {
            tracing::warn!("pump monitor line dropped: channel saturated or closed");
        }
    }
}

/// A sink consuming log entries.
///
/// Handlers live on the consumer task: every method is invoked serially,
/// never concurrently, and may suspend. A handler must not block
/// indefinitely; a slow handler delays every handler behind it by design so
/// that no handler observes entries out of order.
#[async_trait]
pub trait Handler: Send {
    /// Admission. Returning `Ok(false)` silently removes the handler from
    /// the set; an error removes it with a pump diagnostic.
    async fn activate(&mut self, ctx: &SinkContext) -> HandlerResult<bool>;

    /// Delivers one entry. An error permanently evicts the handler.
    async fn handle(&mut self, ctx: &SinkContext, entry: &Arc<LogEntry>) -> HandlerResult<()>;

    /// Periodic tick; used by poll-based handlers for reconnection attempts
    /// and flushes.
    async fn on_timer(&mut self, _ctx: &SinkContext, _elapsed: Duration) -> HandlerResult<()> {
        Ok(())
    }

    /// Offers a new configuration of the same type. Returning `true` means
    /// the instance adopted it (state preserved); `false` makes the pump
    /// destroy this instance and build a fresh one.
    async fn apply_configuration(&mut self, ctx: &SinkContext, config: &dyn HandlerConfig)
    -> bool;

    /// Terminal cleanup. Called exactly once, on removal or pump stop.
    async fn deactivate(&mut self, ctx: &SinkContext);
}
