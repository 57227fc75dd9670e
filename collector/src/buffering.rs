//! Template for handlers whose delivery can transiently fail.
//!
//! A remote-delivery handler may be activated before its transport is
//! reachable, and a healthy link can drop later. [`BufferingSink`] wraps the
//! transport behind the [`Sender`] capability and parks undeliverable
//! entries in a bounded FIFO: sized by `initial_buffer_size` while no sender
//! exists yet, resized to `lost_buffer_size` once a sender has been created.
//! On every delivery attempt the buffer drains head first, so a recovered
//! link replays entries in their original order ahead of the new one.
//!
//! Buffers are memory only: deactivation discards whatever is still parked.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ckmon::LogEntry;
use common::Fifo;

use crate::config::HandlerConfig;
use crate::handler::{Handler, HandlerError, HandlerResult, SinkContext};

/// Buffer sizing for a [`BufferingSink`], carried inside the concrete
/// handler configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferingSinkConfig {
    /// Capacity used before the first sender exists.
    pub initial_buffer_size: usize,
    /// Capacity used once a sender has been created, sized for outage
    /// windows of an established link.
    pub lost_buffer_size: usize,
}

impl Default for BufferingSinkConfig {
    fn default() -> Self {
        Self {
            initial_buffer_size: 0,
            lost_buffer_size: 0,
        }
    }
}

/// Transport capability used by [`BufferingSink`].
#[async_trait]
pub trait Sender: Send {
    /// Current link state.
    fn is_actually_connected(&self) -> bool;

    /// Attempts one delivery. Never errors: `false` is a transient failure
    /// (the entry will be buffered and retried); permanent failures are the
    /// sender's own business and still return `false`.
    async fn try_send(&mut self, entry: &Arc<LogEntry>) -> bool;

    /// Releases transport resources.
    async fn dispose(&mut self);
}

/// Supplies senders to a [`BufferingSink`].
#[async_trait]
pub trait SenderProvider: Send {
    /// Whether creating a sender can be attempted yet (for example, the
    /// application identity is known). Defaults to `true`.
    fn sender_can_be_created(&self, _ctx: &SinkContext) -> bool {
        true
    }

    /// Builds a sender. `None` is a hard failure: at activation time it
    /// rejects the handler, later on it evicts it.
    async fn create_sender(&mut self, ctx: &SinkContext) -> Option<Box<dyn Sender>>;

    /// Offers a configuration of the concrete handler's type. Returning the
    /// updated buffer sizing adopts it; `None` makes the pump rebuild the
    /// handler.
    async fn apply_configuration(
        &mut self,
        ctx: &SinkContext,
        config: &dyn HandlerConfig,
    ) -> Option<BufferingSinkConfig>;
}

/// Handler template buffering entries across transport outages.
pub struct BufferingSink<P: SenderProvider> {
    provider: P,
    config: BufferingSinkConfig,
    sender: Option<Box<dyn Sender>>,
    buffer: Fifo<Arc<LogEntry>>,
}

impl<P: SenderProvider> BufferingSink<P> {
    pub fn new(provider: P, config: BufferingSinkConfig) -> Self {
        Self {
            provider,
            config,
            sender: None,
            buffer: Fifo::new(config.initial_buffer_size),
        }
    }

    /// Number of entries currently parked.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    async fn ensure_sender(&mut self, ctx: &SinkContext) -> HandlerResult<()> {
        if self.sender.is_some() || !self.provider.sender_can_be_created(ctx) {
            return Ok(());
        }
        match self.provider.create_sender(ctx).await {
            Some(sender) => {
                self.sender = Some(sender);
                self.buffer.set_capacity(self.config.lost_buffer_size);
                Ok(())
            }
            None => Err(HandlerError::new("sender creation failed")),
        }
    }

    async fn drain_buffer(&mut self) -> bool {
        let Some(sender) = self.sender.as_mut() else {
            return false;
        };
        while let Some(head) = self.buffer.peek() {
            if !sender.is_actually_connected() || !sender.try_send(head).await {
                return false;
            }
            self.buffer.pop();
        }
        true
    }
}

#[async_trait]
impl<P: SenderProvider> Handler for BufferingSink<P> {
    async fn activate(&mut self, ctx: &SinkContext) -> HandlerResult<bool> {
        if self.provider.sender_can_be_created(ctx) {
            match self.provider.create_sender(ctx).await {
                Some(sender) => {
                    self.sender = Some(sender);
                    self.buffer.set_capacity(self.config.lost_buffer_size);
                }
                None => return Ok(false),
            }
        }
        // Admitted in pre-connection mode: the buffer keeps its initial size
        // until a sender exists.
        Ok(true)
    }

    async fn handle(&mut self, ctx: &SinkContext, entry: &Arc<LogEntry>) -> HandlerResult<()> {
        self.ensure_sender(ctx).await?;

        if !self.drain_buffer().await {
            self.buffer.push(entry.clone());
            return Ok(());
        }

        let delivered = match self.sender.as_mut() {
            Some(sender) => sender.is_actually_connected() && sender.try_send(entry).await,
            None => false,
        };
        if !delivered {
            self.buffer.push(entry.clone());
        }
        Ok(())
    }

    async fn on_timer(&mut self, ctx: &SinkContext, _elapsed: Duration) -> HandlerResult<()> {
        // Reconnection attempts are driven by the tick: an idle pump still
        // replays its backlog once the link is back.
        self.ensure_sender(ctx).await?;
        self.drain_buffer().await;
        Ok(())
    }

    async fn apply_configuration(
        &mut self,
        ctx: &SinkContext,
        config: &dyn HandlerConfig,
    ) -> bool {
        let Some(sizes) = self.provider.apply_configuration(ctx, config).await else {
            return false;
        };
        self.config = sizes;
        let capacity = if self.sender.is_some() {
            sizes.lost_buffer_size
        } else {
            sizes.initial_buffer_size
        };
        self.buffer.set_capacity(capacity);
        true
    }

    async fn deactivate(&mut self, _ctx: &SinkContext) {
        if let Some(mut sender) = self.sender.take() {
            sender.dispose().await;
        }
        self.buffer.clear();
    }
}
