//! The consumer side of the pump.
//!
//! A single task owns the handler list and drains the bounded input channel:
//! entries fan out to every live handler in operator order, commands mutate
//! the handler set, and two intervals drive the handler timer and the
//! dead-client sweep. Nothing else ever touches a handler after activation.
//!
//! Reconfiguration goes through a shared pending slot rather than the
//! channel payload: the owner replaces the slot content and nudges the loop,
//! so a newer configuration supersedes an older one that was not applied
//! yet, and every waiter (superseded ones included) is released when the
//! latest configuration completes.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use ckmon::{
    ExceptionData, LogData, LogEntry, LogFilter, LogKind, LogLevel, LogLevelFilter, MulticastInfo,
    Tags,
};
use common::DateTimeStamp;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};

use crate::client::FilterSettings;
use crate::config::SinkConfig;
use crate::error::SinkError;
use crate::grand_output::SinkState;
use crate::handler::{Handler, SinkContext};
use crate::registry::HandlerRegistry;

/// Period of the dead-client sweep.
pub(crate) const GARBAGE_PERIOD: Duration = Duration::from_secs(300);

/// Everything the consumer task can receive.
pub(crate) enum Input {
    /// A producer entry, fanned out to every handler.
    Entry(Arc<LogEntry>),
    /// A line for the pump's own monitor stream; materialized on the
    /// consumer task so the monitor's prev-entry chain stays single-writer.
    PumpLog {
        level: LogLevel,
        tags: Tags,
        text: String,
        exception: Option<ExceptionData>,
    },
    /// A contextless line (monitor id [`EXTERNAL_MONITOR_ID`](crate::EXTERNAL_MONITOR_ID)).
    ExternalLog {
        level: LogLevel,
        tags: Tags,
        text: String,
        exception: Option<ExceptionData>,
    },
    /// The pending-configuration slot changed.
    ConfigChanged,
    /// Prune dead client bindings now.
    GarbageDeadClients,
    /// Deactivate every handler and terminate.
    Stop,
}

/// Enqueues from a producer thread with bounded back-pressure.
///
/// The fast path never blocks; a saturated channel degrades to a blocking
/// send so producers slow down instead of losing entries.
pub(crate) fn send_input(tx: &mpsc::Sender<Input>, input: Input) {
    match tx.try_send(input) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Closed(_)) => {}
        Err(mpsc::error::TrySendError::Full(input)) => {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    tokio::task::block_in_place(|| {
                        let _ = handle.block_on(tx.send(input));
                    });
                }
                Err(_) => {
                    let _ = tx.blocking_send(input);
                }
            }
        }
    }
}

/// Shared pending-configuration slot.
#[derive(Default)]
pub(crate) struct ConfigSlot {
    next: Option<SinkConfig>,
    waiters: Vec<oneshot::Sender<Result<(), SinkError>>>,
}

impl ConfigSlot {
    /// Replaces the pending configuration, keeping previously registered
    /// waiters so they resolve with the newer application.
    pub(crate) fn replace(
        &mut self,
        config: SinkConfig,
        waiter: Option<oneshot::Sender<Result<(), SinkError>>>,
    ) {
        self.next = Some(config);
        if let Some(waiter) = waiter {
            self.waiters.push(waiter);
        }
    }

    fn take(&mut self) -> (Option<SinkConfig>, Vec<oneshot::Sender<Result<(), SinkError>>>) {
        (self.next.take(), std::mem::take(&mut self.waiters))
    }

    /// Fails every waiter; used when the pump stops.
    pub(crate) fn drain_stopped(&mut self) {
        self.next = None;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(SinkError::Stopped));
        }
    }
}

/// Per-monitor previous-entry chain owned by the consumer task.
struct ChainState {
    monitor_id: String,
    prev_kind: Option<LogKind>,
    prev_time: DateTimeStamp,
}

impl ChainState {
    fn new(monitor_id: impl Into<String>) -> Self {
        Self {
            monitor_id: monitor_id.into(),
            prev_kind: None,
            prev_time: DateTimeStamp::UNKNOWN,
        }
    }
}

struct HandlerSlot {
    handler: Box<dyn Handler>,
    config: Box<dyn crate::config::HandlerConfig>,
}

pub(crate) struct Dispatcher {
    rx: mpsc::Receiver<Input>,
    ctx: SinkContext,
    registry: Arc<HandlerRegistry>,
    handlers: Vec<HandlerSlot>,
    filters: Arc<RwLock<FilterSettings>>,
    config_slot: Arc<Mutex<ConfigSlot>>,
    state_tx: watch::Sender<SinkState>,
    garbage_callback: Box<dyn FnMut() + Send>,
    timer_duration: Duration,
    timer_changed: bool,
    config_count: u64,
    pump_chain: ChainState,
    external_chain: ChainState,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        rx: mpsc::Receiver<Input>,
        ctx: SinkContext,
        registry: Arc<HandlerRegistry>,
        filters: Arc<RwLock<FilterSettings>>,
        config_slot: Arc<Mutex<ConfigSlot>>,
        state_tx: watch::Sender<SinkState>,
        garbage_callback: Box<dyn FnMut() + Send>,
        timer_duration: Duration,
    ) -> Self {
        // The pump's own monitor shares the pump id.
        let pump_chain = ChainState::new(ctx.grand_output_id());
        Self {
            rx,
            ctx,
            registry,
            handlers: Vec::new(),
            filters,
            config_slot,
            state_tx,
            garbage_callback,
            timer_duration,
            timer_changed: false,
            config_count: 0,
            pump_chain,
            external_chain: ChainState::new(crate::grand_output::EXTERNAL_MONITOR_ID),
        }
    }

    /// The consumer loop. Runs until a [`Input::Stop`] arrives or every
    /// sender is gone.
    pub(crate) async fn run(mut self) {
        self.state_tx.send_replace(SinkState::Running);

        let mut timer = tokio::time::interval(self.timer_duration);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer.reset();
        let mut garbage = tokio::time::interval(GARBAGE_PERIOD);
        garbage.set_missed_tick_behavior(MissedTickBehavior::Delay);
        garbage.reset();
        let mut last_tick = Instant::now();

        loop {
            tokio::select! {
                input = self.rx.recv() => {
                    match input {
                        Some(Input::Entry(entry)) => self.dispatch(&entry).await,
                        Some(Input::PumpLog { level, tags, text, exception }) => {
                            let entry = materialize(
                                &mut self.pump_chain,
                                self.ctx.grand_output_id(),
                                level, tags, text, exception,
                            );
                            self.dispatch(&entry).await;
                        }
                        Some(Input::ExternalLog { level, tags, text, exception }) => {
                            let entry = materialize(
                                &mut self.external_chain,
                                self.ctx.grand_output_id(),
                                level, tags, text, exception,
                            );
                            self.dispatch(&entry).await;
                        }
                        Some(Input::ConfigChanged) => self.apply_pending().await,
                        Some(Input::GarbageDeadClients) => (self.garbage_callback)(),
                        Some(Input::Stop) | None => break,
                    }
                }
                _ = timer.tick() => {
                    let elapsed = last_tick.elapsed();
                    last_tick = Instant::now();
                    self.tick(elapsed).await;
                }
                _ = garbage.tick() => (self.garbage_callback)(),
            }

            if self.timer_changed {
                self.timer_changed = false;
                timer = tokio::time::interval(self.timer_duration);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                timer.reset();
            }
        }

        self.state_tx.send_replace(SinkState::Stopping);
        for mut slot in self.handlers.drain(..) {
            slot.handler.deactivate(&self.ctx).await;
        }
        self.config_slot.lock().unwrap().drain_stopped();
        self.state_tx.send_replace(SinkState::Stopped);
    }

    /// Fans one entry out to every handler, evicting the ones that fail.
    async fn dispatch(&mut self, entry: &Arc<LogEntry>) {
        let mut failed: Vec<(usize, String)> = Vec::new();
        for (index, slot) in self.handlers.iter_mut().enumerate() {
            if let Err(e) = slot.handler.handle(&self.ctx, entry).await {
                failed.push((index, e.to_string()));
            }
        }
        self.evict(failed).await;
    }

    async fn tick(&mut self, elapsed: Duration) {
        let mut failed: Vec<(usize, String)> = Vec::new();
        for (index, slot) in self.handlers.iter_mut().enumerate() {
            if let Err(e) = slot.handler.on_timer(&self.ctx, elapsed).await {
                failed.push((index, e.to_string()));
            }
        }
        self.evict(failed).await;
    }

    async fn evict(&mut self, failed: Vec<(usize, String)>) {
        for (index, error) in failed.into_iter().rev() {
            let mut slot = self.handlers.remove(index);
            slot.handler.deactivate(&self.ctx).await;
            tracing::error!(
                handler = slot.config.type_name(),
                %error,
                "handler evicted after a failure"
            );
            self.ctx.log(
                LogLevel::Error,
                Tags::empty(),
                format!(
                    "Handler '{}' removed after a failure: {}",
                    slot.config.type_name(),
                    error
                ),
                None,
            );
        }
    }

    /// Applies the latest pending configuration, if any.
    async fn apply_pending(&mut self) {
        let (config, waiters) = self.config_slot.lock().unwrap().take();
        let Some(config) = config else {
            // Superseded nudge: the newer ConfigChanged already consumed the
            // slot together with our waiters.
            debug_assert!(waiters.is_empty());
            return;
        };

        let number = self.config_count;
        self.config_count += 1;
        self.ctx.log(
            LogLevel::Info,
            Tags::empty(),
            format!("Applying configuration n°{}.", number),
            None,
        );

        self.reconcile_handlers(&config).await;
        self.apply_settings(&config);

        self.ctx.log(
            LogLevel::Info,
            Tags::empty(),
            format!("Configuration n°{} applied.", number),
            None,
        );
        for waiter in waiters {
            let _ = waiter.send(Ok(()));
        }
    }

    async fn reconcile_handlers(&mut self, config: &SinkConfig) {
        let mut remaining = std::mem::take(&mut self.handlers);
        let mut next = Vec::with_capacity(config.handlers.len());

        for handler_config in &config.handlers {
            // Same configuration type: offer the value to the live instance
            // so it can keep its state.
            let position = remaining
                .iter()
                .position(|slot| slot.config.type_name() == handler_config.type_name());
            if let Some(position) = position {
                let mut slot = remaining.remove(position);
                if slot
                    .handler
                    .apply_configuration(&self.ctx, handler_config.as_ref())
                    .await
                {
                    slot.config = handler_config.clone();
                    next.push(slot);
                    continue;
                }
                slot.handler.deactivate(&self.ctx).await;
            }

            match self.registry.create(handler_config.as_ref()) {
                Ok(mut handler) => match handler.activate(&self.ctx).await {
                    Ok(true) => next.push(HandlerSlot {
                        handler,
                        config: handler_config.clone(),
                    }),
                    Ok(false) => {}
                    Err(e) => {
                        self.ctx.log(
                            LogLevel::Error,
                            Tags::empty(),
                            format!(
                                "Handler '{}' activation failed: {}",
                                handler_config.type_name(),
                                e
                            ),
                            None,
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "handler configuration skipped");
                    self.ctx.log(
                        LogLevel::Error,
                        Tags::empty(),
                        format!("While applying dynamic configuration. {}", e),
                        None,
                    );
                }
            }
        }

        for mut slot in remaining {
            slot.handler.deactivate(&self.ctx).await;
        }
        self.handlers = next;
    }

    fn apply_settings(&mut self, config: &SinkConfig) {
        if !config.timer_duration.is_zero() && config.timer_duration != self.timer_duration {
            self.timer_duration = config.timer_duration;
            self.timer_changed = true;
        }
        let mut filters = self.filters.write().unwrap();
        if !config.minimal_filter.is_undefined() {
            filters.minimal_filter = config.minimal_filter;
        }
        if config.external_log_level_filter != LogLevelFilter::Undefined {
            filters.external_filter = config.external_log_level_filter;
        }
        filters.tag_filters = config.tag_filters.clone();
    }
}

/// Builds a line entry on one of the pump-owned monitor chains.
fn materialize(
    chain: &mut ChainState,
    grand_output_id: &str,
    level: LogLevel,
    tags: Tags,
    text: String,
    exception: Option<ExceptionData>,
) -> Arc<LogEntry> {
    let now = DateTimeStamp::now();
    let time = if chain.prev_time.is_known() {
        DateTimeStamp::unique_after(chain.prev_time, now)
    } else {
        now
    };
    let monitor_id = chain.monitor_id.clone();
    let mut data = LogData::line(level, tags, text, time);
    data.exception = exception;
    let entry = Arc::new(LogEntry::multicast(
        data,
        MulticastInfo {
            grand_output_id: grand_output_id.to_string(),
            monitor_id,
            prev_kind: chain.prev_kind,
            prev_time: chain.prev_time,
            depth: 0,
        },
    ));
    chain.prev_kind = Some(LogKind::Line);
    chain.prev_time = time;
    entry
}

/// Default filter state before any configuration applied.
pub(crate) fn initial_filters() -> FilterSettings {
    FilterSettings {
        minimal_filter: LogFilter::UNDEFINED,
        external_filter: LogLevelFilter::Undefined,
        tag_filters: Vec::new(),
    }
}
