//! The pump owner: producer entry points, lifecycle and client bindings.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ckmon::{ExceptionData, LogEntry, LogFilter, LogLevel, Tags};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::client::GrandOutputClient;
use crate::config::{DEFAULT_TIMER_DURATION, SinkConfig};
use crate::dispatcher::{ConfigSlot, Dispatcher, Input, initial_filters, send_input};
use crate::error::{Result, SinkError};
use crate::handler::SinkContext;
use crate::registry::HandlerRegistry;

/// Monitor id stamped on contextless logs.
pub const EXTERNAL_MONITOR_ID: &str = "\u{a7}ext";

/// Bound of the input channel.
const CHANNEL_CAPACITY: usize = 16 * 1024;

/// Consumer-task lifecycle. Transitions are one way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Signal observed by collaborators that must abort long-running work when
/// the pump is stopping.
#[derive(Clone)]
pub struct DisposingToken {
    rx: watch::Receiver<bool>,
}

impl DisposingToken {
    pub(crate) fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// `true` once the pump started stopping.
    pub fn is_disposing(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the pump starts stopping (immediately if it already
    /// did).
    pub async fn disposed(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// The pump: aggregates many monitors into many handlers.
///
/// Producers hand entries to [`handle`](GrandOutput::handle) (or bind
/// monitors through [`register_monitor`](GrandOutput::register_monitor)); a
/// single consumer task fans them out to the configured handlers.
/// Everything here is callable from any thread.
pub struct GrandOutput {
    id: Arc<str>,
    tx: mpsc::Sender<Input>,
    filters: Arc<RwLock<crate::client::FilterSettings>>,
    config_slot: Arc<Mutex<ConfigSlot>>,
    clients: Arc<Mutex<Vec<Weak<GrandOutputClient>>>>,
    disposing_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<SinkState>,
    disposed: AtomicBool,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl GrandOutput {
    /// Spawns a pump on the current runtime with an empty handler set.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(registry: HandlerRegistry) -> Arc<Self> {
        let id = next_grand_output_id();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (disposing_tx, disposing_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(SinkState::Starting);
        let filters = Arc::new(RwLock::new(initial_filters()));
        let config_slot = Arc::new(Mutex::new(ConfigSlot::default()));
        let clients: Arc<Mutex<Vec<Weak<GrandOutputClient>>>> =
            Arc::new(Mutex::new(Vec::new()));

        let ctx = SinkContext::new(
            tx.clone(),
            Arc::from(id.as_str()),
            DisposingToken::new(disposing_rx),
        );
        let sweep_list = Arc::clone(&clients);
        let dispatcher = Dispatcher::new(
            rx,
            ctx,
            Arc::new(registry),
            Arc::clone(&filters),
            Arc::clone(&config_slot),
            state_tx,
            Box::new(move || {
                sweep_list
                    .lock()
                    .unwrap()
                    .retain(|weak| weak.strong_count() > 0);
            }),
            DEFAULT_TIMER_DURATION,
        );
        let join = tokio::spawn(dispatcher.run());

        Arc::new(Self {
            id: Arc::from(id.as_str()),
            tx,
            filters,
            config_slot,
            clients,
            disposing_tx,
            state_rx,
            disposed: AtomicBool::new(false),
            join: Mutex::new(Some(join)),
        })
    }

    /// Id of this pump; also the id of its internal monitor, and the
    /// grand-output id stamped on every multicast entry it collects.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current consumer-task lifecycle state.
    pub fn state(&self) -> SinkState {
        *self.state_rx.borrow()
    }

    /// `true` once [`stop`](GrandOutput::stop) was called.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Signal for collaborators that must abort when the pump stops.
    pub fn disposing_token(&self) -> DisposingToken {
        DisposingToken::new(self.disposing_tx.subscribe())
    }

    /// Lower bound currently pushed to bound monitors.
    pub fn minimal_filter(&self) -> LogFilter {
        self.filters.read().unwrap().minimal_filter
    }

    /// Enqueues one entry.
    ///
    /// Malformed entries are dropped with a warning into the pump monitor
    /// stream; a disposed pump drops silently. Never panics, never blocks
    /// beyond the channel's bounded back-pressure.
    pub fn handle(&self, entry: Arc<LogEntry>) {
        if self.is_disposed() {
            return;
        }
        if let Err(e) = entry.data.validate() {
            tracing::warn!(error = %e, "malformed entry dropped");
            let _ = self.tx.try_send(Input::PumpLog {
                level: LogLevel::Warn,
                tags: Tags::empty(),
                text: format!("Malformed entry dropped: {}", e),
                exception: None,
            });
            return;
        }
        send_input(&self.tx, Input::Entry(entry));
    }

    /// Synthesizes a line on the external monitor (id
    /// [`EXTERNAL_MONITOR_ID`]), gated by the configured external log level
    /// filter.
    pub fn external_log(
        &self,
        level: LogLevel,
        tags: Tags,
        text: impl Into<String>,
        exception: Option<ExceptionData>,
    ) {
        if self.is_disposed() {
            return;
        }
        let allowed = self.filters.read().unwrap().external_filter.allows(level);
        if !allowed {
            return;
        }
        send_input(
            &self.tx,
            Input::ExternalLog {
                level,
                tags,
                text: text.into(),
                exception,
            },
        );
    }

    /// Submits a target configuration.
    ///
    /// With `wait`, resolves once this configuration (or a newer one that
    /// superseded it) has been applied; without, returns immediately after
    /// enqueueing. Returns [`SinkError::Stopped`] instead of blocking when
    /// the pump is stopping.
    pub async fn apply_configuration(&self, config: SinkConfig, wait: bool) -> Result<()> {
        if self.is_disposed() {
            return Err(SinkError::Stopped);
        }
        let waiter = if wait {
            let (tx, rx) = oneshot::channel();
            self.config_slot.lock().unwrap().replace(config, Some(tx));
            Some(rx)
        } else {
            self.config_slot.lock().unwrap().replace(config, None);
            None
        };
        if self.tx.send(Input::ConfigChanged).await.is_err() {
            return Err(SinkError::Stopped);
        }
        match waiter {
            Some(rx) => rx.await.map_err(|_| SinkError::Stopped)?,
            None => Ok(()),
        }
    }

    /// Binds a monitor, returning its client.
    ///
    /// At most one client exists per (pump, monitor id); re-registering
    /// returns the existing client with its previous-entry chain reset.
    /// The pump only keeps a weak reference: a client dropped by its monitor
    /// is swept out during periodic maintenance.
    pub fn register_monitor(&self, monitor_id: impl Into<String>) -> Arc<GrandOutputClient> {
        let monitor_id = monitor_id.into();
        let mut clients = self.clients.lock().unwrap();
        clients.retain(|weak| weak.strong_count() > 0);
        if let Some(existing) = clients
            .iter()
            .filter_map(Weak::upgrade)
            .find(|client| client.monitor_id() == monitor_id)
        {
            existing.reset_chain();
            return existing;
        }
        let client = Arc::new(GrandOutputClient::new(
            monitor_id,
            Arc::clone(&self.id),
            self.tx.clone(),
            Arc::clone(&self.filters),
            self.disposing_token(),
        ));
        clients.push(Arc::downgrade(&client));
        client
    }

    /// Asks the consumer task to prune dead client bindings now.
    pub fn garbage_dead_clients(&self) {
        let _ = self.tx.try_send(Input::GarbageDeadClients);
    }

    /// Stops the pump.
    ///
    /// Flips the disposing token, lets the consumer drain what is already
    /// queued and deactivate every handler in order, and waits up to
    /// `timeout` (forever when `None`). After the timeout the task is
    /// abandoned and whatever remained queued is dropped.
    pub async fn stop(&self, timeout: Option<Duration>) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.disposing_tx.send(true);
        let _ = self.tx.send(Input::Stop).await;
        let handle = self.join.lock().unwrap().take();
        if let Some(mut handle) = handle {
            match timeout {
                Some(limit) => {
                    if tokio::time::timeout(limit, &mut handle).await.is_err() {
                        handle.abort();
                        tracing::warn!("consumer task abandoned after the stop timeout");
                    }
                }
                None => {
                    let _ = handle.await;
                }
            }
        }
        // Waiters that raced the shutdown must not block forever.
        self.config_slot.lock().unwrap().drain_stopped();
    }
}

/// Process-unique pump id: creation time plus a process counter.
fn next_grand_output_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let epoch_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    format!(
        "{:x}-{:x}",
        epoch_ms,
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Opt-in process-wide default pump.
///
/// Nothing is constructed during module initialization: the slot stays empty
/// until [`GrandOutput::ensure_default`] is called explicitly, and
/// [`GrandOutput::release_default`] gives deterministic teardown.
static DEFAULT_INSTANCE: OnceLock<Mutex<Option<Arc<GrandOutput>>>> = OnceLock::new();

fn default_slot() -> &'static Mutex<Option<Arc<GrandOutput>>> {
    DEFAULT_INSTANCE.get_or_init(|| Mutex::new(None))
}

impl GrandOutput {
    /// Installs (or returns) the process-wide default pump.
    pub fn ensure_default(registry: impl FnOnce() -> HandlerRegistry) -> Arc<GrandOutput> {
        let mut slot = default_slot().lock().unwrap();
        match slot.as_ref() {
            Some(existing) if !existing.is_disposed() => Arc::clone(existing),
            _ => {
                let fresh = GrandOutput::new(registry());
                *slot = Some(Arc::clone(&fresh));
                fresh
            }
        }
    }

    /// The default pump, when one was installed.
    pub fn default_instance() -> Option<Arc<GrandOutput>> {
        default_slot().lock().unwrap().clone()
    }

    /// Stops and clears the default pump.
    pub async fn release_default(timeout: Option<Duration>) {
        let taken = default_slot().lock().unwrap().take();
        if let Some(pump) = taken {
            pump.stop(timeout).await;
        }
    }
}
