//! End-to-end tests of the pump: fan-out, hot reconfiguration, filters,
//! eviction and shutdown, observed through in-memory recording handlers.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ckmon::{LogData, LogEntry, LogFilter, LogKind, LogLevel, LogLevelFilter, Tags};
use common::DateTimeStamp;

use collector::{
    GrandOutput, Handler, HandlerConfig, HandlerError, HandlerRegistry, SinkConfig, SinkContext,
    SinkError, SinkState,
};

/// Entries seen by one recording handler.
type RecordedLog = Arc<Mutex<Vec<Arc<LogEntry>>>>;

/// Test handler configuration; the `name` doubles as the registry key so a
/// single test can run several independent recording handlers.
#[derive(Debug, Clone)]
struct RecordingConfig {
    name: &'static str,
    log: RecordedLog,
    deactivated: Arc<AtomicBool>,
    /// When set, `handle` fails on every entry whose text contains "poison".
    poisonous: bool,
}

impl RecordingConfig {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            log: Arc::new(Mutex::new(Vec::new())),
            deactivated: Arc::new(AtomicBool::new(false)),
            poisonous: false,
        }
    }

    fn texts(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| e.data.text.clone())
            .collect()
    }

    fn entries(&self) -> Vec<Arc<LogEntry>> {
        self.log.lock().unwrap().clone()
    }
}

impl HandlerConfig for RecordingConfig {
    fn type_name(&self) -> &'static str {
        self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn HandlerConfig> {
        Box::new(self.clone())
    }
}

struct RecordingHandler {
    config: RecordingConfig,
}

#[async_trait]
impl Handler for RecordingHandler {
    async fn activate(&mut self, _ctx: &SinkContext) -> Result<bool, HandlerError> {
        Ok(true)
    }

    async fn handle(
        &mut self,
        _ctx: &SinkContext,
        entry: &Arc<LogEntry>,
    ) -> Result<(), HandlerError> {
        if self.config.poisonous
            && entry
                .data
                .text
                .as_deref()
                .is_some_and(|t| t.contains("poison"))
        {
            return Err(HandlerError::new("poisoned entry"));
        }
        self.config.log.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn apply_configuration(
        &mut self,
        _ctx: &SinkContext,
        config: &dyn HandlerConfig,
    ) -> bool {
        match config.as_any().downcast_ref::<RecordingConfig>() {
            Some(config) if config.name == self.config.name => {
                self.config = config.clone();
                true
            }
            _ => false,
        }
    }

    async fn deactivate(&mut self, _ctx: &SinkContext) {
        self.config.deactivated.store(true, Ordering::SeqCst);
    }
}

/// An always-rejected configuration: its type name has no factory.
#[derive(Debug, Clone)]
struct UnknownConfig;

impl HandlerConfig for UnknownConfig {
    fn type_name(&self) -> &'static str {
        "NoSuchHandler"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn HandlerConfig> {
        Box::new(self.clone())
    }
}

fn registry_for(names: &[&'static str]) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for &name in names {
        registry.register(name, |config| {
            let config = config.as_any().downcast_ref::<RecordingConfig>()?;
            Some(Box::new(RecordingHandler {
                config: config.clone(),
            }) as Box<dyn Handler>)
        });
    }
    registry
}

fn config_with(handlers: Vec<Box<dyn HandlerConfig>>) -> SinkConfig {
    SinkConfig {
        handlers,
        ..SinkConfig::default()
    }
}

fn line(level: LogLevel, tags: &str, text: &str) -> LogData {
    LogData::line(level, Tags::parse(tags), text, DateTimeStamp::UNKNOWN)
}

/// Polls until `predicate` holds, within a generous bound.
async fn wait_until(what: &str, predicate: impl Fn() -> bool) {
    for _ in 0..400 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {}", what);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn should_apply_each_configuration_exactly_once() {
    // given
    let pump = GrandOutput::new(registry_for(&["RecA", "RecB"]));
    let rec_a = RecordingConfig::new("RecA");
    let rec_b = RecordingConfig::new("RecB");

    // when - two successive configurations
    pump.apply_configuration(config_with(vec![Box::new(rec_a.clone())]), true)
        .await
        .unwrap();
    pump.apply_configuration(
        config_with(vec![Box::new(rec_a.clone()), Box::new(rec_b.clone())]),
        true,
    )
    .await
    .unwrap();
    pump.external_log(LogLevel::Info, Tags::empty(), "marker", None);

    wait_until("marker delivered", || {
        rec_a.texts().iter().any(|t| t == "marker")
    })
    .await;

    // then - the pump stream numbered both applications and nothing more
    let texts = rec_a.texts();
    assert!(texts.iter().any(|t| t.contains("n°0")), "{:?}", texts);
    assert!(texts.iter().any(|t| t.contains("n°1")), "{:?}", texts);
    assert!(!texts.iter().any(|t| t.contains("n°2")), "{:?}", texts);

    pump.stop(None).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn should_replace_the_handler_set_on_reconfiguration() {
    // given
    let pump = GrandOutput::new(registry_for(&["RecA", "RecB"]));
    let rec_a = RecordingConfig::new("RecA");
    let rec_b = RecordingConfig::new("RecB");

    pump.apply_configuration(config_with(vec![Box::new(rec_a.clone())]), true)
        .await
        .unwrap();

    // when - the second configuration drops RecA for RecB
    pump.apply_configuration(config_with(vec![Box::new(rec_b.clone())]), true)
        .await
        .unwrap();
    pump.external_log(LogLevel::Info, Tags::empty(), "only-b", None);

    wait_until("entry delivered to RecB", || {
        rec_b.texts().iter().any(|t| t == "only-b")
    })
    .await;

    // then - RecA was deactivated and no longer receives anything
    assert!(rec_a.deactivated.load(Ordering::SeqCst));
    assert!(!rec_a.texts().iter().any(|t| t == "only-b"));

    pump.stop(None).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn should_update_the_minimal_filter_live_and_retain_it_on_undefined() {
    // given
    let pump = GrandOutput::new(registry_for(&[]));
    let client = pump.register_monitor("m-filter");
    assert!(client.minimal_filter().is_undefined());

    // when - a configuration defines the filter
    let mut config = SinkConfig::default();
    config.minimal_filter = LogFilter::DEBUG;
    pump.apply_configuration(config, true).await.unwrap();

    // then
    assert_eq!(client.minimal_filter(), LogFilter::DEBUG);

    // when - an exact tuple
    let mut config = SinkConfig::default();
    config.minimal_filter = LogFilter::new(LogLevelFilter::Off, LogLevelFilter::Debug);
    pump.apply_configuration(config, true).await.unwrap();

    // then
    assert_eq!(
        client.minimal_filter(),
        LogFilter::new(LogLevelFilter::Off, LogLevelFilter::Debug)
    );

    // when - an undefined filter arrives
    pump.apply_configuration(SinkConfig::default(), true)
        .await
        .unwrap();

    // then - the previous value is retained
    assert_eq!(
        client.minimal_filter(),
        LogFilter::new(LogLevelFilter::Off, LogLevelFilter::Debug)
    );

    pump.stop(None).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn should_apply_tag_filters_with_the_most_verbose_match_winning() {
    // given - minimal Trace, Sql opened to Debug, Machine clamped to Release
    let pump = GrandOutput::new(registry_for(&["RecA"]));
    let rec = RecordingConfig::new("RecA");
    let mut config = config_with(vec![Box::new(rec.clone())]);
    config.minimal_filter = LogFilter::TRACE;
    config.tag_filters = vec![
        (Tags::parse("Sql"), LogFilter::DEBUG),
        (Tags::parse("Machine"), LogFilter::RELEASE),
    ];
    pump.apply_configuration(config, true).await.unwrap();

    let client = pump.register_monitor("m-tags");

    // when
    client.on_unfiltered_log(line(LogLevel::Debug, "Sql", "YES"));
    client.on_unfiltered_log(line(LogLevel::Trace, "Machine", "NOSHOW"));
    client.on_unfiltered_log(line(LogLevel::Trace, "Machine|Sql", "Yes again"));
    client.on_unfiltered_log(line(LogLevel::Info, "", "done"));

    wait_until("last line delivered", || {
        rec.texts().iter().any(|t| t == "done")
    })
    .await;

    // then
    let texts = rec.texts();
    assert!(texts.iter().any(|t| t == "YES"), "{:?}", texts);
    assert!(texts.iter().any(|t| t == "Yes again"), "{:?}", texts);
    assert!(!texts.iter().any(|t| t == "NOSHOW"), "{:?}", texts);

    pump.stop(None).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn should_skip_an_unknown_handler_type_and_keep_the_rest() {
    // given
    let pump = GrandOutput::new(registry_for(&["RecA"]));
    let rec = RecordingConfig::new("RecA");
    pump.apply_configuration(config_with(vec![Box::new(rec.clone())]), true)
        .await
        .unwrap();

    // when
    pump.external_log(LogLevel::Info, Tags::empty(), "BEFORE", None);
    pump.apply_configuration(
        config_with(vec![Box::new(rec.clone()), Box::new(UnknownConfig)]),
        true,
    )
    .await
    .unwrap();
    pump.external_log(LogLevel::Info, Tags::empty(), "AFTER", None);

    wait_until("AFTER delivered", || {
        rec.texts().iter().any(|t| t == "AFTER")
    })
    .await;

    // then - BEFORE, the error trace, and AFTER all made it through
    let texts = rec.texts();
    assert!(texts.iter().any(|t| t == "BEFORE"), "{:?}", texts);
    assert!(
        texts
            .iter()
            .any(|t| t.contains("While applying dynamic configuration.")),
        "{:?}",
        texts
    );
    assert!(texts.iter().any(|t| t == "AFTER"), "{:?}", texts);

    pump.stop(None).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn should_evict_a_failing_handler_and_keep_delivering_to_the_others() {
    // given - RecA fails on poisoned entries, RecB records everything
    let pump = GrandOutput::new(registry_for(&["RecA", "RecB"]));
    let mut rec_a = RecordingConfig::new("RecA");
    rec_a.poisonous = true;
    let rec_b = RecordingConfig::new("RecB");
    pump.apply_configuration(
        config_with(vec![Box::new(rec_a.clone()), Box::new(rec_b.clone())]),
        true,
    )
    .await
    .unwrap();

    // when
    pump.external_log(LogLevel::Info, Tags::empty(), "poison pill", None);
    pump.external_log(LogLevel::Info, Tags::empty(), "survivor", None);

    wait_until("survivor delivered to RecB", || {
        rec_b.texts().iter().any(|t| t == "survivor")
    })
    .await;

    // then - RecA is gone (deactivated, missed the second entry), RecB saw a
    // diagnostic about the eviction
    assert!(rec_a.deactivated.load(Ordering::SeqCst));
    assert!(!rec_a.texts().iter().any(|t| t == "survivor"));
    let texts = rec_b.texts();
    assert!(
        texts.iter().any(|t| t.contains("removed after a failure")),
        "{:?}",
        texts
    );

    pump.stop(None).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn should_carry_the_prev_entry_chain_and_group_depth() {
    // given
    let pump = GrandOutput::new(registry_for(&["RecA"]));
    let rec = RecordingConfig::new("RecA");
    pump.apply_configuration(config_with(vec![Box::new(rec.clone())]), true)
        .await
        .unwrap();
    let client = pump.register_monitor("m-chain");

    // when - open, line, close
    client.on_open_group(LogData::open_group(
        LogLevel::Info,
        Tags::empty(),
        "group",
        DateTimeStamp::UNKNOWN,
    ));
    client.on_unfiltered_log(line(LogLevel::Info, "", "inside"));
    client.on_group_closed(LogData::close_group(
        LogLevel::Info,
        DateTimeStamp::UNKNOWN,
        Vec::new(),
    ));

    wait_until("three entries delivered", || {
        rec.entries()
            .iter()
            .filter(|e| e.monitor_id() == Some("m-chain"))
            .count()
            == 3
    })
    .await;

    // then
    let entries: Vec<_> = rec
        .entries()
        .into_iter()
        .filter(|e| e.monitor_id() == Some("m-chain"))
        .collect();
    let open = entries[0].multicast.as_ref().unwrap();
    let inside = entries[1].multicast.as_ref().unwrap();
    let close = entries[2].multicast.as_ref().unwrap();

    // first entry starts the chain
    assert_eq!(open.prev_kind, None);
    assert_eq!(open.prev_time, DateTimeStamp::UNKNOWN);
    // the open encodes its pre-increment depth, the close its pre-decrement
    assert_eq!(open.depth, 0);
    assert_eq!(inside.depth, 1);
    assert_eq!(close.depth, 1);
    assert_eq!(client.current_group_depth(), 0);
    // each entry references its predecessor
    assert_eq!(inside.prev_kind, Some(LogKind::OpenGroup));
    assert_eq!(inside.prev_time, entries[0].data.time);
    assert_eq!(close.prev_kind, Some(LogKind::Line));
    assert_eq!(close.prev_time, entries[1].data.time);
    // times are strictly increasing per monitor
    assert!(entries[0].data.time < entries[1].data.time);
    assert!(entries[1].data.time < entries[2].data.time);
    // every multicast entry is labelled with the pump id
    assert!(entries.iter().all(|e| {
        e.multicast.as_ref().unwrap().grand_output_id == pump.id()
    }));

    pump.stop(None).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn should_reset_the_chain_on_re_registration() {
    // given
    let pump = GrandOutput::new(registry_for(&["RecA"]));
    let rec = RecordingConfig::new("RecA");
    pump.apply_configuration(config_with(vec![Box::new(rec.clone())]), true)
        .await
        .unwrap();

    let monitor_entries = {
        let rec = rec.clone();
        move || {
            rec.entries()
                .into_iter()
                .filter(|e| e.monitor_id() == Some("m-again"))
                .collect::<Vec<_>>()
        }
    };

    let client = pump.register_monitor("m-again");
    client.on_unfiltered_log(line(LogLevel::Info, "", "first"));
    wait_until("first delivered", || monitor_entries().len() == 1).await;

    // when - the same monitor registers again
    let again = pump.register_monitor("m-again");
    again.on_unfiltered_log(line(LogLevel::Info, "", "second"));
    wait_until("second delivered", || monitor_entries().len() >= 2).await;

    // then - same client instance, chain restarted
    assert!(Arc::ptr_eq(&client, &again));
    let second = monitor_entries()[1].multicast.clone().unwrap();
    assert_eq!(second.prev_kind, None);
    assert_eq!(second.prev_time, DateTimeStamp::UNKNOWN);

    pump.stop(None).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn should_gate_external_logs_with_the_configured_filter() {
    // given
    let pump = GrandOutput::new(registry_for(&["RecA"]));
    let rec = RecordingConfig::new("RecA");
    let mut config = config_with(vec![Box::new(rec.clone())]);
    config.external_log_level_filter = LogLevelFilter::Warn;
    pump.apply_configuration(config, true).await.unwrap();

    // when
    pump.external_log(LogLevel::Info, Tags::empty(), "quiet", None);
    pump.external_log(LogLevel::Error, Tags::empty(), "loud", None);

    wait_until("loud delivered", || {
        rec.texts().iter().any(|t| t == "loud")
    })
    .await;

    // then - the Info line was gated out, and the external line is labelled
    let texts = rec.texts();
    assert!(!texts.iter().any(|t| t == "quiet"), "{:?}", texts);
    let external = rec
        .entries()
        .into_iter()
        .find(|e| e.data.text.as_deref() == Some("loud"))
        .unwrap();
    assert_eq!(
        external.monitor_id(),
        Some(collector::EXTERNAL_MONITOR_ID)
    );

    pump.stop(None).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn should_stop_cleanly_and_reject_later_work() {
    // given
    let pump = GrandOutput::new(registry_for(&["RecA"]));
    let rec = RecordingConfig::new("RecA");
    pump.apply_configuration(config_with(vec![Box::new(rec.clone())]), true)
        .await
        .unwrap();
    let token = pump.disposing_token();
    assert!(!token.is_disposing());

    // when
    pump.stop(None).await;

    // then
    assert!(pump.is_disposed());
    assert!(token.is_disposing());
    assert_eq!(pump.state(), SinkState::Stopped);
    assert!(rec.deactivated.load(Ordering::SeqCst));
    assert_eq!(
        pump.apply_configuration(SinkConfig::default(), true).await,
        Err(SinkError::Stopped)
    );
    // producer entry points return early instead of raising
    pump.external_log(LogLevel::Error, Tags::empty(), "late", None);
    pump.handle(Arc::new(LogEntry::unicast(line(
        LogLevel::Info,
        "",
        "late",
    ))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn should_drop_malformed_entries_with_a_pump_warning() {
    // given
    let pump = GrandOutput::new(registry_for(&["RecA"]));
    let rec = RecordingConfig::new("RecA");
    pump.apply_configuration(config_with(vec![Box::new(rec.clone())]), true)
        .await
        .unwrap();

    // when - a line without text violates the entry contract
    let mut broken = line(LogLevel::Info, "", "x");
    broken.text = None;
    pump.handle(Arc::new(LogEntry::unicast(broken)));

    wait_until("warning delivered", || {
        rec.texts().iter().any(|t| t.contains("Malformed entry dropped"))
    })
    .await;

    pump.stop(None).await;
}
