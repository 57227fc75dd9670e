//! Per-monitor binding into the pump.
//!
//! A [`GrandOutputClient`] is bound to exactly one activity monitor. It
//! translates the monitor's three callbacks into multicast entries carrying
//! the pump id, the monitor id, the previous-entry chain and the group
//! depth, then enqueues them. The monitor also reads its minimal filter from
//! here, which is how a reconfigured filter reaches bound monitors.

use std::sync::{Arc, Mutex, RwLock};

use ckmon::{LogData, LogEntry, LogFilter, LogKind, LogLevelFilter, MulticastInfo, Tags};
use common::DateTimeStamp;
use tokio::sync::mpsc;

use crate::dispatcher::{Input, send_input};
use crate::grand_output::DisposingToken;

/// Filter state shared between the pump and every client.
///
/// Written by the consumer task when a configuration applies; read on the
/// producer hot path.
pub(crate) struct FilterSettings {
    pub minimal_filter: LogFilter,
    pub external_filter: LogLevelFilter,
    pub tag_filters: Vec<(Tags, LogFilter)>,
}

impl FilterSettings {
    /// Threshold applied to a line with `tags`.
    ///
    /// Tag filters override the minimal filter: when one or more matchers
    /// overlap the tags, the most verbose matching filter decides alone.
    pub(crate) fn effective_line_filter(&self, tags: &Tags) -> LogLevelFilter {
        let mut combined = LogFilter::UNDEFINED;
        let mut matched = false;
        for (matcher, filter) in &self.tag_filters {
            if matcher.overlaps(tags) {
                combined = combined.combine(*filter);
                matched = true;
            }
        }
        if matched {
            combined.line
        } else {
            self.minimal_filter.line
        }
    }
}

/// Per-monitor chain and depth bookkeeping.
struct ClientState {
    depth: u32,
    prev_kind: Option<LogKind>,
    prev_time: DateTimeStamp,
}

/// Adapter bound to one monitor.
///
/// The three `on_*` callbacks are synchronous so monitors on arbitrary
/// application threads can call them; a saturated pump applies bounded
/// back-pressure inside the call. Exactly one client exists per
/// (pump, monitor) pair; re-registering the same monitor resets its chain.
pub struct GrandOutputClient {
    monitor_id: String,
    grand_output_id: Arc<str>,
    tx: mpsc::Sender<Input>,
    filters: Arc<RwLock<FilterSettings>>,
    disposing: DisposingToken,
    state: Mutex<ClientState>,
}

impl GrandOutputClient {
    pub(crate) fn new(
        monitor_id: String,
        grand_output_id: Arc<str>,
        tx: mpsc::Sender<Input>,
        filters: Arc<RwLock<FilterSettings>>,
        disposing: DisposingToken,
    ) -> Self {
        Self {
            monitor_id,
            grand_output_id,
            tx,
            filters,
            disposing,
            state: Mutex::new(ClientState {
                depth: 0,
                prev_kind: None,
                prev_time: DateTimeStamp::UNKNOWN,
            }),
        }
    }

    /// Id of the bound monitor.
    pub fn monitor_id(&self) -> &str {
        &self.monitor_id
    }

    /// Lower bound the bound monitor should observe.
    pub fn minimal_filter(&self) -> LogFilter {
        self.filters.read().unwrap().minimal_filter
    }

    /// Current group depth of the bound monitor.
    pub fn current_group_depth(&self) -> u32 {
        self.state.lock().unwrap().depth
    }

    /// Forgets the previous-entry chain and depth; used on re-registration.
    pub(crate) fn reset_chain(&self) {
        let mut state = self.state.lock().unwrap();
        state.depth = 0;
        state.prev_kind = None;
        state.prev_time = DateTimeStamp::UNKNOWN;
    }

    /// A log line left the monitor.
    ///
    /// Lines below the effective threshold (tag filters, then the minimal
    /// filter) are dropped here and do not advance the chain.
    pub fn on_unfiltered_log(&self, mut data: LogData) {
        if self.disposing.is_disposing() {
            return;
        }
        data.kind = LogKind::Line;
        data.conclusions.clear();
        if data.text.is_none() {
            tracing::warn!(monitor = %self.monitor_id, "line without text dropped");
            return;
        }
        let passes = data.is_filtered || {
            let filters = self.filters.read().unwrap();
            filters.effective_line_filter(&data.tags).allows(data.level)
        };
        if !passes {
            return;
        }
        self.emit(data, |state| state.depth);
    }

    /// The monitor opened a group. Groups always flow; the group component
    /// of the filter is advisory for the monitor itself.
    pub fn on_open_group(&self, mut data: LogData) {
        if self.disposing.is_disposing() {
            return;
        }
        data.kind = LogKind::OpenGroup;
        data.conclusions.clear();
        if data.text.is_none() {
            tracing::warn!(monitor = %self.monitor_id, "group open without text dropped");
            return;
        }
        // Depth before the increment goes on the wire.
        self.emit(data, |state| {
            let depth = state.depth;
            state.depth += 1;
            depth
        });
    }

    /// The monitor closed its innermost group, with conclusions.
    pub fn on_group_closed(&self, mut data: LogData) {
        if self.disposing.is_disposing() {
            return;
        }
        data.kind = LogKind::CloseGroup;
        data.text = None;
        // Depth before the decrement goes on the wire.
        self.emit(data, |state| {
            let depth = state.depth;
            state.depth = state.depth.saturating_sub(1);
            depth
        });
    }

    fn emit(&self, mut data: LogData, depth: impl FnOnce(&mut ClientState) -> u32) {
        let entry = {
            let mut state = self.state.lock().unwrap();
            let time = if state.prev_time.is_known() {
                DateTimeStamp::unique_after(
                    state.prev_time,
                    if data.time.is_known() {
                        data.time
                    } else {
                        DateTimeStamp::now()
                    },
                )
            } else if data.time.is_known() {
                data.time
            } else {
                DateTimeStamp::now()
            };
            data.time = time;
            let info = MulticastInfo {
                grand_output_id: self.grand_output_id.to_string(),
                monitor_id: self.monitor_id.clone(),
                prev_kind: state.prev_kind,
                prev_time: state.prev_time,
                depth: depth(&mut state),
            };
            state.prev_kind = Some(data.kind);
            state.prev_time = time;
            Arc::new(LogEntry::multicast(data, info))
        };
        send_input(&self.tx, Input::Entry(entry));
    }
}

#[cfg(test)]
mod tests {
    use ckmon::LogLevel;

    use super::*;

    fn settings(
        minimal: LogFilter,
        tag_filters: Vec<(Tags, LogFilter)>,
    ) -> FilterSettings {
        FilterSettings {
            minimal_filter: minimal,
            external_filter: LogLevelFilter::Undefined,
            tag_filters,
        }
    }

    #[test]
    fn should_fall_back_to_minimal_filter_without_tag_match() {
        // given
        let s = settings(LogFilter::TRACE, vec![(Tags::parse("Sql"), LogFilter::DEBUG)]);

        // when/then
        let filter = s.effective_line_filter(&Tags::parse("Network"));
        assert!(!filter.allows(LogLevel::Debug));
        assert!(filter.allows(LogLevel::Trace));
    }

    #[test]
    fn should_let_a_matching_tag_filter_override_the_minimal_filter() {
        // given - minimal Trace, Sql opened up to Debug
        let s = settings(LogFilter::TRACE, vec![(Tags::parse("Sql"), LogFilter::DEBUG)]);

        // when/then
        assert!(
            s.effective_line_filter(&Tags::parse("Sql"))
                .allows(LogLevel::Debug)
        );
    }

    #[test]
    fn should_keep_the_most_verbose_filter_when_several_tags_match() {
        // given - Machine clamps to Release, Sql opens to Debug
        let s = settings(
            LogFilter::TRACE,
            vec![
                (Tags::parse("Sql"), LogFilter::DEBUG),
                (Tags::parse("Machine"), LogFilter::RELEASE),
            ],
        );

        // when/then - Machine alone suppresses Trace, Machine|Sql passes it
        assert!(
            !s.effective_line_filter(&Tags::parse("Machine"))
                .allows(LogLevel::Trace)
        );
        assert!(
            s.effective_line_filter(&Tags::parse("Machine|Sql"))
                .allows(LogLevel::Trace)
        );
    }
}
