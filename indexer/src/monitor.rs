//! Per-monitor aggregation across files.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ckmon::model::{IDENTITY_CARD_FULL, IDENTITY_CARD_UPDATE};
use ckmon::{LogEntry, identity};
use common::DateTimeStamp;

use crate::multi_file::RawLogFileMonitorOccurrence;

/// Discovered attribute set of a monitor.
///
/// Built from entries tagged `IdentityCardFull` (complete replacement) or
/// `IdentityCardUpdate` (additive merge). The first recognized tag
/// materializes the card.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityCard {
    attributes: Vec<(String, String)>,
}

impl IdentityCard {
    /// All attributes, in declaration order.
    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    /// First value declared for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn replace_from(&mut self, text: &str) {
        self.attributes = identity::parse(text);
    }

    fn merge_from(&mut self, text: &str) {
        for pair in identity::parse(text) {
            if !self.attributes.contains(&pair) {
                self.attributes.push(pair);
            }
        }
    }
}

struct MonitorState {
    files: Vec<Arc<RawLogFileMonitorOccurrence>>,
    first_entry_time: DateTimeStamp,
    first_depth: u32,
    last_entry_time: DateTimeStamp,
    last_depth: u32,
    tag_histogram: HashMap<String, u64>,
    identity_card: Option<IdentityCard>,
}

/// A monitor as seen across every indexed file.
pub struct LiveIndexedMonitor {
    monitor_id: String,
    state: Mutex<MonitorState>,
}

impl LiveIndexedMonitor {
    pub(crate) fn new(monitor_id: impl Into<String>) -> Self {
        Self {
            monitor_id: monitor_id.into(),
            state: Mutex::new(MonitorState {
                files: Vec::new(),
                first_entry_time: DateTimeStamp::UNKNOWN,
                first_depth: 0,
                last_entry_time: DateTimeStamp::UNKNOWN,
                last_depth: 0,
                tag_histogram: HashMap::new(),
                identity_card: None,
            }),
        }
    }

    /// Id of the aggregated monitor.
    pub fn monitor_id(&self) -> &str {
        &self.monitor_id
    }

    /// Occurrences of this monitor, one per file it appears in.
    pub fn files(&self) -> Vec<Arc<RawLogFileMonitorOccurrence>> {
        self.state.lock().unwrap().files.clone()
    }

    /// Time of the earliest entry seen, with the group depth at that point.
    pub fn first_entry(&self) -> (DateTimeStamp, u32) {
        let state = self.state.lock().unwrap();
        (state.first_entry_time, state.first_depth)
    }

    /// Time of the latest entry seen, with the group depth at that point.
    pub fn last_entry(&self) -> (DateTimeStamp, u32) {
        let state = self.state.lock().unwrap();
        (state.last_entry_time, state.last_depth)
    }

    /// Number of entries seen carrying `atom`.
    pub fn tag_count(&self, atom: &str) -> u64 {
        self.state
            .lock()
            .unwrap()
            .tag_histogram
            .get(atom)
            .copied()
            .unwrap_or(0)
    }

    /// Histogram of atomic tags across every entry seen.
    pub fn tag_histogram(&self) -> HashMap<String, u64> {
        self.state.lock().unwrap().tag_histogram.clone()
    }

    /// The identity card, once a tagged entry materialized one.
    pub fn identity_card(&self) -> Option<IdentityCard> {
        self.state.lock().unwrap().identity_card.clone()
    }

    /// Folds one multicast entry into the aggregate.
    pub(crate) fn register(&self, occurrence: &Arc<RawLogFileMonitorOccurrence>, entry: &LogEntry) {
        let info = entry
            .multicast
            .as_ref()
            .expect("only multicast entries are indexed");
        let mut state = self.state.lock().unwrap();

        if !state
            .files
            .iter()
            .any(|known| Arc::ptr_eq(known, occurrence))
        {
            state.files.push(Arc::clone(occurrence));
        }

        let time = entry.data.time;
        if !state.first_entry_time.is_known() || time < state.first_entry_time {
            state.first_entry_time = time;
            state.first_depth = info.depth;
        }
        if !state.last_entry_time.is_known() || time > state.last_entry_time {
            state.last_entry_time = time;
            state.last_depth = info.depth;
        }

        for atom in entry.data.tags.atoms() {
            *state.tag_histogram.entry(atom.to_string()).or_insert(0) += 1;
        }

        if let Some(text) = entry.data.text.as_deref() {
            if entry.data.tags.contains(IDENTITY_CARD_FULL) {
                state
                    .identity_card
                    .get_or_insert_with(IdentityCard::default)
                    .replace_from(text);
            } else if entry.data.tags.contains(IDENTITY_CARD_UPDATE) {
                state
                    .identity_card
                    .get_or_insert_with(IdentityCard::default)
                    .merge_from(text);
            }
        }
    }
}
