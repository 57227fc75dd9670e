//! Thread-safe multi-file scan and occurrence index.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use common::DateTimeStamp;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use ckmon::{LogEntry, MulticastFilter, Reader};

use crate::error::{Error, Result};
use crate::monitor::LiveIndexedMonitor;

/// One monitor's presence within one file: offset and time window.
pub struct RawLogFileMonitorOccurrence {
    file_path: PathBuf,
    monitor_id: String,
    first_offset: u64,
    first_entry_time: DateTimeStamp,
    last: Mutex<(u64, DateTimeStamp)>,
}

impl RawLogFileMonitorOccurrence {
    fn new(
        file_path: PathBuf,
        monitor_id: String,
        first_offset: u64,
        first_entry_time: DateTimeStamp,
    ) -> Self {
        Self {
            file_path,
            monitor_id,
            first_offset,
            first_entry_time,
            last: Mutex::new((first_offset, first_entry_time)),
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn monitor_id(&self) -> &str {
        &self.monitor_id
    }

    /// Offset of the monitor's first entry in this file.
    pub fn first_offset(&self) -> u64 {
        self.first_offset
    }

    /// Offset of the monitor's last entry in this file.
    pub fn last_offset(&self) -> u64 {
        self.last.lock().unwrap().0
    }

    pub fn first_entry_time(&self) -> DateTimeStamp {
        self.first_entry_time
    }

    pub fn last_entry_time(&self) -> DateTimeStamp {
        self.last.lock().unwrap().1
    }

    fn record(&self, offset: u64, time: DateTimeStamp) {
        *self.last.lock().unwrap() = (offset, time);
    }

    fn filtered_reader(&self, offset: u64) -> Result<Reader> {
        Reader::open_filtered(
            &self.file_path,
            offset,
            Some(MulticastFilter {
                monitor_id: self.monitor_id.clone(),
                last_offset: self.last_offset(),
            }),
        )
        .map_err(Error::from)
    }

    /// Reads this monitor's entry starting at `offset` (a value previously
    /// exposed by the index or by [`first_offset`](Self::first_offset)).
    pub fn read_entry_at(&self, offset: u64) -> Result<LogEntry> {
        let mut reader = self.filtered_reader(offset)?;
        if !reader.move_next() {
            return Err(invalid_read(&reader, "no entry at the requested offset"));
        }
        Ok(reader.current().cloned().expect("move_next returned true"))
    }

    /// Reads this monitor's first entry at or after `time`.
    pub fn read_entry_from_time(&self, time: DateTimeStamp) -> Result<LogEntry> {
        let mut reader = self.filtered_reader(self.first_offset)?;
        loop {
            if !reader.move_next() {
                return Err(invalid_read(&reader, "no entry at or after the requested time"));
            }
            let current = reader.current().expect("move_next returned true");
            if current.data.time >= time {
                return Ok(current.clone());
            }
        }
    }
}

fn invalid_read(reader: &Reader, context: &str) -> Error {
    match reader.read_exception() {
        Some(e) => Error::InvalidData(format!("{}: {}", context, e)),
        None => Error::InvalidData(context.to_string()),
    }
}

/// Aggregates of one scanned file.
struct FileInfo {
    stream_version: Option<u8>,
    total_entry_count: u64,
    first_entry_time: DateTimeStamp,
    last_entry_time: DateTimeStamp,
    occurrences: HashMap<String, Arc<RawLogFileMonitorOccurrence>>,
    bad_end_of_file: bool,
    error: Option<String>,
}

/// One file known to the index.
///
/// The record is created on first [`LogFileIndex::add`] and initialized
/// exactly once: concurrent adders of the same path wait for the first
/// scan to complete and then observe the finished record.
pub struct RawLogFile {
    path: PathBuf,
    info: OnceLock<FileInfo>,
}

impl RawLogFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            info: OnceLock::new(),
        }
    }

    fn info(&self) -> &FileInfo {
        self.info.get().expect("record is initialized by add()")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Version byte of the stream, when the header was readable.
    pub fn stream_version(&self) -> Option<u8> {
        self.info().stream_version
    }

    /// Number of multicast entries registered out of this file.
    pub fn total_entry_count(&self) -> u64 {
        self.info().total_entry_count
    }

    pub fn first_entry_time(&self) -> DateTimeStamp {
        self.info().first_entry_time
    }

    pub fn last_entry_time(&self) -> DateTimeStamp {
        self.info().last_entry_time
    }

    /// `true` when the file ended without the end marker (truncation).
    pub fn bad_end_of_file(&self) -> bool {
        self.info().bad_end_of_file
    }

    /// Error captured during the scan, if any. The file stays in the index
    /// for partial results.
    pub fn error(&self) -> Option<&str> {
        self.info().error.as_deref()
    }

    /// `false` when the scan captured an error.
    pub fn is_valid_file(&self) -> bool {
        self.info().error.is_none()
    }

    /// This file's occurrence of `monitor_id`, when it appears in it.
    pub fn occurrence(&self, monitor_id: &str) -> Option<Arc<RawLogFileMonitorOccurrence>> {
        self.info().occurrences.get(monitor_id).cloned()
    }

    /// Every monitor occurrence in this file.
    pub fn occurrences(&self) -> Vec<Arc<RawLogFileMonitorOccurrence>> {
        self.info().occurrences.values().cloned().collect()
    }
}

/// Callback invoked when a monitor id is seen for the first time.
pub type MonitorAppearedCallback = Box<dyn Fn(&Arc<LiveIndexedMonitor>) + Send + Sync>;

struct GlobalInfo {
    first_entry_time: DateTimeStamp,
    last_entry_time: DateTimeStamp,
}

/// Immutable-publication, mutable-build index over many stream files.
#[derive(Default)]
pub struct LogFileIndex {
    files: DashMap<PathBuf, Arc<RawLogFile>>,
    monitors: DashMap<String, Arc<LiveIndexedMonitor>>,
    global: Mutex<Option<GlobalInfo>>,
    /// Readers share this; a future bulk rebuild would take it exclusively.
    rebuild: RwLock<()>,
    callbacks: Mutex<Vec<MonitorAppearedCallback>>,
}

impl LogFileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback fired exactly once per distinct monitor id, at
    /// the moment the id first appears. The callback must not call back
    /// into the index.
    pub fn on_live_monitor_appeared(
        &self,
        callback: impl Fn(&Arc<LiveIndexedMonitor>) + Send + Sync + 'static,
    ) {
        self.callbacks.lock().unwrap().push(Box::new(callback));
    }

    /// Adds a file to the index, scanning it if this is the first add.
    ///
    /// Thread-safe; concurrent adds of the same path block until the single
    /// scan completes. A file whose scan fails is retained with its error
    /// (see [`RawLogFile::error`]).
    pub fn add(&self, path: impl AsRef<Path>) -> Result<Arc<RawLogFile>> {
        let path = std::fs::canonicalize(path)?;
        let _shared = self.rebuild.read().unwrap();
        let file = self
            .files
            .entry(path.clone())
            .or_insert_with(|| Arc::new(RawLogFile::new(path)))
            .clone();
        file.info.get_or_init(|| self.scan(&file));
        Ok(file)
    }

    /// The file record for `path`, when it was added.
    pub fn file(&self, path: impl AsRef<Path>) -> Option<Arc<RawLogFile>> {
        let path = std::fs::canonicalize(path).ok()?;
        self.files.get(&path).map(|r| Arc::clone(r.value()))
    }

    /// Every file added so far.
    pub fn files(&self) -> Vec<Arc<RawLogFile>> {
        self.files.iter().map(|r| Arc::clone(r.value())).collect()
    }

    /// The aggregate for a monitor id, when it appeared in any file.
    pub fn monitor(&self, monitor_id: &str) -> Option<Arc<LiveIndexedMonitor>> {
        self.monitors.get(monitor_id).map(|r| Arc::clone(r.value()))
    }

    /// Every monitor seen so far.
    pub fn monitors(&self) -> Vec<Arc<LiveIndexedMonitor>> {
        self.monitors.iter().map(|r| Arc::clone(r.value())).collect()
    }

    /// Earliest entry time across every indexed file.
    pub fn first_entry_time(&self) -> Option<DateTimeStamp> {
        self.global.lock().unwrap().as_ref().map(|g| g.first_entry_time)
    }

    /// Latest entry time across every indexed file.
    pub fn last_entry_time(&self) -> Option<DateTimeStamp> {
        self.global.lock().unwrap().as_ref().map(|g| g.last_entry_time)
    }

    /// Full scan of one file, registering every multicast entry.
    fn scan(&self, file: &RawLogFile) -> FileInfo {
        let mut info = FileInfo {
            stream_version: None,
            total_entry_count: 0,
            first_entry_time: DateTimeStamp::UNKNOWN,
            last_entry_time: DateTimeStamp::UNKNOWN,
            occurrences: HashMap::new(),
            bad_end_of_file: false,
            error: None,
        };

        let mut reader = match Reader::open(&file.path) {
            Ok(reader) => reader,
            Err(e) => {
                tracing::warn!(path = %file.path.display(), error = %e, "file rejected");
                info.error = Some(e.to_string());
                return info;
            }
        };
        info.stream_version = Some(reader.stream_version());

        while reader.move_next() {
            let entry = reader.current().expect("move_next returned true");
            let Some(multicast) = entry.multicast.as_ref() else {
                continue;
            };
            let offset = reader.stream_offset();
            let time = entry.data.time;

            info.total_entry_count += 1;
            if !info.first_entry_time.is_known() || time < info.first_entry_time {
                info.first_entry_time = time;
            }
            if !info.last_entry_time.is_known() || time > info.last_entry_time {
                info.last_entry_time = time;
            }

            let occurrence = Arc::clone(
                info.occurrences
                    .entry(multicast.monitor_id.clone())
                    .or_insert_with(|| {
                        Arc::new(RawLogFileMonitorOccurrence::new(
                            file.path.clone(),
                            multicast.monitor_id.clone(),
                            offset,
                            time,
                        ))
                    }),
            );
            occurrence.record(offset, time);
            self.register_one_log(&occurrence, entry);
        }

        info.bad_end_of_file = reader.bad_end_of_file_marker();
        info.error = reader.read_exception().map(|e| e.to_string());

        if info.first_entry_time.is_known() {
            let mut global = self.global.lock().unwrap();
            match global.as_mut() {
                Some(g) => {
                    if info.first_entry_time < g.first_entry_time {
                        g.first_entry_time = info.first_entry_time;
                    }
                    if info.last_entry_time > g.last_entry_time {
                        g.last_entry_time = info.last_entry_time;
                    }
                }
                None => {
                    *global = Some(GlobalInfo {
                        first_entry_time: info.first_entry_time,
                        last_entry_time: info.last_entry_time,
                    });
                }
            }
        }

        info
    }

    /// Get-or-insert the monitor aggregate and fold one entry into it.
    /// First insertion fires the appeared callbacks exactly once.
    fn register_one_log(&self, occurrence: &Arc<RawLogFileMonitorOccurrence>, entry: &LogEntry) {
        let monitor_id = occurrence.monitor_id().to_string();
        let (monitor, appeared) = match self.monitors.entry(monitor_id) {
            Entry::Occupied(slot) => (Arc::clone(slot.get()), false),
            Entry::Vacant(slot) => {
                let monitor = Arc::new(LiveIndexedMonitor::new(occurrence.monitor_id()));
                slot.insert(Arc::clone(&monitor));
                (monitor, true)
            }
        };
        if appeared {
            for callback in self.callbacks.lock().unwrap().iter() {
                callback(&monitor);
            }
        }
        monitor.register(occurrence, entry);
    }
}
