//! Multi-file index over persisted log streams.
//!
//! A [`LogFileIndex`] scans `.ckmon` files and aggregates every multicast
//! entry by source monitor: which files a monitor appears in, its first and
//! last occurrences (offsets and times), a histogram of its tags, and the
//! identity card it declared through tagged entries. Files are scanned once,
//! concurrently-safe; unreadable files stay in the index with their error so
//! partial results remain available.

pub mod error;
pub mod monitor;
pub mod multi_file;

pub use error::{Error, Result};
pub use monitor::{IdentityCard, LiveIndexedMonitor};
pub use multi_file::{LogFileIndex, RawLogFile, RawLogFileMonitorOccurrence};
