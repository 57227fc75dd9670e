//! Multicast activity-log entry model and binary stream codec.
//!
//! This crate defines the five entry variants produced by activity monitors
//! (lines, group opens and group closes, each optionally carrying a multicast
//! footer) and the self-describing `.ckmon` binary stream that persists them:
//! a magic + version header, a sequence of entries chained per monitor, and a
//! single zero end marker. Readers accept gzip-compressed streams
//! transparently and expose filtered random-access cursors.

pub mod error;
pub mod format;
pub mod identity;
pub mod model;
pub mod reader;
pub mod writer;

pub use error::{Error, Result};
pub use model::{
    Conclusion, ExceptionData, LogData, LogEntry, LogFilter, LogKind, LogLevel, LogLevelFilter,
    MulticastInfo, Tags,
};
pub use reader::{MulticastFilter, Reader};
pub use writer::Writer;
