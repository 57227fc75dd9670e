//! Cursor-style reader for `.ckmon` streams.
//!
//! The reader walks a stream entry by entry: [`Reader::move_next`] advances
//! and returns `false` at end of stream, [`Reader::current`] exposes the
//! entry last read. Errors never panic the cursor; they are captured on
//! [`Reader::read_exception`] and the cursor terminates. A stream that ends
//! without the zero end marker is flagged through
//! [`Reader::bad_end_of_file_marker`].
//!
//! gzip-compressed files are detected from the outer file magic and decoded
//! transparently; every offset exposed or accepted by this module addresses
//! the decompressed stream (header included), maintained by a byte-counting
//! adapter rather than physical seeks.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use common::DateTimeStamp;
use common::serde::{string, varint::var_u32};
use flate2::read::GzDecoder;

use crate::error::{Error, Result};
use crate::format::*;
use crate::model::{
    Conclusion, ExceptionData, LogData, LogEntry, LogKind, LogLevel, MulticastInfo, Tags,
};

/// Restricts a scan to one monitor's entries up to a byte offset.
///
/// Entries from other monitors, unicast entries, and entries past
/// `last_offset` are skipped without being yielded; once the cursor passes
/// `last_offset` the scan terminates since no later entry can match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastFilter {
    pub monitor_id: String,
    pub last_offset: u64,
}

/// Counts bytes consumed from the decompressed stream.
struct CountingReader {
    inner: Box<dyn Read + Send>,
    position: u64,
}

impl Read for CountingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

/// Forward-only cursor over a stream.
pub struct Reader {
    input: CountingReader,
    version: u8,
    filter: Option<MulticastFilter>,
    current: Option<LogEntry>,
    current_offset: u64,
    bad_eof: bool,
    error: Option<Error>,
    finished: bool,
}

impl Reader {
    /// Opens a stream file positioned on its first entry.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_filtered(path, 0, None)
    }

    /// Opens a stream file positioned at `offset` (a logical offset in the
    /// decompressed stream, as previously exposed by
    /// [`stream_offset`](Reader::stream_offset)).
    pub fn open_at(path: impl AsRef<Path>, offset: u64) -> Result<Self> {
        Self::open_filtered(path, offset, None)
    }

    /// Opens a stream file at `offset` with an optional multicast filter.
    pub fn open_filtered(
        path: impl AsRef<Path>,
        offset: u64,
        filter: Option<MulticastFilter>,
    ) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut magic = [0u8; 2];
        let compressed = match file.read_exact(&mut magic) {
            Ok(()) => magic == GZIP_MAGIC,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(0))?;
        let source: Box<dyn Read + Send> = if compressed {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Self::from_source(source, offset, filter)
    }

    /// Wraps an already-opened decompressed source.
    pub fn from_source(
        source: Box<dyn Read + Send>,
        offset: u64,
        filter: Option<MulticastFilter>,
    ) -> Result<Self> {
        let mut input = CountingReader {
            inner: source,
            position: 0,
        };

        let mut header = [0u8; 5];
        input.read_exact(&mut header)?;
        if header[..4] != MAGIC {
            return Err(Error::BadMagic);
        }
        let version = header[4];
        if !(MIN_SUPPORTED_VERSION..=CURRENT_VERSION).contains(&version) {
            return Err(Error::UnsupportedVersion(version));
        }

        if offset > input.position {
            let to_skip = offset - input.position;
            let skipped = io::copy(&mut (&mut input).take(to_skip), &mut io::sink())?;
            if skipped < to_skip {
                return Err(Error::InvalidData(format!(
                    "initial offset {} is beyond the end of the stream",
                    offset
                )));
            }
        }

        Ok(Self {
            input,
            version,
            filter,
            current: None,
            current_offset: 0,
            bad_eof: false,
            error: None,
            finished: false,
        })
    }

    /// Version byte read from the stream header.
    pub fn stream_version(&self) -> u8 {
        self.version
    }

    /// Entry last read by a successful [`move_next`](Reader::move_next).
    pub fn current(&self) -> Option<&LogEntry> {
        self.current.as_ref()
    }

    /// Logical offset of the current entry's first byte.
    pub fn stream_offset(&self) -> u64 {
        self.current_offset
    }

    /// `true` when the input ended without the zero end marker.
    pub fn bad_end_of_file_marker(&self) -> bool {
        self.bad_eof
    }

    /// Error that terminated the scan, if any.
    pub fn read_exception(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Advances to the next (matching) entry. Returns `false` at end of
    /// stream; inspect [`bad_end_of_file_marker`](Reader::bad_end_of_file_marker)
    /// and [`read_exception`](Reader::read_exception) to distinguish a clean
    /// termination from truncation or corruption.
    pub fn move_next(&mut self) -> bool {
        if self.finished {
            self.current = None;
            return false;
        }
        loop {
            let entry_offset = self.input.position;
            if let Some(filter) = &self.filter
                && entry_offset > filter.last_offset
            {
                self.current = None;
                self.finished = true;
                return false;
            }

            let header = match self.read_first_byte() {
                Ok(Some(b)) => b,
                Ok(None) => {
                    // Input ended at an entry boundary: truncation, not
                    // corruption.
                    self.bad_eof = true;
                    self.current = None;
                    self.finished = true;
                    return false;
                }
                Err(e) => return self.fail(e),
            };

            if header == END_MARKER {
                self.current = None;
                self.finished = true;
                return false;
            }

            let entry = match parse_entry(self.version, header, &mut self.input) {
                Ok(entry) => entry,
                Err(e) => return self.fail(e),
            };

            if let Some(filter) = &self.filter {
                match &entry.multicast {
                    Some(info) if info.monitor_id == filter.monitor_id => {}
                    _ => continue,
                }
            }

            self.current = Some(entry);
            self.current_offset = entry_offset;
            return true;
        }
    }

    fn read_first_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.input.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn fail(&mut self, error: Error) -> bool {
        if matches!(error, Error::UnexpectedEof(_)) {
            self.bad_eof = true;
        }
        self.error = Some(error);
        self.current = None;
        self.finished = true;
        false
    }
}

fn read_u8(input: &mut impl Read) -> Result<u8> {
    let mut byte = [0u8; 1];
    input.read_exact(&mut byte)?;
    Ok(byte[0])
}

fn read_time(version: u8, input: &mut impl Read) -> Result<DateTimeStamp> {
    let mut ticks = [0u8; 8];
    input.read_exact(&mut ticks)?;
    let uniquifier = if version >= VERSION_WITH_UNIQUIFIER {
        read_u8(input)?
    } else {
        0
    };
    Ok(DateTimeStamp::from_parts(i64::from_be_bytes(ticks), uniquifier))
}

/// Decodes one entry body, the header byte having already been consumed.
fn parse_entry(version: u8, header: u8, input: &mut impl Read) -> Result<LogEntry> {
    if header & RESERVED_MASK != 0 {
        return Err(Error::InvalidData(format!(
            "reserved header bits set: {:#04x}",
            header
        )));
    }
    let kind_code = (header >> KIND_SHIFT) & KIND_MASK;
    if kind_code == KIND_EXTENSION {
        let extended = read_u8(input)?;
        return Err(Error::InvalidData(format!(
            "unknown extended entry kind: {}",
            extended
        )));
    }
    let kind = LogKind::from_id(kind_code)?;
    let level = LogLevel::from_id(header & LEVEL_MASK)?;
    let is_filtered = header & FILTERED_BIT != 0;

    let flags = read_u8(input)?;
    if flags & FLAGS_RESERVED_MASK != 0 {
        return Err(Error::InvalidData(format!(
            "reserved flag bits set: {:#04x}",
            flags
        )));
    }
    if flags & FLAG_CONCLUSIONS != 0 && kind != LogKind::CloseGroup {
        return Err(Error::InvalidData(
            "conclusions flag outside a group close".into(),
        ));
    }

    let time = read_time(version, input)?;

    let text = if kind != LogKind::CloseGroup {
        Some(string::read_from(input)?)
    } else {
        None
    };

    let (file_name, line_number) = if flags & FLAG_FILE_NAME != 0 {
        let name = string::read_from(input)?;
        let line = var_u32::read_from(input)?;
        (Some(name), line)
    } else {
        (None, 0)
    };

    let tags = if flags & FLAG_TAGS != 0 {
        Tags::parse(&string::read_from(input)?)
    } else {
        Tags::empty()
    };

    let exception = if flags & FLAG_EXCEPTION != 0 {
        let message = string::read_from(input)?;
        let stack_trace = if version >= VERSION_WITH_PROVENANCE {
            match read_u8(input)? {
                0 => None,
                1 => Some(string::read_from(input)?),
                b => {
                    return Err(Error::InvalidData(format!(
                        "invalid stack trace presence byte: {}",
                        b
                    )));
                }
            }
        } else {
            None
        };
        Some(ExceptionData {
            message,
            stack_trace,
        })
    } else {
        None
    };

    let conclusions = if flags & FLAG_CONCLUSIONS != 0 {
        let count = read_u8(input)?;
        let mut conclusions = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let tag = string::read_from(input)?;
            let text = string::read_from(input)?;
            conclusions.push(Conclusion { tag, text });
        }
        conclusions
    } else {
        Vec::new()
    };

    let multicast = if flags & FLAG_MULTICAST != 0 {
        let grand_output_id = if version >= VERSION_WITH_PROVENANCE {
            string::read_from(input)?
        } else {
            UNKNOWN_GRAND_OUTPUT_ID.to_string()
        };
        let monitor_id = string::read_from(input)?;
        let prev_kind = match read_u8(input)? {
            0 => None,
            id => Some(LogKind::from_id(id - 1)?),
        };
        let prev_time = read_time(version, input)?;
        let depth = var_u32::read_from(input)?;
        Some(MulticastInfo {
            grand_output_id,
            monitor_id,
            prev_kind,
            prev_time,
            depth,
        })
    } else {
        None
    };

    Ok(LogEntry {
        data: LogData {
            kind,
            level,
            is_filtered,
            text,
            time,
            file_name,
            line_number,
            tags,
            exception,
            conclusions,
        },
        multicast,
    })
}
