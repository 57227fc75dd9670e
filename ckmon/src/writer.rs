//! Stream writer for `.ckmon` files.
//!
//! A writer owns its output exclusively: the header is emitted on creation,
//! entries are appended one at a time, and [`Writer::close`] terminates the
//! stream with the end marker. A stream dropped without `close` is truncated
//! and readers will report it through `bad_end_of_file_marker`.

use std::fs::File;
use std::io::{self, BufWriter, Write as _};
use std::path::Path;

use bytes::{BufMut, BytesMut};
use common::serde::{string, varint::var_u32};
use flate2::Compression;
use flate2::write::GzEncoder;

use crate::error::{Error, Result};
use crate::format::*;
use crate::model::{LogEntry, LogKind};

/// Single-owner stream writer.
pub struct Writer {
    out: Box<dyn io::Write + Send>,
    buf: BytesMut,
    entry_count: u64,
    closed: bool,
}

impl Writer {
    /// Wraps an output and writes the stream header.
    pub fn new(mut out: impl io::Write + Send + 'static) -> Result<Self> {
        out.write_all(&MAGIC)?;
        out.write_all(&[CURRENT_VERSION])?;
        Ok(Self {
            out: Box::new(out),
            buf: BytesMut::with_capacity(512),
            entry_count: 0,
            closed: false,
        })
    }

    /// Creates a plain stream file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file))
    }

    /// Creates a gzip-compressed stream file at `path`.
    ///
    /// Readers detect the compression from the file magic; offsets keep
    /// addressing the decompressed stream.
    pub fn create_compressed(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path)?;
        Self::new(GzEncoder::new(BufWriter::new(file), Compression::default()))
    }

    /// Number of entries written so far.
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Appends one entry.
    pub fn write(&mut self, entry: &LogEntry) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidEntry("write on a closed stream".into()));
        }
        entry.data.validate()?;
        self.buf.clear();
        encode_entry(entry, &mut self.buf);
        self.out.write_all(&self.buf)?;
        self.entry_count += 1;
        Ok(())
    }

    /// Flushes the output without terminating the stream.
    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    /// Writes the end marker and flushes.
    pub fn close(mut self) -> Result<()> {
        self.out.write_all(&[END_MARKER])?;
        self.out.flush()?;
        self.closed = true;
        Ok(())
    }
}

/// Encodes one entry into `buf` using the current stream version layout.
pub(crate) fn encode_entry(entry: &LogEntry, buf: &mut BytesMut) {
    let data = &entry.data;

    let mut header = data.level.id() & LEVEL_MASK;
    if data.is_filtered {
        header |= FILTERED_BIT;
    }
    header |= (data.kind.id() & KIND_MASK) << KIND_SHIFT;
    buf.put_u8(header);

    let mut flags = 0u8;
    if data.file_name.is_some() {
        flags |= FLAG_FILE_NAME;
    }
    if !data.tags.is_empty() {
        flags |= FLAG_TAGS;
    }
    if data.exception.is_some() {
        flags |= FLAG_EXCEPTION;
    }
    if data.kind == LogKind::CloseGroup && !data.conclusions.is_empty() {
        flags |= FLAG_CONCLUSIONS;
    }
    if entry.multicast.is_some() {
        flags |= FLAG_MULTICAST;
    }
    buf.put_u8(flags);

    buf.put_i64(data.time.ticks);
    buf.put_u8(data.time.uniquifier);

    if data.kind != LogKind::CloseGroup {
        // validate() guarantees the text is present here
        string::serialize(data.text.as_deref().unwrap_or_default(), buf);
    }

    if let Some(file_name) = &data.file_name {
        string::serialize(file_name, buf);
        var_u32::serialize(data.line_number, buf);
    }

    if flags & FLAG_TAGS != 0 {
        string::serialize(&data.tags.to_string(), buf);
    }

    if let Some(exception) = &data.exception {
        string::serialize(&exception.message, buf);
        match &exception.stack_trace {
            Some(stack) => {
                buf.put_u8(1);
                string::serialize(stack, buf);
            }
            None => buf.put_u8(0),
        }
    }

    if flags & FLAG_CONCLUSIONS != 0 {
        buf.put_u8(data.conclusions.len() as u8);
        for conclusion in &data.conclusions {
            string::serialize(&conclusion.tag, buf);
            string::serialize(&conclusion.text, buf);
        }
    }

    if let Some(info) = &entry.multicast {
        string::serialize(&info.grand_output_id, buf);
        string::serialize(&info.monitor_id, buf);
        buf.put_u8(info.prev_kind.map_or(0, |k| k.id() + 1));
        buf.put_i64(info.prev_time.ticks);
        buf.put_u8(info.prev_time.uniquifier);
        var_u32::serialize(info.depth, buf);
    }
}
