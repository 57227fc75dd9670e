//! Wire constants for the `.ckmon` stream format.
//!
//! Stream layout:
//!
//! ```text
//! | magic "ckm1" | version (u8) | entry* | end marker (0x00) |
//! ```
//!
//! Per-entry layout (version 9):
//!
//! ```text
//! | header (u8) | ext kind (u8)?       -- only when kind == extension
//! | flags (u8)
//! | time: ticks (i64 BE) + uniquifier (u8)
//! | text: string                       -- absent for CloseGroup
//! | file name: string + line (var_u32) -- when FLAG_FILE_NAME
//! | tags: string                       -- when FLAG_TAGS
//! | exception: string + opt string     -- when FLAG_EXCEPTION
//! | conclusions: u8 count + pairs      -- when FLAG_CONCLUSIONS (CloseGroup)
//! | multicast footer                   -- when FLAG_MULTICAST
//! ```
//!
//! The header byte packs the level in bits 0..=2, the is-filtered bit in
//! bit 3 and the entry kind in bits 4..=5; bits 6..=7 are reserved zero.
//! A full zero header byte is the end marker (level 0 is not a legal level).
//!
//! The multicast footer is, in order: grand-output id (string, v9+), monitor
//! id (string), previous-entry kind (u8, 0 = none), previous time
//! (i64 BE + u8), group depth (var_u32). OpenGroup encodes the depth before
//! its own increment, CloseGroup the depth before its own decrement.
//!
//! Version history accepted by readers (5..=9):
//!
//! - v5/v6 — times carry no uniquifier byte.
//! - v7 — adds the uniquifier byte to every time.
//! - v8 — assigns the is-filtered header bit (reserved zero before).
//! - v9 — adds the exception stack-trace field and the grand-output id at
//!   the head of the multicast footer.

/// Stream magic bytes.
pub const MAGIC: [u8; 4] = *b"ckm1";

/// Version written by [`Writer`](crate::Writer).
pub const CURRENT_VERSION: u8 = 9;

/// Oldest version readers accept.
pub const MIN_SUPPORTED_VERSION: u8 = 5;

/// Clean stream terminator.
pub const END_MARKER: u8 = 0;

/// Conventional file extension for persisted streams.
pub const FILE_EXTENSION: &str = "ckmon";

/// gzip member magic, sniffed before the stream header.
pub(crate) const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

// Header byte packing.
pub(crate) const LEVEL_MASK: u8 = 0b0000_0111;
pub(crate) const FILTERED_BIT: u8 = 0b0000_1000;
pub(crate) const KIND_SHIFT: u8 = 4;
pub(crate) const KIND_MASK: u8 = 0b0011;
pub(crate) const RESERVED_MASK: u8 = 0b1100_0000;
/// Kind value announcing an extended-kind byte.
pub(crate) const KIND_EXTENSION: u8 = 3;

// Flags byte.
pub(crate) const FLAG_FILE_NAME: u8 = 0b0000_0001;
pub(crate) const FLAG_TAGS: u8 = 0b0000_0010;
pub(crate) const FLAG_EXCEPTION: u8 = 0b0000_0100;
pub(crate) const FLAG_CONCLUSIONS: u8 = 0b0000_1000;
pub(crate) const FLAG_MULTICAST: u8 = 0b0001_0000;
pub(crate) const FLAGS_RESERVED_MASK: u8 = 0b1110_0000;

/// First stream version carrying time uniquifier bytes.
pub(crate) const VERSION_WITH_UNIQUIFIER: u8 = 7;

/// First stream version carrying exception stack traces and the
/// grand-output id in the multicast footer.
pub(crate) const VERSION_WITH_PROVENANCE: u8 = 9;

/// Grand-output id substituted when a stream predates v9.
pub const UNKNOWN_GRAND_OUTPUT_ID: &str = "\u{a7}none";
