//! Entry model: levels, filters, tags and the log entry variants.
//!
//! A [`LogEntry`] is one of three kinds (line, group open, group close),
//! optionally extended with a [`MulticastInfo`] footer that carries enough
//! provenance (source monitor id, previous-entry chain, group depth) to
//! reassemble a single monitor's activity out of a multiplexed stream.

use common::DateTimeStamp;

use crate::error::Error;

/// Severity of a log entry. `Debug` is the most verbose level.
///
/// Discriminants are the wire values (3 bits in the entry header byte);
/// 0 is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug = 1,
    Trace = 2,
    Info = 3,
    Warn = 4,
    Error = 5,
    Fatal = 6,
}

impl LogLevel {
    /// Returns the wire id of this level.
    pub fn id(&self) -> u8 {
        *self as u8
    }

    /// Converts a wire id back to a level.
    pub fn from_id(id: u8) -> Result<Self, Error> {
        match id {
            1 => Ok(LogLevel::Debug),
            2 => Ok(LogLevel::Trace),
            3 => Ok(LogLevel::Info),
            4 => Ok(LogLevel::Warn),
            5 => Ok(LogLevel::Error),
            6 => Ok(LogLevel::Fatal),
            _ => Err(Error::InvalidData(format!("invalid log level: {}", id))),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Debug => "Debug",
            LogLevel::Trace => "Trace",
            LogLevel::Info => "Info",
            LogLevel::Warn => "Warn",
            LogLevel::Error => "Error",
            LogLevel::Fatal => "Fatal",
        };
        f.write_str(s)
    }
}

/// Entry kind discriminator (2 bits in the entry header byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogKind {
    Line = 0,
    OpenGroup = 1,
    CloseGroup = 2,
}

impl LogKind {
    /// Returns the wire id of this kind.
    pub fn id(&self) -> u8 {
        *self as u8
    }

    /// Converts a wire id back to a kind.
    pub fn from_id(id: u8) -> Result<Self, Error> {
        match id {
            0 => Ok(LogKind::Line),
            1 => Ok(LogKind::OpenGroup),
            2 => Ok(LogKind::CloseGroup),
            _ => Err(Error::InvalidData(format!("invalid entry kind: {}", id))),
        }
    }
}

/// Threshold applied to one stream of entries (lines or groups).
///
/// `Undefined` defers to the surrounding default and passes everything,
/// `Off` rejects everything, any level value passes entries at that level
/// or above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum LogLevelFilter {
    #[default]
    Undefined,
    Debug,
    Trace,
    Info,
    Warn,
    Error,
    Fatal,
    Off,
}

impl LogLevelFilter {
    /// Whether an entry at `level` passes this threshold.
    pub fn allows(&self, level: LogLevel) -> bool {
        match self.threshold() {
            None => *self != LogLevelFilter::Off,
            Some(min) => level >= min,
        }
    }

    /// Keeps the most verbose defined threshold of the two.
    pub fn combine(self, other: LogLevelFilter) -> LogLevelFilter {
        match (self, other) {
            (LogLevelFilter::Undefined, o) => o,
            (s, LogLevelFilter::Undefined) => s,
            (LogLevelFilter::Off, o) => o,
            (s, LogLevelFilter::Off) => s,
            (s, o) => {
                if s.threshold() <= o.threshold() {
                    s
                } else {
                    o
                }
            }
        }
    }

    fn threshold(&self) -> Option<LogLevel> {
        match self {
            LogLevelFilter::Undefined | LogLevelFilter::Off => None,
            LogLevelFilter::Debug => Some(LogLevel::Debug),
            LogLevelFilter::Trace => Some(LogLevel::Trace),
            LogLevelFilter::Info => Some(LogLevel::Info),
            LogLevelFilter::Warn => Some(LogLevel::Warn),
            LogLevelFilter::Error => Some(LogLevel::Error),
            LogLevelFilter::Fatal => Some(LogLevel::Fatal),
        }
    }

    fn parse_token(token: &str) -> Option<LogLevelFilter> {
        match token.trim().to_ascii_lowercase().as_str() {
            "undefined" => Some(LogLevelFilter::Undefined),
            "debug" => Some(LogLevelFilter::Debug),
            "trace" => Some(LogLevelFilter::Trace),
            "info" => Some(LogLevelFilter::Info),
            "warn" => Some(LogLevelFilter::Warn),
            "error" => Some(LogLevelFilter::Error),
            "fatal" => Some(LogLevelFilter::Fatal),
            "off" => Some(LogLevelFilter::Off),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogLevelFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevelFilter::Undefined => "Undefined",
            LogLevelFilter::Debug => "Debug",
            LogLevelFilter::Trace => "Trace",
            LogLevelFilter::Info => "Info",
            LogLevelFilter::Warn => "Warn",
            LogLevelFilter::Error => "Error",
            LogLevelFilter::Fatal => "Fatal",
            LogLevelFilter::Off => "Off",
        };
        f.write_str(s)
    }
}

/// A pair of thresholds: one for group entries, one for lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct LogFilter {
    pub group: LogLevelFilter,
    pub line: LogLevelFilter,
}

impl LogFilter {
    pub const UNDEFINED: LogFilter = LogFilter {
        group: LogLevelFilter::Undefined,
        line: LogLevelFilter::Undefined,
    };
    pub const DEBUG: LogFilter = LogFilter {
        group: LogLevelFilter::Debug,
        line: LogLevelFilter::Debug,
    };
    pub const TRACE: LogFilter = LogFilter {
        group: LogLevelFilter::Trace,
        line: LogLevelFilter::Trace,
    };
    pub const VERBOSE: LogFilter = LogFilter {
        group: LogLevelFilter::Trace,
        line: LogLevelFilter::Info,
    };
    pub const TERSE: LogFilter = LogFilter {
        group: LogLevelFilter::Info,
        line: LogLevelFilter::Warn,
    };
    pub const RELEASE: LogFilter = LogFilter {
        group: LogLevelFilter::Off,
        line: LogLevelFilter::Error,
    };
    pub const OFF: LogFilter = LogFilter {
        group: LogLevelFilter::Off,
        line: LogLevelFilter::Off,
    };

    pub fn new(group: LogLevelFilter, line: LogLevelFilter) -> Self {
        Self { group, line }
    }

    /// `true` when both components are `Undefined`.
    pub fn is_undefined(&self) -> bool {
        *self == LogFilter::UNDEFINED
    }

    /// Keeps the most verbose defined component of each pair.
    pub fn combine(self, other: LogFilter) -> LogFilter {
        LogFilter {
            group: self.group.combine(other.group),
            line: self.line.combine(other.line),
        }
    }
}

impl std::fmt::Display for LogFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            LogFilter::UNDEFINED => f.write_str("Undefined"),
            LogFilter::DEBUG => f.write_str("Debug"),
            LogFilter::TRACE => f.write_str("Trace"),
            LogFilter::VERBOSE => f.write_str("Verbose"),
            LogFilter::TERSE => f.write_str("Terse"),
            LogFilter::RELEASE => f.write_str("Release"),
            LogFilter::OFF => f.write_str("Off"),
            LogFilter { group, line } => write!(f, "{{{},{}}}", group, line),
        }
    }
}

impl std::str::FromStr for LogFilter {
    type Err = Error;

    /// Accepts the named filters (case-insensitive), a `{Group,Line}` tuple,
    /// and tolerates a trailing `!` (strict marker used by configuration
    /// trees).
    fn from_str(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        let s = s.strip_suffix('!').unwrap_or(s).trim();
        match s.to_ascii_lowercase().as_str() {
            "undefined" => return Ok(LogFilter::UNDEFINED),
            "debug" => return Ok(LogFilter::DEBUG),
            "trace" => return Ok(LogFilter::TRACE),
            "verbose" => return Ok(LogFilter::VERBOSE),
            "terse" => return Ok(LogFilter::TERSE),
            "release" => return Ok(LogFilter::RELEASE),
            "off" => return Ok(LogFilter::OFF),
            _ => {}
        }
        let invalid = || Error::InvalidData(format!("invalid log filter: {:?}", s));
        let inner = s
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or_else(invalid)?;
        let (group, line) = inner.split_once(',').ok_or_else(invalid)?;
        Ok(LogFilter {
            group: LogLevelFilter::parse_token(group).ok_or_else(invalid)?,
            line: LogLevelFilter::parse_token(line).ok_or_else(invalid)?,
        })
    }
}

/// Tag set attached to an entry.
///
/// A tag set is a normalized set of non-empty atoms: parsing splits on `|`,
/// trims, drops empties, sorts and dedups, so equal sets always render to the
/// same pipe-joined text.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct Tags {
    atoms: Vec<String>,
}

/// Atom marking an entry whose text packs a complete identity card.
pub const IDENTITY_CARD_FULL: &str = "IdentityCardFull";
/// Atom marking an entry whose text packs identity-card additions.
pub const IDENTITY_CARD_UPDATE: &str = "IdentityCardUpdate";

impl Tags {
    /// The empty tag set.
    pub fn empty() -> Self {
        Tags::default()
    }

    /// Parses a pipe-joined tag string.
    pub fn parse(text: &str) -> Self {
        let mut atoms: Vec<String> = text
            .split('|')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();
        atoms.sort();
        atoms.dedup();
        Tags { atoms }
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// Atoms in sorted order.
    pub fn atoms(&self) -> impl Iterator<Item = &str> {
        self.atoms.iter().map(String::as_str)
    }

    /// Whether `atom` is part of this set.
    pub fn contains(&self, atom: &str) -> bool {
        self.atoms.binary_search_by(|a| a.as_str().cmp(atom)).is_ok()
    }

    /// Whether the two sets share at least one atom.
    pub fn overlaps(&self, other: &Tags) -> bool {
        let mut a = self.atoms.iter();
        let mut b = other.atoms.iter();
        let (mut x, mut y) = (a.next(), b.next());
        while let (Some(l), Some(r)) = (x, y) {
            match l.cmp(r) {
                std::cmp::Ordering::Less => x = a.next(),
                std::cmp::Ordering::Greater => y = b.next(),
                std::cmp::Ordering::Equal => return true,
            }
        }
        false
    }

    /// Set union.
    pub fn union(&self, other: &Tags) -> Tags {
        let mut atoms = self.atoms.clone();
        atoms.extend(other.atoms.iter().cloned());
        atoms.sort();
        atoms.dedup();
        Tags { atoms }
    }
}

impl std::fmt::Display for Tags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.atoms.join("|"))
    }
}

impl std::str::FromStr for Tags {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Tags::parse(s))
    }
}

/// One conclusion attached to a group close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conclusion {
    pub tag: String,
    pub text: String,
}

/// Error payload attached to an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionData {
    pub message: String,
    pub stack_trace: Option<String>,
}

/// The per-entry payload common to unicast and multicast entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogData {
    pub kind: LogKind,
    pub level: LogLevel,
    /// Entry was emitted despite the active filter (forced log).
    pub is_filtered: bool,
    /// Entry text. `None` only for [`LogKind::CloseGroup`].
    pub text: Option<String>,
    pub time: DateTimeStamp,
    pub file_name: Option<String>,
    pub line_number: u32,
    pub tags: Tags,
    pub exception: Option<ExceptionData>,
    /// Only meaningful for [`LogKind::CloseGroup`].
    pub conclusions: Vec<Conclusion>,
}

impl LogData {
    /// A text line.
    pub fn line(level: LogLevel, tags: Tags, text: impl Into<String>, time: DateTimeStamp) -> Self {
        Self {
            kind: LogKind::Line,
            level,
            is_filtered: false,
            text: Some(text.into()),
            time,
            file_name: None,
            line_number: 0,
            tags,
            exception: None,
            conclusions: Vec::new(),
        }
    }

    /// A group opening.
    pub fn open_group(
        level: LogLevel,
        tags: Tags,
        text: impl Into<String>,
        time: DateTimeStamp,
    ) -> Self {
        Self {
            kind: LogKind::OpenGroup,
            ..Self::line(level, tags, text, time)
        }
    }

    /// A group close carrying conclusions.
    pub fn close_group(level: LogLevel, time: DateTimeStamp, conclusions: Vec<Conclusion>) -> Self {
        Self {
            kind: LogKind::CloseGroup,
            level,
            is_filtered: false,
            text: None,
            time,
            file_name: None,
            line_number: 0,
            tags: Tags::empty(),
            exception: None,
            conclusions,
        }
    }

    /// Checks the structural invariants of the payload.
    ///
    /// Text must be present except on group closes; conclusions only appear
    /// on group closes.
    pub fn validate(&self) -> Result<(), Error> {
        match self.kind {
            LogKind::CloseGroup => {
                if self.text.is_some() {
                    return Err(Error::InvalidEntry("group close carries text".into()));
                }
            }
            _ => {
                if self.text.is_none() {
                    return Err(Error::InvalidEntry(format!(
                        "{:?} entry without text",
                        self.kind
                    )));
                }
                if !self.conclusions.is_empty() {
                    return Err(Error::InvalidEntry(format!(
                        "{:?} entry carries conclusions",
                        self.kind
                    )));
                }
            }
        }
        if self.conclusions.len() > u8::MAX as usize {
            return Err(Error::InvalidEntry("more than 255 conclusions".into()));
        }
        Ok(())
    }
}

/// Provenance footer turning a unicast entry into a multicast one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastInfo {
    /// Id of the pump that collected the entry.
    pub grand_output_id: String,
    /// Id of the monitor that emitted the entry.
    pub monitor_id: String,
    /// Kind of the monitor's previous entry, `None` for its first one.
    pub prev_kind: Option<LogKind>,
    /// Time of the monitor's previous entry, `UNKNOWN` for its first one.
    pub prev_time: DateTimeStamp,
    /// Monitor group depth at emission (pre-increment for opens,
    /// pre-decrement for closes).
    pub depth: u32,
}

/// A log entry: payload plus optional multicast footer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub data: LogData,
    pub multicast: Option<MulticastInfo>,
}

impl LogEntry {
    pub fn unicast(data: LogData) -> Self {
        Self {
            data,
            multicast: None,
        }
    }

    pub fn multicast(data: LogData, info: MulticastInfo) -> Self {
        Self {
            data,
            multicast: Some(info),
        }
    }

    /// Monitor id of the footer, when present.
    pub fn monitor_id(&self) -> Option<&str> {
        self.multicast.as_ref().map(|m| m.monitor_id.as_str())
    }
}
