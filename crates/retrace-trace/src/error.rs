//! Error types for trace reading.

use std::fmt;
use std::io;

use retrace_core::ThreadId;

/// Errors raised while opening or reading a trace.
///
/// Every variant is fatal to the session that hit it: a trace that
/// fails to decode is treated as corrupt, and no partial state is
/// produced.
#[derive(Debug)]
pub enum TraceError {
    /// An I/O error occurred while reading the file.
    Io(io::Error),
    /// The format version is not supported by this build.
    UnsupportedVersion {
        /// The version found in the file.
        found: u64,
    },
    /// A block header or payload violated the file layout.
    InvalidBlock {
        /// Human-readable description of what went wrong.
        detail: String,
    },
    /// A required block is absent.
    MissingBlock {
        /// Name of the missing block type.
        block: &'static str,
    },
    /// A block that must appear exactly once appeared again.
    DuplicateBlock {
        /// Name of the duplicated block type.
        block: &'static str,
    },
    /// An event record extends past the end of its thread's log.
    TruncatedRecord {
        /// The thread whose log is truncated.
        thread: ThreadId,
        /// Offset of the truncated record.
        offset: u64,
    },
    /// An event record's kind byte is not a known event kind.
    UnknownEventKind {
        /// The thread whose log contains the record.
        thread: ThreadId,
        /// Offset of the record.
        offset: u64,
        /// The unrecognized kind byte.
        tag: u8,
    },
    /// A record's previous-size back-link does not land on the
    /// preceding record's boundary.
    BadBackLink {
        /// The thread whose log contains the record.
        thread: ThreadId,
        /// Offset of the record with the bad back-link.
        offset: u64,
    },
    /// A data-pool reference reaches outside the pool.
    DataOutOfBounds {
        /// Offset of the reference.
        offset: u64,
        /// Size of the reference.
        size: u64,
    },
    /// A data-pool string is not NUL-terminated valid UTF-8.
    BadString {
        /// Offset of the string.
        offset: u64,
    },
    /// A `FunctionStart`/`FunctionEnd` names a function-trace entry
    /// that does not exist.
    UnknownFunctionTrace {
        /// The thread whose table was indexed.
        thread: ThreadId,
        /// The out-of-range entry index.
        index: u32,
    },
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::UnsupportedVersion { found } => {
                write!(f, "unsupported trace format version {found}")
            }
            Self::InvalidBlock { detail } => write!(f, "invalid block: {detail}"),
            Self::MissingBlock { block } => write!(f, "missing {block} block"),
            Self::DuplicateBlock { block } => write!(f, "duplicate {block} block"),
            Self::TruncatedRecord { thread, offset } => {
                write!(f, "truncated record in thread {thread} at offset {offset}")
            }
            Self::UnknownEventKind {
                thread,
                offset,
                tag,
            } => {
                write!(
                    f,
                    "unknown event kind {tag} in thread {thread} at offset {offset}"
                )
            }
            Self::BadBackLink { thread, offset } => {
                write!(f, "bad back-link in thread {thread} at offset {offset}")
            }
            Self::DataOutOfBounds { offset, size } => {
                write!(
                    f,
                    "data reference (offset {offset}, size {size}) outside data pool"
                )
            }
            Self::BadString { offset } => {
                write!(f, "malformed string in data pool at offset {offset}")
            }
            Self::UnknownFunctionTrace { thread, index } => {
                write!(
                    f,
                    "unknown function-trace entry {index} in thread {thread}"
                )
            }
        }
    }
}

impl std::error::Error for TraceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TraceError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
