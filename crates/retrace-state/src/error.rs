//! Error types for replay state and movement.

use std::fmt;

use retrace_core::{FunctionIndex, InstrIndex, MemoryArea, ThreadId};
use retrace_trace::TraceError;

/// Errors raised while applying or retracting events.
///
/// Apart from [`StateError::StaleToken`], every variant is fatal: the
/// trace and the reconstructed state have diverged, which means the
/// trace is corrupt. The session poisons itself on the first fatal
/// error and refuses further movement.
#[derive(Debug)]
pub enum StateError {
    /// A trace decoding error surfaced during movement.
    Trace(TraceError),
    /// The session hit a fatal error earlier and refuses movement.
    Poisoned,
    /// A query used an access token that movement has invalidated.
    StaleToken,
    /// A thread id does not name a traced thread.
    UnknownThread {
        /// The unknown thread.
        thread: ThreadId,
    },
    /// A function-level event arrived with an empty call stack.
    NoActiveFunction {
        /// The thread whose stack was empty.
        thread: ThreadId,
    },
    /// `FunctionEnd` retraction found no completed frame to revive.
    NoCompletedFrame {
        /// The thread whose stash was empty.
        thread: ThreadId,
    },
    /// An allocation event has no preceding pointer-producing
    /// instruction to take its address from.
    MissingPtrInstruction {
        /// The thread whose log was searched.
        thread: ThreadId,
        /// Offset of the allocation event.
        offset: u64,
    },
    /// An operation referenced a heap allocation that is not live.
    UnknownMalloc {
        /// The unrecognized address.
        address: u64,
    },
    /// An operation referenced a stream handle that is not open.
    UnknownStream {
        /// The unrecognized handle address.
        address: u64,
    },
    /// An operation referenced a directory handle that is not open.
    UnknownDir {
        /// The unrecognized handle address.
        address: u64,
    },
    /// An operation referenced a known region that is not registered.
    UnknownKnownRegion {
        /// The unrecognized address.
        address: u64,
    },
    /// A handle registration collided with a live handle.
    DuplicateHandle {
        /// The colliding handle address.
        address: u64,
    },
    /// An allocation add overlaps a live allocation.
    OverlappingAllocation {
        /// The offending area.
        area: MemoryArea,
    },
    /// An operation named an allocation that is not live.
    UnknownAllocation {
        /// The named area.
        area: MemoryArea,
    },
    /// A memory inverse operation did not match the journal top.
    JournalMismatch {
        /// Human-readable description of the divergence.
        detail: String,
    },
    /// A stash-based inversion (frames, streams, mallocs) did not
    /// match the stashed entry.
    StashMismatch {
        /// Human-readable description of the divergence.
        detail: String,
    },
    /// A value event named an instruction outside its function.
    ValueSlotOutOfRange {
        /// The function whose frame was addressed.
        function: FunctionIndex,
        /// The out-of-range instruction index.
        index: InstrIndex,
    },
    /// An event named a function the module index does not know.
    UnknownFunction {
        /// The unknown function.
        function: FunctionIndex,
    },
    /// A `RuntimeError` event's subservient detail records are missing
    /// or malformed.
    MalformedErrorDetail {
        /// The thread whose log was read.
        thread: ThreadId,
        /// Offset of the `RuntimeError` record.
        offset: u64,
    },
    /// `FileWriteFromMemory` named a source region that is not
    /// completely initialized.
    UninitializedWriteSource {
        /// First address of the source region.
        address: u64,
        /// Size of the source region.
        size: u64,
    },
    /// A stream unwrite asked for more bytes than were written.
    StreamBufferUnderflow {
        /// The stream handle address.
        address: u64,
        /// Bytes requested for removal.
        requested: u64,
        /// Bytes available in the write buffer.
        available: u64,
    },
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trace(e) => write!(f, "trace error: {e}"),
            Self::Poisoned => write!(f, "session is poisoned after an earlier fatal error"),
            Self::StaleToken => write!(f, "state access token invalidated by movement"),
            Self::UnknownThread { thread } => write!(f, "unknown thread {thread}"),
            Self::NoActiveFunction { thread } => {
                write!(f, "function-level event with empty call stack in thread {thread}")
            }
            Self::NoCompletedFrame { thread } => {
                write!(f, "no completed frame to revive in thread {thread}")
            }
            Self::MissingPtrInstruction { thread, offset } => {
                write!(
                    f,
                    "no preceding pointer instruction for allocation event in thread {thread} \
                     at offset {offset}"
                )
            }
            Self::UnknownMalloc { address } => {
                write!(f, "no live heap allocation at {address:#x}")
            }
            Self::UnknownStream { address } => write!(f, "no open stream at {address:#x}"),
            Self::UnknownDir { address } => write!(f, "no open directory at {address:#x}"),
            Self::UnknownKnownRegion { address } => {
                write!(f, "no known region at {address:#x}")
            }
            Self::DuplicateHandle { address } => {
                write!(f, "handle {address:#x} is already registered")
            }
            Self::OverlappingAllocation { area } => {
                write!(f, "allocation {area} overlaps a live allocation")
            }
            Self::UnknownAllocation { area } => write!(f, "no live allocation {area}"),
            Self::JournalMismatch { detail } => write!(f, "memory journal mismatch: {detail}"),
            Self::StashMismatch { detail } => write!(f, "stash mismatch: {detail}"),
            Self::ValueSlotOutOfRange { function, index } => {
                write!(
                    f,
                    "instruction {index} is outside function {function}'s value slots"
                )
            }
            Self::UnknownFunction { function } => {
                write!(f, "module index has no function {function}")
            }
            Self::MalformedErrorDetail { thread, offset } => {
                write!(
                    f,
                    "malformed runtime-error detail in thread {thread} at offset {offset}"
                )
            }
            Self::UninitializedWriteSource { address, size } => {
                write!(
                    f,
                    "file write from uninitialized memory ({size} bytes at {address:#x})"
                )
            }
            Self::StreamBufferUnderflow {
                address,
                requested,
                available,
            } => {
                write!(
                    f,
                    "stream {address:#x} unwrite of {requested} bytes exceeds buffer of \
                     {available} bytes"
                )
            }
        }
    }
}

impl std::error::Error for StateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Trace(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TraceError> for StateError {
    fn from(e: TraceError) -> Self {
        Self::Trace(e)
    }
}
