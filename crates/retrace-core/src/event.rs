//! The event model: kinds, payloads, and trait predicates.
//!
//! An event is one observable effect of instrumented execution,
//! recorded as a fixed-layout binary record in a thread's event log.
//! This module defines the closed set of event kinds, the decoded
//! [`Event`] payload type, and the per-kind trait predicates the
//! state mover dispatches on.
//!
//! Traits are properties of a *kind*, never stored per record:
//!
//! - `block_start`: a safe resumption point — applicable independently
//!   of any prior event.
//! - `subservient`: trailing detail attached to the previous event;
//!   never applied or retracted on its own.
//! - `function_level`: requires a live call frame (except
//!   [`EventKind::FunctionStart`], which creates one).
//! - `instruction`: advances the active instruction of the top frame.
//! - `modifies_shared_state`: touches the shared process state.
//! - `memory_state`: adds memory contents (never clears them).

use std::fmt;

use crate::id::InstrIndex;
use crate::rterror::{RuntimeErrorArgKind, RuntimeErrorKind};

/// Offset value denoting "no event" in an event reference or back-link
/// field.
pub const NO_OFFSET: u64 = u64::MAX;

/// Discriminant of an event record, as stored in the record header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)] // variants are documented on `Event`
pub enum EventKind {
    None = 0,
    FunctionStart = 1,
    FunctionEnd = 2,
    NewProcessTime = 3,
    NewThreadTime = 4,
    PreInstruction = 5,
    Instruction = 6,
    InstructionWithU8 = 7,
    InstructionWithU16 = 8,
    InstructionWithU32 = 9,
    InstructionWithU64 = 10,
    InstructionWithPtr = 11,
    InstructionWithFloat = 12,
    InstructionWithDouble = 13,
    InstructionWithLongDouble = 14,
    StackRestore = 15,
    Alloca = 16,
    Malloc = 17,
    Free = 18,
    Realloc = 19,
    StateUntypedSmall = 20,
    StateUntyped = 21,
    StateMemmove = 22,
    StateClear = 23,
    KnownRegionAdd = 24,
    KnownRegionRemove = 25,
    ByValRegionAdd = 26,
    FileOpen = 27,
    FileWrite = 28,
    FileWriteFromMemory = 29,
    FileClose = 30,
    DirOpen = 31,
    DirClose = 32,
    RuntimeError = 33,
    RuntimeErrorArg = 34,
}

impl EventKind {
    /// All kinds, in discriminant order.
    pub const ALL: [EventKind; 35] = [
        Self::None,
        Self::FunctionStart,
        Self::FunctionEnd,
        Self::NewProcessTime,
        Self::NewThreadTime,
        Self::PreInstruction,
        Self::Instruction,
        Self::InstructionWithU8,
        Self::InstructionWithU16,
        Self::InstructionWithU32,
        Self::InstructionWithU64,
        Self::InstructionWithPtr,
        Self::InstructionWithFloat,
        Self::InstructionWithDouble,
        Self::InstructionWithLongDouble,
        Self::StackRestore,
        Self::Alloca,
        Self::Malloc,
        Self::Free,
        Self::Realloc,
        Self::StateUntypedSmall,
        Self::StateUntyped,
        Self::StateMemmove,
        Self::StateClear,
        Self::KnownRegionAdd,
        Self::KnownRegionRemove,
        Self::ByValRegionAdd,
        Self::FileOpen,
        Self::FileWrite,
        Self::FileWriteFromMemory,
        Self::FileClose,
        Self::DirOpen,
        Self::DirClose,
        Self::RuntimeError,
        Self::RuntimeErrorArg,
    ];

    /// Decode a kind from its header byte.
    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }

    /// The header byte for this kind.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Size in bytes of the fixed payload following the 2-byte header.
    pub const fn payload_size(self) -> usize {
        match self {
            Self::None | Self::NewThreadTime => 0,
            Self::FunctionStart
            | Self::FunctionEnd
            | Self::PreInstruction
            | Self::Instruction
            | Self::StackRestore => 4,
            Self::InstructionWithU8 => 5,
            Self::InstructionWithU16 => 6,
            Self::NewProcessTime | Self::InstructionWithU32 | Self::InstructionWithFloat => 8,
            Self::InstructionWithU64 | Self::InstructionWithDouble => 12,
            Self::InstructionWithPtr | Self::InstructionWithLongDouble | Self::ByValRegionAdd => 20,
            Self::Alloca => 8,
            Self::Malloc | Self::Free | Self::FileClose => 16,
            Self::Realloc => 32,
            Self::StateUntypedSmall => 25,
            Self::StateUntyped
            | Self::StateMemmove
            | Self::FileOpen
            | Self::FileWrite
            | Self::FileWriteFromMemory => 32,
            Self::StateClear | Self::DirOpen | Self::DirClose => 24,
            Self::KnownRegionAdd | Self::KnownRegionRemove => 18,
            Self::RuntimeError => 3,
            Self::RuntimeErrorArg => 9,
        }
    }

    /// Total record size: 2-byte header plus the fixed payload.
    ///
    /// Always fits in a `u8`, which is what makes the
    /// `previous_event_size` back-link field possible.
    pub const fn record_size(self) -> usize {
        2 + self.payload_size()
    }

    /// Whether records of this kind are safe resumption points.
    pub const fn is_block_start(self) -> bool {
        matches!(self, Self::None | Self::FunctionStart | Self::NewProcessTime)
    }

    /// Whether records of this kind are trailing detail for the
    /// preceding event and must never be applied independently.
    pub const fn is_subservient(self) -> bool {
        matches!(self, Self::RuntimeErrorArg)
    }

    /// Whether records of this kind require a live call frame.
    ///
    /// `FunctionStart` is counted as function-level even though it is
    /// the event that creates the frame.
    pub const fn is_function_level(self) -> bool {
        matches!(
            self,
            Self::FunctionStart
                | Self::FunctionEnd
                | Self::NewThreadTime
                | Self::PreInstruction
                | Self::Instruction
                | Self::InstructionWithU8
                | Self::InstructionWithU16
                | Self::InstructionWithU32
                | Self::InstructionWithU64
                | Self::InstructionWithPtr
                | Self::InstructionWithFloat
                | Self::InstructionWithDouble
                | Self::InstructionWithLongDouble
                | Self::StackRestore
                | Self::Alloca
                | Self::Malloc
                | Self::Free
                | Self::Realloc
                | Self::ByValRegionAdd
                | Self::RuntimeError
        )
    }

    /// Whether records of this kind set the active instruction.
    pub const fn is_instruction(self) -> bool {
        matches!(
            self,
            Self::PreInstruction
                | Self::Instruction
                | Self::InstructionWithU8
                | Self::InstructionWithU16
                | Self::InstructionWithU32
                | Self::InstructionWithU64
                | Self::InstructionWithPtr
                | Self::InstructionWithFloat
                | Self::InstructionWithDouble
                | Self::InstructionWithLongDouble
        )
    }

    /// Whether records of this kind modify the shared process state.
    ///
    /// All such kinds except the known-region pair also carry a
    /// process-time stamp.
    pub const fn modifies_shared_state(self) -> bool {
        matches!(
            self,
            Self::Malloc
                | Self::Free
                | Self::Realloc
                | Self::StateUntypedSmall
                | Self::StateUntyped
                | Self::StateMemmove
                | Self::StateClear
                | Self::KnownRegionAdd
                | Self::KnownRegionRemove
                | Self::FileOpen
                | Self::FileWrite
                | Self::FileWriteFromMemory
                | Self::FileClose
                | Self::DirOpen
                | Self::DirClose
        )
    }

    /// Whether records of this kind add memory contents.
    pub const fn is_memory_state(self) -> bool {
        matches!(
            self,
            Self::StateUntypedSmall
                | Self::StateUntyped
                | Self::StateMemmove
                | Self::KnownRegionAdd
                | Self::ByValRegionAdd
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A decoded event record payload.
///
/// One variant per [`EventKind`]; field order matches the wire layout.
/// Events are plain data — all interpretation happens in the state
/// mover.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Event {
    /// Padding; no effect.
    None,
    /// A function invocation begins. `trace_index` keys into the
    /// thread's function-trace table, which carries the function
    /// index, the paired event offsets, and the entry/exit thread
    /// times.
    FunctionStart {
        /// Index into the thread's function-trace table.
        trace_index: u32,
    },
    /// The current function invocation ends.
    FunctionEnd {
        /// Index into the thread's function-trace table.
        trace_index: u32,
    },
    /// Another thread advanced the process time; this thread's view
    /// catches up.
    NewProcessTime {
        /// The new process time observed by this thread.
        process_time: u64,
    },
    /// The thread time advances by one without an instruction.
    NewThreadTime,
    /// An instruction becomes active before completing (it may fault).
    PreInstruction {
        /// Index of the instruction within its function.
        index: InstrIndex,
    },
    /// An instruction with no recorded value completes.
    Instruction {
        /// Index of the instruction within its function.
        index: InstrIndex,
    },
    /// An instruction producing an 8-bit value completes.
    InstructionWithU8 {
        /// Index of the instruction within its function.
        index: InstrIndex,
        /// The produced value.
        value: u8,
    },
    /// An instruction producing a 16-bit value completes.
    InstructionWithU16 {
        /// Index of the instruction within its function.
        index: InstrIndex,
        /// The produced value.
        value: u16,
    },
    /// An instruction producing a 32-bit value completes.
    InstructionWithU32 {
        /// Index of the instruction within its function.
        index: InstrIndex,
        /// The produced value.
        value: u32,
    },
    /// An instruction producing a 64-bit value completes.
    InstructionWithU64 {
        /// Index of the instruction within its function.
        index: InstrIndex,
        /// The produced value.
        value: u64,
    },
    /// An instruction producing a pointer completes.
    InstructionWithPtr {
        /// Index of the instruction within its function.
        index: InstrIndex,
        /// The pointer value.
        value: u64,
        /// Base address of the allocation the pointer refers to, or 0
        /// when unknown. Feeds pointer provenance.
        object: u64,
    },
    /// An instruction producing a single-precision float completes.
    InstructionWithFloat {
        /// Index of the instruction within its function.
        index: InstrIndex,
        /// The produced value.
        value: f32,
    },
    /// An instruction producing a double-precision float completes.
    InstructionWithDouble {
        /// Index of the instruction within its function.
        index: InstrIndex,
        /// The produced value.
        value: f64,
    },
    /// An instruction producing a `long double` completes. The two
    /// words hold the raw 80-bit x87 pattern, little-endian, low word
    /// first.
    InstructionWithLongDouble {
        /// Index of the instruction within its function.
        index: InstrIndex,
        /// Low 64 bits of the raw pattern.
        word1: u64,
        /// High bits of the raw pattern.
        word2: u64,
    },
    /// The stack pointer is restored, discarding the newest allocas.
    StackRestore {
        /// Number of allocas popped from the top frame.
        pop_count: u32,
    },
    /// A stack allocation. The address is the value of the
    /// immediately preceding `InstructionWithPtr` in the same thread.
    Alloca {
        /// Size of one element in bytes.
        element_size: u32,
        /// Number of elements allocated.
        element_count: u32,
    },
    /// A heap allocation. The address is the value of the immediately
    /// preceding `InstructionWithPtr` in the same thread.
    Malloc {
        /// Size of the allocation in bytes.
        size: u64,
        /// Process time after this event.
        process_time: u64,
    },
    /// A heap allocation is released.
    Free {
        /// Address previously returned by `Malloc`.
        address: u64,
        /// Process time after this event.
        process_time: u64,
    },
    /// A heap allocation is resized in place.
    Realloc {
        /// Address of the allocation.
        address: u64,
        /// Size before the resize.
        old_size: u64,
        /// Size after the resize.
        new_size: u64,
        /// Process time after this event.
        process_time: u64,
    },
    /// Up to eight bytes of memory are written, data inline.
    StateUntypedSmall {
        /// Number of meaningful bytes in `data` (1..=8).
        size: u8,
        /// Destination address.
        address: u64,
        /// The written bytes, little-endian packed.
        data: u64,
        /// Process time after this event.
        process_time: u64,
    },
    /// A block of memory is written, data in the process data pool.
    StateUntyped {
        /// Destination address.
        address: u64,
        /// Offset of the bytes within the process data pool.
        data_offset: u64,
        /// Number of bytes written.
        data_size: u64,
        /// Process time after this event.
        process_time: u64,
    },
    /// Memory is copied, `memmove`-style (overlap permitted).
    StateMemmove {
        /// Source address.
        source: u64,
        /// Destination address.
        destination: u64,
        /// Number of bytes copied.
        size: u64,
        /// Process time after this event.
        process_time: u64,
    },
    /// A region of memory becomes uninitialized.
    StateClear {
        /// First address cleared.
        address: u64,
        /// Number of bytes cleared.
        size: u64,
        /// Process time after this event.
        process_time: u64,
    },
    /// An externally owned region becomes known (e.g. argv).
    KnownRegionAdd {
        /// First address of the region.
        address: u64,
        /// Length of the region in bytes.
        size: u64,
        /// Nonzero if the region is readable.
        readable: u8,
        /// Nonzero if the region is writable.
        writable: u8,
    },
    /// A known region's lifetime ends. Carries the same payload as
    /// the matching add so that retraction needs no prior state.
    KnownRegionRemove {
        /// First address of the region.
        address: u64,
        /// Length of the region in bytes.
        size: u64,
        /// Nonzero if the region was readable.
        readable: u8,
        /// Nonzero if the region was writable.
        writable: u8,
    },
    /// A by-value aggregate argument's backing region is registered
    /// with the newly entered frame.
    ByValRegionAdd {
        /// Index of the formal argument.
        argument: u32,
        /// First address of the backing region.
        address: u64,
        /// Length of the backing region in bytes.
        size: u64,
    },
    /// A `FILE` stream is opened.
    FileOpen {
        /// Opaque handle address of the stream.
        file: u64,
        /// Offset of the NUL-terminated filename in the data pool.
        filename_offset: u64,
        /// Offset of the NUL-terminated mode string in the data pool.
        mode_offset: u64,
        /// Process time after this event.
        process_time: u64,
    },
    /// Bytes are written to a stream, data in the process data pool.
    FileWrite {
        /// Opaque handle address of the stream.
        file: u64,
        /// Offset of the written bytes within the data pool.
        data_offset: u64,
        /// Number of bytes written.
        data_size: u64,
        /// Process time after this event.
        process_time: u64,
    },
    /// Bytes are written to a stream, sourced from traced memory.
    FileWriteFromMemory {
        /// Opaque handle address of the stream.
        file: u64,
        /// Address of the source bytes in traced memory.
        data_address: u64,
        /// Number of bytes written.
        data_size: u64,
        /// Process time after this event.
        process_time: u64,
    },
    /// A stream is closed.
    FileClose {
        /// Opaque handle address of the stream.
        file: u64,
        /// Process time after this event.
        process_time: u64,
    },
    /// A directory handle is opened.
    DirOpen {
        /// Opaque handle address of the directory.
        dir: u64,
        /// Offset of the NUL-terminated directory name in the data pool.
        dirname_offset: u64,
        /// Process time after this event.
        process_time: u64,
    },
    /// A directory handle is closed. Carries the dirname offset so
    /// that retraction can re-open without prior state.
    DirClose {
        /// Opaque handle address of the directory.
        dir: u64,
        /// Offset of the NUL-terminated directory name in the data pool.
        dirname_offset: u64,
        /// Process time after this event.
        process_time: u64,
    },
    /// A runtime error was detected in the traced program. Followed by
    /// `arg_count` subservient [`Event::RuntimeErrorArg`] records.
    RuntimeError {
        /// Classification of the fault.
        kind: RuntimeErrorKind,
        /// Whether this is the top-level error (detail errors follow
        /// with `is_top_level == false`).
        is_top_level: bool,
        /// Number of subservient argument records that follow.
        arg_count: u8,
    },
    /// One argument of the preceding runtime error. Subservient.
    RuntimeErrorArg {
        /// What the datum describes.
        arg_kind: RuntimeErrorArgKind,
        /// The raw datum.
        data: u64,
    },
}

impl Event {
    /// The kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::None => EventKind::None,
            Self::FunctionStart { .. } => EventKind::FunctionStart,
            Self::FunctionEnd { .. } => EventKind::FunctionEnd,
            Self::NewProcessTime { .. } => EventKind::NewProcessTime,
            Self::NewThreadTime => EventKind::NewThreadTime,
            Self::PreInstruction { .. } => EventKind::PreInstruction,
            Self::Instruction { .. } => EventKind::Instruction,
            Self::InstructionWithU8 { .. } => EventKind::InstructionWithU8,
            Self::InstructionWithU16 { .. } => EventKind::InstructionWithU16,
            Self::InstructionWithU32 { .. } => EventKind::InstructionWithU32,
            Self::InstructionWithU64 { .. } => EventKind::InstructionWithU64,
            Self::InstructionWithPtr { .. } => EventKind::InstructionWithPtr,
            Self::InstructionWithFloat { .. } => EventKind::InstructionWithFloat,
            Self::InstructionWithDouble { .. } => EventKind::InstructionWithDouble,
            Self::InstructionWithLongDouble { .. } => EventKind::InstructionWithLongDouble,
            Self::StackRestore { .. } => EventKind::StackRestore,
            Self::Alloca { .. } => EventKind::Alloca,
            Self::Malloc { .. } => EventKind::Malloc,
            Self::Free { .. } => EventKind::Free,
            Self::Realloc { .. } => EventKind::Realloc,
            Self::StateUntypedSmall { .. } => EventKind::StateUntypedSmall,
            Self::StateUntyped { .. } => EventKind::StateUntyped,
            Self::StateMemmove { .. } => EventKind::StateMemmove,
            Self::StateClear { .. } => EventKind::StateClear,
            Self::KnownRegionAdd { .. } => EventKind::KnownRegionAdd,
            Self::KnownRegionRemove { .. } => EventKind::KnownRegionRemove,
            Self::ByValRegionAdd { .. } => EventKind::ByValRegionAdd,
            Self::FileOpen { .. } => EventKind::FileOpen,
            Self::FileWrite { .. } => EventKind::FileWrite,
            Self::FileWriteFromMemory { .. } => EventKind::FileWriteFromMemory,
            Self::FileClose { .. } => EventKind::FileClose,
            Self::DirOpen { .. } => EventKind::DirOpen,
            Self::DirClose { .. } => EventKind::DirClose,
            Self::RuntimeError { .. } => EventKind::RuntimeError,
            Self::RuntimeErrorArg { .. } => EventKind::RuntimeErrorArg,
        }
    }

    /// The process-time stamp carried by this event, if any.
    pub fn process_time(&self) -> Option<u64> {
        match *self {
            Self::NewProcessTime { process_time }
            | Self::Malloc { process_time, .. }
            | Self::Free { process_time, .. }
            | Self::Realloc { process_time, .. }
            | Self::StateUntypedSmall { process_time, .. }
            | Self::StateUntyped { process_time, .. }
            | Self::StateMemmove { process_time, .. }
            | Self::StateClear { process_time, .. }
            | Self::FileOpen { process_time, .. }
            | Self::FileWrite { process_time, .. }
            | Self::FileWriteFromMemory { process_time, .. }
            | Self::FileClose { process_time, .. }
            | Self::DirOpen { process_time, .. }
            | Self::DirClose { process_time, .. } => Some(process_time),
            _ => None,
        }
    }

    /// The instruction index carried by this event, if any.
    pub fn index(&self) -> Option<InstrIndex> {
        match *self {
            Self::PreInstruction { index }
            | Self::Instruction { index }
            | Self::InstructionWithU8 { index, .. }
            | Self::InstructionWithU16 { index, .. }
            | Self::InstructionWithU32 { index, .. }
            | Self::InstructionWithU64 { index, .. }
            | Self::InstructionWithPtr { index, .. }
            | Self::InstructionWithFloat { index, .. }
            | Self::InstructionWithDouble { index, .. }
            | Self::InstructionWithLongDouble { index, .. } => Some(index),
            _ => None,
        }
    }
}
