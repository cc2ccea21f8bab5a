//! Reversible replay state and the bidirectional state mover.
//!
//! Given an open trace and a module index, [`Session`] reconstructs
//! the traced program's state at any point in time: the shared
//! [`ProcessState`] (process time, heap allocations, streams,
//! directories, known regions, and the byte-accurate [`MemoryState`]),
//! one [`ThreadState`] per thread (clocks and call stack), and a
//! [`FunctionState`] per live frame (value slots, active instruction,
//! allocas, by-value regions, pointer provenance, runtime errors).
//!
//! Movement is event-by-event and exactly reversible: applying an
//! event and retracting it restores every observable bit. Reversal is
//! powered by a strict-LIFO memory journal plus stashes for the
//! structures events destroy (completed frames, cleared allocas,
//! closed streams, freed heap blocks).
//!
//! Mutation is single-threaded (`&mut Session`); reads are gated by a
//! [`StateAccessToken`] that movement invalidates.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod function;
pub mod memory;
mod mover;
pub mod process;
pub mod session;
pub mod thread;
pub mod token;

pub use error::StateError;
pub use function::{
    ActiveInstruction, AllocaState, AttachedError, ByValArea, FunctionState, PointerTarget,
};
pub use memory::{ByteCell, MemoryRegion, MemoryState};
pub use process::{
    DirState, MallocState, ProcessState, StandardStream, StreamState, STDERR_ADDRESS,
    STDIN_ADDRESS, STDOUT_ADDRESS,
};
pub use session::{Session, SessionMetrics};
pub use thread::ThreadState;
pub use token::StateAccessToken;
