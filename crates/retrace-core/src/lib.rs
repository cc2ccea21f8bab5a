//! Core types for the retrace replay engine.
//!
//! This crate defines the vocabulary shared by every other retrace
//! crate: strongly-typed identifiers, memory areas and permissions,
//! the per-instruction runtime-value union, and the event model
//! (kinds, payloads, and trait predicates).
//!
//! Nothing here performs I/O or holds replay state. The binary codec
//! for events lives in `retrace-trace`; the state machine that applies
//! them lives in `retrace-state`.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod area;
pub mod event;
pub mod id;
pub mod rterror;
pub mod value;

pub use area::{MemoryArea, MemoryPermission};
pub use event::{Event, EventKind, NO_OFFSET};
pub use id::{Argument, EventRef, FunctionIndex, InstrIndex, ThreadId};
pub use rterror::{RuntimeError, RuntimeErrorArg, RuntimeErrorArgKind, RuntimeErrorKind};
pub use value::RuntimeValue;
