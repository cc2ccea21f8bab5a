//! The module index: stable lookups over the instrumented module.
//!
//! Event records name functions and instructions by dense integer
//! indices. This crate resolves those indices to descriptors — what
//! kind of instruction sits at an index, what type its result has,
//! which source construct it came from — and carries the canonical
//! type model the value projector consumes.
//!
//! Everything here is immutable once constructed, and all lookups are
//! constant-time. A missing source mapping is represented as `None`
//! ("unmapped"), never as an error.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod index;
pub mod mapping;
pub mod types;

pub use index::{ArgumentInfo, FunctionInfo, InstructionInfo, ModuleIndex};
pub use mapping::{FileId, SourceDecl, SourceRef};
pub use types::{ArrayCount, CanonicalType, FieldInfo, RecordId, RecordInfo, TypeId, TypeTable};
