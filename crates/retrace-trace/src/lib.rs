//! Trace file reading and the per-thread event log.
//!
//! A trace is a single binary file recorded by the instrumenting
//! tracer:
//!
//! ```text
//! [FORMAT_VERSION u64]
//! [ModuleBitcode block] [ProcessTrace block] [ProcessData block]
//! [ThreadEvents block] ... (one per thread)
//! ```
//!
//! Each block is `[type u8][length u64][payload]`. Event records are
//! variable-size with a fixed 2-byte header `(kind, previous_event_size)`;
//! the previous-size field back-links each record to its predecessor so
//! the log can be walked in both directions from any record boundary.
//!
//! - [`TraceFile`] opens and validates a trace
//! - [`ThreadEventLog`] gives random access plus forward/backward
//!   iteration and the backward-search primitives the state mover
//!   relies on
//! - [`TraceBuilder`] emits well-formed trace bytes for tests and tools
//!
//! All records are read-only once a trace is open. Malformed input is
//! fatal: it surfaces as a [`TraceError`] at open or on first touch,
//! never as partial state.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod builder;
pub mod codec;
pub mod data;
pub mod error;
pub mod file;
pub mod funtrace;
pub mod log;

pub use builder::TraceBuilder;
pub use data::DataPool;
pub use error::TraceError;
pub use file::{BlockType, ThreadTrace, TraceFile, FORMAT_VERSION};
pub use funtrace::{FunctionTrace, FunctionTraceTable};
pub use log::ThreadEventLog;
