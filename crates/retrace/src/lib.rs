//! retrace: a reversible replay engine for instrumented C programs.
//!
//! retrace reads the binary event trace an instrumented program
//! recorded and reconstructs any point-in-time program state — call
//! stacks, heap and stack allocations, memory contents down to
//! per-byte initialization, open file and directory handles, and
//! per-instruction computed values — so a debugger front-end can step
//! forwards *and backwards* through the execution and inspect values
//! in their original C types.
//!
//! This is the top-level facade crate re-exporting the public API of
//! the retrace sub-crates. For most users, depending on `retrace`
//! alone is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use retrace::prelude::*;
//! use std::sync::Arc;
//!
//! // Fabricate a tiny trace: main() is entered and allocates 16 bytes.
//! let mut builder = TraceBuilder::new();
//! let t = builder.add_thread();
//! builder.function_start(t, FunctionIndex(0), 1);
//! builder.push(t, Event::InstructionWithPtr {
//!     index: InstrIndex(0),
//!     value: 0x1000,
//!     object: 0x1000,
//! });
//! builder.push(t, Event::Malloc { size: 16, process_time: 1 });
//! let bytes = builder.finish();
//!
//! // A module index describing one function with one instruction.
//! let module = Arc::new(ModuleIndex::new(
//!     vec![FunctionInfo {
//!         name: "main".into(),
//!         instructions: vec![Default::default()],
//!         arguments: vec![],
//!         decl: None,
//!     }],
//!     TypeTable::new(),
//!     vec!["main.c".into()],
//! ));
//!
//! // Replay to the end, then step back across the allocation.
//! let trace = TraceFile::read(&mut bytes.as_slice()).unwrap();
//! let mut session = Session::new(trace, module);
//! while session.advance(t).unwrap() {}
//!
//! let token = session.token();
//! let process = session.process_state(&token).unwrap();
//! assert_eq!(process.mallocs().count(), 1);
//!
//! session.retract(t).unwrap();
//! let token = session.token();
//! let process = session.process_state(&token).unwrap();
//! assert_eq!(process.mallocs().count(), 0);
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `retrace-core` | Identifiers, memory areas, runtime values, the event model |
//! | [`trace`] | `retrace-trace` | Trace file format, event codec, per-thread logs |
//! | [`module`] | `retrace-module` | Module index, canonical types, source mapping |
//! | [`state`] | `retrace-state` | Reversible process/thread/function/memory state, the session |
//! | [`value`] | `retrace-value` | Typed source-level value projection |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Identifiers, areas, runtime values, and the event model
/// (`retrace-core`).
pub use retrace_core as types;

/// Trace files, the event codec, and per-thread logs
/// (`retrace-trace`).
pub use retrace_trace as trace;

/// The module index and canonical type model (`retrace-module`).
pub use retrace_module as module;

/// Reversible replay state and the session (`retrace-state`).
pub use retrace_state as state;

/// Typed source-level value projection (`retrace-value`).
pub use retrace_value as value;

/// Common imports for typical retrace usage.
///
/// ```rust
/// use retrace::prelude::*;
/// ```
pub mod prelude {
    // Identity and event vocabulary.
    pub use retrace_core::{
        Argument, Event, EventKind, EventRef, FunctionIndex, InstrIndex, MemoryArea,
        MemoryPermission, RuntimeValue, ThreadId,
    };

    // Trace reading and fabrication.
    pub use retrace_trace::{TraceBuilder, TraceError, TraceFile};

    // Module description.
    pub use retrace_module::{
        ArgumentInfo, CanonicalType, FunctionInfo, InstructionInfo, ModuleIndex, RecordInfo,
        TypeId, TypeTable,
    };

    // Replay state and movement.
    pub use retrace_state::{
        FunctionState, ProcessState, Session, SessionMetrics, StateAccessToken, StateError,
        ThreadState,
    };

    // Value projection.
    pub use retrace_value::{ProjectionContext, Value, ValueStore};
}
