//! Typed source-level value projection.
//!
//! The projector turns raw replay state into navigable, typed value
//! trees: given a canonical type and either a memory address or a
//! value-producing instruction, it yields a [`Value`] — a scalar, a
//! pointer with a bounded dereference range, a record with named
//! children, or an array — that a viewer can walk and render.
//!
//! Values are immutable and shared: a [`ValueStore`] caches every
//! in-memory node by `(address, canonical type)`, so two queries for
//! the same pair return the same [`std::sync::Arc`]. The store is
//! bound to the [`StateAccessToken`](retrace_state::StateAccessToken)
//! it was created under and refuses queries once movement invalidates
//! that view.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod render;
pub mod store;
pub mod value;

pub use error::ProjectError;
pub use store::{ProjectionContext, ValueStore};
pub use value::{
    reference_same_value, ArrayValue, PointerValue, RecordValue, ScalarSource, ScalarValue, Value,
};
