//! The source mapping sidecar.
//!
//! Associates IR instructions with the source statement they came from
//! and IR functions with their source declarations. Instrumentation
//! glue has no source counterpart, so every lookup is optional:
//! missing entries mean "unmapped", not failure.

use std::fmt;

/// Index of a source file in the module's file table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The source statement an instruction maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SourceRef {
    /// The source file containing the statement.
    pub file: FileId,
    /// Identifier of the AST node within that file.
    pub ast_node: u32,
}

/// The source declaration a function maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SourceDecl {
    /// The source file containing the declaration.
    pub file: FileId,
    /// Identifier of the declaration node within that file.
    pub decl_node: u32,
}
