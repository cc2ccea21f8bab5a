//! Function and instruction lookups.

use retrace_core::{FunctionIndex, InstrIndex};

use crate::mapping::{SourceDecl, SourceRef};
use crate::types::{TypeId, TypeTable};

/// Descriptor of one instruction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstructionInfo {
    /// Type of the value the instruction produces, if any.
    pub result_type: Option<TypeId>,
    /// Whether this is a stack-allocation instruction.
    pub is_allocation: bool,
    /// Whether this instruction terminates its basic block.
    pub is_terminator: bool,
    /// Whether this instruction reads or writes memory.
    pub is_memory_access: bool,
    /// The source statement this instruction maps to, if any.
    pub source: Option<SourceRef>,
}

/// Descriptor of one formal argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArgumentInfo {
    /// The argument's source name.
    pub name: String,
    /// The argument's type, if known.
    pub ty: Option<TypeId>,
}

/// Descriptor of one function.
#[derive(Clone, Debug, Default)]
pub struct FunctionInfo {
    /// The function's name.
    pub name: String,
    /// Instruction descriptors, indexed by [`InstrIndex`].
    pub instructions: Vec<InstructionInfo>,
    /// Formal arguments, indexed by argument position.
    pub arguments: Vec<ArgumentInfo>,
    /// The source declaration this function maps to, if any.
    pub decl: Option<SourceDecl>,
}

/// Immutable index over the instrumented module.
///
/// Constructed once by the compiler-collaborator from the trace's
/// `ModuleBitcode` block. All lookups are constant-time.
#[derive(Debug, Default)]
pub struct ModuleIndex {
    functions: Vec<FunctionInfo>,
    types: TypeTable,
    files: Vec<String>,
}

impl ModuleIndex {
    /// Assemble an index from its parts.
    pub fn new(functions: Vec<FunctionInfo>, types: TypeTable, files: Vec<String>) -> Self {
        Self {
            functions,
            types,
            files,
        }
    }

    /// Number of functions in the module.
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Look up a function descriptor.
    pub fn function(&self, index: FunctionIndex) -> Option<&FunctionInfo> {
        self.functions.get(index.0 as usize)
    }

    /// Look up an instruction descriptor.
    pub fn instruction(
        &self,
        function: FunctionIndex,
        index: InstrIndex,
    ) -> Option<&InstructionInfo> {
        self.function(function)?.instructions.get(index.0 as usize)
    }

    /// Number of instructions in a function, if the function exists.
    pub fn instruction_count(&self, function: FunctionIndex) -> Option<usize> {
        self.function(function).map(|f| f.instructions.len())
    }

    /// The module's type table.
    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    /// The path of a source file, if the id is known.
    pub fn file(&self, id: crate::mapping::FileId) -> Option<&str> {
        self.files.get(id.0 as usize).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::FileId;
    use crate::types::CanonicalType;

    fn sample_index() -> ModuleIndex {
        let mut types = TypeTable::new();
        let int = types.add(CanonicalType::Int {
            width_bits: 32,
            signed: true,
        });
        let main = FunctionInfo {
            name: "main".into(),
            instructions: vec![
                InstructionInfo {
                    result_type: Some(int),
                    ..Default::default()
                },
                InstructionInfo {
                    is_terminator: true,
                    ..Default::default()
                },
            ],
            arguments: vec![],
            decl: Some(SourceDecl {
                file: FileId(0),
                decl_node: 1,
            }),
        };
        ModuleIndex::new(vec![main], types, vec!["main.c".into()])
    }

    #[test]
    fn lookups_resolve_in_range_indices() {
        let index = sample_index();
        assert_eq!(index.function_count(), 1);
        let f = index.function(FunctionIndex(0)).unwrap();
        assert_eq!(f.name, "main");
        assert_eq!(index.instruction_count(FunctionIndex(0)), Some(2));
        assert!(index
            .instruction(FunctionIndex(0), InstrIndex(1))
            .unwrap()
            .is_terminator);
        assert_eq!(index.file(FileId(0)), Some("main.c"));
    }

    #[test]
    fn out_of_range_lookups_are_unmapped() {
        let index = sample_index();
        assert!(index.function(FunctionIndex(9)).is_none());
        assert!(index.instruction(FunctionIndex(0), InstrIndex(5)).is_none());
        assert_eq!(index.instruction_count(FunctionIndex(9)), None);
        assert_eq!(index.file(FileId(3)), None);
    }
}
