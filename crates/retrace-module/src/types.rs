//! Canonical source types and record layouts.
//!
//! The compiler front-end provides, for every IR type, a canonical
//! source type: sugar such as typedefs is already resolved, and enum
//! and atomic wrappers can be stripped on demand via
//! [`TypeTable::canonical`]. The value projector keys its cache by
//! canonical type, so two spellings of the same type share one value
//! node.

use indexmap::IndexMap;

use retrace_core::InstrIndex;

/// Index of a type in the [`TypeTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// Index of a record (struct/union) in the [`TypeTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub u32);

/// Element count of an array type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArrayCount {
    /// A constant array with a declared element count.
    Fixed(u64),
    /// An incomplete array (`T[]`); the count comes from the
    /// containing allocation at projection time.
    Incomplete,
    /// A variable-length array; the count is the runtime value of the
    /// given instruction in the owning function frame.
    Runtime(InstrIndex),
}

/// A canonical source type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CanonicalType {
    /// `void`.
    Void,
    /// An integer type of the given width and signedness.
    Int {
        /// Width in bits (8, 16, 32, or 64).
        width_bits: u8,
        /// Whether the type is signed.
        signed: bool,
    },
    /// A character type, rendered as a character rather than a number.
    Char {
        /// Whether the type is signed.
        signed: bool,
    },
    /// `float`.
    Float,
    /// `double`.
    Double,
    /// `long double` (x87 80-bit extended on supported targets).
    LongDouble,
    /// A pointer type.
    Pointer {
        /// The pointee type, or `None` when incomplete (`void *`).
        pointee: Option<TypeId>,
    },
    /// A struct or union type.
    Record(RecordId),
    /// An array type.
    Array {
        /// The element type.
        element: TypeId,
        /// How many elements.
        count: ArrayCount,
    },
    /// An enum; canonicalizes to its underlying integer type.
    Enum {
        /// The underlying integer type.
        underlying: TypeId,
    },
    /// `_Atomic(T)`; canonicalizes to `T`.
    Atomic {
        /// The wrapped type.
        underlying: TypeId,
    },
}

/// One field of a record, in declaration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldInfo {
    /// Field name.
    pub name: String,
    /// Field type.
    pub ty: TypeId,
    /// Offset of the field from the start of the record, in bits.
    ///
    /// A bit offset that is not a multiple of 8 marks a bit-field,
    /// which the projector reports as an absent child.
    pub bit_offset: u64,
}

impl FieldInfo {
    /// The field's byte offset, or `None` for a bit-field.
    pub fn byte_offset(&self) -> Option<u64> {
        (self.bit_offset % 8 == 0).then_some(self.bit_offset / 8)
    }
}

/// Layout and naming of one record type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordInfo {
    /// The record's source name (e.g. `"Foo"` for `struct Foo`).
    pub name: String,
    /// Fields in declaration order, with target-ABI offsets.
    pub fields: Vec<FieldInfo>,
    /// Total size of the record in bytes.
    pub size_bytes: u64,
    /// Whether the final field is a flexible array member.
    pub has_flexible_array_member: bool,
}

/// The module's type table.
///
/// Types reference each other by [`TypeId`]; records by [`RecordId`].
/// Construction happens once, when the module-index collaborator
/// digests the `ModuleBitcode` block; afterwards the table is
/// immutable and shared.
#[derive(Debug, Default)]
pub struct TypeTable {
    types: Vec<CanonicalType>,
    records: Vec<RecordInfo>,
    records_by_name: IndexMap<String, RecordId>,
}

impl TypeTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a type, returning its id.
    pub fn add(&mut self, ty: CanonicalType) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(ty);
        id
    }

    /// Add a record, returning its id.
    pub fn add_record(&mut self, record: RecordInfo) -> RecordId {
        let id = RecordId(self.records.len() as u32);
        self.records_by_name.insert(record.name.clone(), id);
        self.records.push(record);
        id
    }

    /// Look up a type.
    pub fn get(&self, id: TypeId) -> Option<&CanonicalType> {
        self.types.get(id.0 as usize)
    }

    /// Look up a record.
    pub fn record(&self, id: RecordId) -> Option<&RecordInfo> {
        self.records.get(id.0 as usize)
    }

    /// Look up a record by source name.
    pub fn record_by_name(&self, name: &str) -> Option<RecordId> {
        self.records_by_name.get(name).copied()
    }

    /// Strip enum and atomic wrappers down to the underlying type.
    ///
    /// This is the identity used for value-cache keying: two ids that
    /// canonicalize to the same id denote the same value node.
    pub fn canonical(&self, id: TypeId) -> TypeId {
        let mut current = id;
        loop {
            match self.get(current) {
                Some(CanonicalType::Enum { underlying })
                | Some(CanonicalType::Atomic { underlying }) => current = *underlying,
                _ => return current,
            }
        }
    }

    /// Size of a type in bytes, or `None` when not statically known
    /// (void, incomplete arrays, runtime-sized arrays).
    pub fn size_of(&self, id: TypeId) -> Option<u64> {
        match self.get(self.canonical(id))? {
            CanonicalType::Void => None,
            CanonicalType::Int { width_bits, .. } => Some(u64::from(*width_bits) / 8),
            CanonicalType::Char { .. } => Some(1),
            CanonicalType::Float => Some(4),
            CanonicalType::Double => Some(8),
            // x86-64 ABI storage size; the value occupies 10 bytes.
            CanonicalType::LongDouble => Some(16),
            CanonicalType::Pointer { .. } => Some(8),
            CanonicalType::Record(rid) => self.record(*rid).map(|r| r.size_bytes),
            CanonicalType::Array { element, count } => match count {
                ArrayCount::Fixed(n) => self.size_of(*element).map(|s| s * n),
                ArrayCount::Incomplete | ArrayCount::Runtime(_) => None,
            },
            CanonicalType::Enum { .. } | CanonicalType::Atomic { .. } => {
                unreachable!("canonical() strips wrappers")
            }
        }
    }

    /// Number of types in the table.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_strips_nested_wrappers() {
        let mut t = TypeTable::new();
        let int = t.add(CanonicalType::Int {
            width_bits: 32,
            signed: true,
        });
        let en = t.add(CanonicalType::Enum { underlying: int });
        let atomic_en = t.add(CanonicalType::Atomic { underlying: en });
        assert_eq!(t.canonical(atomic_en), int);
        assert_eq!(t.canonical(int), int);
    }

    #[test]
    fn sizes_follow_the_target_abi() {
        let mut t = TypeTable::new();
        let int = t.add(CanonicalType::Int {
            width_bits: 32,
            signed: true,
        });
        let ch = t.add(CanonicalType::Char { signed: true });
        let dbl = t.add(CanonicalType::Double);
        let ptr = t.add(CanonicalType::Pointer { pointee: Some(int) });
        let arr = t.add(CanonicalType::Array {
            element: int,
            count: ArrayCount::Fixed(4),
        });
        let incomplete = t.add(CanonicalType::Array {
            element: int,
            count: ArrayCount::Incomplete,
        });
        let void = t.add(CanonicalType::Void);

        assert_eq!(t.size_of(int), Some(4));
        assert_eq!(t.size_of(ch), Some(1));
        assert_eq!(t.size_of(dbl), Some(8));
        assert_eq!(t.size_of(ptr), Some(8));
        assert_eq!(t.size_of(arr), Some(16));
        assert_eq!(t.size_of(incomplete), None);
        assert_eq!(t.size_of(void), None);
    }

    #[test]
    fn record_size_and_name_lookup() {
        let mut t = TypeTable::new();
        let int = t.add(CanonicalType::Int {
            width_bits: 32,
            signed: true,
        });
        let rid = t.add_record(RecordInfo {
            name: "Foo".into(),
            fields: vec![FieldInfo {
                name: "a".into(),
                ty: int,
                bit_offset: 0,
            }],
            size_bytes: 4,
            has_flexible_array_member: false,
        });
        let foo = t.add(CanonicalType::Record(rid));
        assert_eq!(t.size_of(foo), Some(4));
        assert_eq!(t.record_by_name("Foo"), Some(rid));
        assert_eq!(t.record_by_name("Bar"), None);
    }

    #[test]
    fn bit_field_has_no_byte_offset() {
        let f = FieldInfo {
            name: "flags".into(),
            ty: TypeId(0),
            bit_offset: 37,
        };
        assert_eq!(f.byte_offset(), None);
        let f = FieldInfo {
            name: "b".into(),
            ty: TypeId(0),
            bit_offset: 64,
        };
        assert_eq!(f.byte_offset(), Some(8));
    }
}
