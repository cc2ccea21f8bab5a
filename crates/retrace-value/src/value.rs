//! The typed value tree.
//!
//! A [`Value`] is an immutable node describing one source-level value
//! at the current state view. Nodes hold everything needed to render
//! themselves; child navigation (record fields, array elements,
//! pointer dereference) goes back through the [`ValueStore`] so that
//! children share cache identity with direct queries.

use std::sync::Arc;

use retrace_core::RuntimeValue;
use retrace_module::{RecordId, TypeId};
use retrace_state::MemoryRegion;

use crate::error::ProjectError;
use crate::render::{
    decode_signed, decode_unsigned, render_char, x87_to_f64, UNINITIALIZED, UNSUPPORTED,
};
use crate::store::{ProjectionContext, ValueStore};

/// The scalar interpretations the projector distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarKind {
    /// An integer of the given width and signedness.
    Int {
        /// Width in bits.
        width_bits: u8,
        /// Whether the value is signed.
        signed: bool,
    },
    /// A character, rendered as a character.
    Char,
    /// `float`.
    Float,
    /// `double`.
    Double,
    /// `long double` (x87 80-bit).
    LongDouble,
}

/// Where a scalar's bits come from.
#[derive(Clone, Debug)]
pub enum ScalarSource {
    /// A snapshot of traced memory.
    Memory {
        /// The region holding the scalar's object representation.
        region: MemoryRegion,
    },
    /// A per-instruction register value; always fully initialized.
    Register {
        /// The recorded runtime value.
        value: RuntimeValue,
    },
}

/// A scalar value.
#[derive(Clone, Debug)]
pub struct ScalarValue {
    pub(crate) ty: TypeId,
    pub(crate) kind: ScalarKind,
    pub(crate) source: ScalarSource,
}

impl ScalarValue {
    /// The canonical type of the value.
    pub fn type_id(&self) -> TypeId {
        self.ty
    }

    /// The value's address, when it lives in memory.
    pub fn address(&self) -> Option<u64> {
        match &self.source {
            ScalarSource::Memory { region } => Some(region.area().address),
            ScalarSource::Register { .. } => None,
        }
    }

    /// Whether every byte of the value is initialized.
    pub fn is_completely_initialized(&self) -> bool {
        match &self.source {
            ScalarSource::Memory { region } => region.is_completely_initialized(),
            ScalarSource::Register { .. } => true,
        }
    }

    /// Whether at least one byte of the value is initialized.
    pub fn is_partially_initialized(&self) -> bool {
        match &self.source {
            ScalarSource::Memory { region } => region.is_partially_initialized(),
            ScalarSource::Register { .. } => true,
        }
    }

    /// Whether the value compares equal to zero. Integers compare as
    /// signed integers; `None` when uninitialized or unreadable.
    pub fn is_zero(&self) -> Option<bool> {
        if !self.is_completely_initialized() {
            return None;
        }
        match (self.kind, &self.source) {
            (ScalarKind::Float, ScalarSource::Memory { region }) => {
                Some(f32::from_le_bytes(region.byte_values()[..4].try_into().unwrap()) == 0.0)
            }
            (ScalarKind::Float, ScalarSource::Register { value }) => {
                value.as_float().map(|f| f == 0.0)
            }
            (ScalarKind::Double, ScalarSource::Memory { region }) => {
                Some(f64::from_le_bytes(region.byte_values()[..8].try_into().unwrap()) == 0.0)
            }
            (ScalarKind::Double, ScalarSource::Register { value }) => {
                value.as_double().map(|f| f == 0.0)
            }
            (ScalarKind::LongDouble, ScalarSource::Memory { region }) => {
                let mut raw = [0u8; 10];
                raw.copy_from_slice(&region.byte_values()[..10]);
                Some(x87_to_f64(raw) == 0.0)
            }
            (ScalarKind::LongDouble, ScalarSource::Register { value }) => {
                value.as_long_double().map(|raw| x87_to_f64(raw) == 0.0)
            }
            (_, ScalarSource::Memory { region }) => {
                Some(decode_signed(region.byte_values(), 64) == 0)
            }
            (_, ScalarSource::Register { value }) => value.as_i64().map(|n| n == 0),
        }
    }

    /// Render the value as text.
    pub fn render(&self) -> String {
        if !self.is_completely_initialized() {
            return UNINITIALIZED.into();
        }
        match &self.source {
            ScalarSource::Memory { region } => {
                let bytes = region.byte_values();
                match self.kind {
                    ScalarKind::Int { width_bits, signed } => {
                        if signed {
                            decode_signed(bytes, width_bits).to_string()
                        } else {
                            decode_unsigned(bytes).to_string()
                        }
                    }
                    ScalarKind::Char => render_char(bytes[0]),
                    ScalarKind::Float => {
                        let v = f32::from_le_bytes(bytes[..4].try_into().unwrap());
                        format!("{v:.6}")
                    }
                    ScalarKind::Double => {
                        let v = f64::from_le_bytes(bytes[..8].try_into().unwrap());
                        format!("{v:.6}")
                    }
                    ScalarKind::LongDouble => {
                        let mut raw = [0u8; 10];
                        raw.copy_from_slice(&bytes[..10]);
                        format!("{:.6}", x87_to_f64(raw))
                    }
                }
            }
            ScalarSource::Register { value } => match (self.kind, value) {
                (ScalarKind::Int { signed: true, .. }, v) => match v.as_i64() {
                    Some(n) => n.to_string(),
                    None => UNSUPPORTED.into(),
                },
                (ScalarKind::Int { signed: false, .. }, v) => match v.as_u64() {
                    Some(n) => n.to_string(),
                    None => UNSUPPORTED.into(),
                },
                (ScalarKind::Char, v) => match v.as_u64() {
                    Some(n) => render_char(n as u8),
                    None => UNSUPPORTED.into(),
                },
                (ScalarKind::Float, v) => match v.as_float() {
                    Some(f) => format!("{f:.6}"),
                    None => UNSUPPORTED.into(),
                },
                (ScalarKind::Double, v) => match v.as_double() {
                    Some(f) => format!("{f:.6}"),
                    None => UNSUPPORTED.into(),
                },
                (ScalarKind::LongDouble, v) => match v.as_long_double() {
                    Some(raw) => format!("{:.6}", x87_to_f64(raw)),
                    None => UNSUPPORTED.into(),
                },
            },
        }
    }
}

/// A pointer value with a bounded dereference range.
#[derive(Clone, Debug)]
pub struct PointerValue {
    pub(crate) ty: TypeId,
    pub(crate) pointee: Option<TypeId>,
    pub(crate) pointee_size: u64,
    pub(crate) raw: u64,
    pub(crate) address: Option<u64>,
    pub(crate) initialized: bool,
    pub(crate) deref_limit: u64,
    pub(crate) opaque: bool,
}

impl PointerValue {
    /// The canonical type of the pointer itself.
    pub fn type_id(&self) -> TypeId {
        self.ty
    }

    /// The pointer's own address, when it lives in memory.
    pub fn address(&self) -> Option<u64> {
        self.address
    }

    /// The raw pointer value.
    pub fn raw_value(&self) -> u64 {
        self.raw
    }

    /// The pointee type, or `None` when incomplete.
    pub fn pointee(&self) -> Option<TypeId> {
        self.pointee
    }

    /// Size of the pointee in bytes (0 when incomplete).
    pub fn pointee_size(&self) -> u64 {
        self.pointee_size
    }

    /// Whether the pointer's object representation is initialized.
    pub fn is_completely_initialized(&self) -> bool {
        self.initialized
    }

    /// Whether the raw value matches a live stream or directory
    /// handle.
    pub fn is_valid_opaque(&self) -> bool {
        self.opaque
    }

    /// Number of elements reachable through this pointer: from the raw
    /// value to the end of its containing allocation, in units of the
    /// pointee size, capped at 1 when the pointee has a flexible array
    /// member.
    pub fn dereference_index_limit(&self) -> u64 {
        self.deref_limit
    }

    /// The value at element `index`, or `None` when `index` is outside
    /// the dereference limit.
    pub fn get_dereferenced(
        &self,
        index: u64,
        store: &ValueStore,
        ctx: &ProjectionContext<'_>,
    ) -> Result<Option<Arc<Value>>, ProjectError> {
        if index >= self.deref_limit {
            return Ok(None);
        }
        let Some(pointee) = self.pointee else {
            return Ok(None);
        };
        store.value_at(ctx, pointee, self.raw + index * self.pointee_size)
    }

    /// Render the pointer as text.
    pub fn render(&self) -> String {
        if !self.initialized {
            UNINITIALIZED.into()
        } else {
            format!("{:#x}", self.raw)
        }
    }
}

/// A struct or union value.
#[derive(Clone, Debug)]
pub struct RecordValue {
    pub(crate) ty: TypeId,
    pub(crate) record: RecordId,
    pub(crate) address: u64,
}

impl RecordValue {
    /// The canonical type of the record.
    pub fn type_id(&self) -> TypeId {
        self.ty
    }

    /// The record's address.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Number of declared fields.
    pub fn child_count(&self, ctx: &ProjectionContext<'_>) -> usize {
        ctx.module
            .types()
            .record(self.record)
            .map_or(0, |r| r.fields.len())
    }

    /// The name of field `index`, if it exists.
    pub fn field_name<'c>(&self, index: usize, ctx: &ProjectionContext<'c>) -> Option<&'c str> {
        ctx.module
            .types()
            .record(self.record)?
            .fields
            .get(index)
            .map(|f| f.name.as_str())
    }

    /// The value of field `index` in declaration order. Bit-fields
    /// and out-of-range indices yield `None`.
    pub fn child(
        &self,
        index: usize,
        store: &ValueStore,
        ctx: &ProjectionContext<'_>,
    ) -> Result<Option<Arc<Value>>, ProjectError> {
        let Some(record) = ctx.module.types().record(self.record) else {
            return Ok(None);
        };
        let Some(field) = record.fields.get(index) else {
            return Ok(None);
        };
        let Some(byte_offset) = field.byte_offset() else {
            return Ok(None);
        };
        store.value_at(ctx, field.ty, self.address + byte_offset)
    }
}

/// An array value.
#[derive(Clone, Debug)]
pub struct ArrayValue {
    pub(crate) ty: TypeId,
    pub(crate) element: TypeId,
    pub(crate) element_size: u64,
    pub(crate) address: u64,
    pub(crate) count: u64,
}

impl ArrayValue {
    /// The canonical type of the array.
    pub fn type_id(&self) -> TypeId {
        self.ty
    }

    /// The array's address.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// The element type.
    pub fn element_type(&self) -> TypeId {
        self.element
    }

    /// Number of elements: the declared count for constant arrays, or
    /// the remaining bytes of the containing allocation divided by the
    /// element size for incomplete ones.
    pub fn element_count(&self) -> u64 {
        self.count
    }

    /// The value of element `index`, or `None` out of range.
    pub fn element(
        &self,
        index: u64,
        store: &ValueStore,
        ctx: &ProjectionContext<'_>,
    ) -> Result<Option<Arc<Value>>, ProjectError> {
        if index >= self.count {
            return Ok(None);
        }
        store
            .value_at(ctx, self.element, self.address + index * self.element_size)
    }
}

/// One node of the typed value tree.
#[derive(Clone, Debug)]
pub enum Value {
    /// A scalar.
    Scalar(ScalarValue),
    /// A pointer.
    Pointer(PointerValue),
    /// A struct or union.
    Record(RecordValue),
    /// An array.
    Array(ArrayValue),
}

impl Value {
    /// The canonical type of the value.
    pub fn type_id(&self) -> TypeId {
        match self {
            Self::Scalar(v) => v.type_id(),
            Self::Pointer(v) => v.type_id(),
            Self::Record(v) => v.type_id(),
            Self::Array(v) => v.type_id(),
        }
    }

    /// The value's address, when it lives in memory.
    pub fn address(&self) -> Option<u64> {
        match self {
            Self::Scalar(v) => v.address(),
            Self::Pointer(v) => v.address(),
            Self::Record(v) => Some(v.address()),
            Self::Array(v) => Some(v.address()),
        }
    }

    /// Whether the value lives in memory (as opposed to a register).
    pub fn is_in_memory(&self) -> bool {
        self.address().is_some()
    }

    /// Whether the value is completely initialized. Aggregates are
    /// the AND-reduction over their children.
    pub fn is_completely_initialized(
        &self,
        store: &ValueStore,
        ctx: &ProjectionContext<'_>,
    ) -> Result<bool, ProjectError> {
        match self {
            Self::Scalar(v) => Ok(v.is_completely_initialized()),
            Self::Pointer(v) => Ok(v.is_completely_initialized()),
            Self::Record(v) => {
                for i in 0..v.child_count(ctx) {
                    if let Some(child) = v.child(i, store, ctx)? {
                        if !child.is_completely_initialized(store, ctx)? {
                            return Ok(false);
                        }
                    }
                }
                Ok(true)
            }
            Self::Array(v) => {
                for i in 0..v.element_count() {
                    if let Some(child) = v.element(i, store, ctx)? {
                        if !child.is_completely_initialized(store, ctx)? {
                            return Ok(false);
                        }
                    }
                }
                Ok(true)
            }
        }
    }

    /// Whether any part of the value is initialized. Aggregates are
    /// the OR-reduction over their children.
    pub fn is_partially_initialized(
        &self,
        store: &ValueStore,
        ctx: &ProjectionContext<'_>,
    ) -> Result<bool, ProjectError> {
        match self {
            Self::Scalar(v) => Ok(v.is_partially_initialized()),
            Self::Pointer(v) => Ok(v.is_completely_initialized()),
            Self::Record(v) => {
                for i in 0..v.child_count(ctx) {
                    if let Some(child) = v.child(i, store, ctx)? {
                        if child.is_partially_initialized(store, ctx)? {
                            return Ok(true);
                        }
                    }
                }
                Ok(false)
            }
            Self::Array(v) => {
                for i in 0..v.element_count() {
                    if let Some(child) = v.element(i, store, ctx)? {
                        if child.is_partially_initialized(store, ctx)? {
                            return Ok(true);
                        }
                    }
                }
                Ok(false)
            }
        }
    }

    /// Short rendering: scalars and pointers in full, aggregates
    /// elided.
    pub fn value_string_short(
        &self,
        _store: &ValueStore,
        _ctx: &ProjectionContext<'_>,
    ) -> Result<String, ProjectError> {
        Ok(match self {
            Self::Scalar(v) => v.render(),
            Self::Pointer(v) => v.render(),
            Self::Record(_) => "{ ... }".into(),
            Self::Array(_) => "[...]".into(),
        })
    }

    /// Full rendering: aggregates expanded recursively.
    pub fn value_string_full(
        &self,
        store: &ValueStore,
        ctx: &ProjectionContext<'_>,
    ) -> Result<String, ProjectError> {
        match self {
            Self::Scalar(v) => Ok(v.render()),
            Self::Pointer(v) => Ok(v.render()),
            Self::Record(v) => {
                let mut parts = Vec::with_capacity(v.child_count(ctx));
                for i in 0..v.child_count(ctx) {
                    let name = v.field_name(i, ctx).unwrap_or("?");
                    let rendered = match v.child(i, store, ctx)? {
                        Some(child) => child.value_string_full(store, ctx)?,
                        None => UNSUPPORTED.into(),
                    };
                    parts.push(format!(".{name} = {rendered}"));
                }
                Ok(format!("{{ {} }}", parts.join(", ")))
            }
            Self::Array(v) => {
                let mut parts = Vec::with_capacity(v.element_count() as usize);
                for i in 0..v.element_count() {
                    let rendered = match v.element(i, store, ctx)? {
                        Some(child) => child.value_string_full(store, ctx)?,
                        None => UNSUPPORTED.into(),
                    };
                    parts.push(rendered);
                }
                Ok(format!("[{}]", parts.join(", ")))
            }
        }
    }
}

/// Whether two pointers reference the same value: their dereferenced
/// element sizes match, and one's raw value lies within the other's
/// reachable index range on an element boundary.
pub fn reference_same_value(a: &PointerValue, b: &PointerValue) -> bool {
    if a.pointee_size == 0 || a.pointee_size != b.pointee_size {
        return false;
    }
    let (lo, hi) = if a.raw <= b.raw { (a, b) } else { (b, a) };
    let distance = hi.raw - lo.raw;
    if distance % lo.pointee_size != 0 {
        return false;
    }
    distance / lo.pointee_size < lo.deref_limit
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ptr(raw: u64, size: u64, limit: u64) -> PointerValue {
        PointerValue {
            ty: TypeId(0),
            pointee: Some(TypeId(1)),
            pointee_size: size,
            raw,
            address: None,
            initialized: true,
            deref_limit: limit,
            opaque: false,
        }
    }

    #[test]
    fn same_value_requires_matching_element_size() {
        assert!(!reference_same_value(&ptr(0x1000, 4, 4), &ptr(0x1000, 8, 2)));
        assert!(reference_same_value(&ptr(0x1000, 4, 4), &ptr(0x1000, 4, 4)));
    }

    #[test]
    fn same_value_requires_element_alignment_and_range() {
        let base = ptr(0x1000, 4, 4);
        assert!(reference_same_value(&base, &ptr(0x1008, 4, 2)));
        // Misaligned by two bytes.
        assert!(!reference_same_value(&base, &ptr(0x1002, 4, 3)));
        // Past the reachable range.
        assert!(!reference_same_value(&base, &ptr(0x1010, 4, 0)));
    }

    #[test]
    fn uninitialized_scalar_renders_placeholder() {
        let v = ScalarValue {
            ty: TypeId(0),
            kind: ScalarKind::Int {
                width_bits: 32,
                signed: true,
            },
            source: ScalarSource::Register {
                value: RuntimeValue::U32(9),
            },
        };
        assert_eq!(v.render(), "9");
        assert!(v.is_completely_initialized());
    }

    #[test]
    fn register_scalar_refuses_cross_kind_reads() {
        let v = ScalarValue {
            ty: TypeId(0),
            kind: ScalarKind::Double,
            source: ScalarSource::Register {
                value: RuntimeValue::U32(9),
            },
        };
        assert_eq!(v.render(), UNSUPPORTED);
    }
}
