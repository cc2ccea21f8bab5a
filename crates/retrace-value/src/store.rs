//! The value store: projection factory and per-view cache.

use std::sync::{Arc, Mutex};

use indexmap::IndexMap;

use retrace_core::{InstrIndex, MemoryArea};
use retrace_module::{ArrayCount, CanonicalType, ModuleIndex, TypeId};
use retrace_state::{FunctionState, ProcessState, StateAccessToken};

use crate::error::ProjectError;
use crate::value::{
    ArrayValue, PointerValue, RecordValue, ScalarKind, ScalarSource, ScalarValue, Value,
};

/// The read-only state a projection runs against: the module index,
/// the frozen process state, and optionally the function frame whose
/// runtime values resolve register reads and variable-length array
/// sizes.
#[derive(Clone, Copy)]
pub struct ProjectionContext<'a> {
    /// The module index.
    pub module: &'a ModuleIndex,
    /// The frozen process state.
    pub process: &'a ProcessState,
    /// The owning function frame, if the query has one.
    pub frame: Option<&'a FunctionState>,
}

/// Caching factory for [`Value`] nodes.
///
/// Keyed by `(address, canonical type)`: the same pair always yields
/// the same shared node for the lifetime of the state view. One lock
/// covers the whole cache; entries are immutable once returned.
pub struct ValueStore {
    token: StateAccessToken,
    cache: Mutex<IndexMap<(u64, TypeId), Arc<Value>>>,
}

impl ValueStore {
    /// Create a store bound to the given state view.
    pub fn new(token: StateAccessToken) -> Self {
        Self {
            token,
            cache: Mutex::new(IndexMap::new()),
        }
    }

    /// The state view this store was created under.
    pub fn token(&self) -> &StateAccessToken {
        &self.token
    }

    /// Number of cached nodes.
    pub fn cached_count(&self) -> usize {
        self.cache.lock().map_or(0, |c| c.len())
    }

    /// Project the value of type `ty` at `address`.
    ///
    /// Returns `Ok(None)` for constructs the projector cannot
    /// interpret (void, arrays of unknown element size). The type is
    /// stripped to its canonical underlying type before keying, so
    /// enum and atomic spellings share nodes with their base type.
    pub fn value_at(
        &self,
        ctx: &ProjectionContext<'_>,
        ty: TypeId,
        address: u64,
    ) -> Result<Option<Arc<Value>>, ProjectError> {
        self.token.check().map_err(|_| ProjectError::StaleToken)?;

        let types = ctx.module.types();
        let canonical = types.canonical(ty);
        let def = types
            .get(canonical)
            .ok_or(ProjectError::UnknownType { ty: canonical })?;

        if let Some(hit) = self
            .cache
            .lock()
            .ok()
            .and_then(|c| c.get(&(address, canonical)).cloned())
        {
            return Ok(Some(hit));
        }

        let value = match *def {
            CanonicalType::Void => return Ok(None),
            CanonicalType::Enum { .. } | CanonicalType::Atomic { .. } => {
                unreachable!("canonical() strips wrappers")
            }

            CanonicalType::Int { width_bits, signed } => self.scalar(
                ctx,
                canonical,
                address,
                ScalarKind::Int { width_bits, signed },
                u64::from(width_bits) / 8,
            ),
            CanonicalType::Char { .. } => {
                self.scalar(ctx, canonical, address, ScalarKind::Char, 1)
            }
            CanonicalType::Float => self.scalar(ctx, canonical, address, ScalarKind::Float, 4),
            CanonicalType::Double => self.scalar(ctx, canonical, address, ScalarKind::Double, 8),
            CanonicalType::LongDouble => {
                self.scalar(ctx, canonical, address, ScalarKind::LongDouble, 10)
            }

            CanonicalType::Pointer { pointee } => {
                let region = ctx.process.memory().region(MemoryArea::new(address, 8));
                let initialized = region.is_completely_initialized();
                let raw = crate::render::decode_unsigned(region.byte_values());
                Value::Pointer(self.pointer(ctx, canonical, pointee, raw, Some(address), initialized))
            }

            CanonicalType::Record(record) => Value::Record(RecordValue {
                ty: canonical,
                record,
                address,
            }),

            CanonicalType::Array { element, count } => {
                let Some(element_size) = evaluate_size(ctx, element) else {
                    return Ok(None);
                };
                let count = match count {
                    ArrayCount::Fixed(n) => n,
                    ArrayCount::Incomplete => remaining_elements(ctx, address, element_size),
                    ArrayCount::Runtime(instr) => runtime_count(ctx, instr),
                };
                Value::Array(ArrayValue {
                    ty: canonical,
                    element,
                    element_size,
                    address,
                    count,
                })
            }
        };

        let shared = Arc::new(value);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert((address, canonical), Arc::clone(&shared));
        }
        Ok(Some(shared))
    }

    /// Project the register value produced by `instruction` in the
    /// context's frame.
    ///
    /// Returns `Ok(None)` when the context has no frame, the
    /// instruction produces no value, or its slot is unassigned.
    /// Register values are always complete and are not cached: they
    /// have no address to key by.
    pub fn register_value(
        &self,
        ctx: &ProjectionContext<'_>,
        instruction: InstrIndex,
    ) -> Result<Option<Arc<Value>>, ProjectError> {
        self.token.check().map_err(|_| ProjectError::StaleToken)?;

        let Some(frame) = ctx.frame else {
            return Ok(None);
        };
        let Some(info) = ctx.module.instruction(frame.function(), instruction) else {
            return Ok(None);
        };
        let Some(ty) = info.result_type else {
            return Ok(None);
        };
        let Ok(slot) = frame.value(instruction) else {
            return Ok(None);
        };
        if !slot.is_assigned() {
            return Ok(None);
        }

        let types = ctx.module.types();
        let canonical = types.canonical(ty);
        let def = types
            .get(canonical)
            .ok_or(ProjectError::UnknownType { ty: canonical })?;

        let kind = match *def {
            CanonicalType::Int { width_bits, signed } => ScalarKind::Int { width_bits, signed },
            CanonicalType::Char { .. } => ScalarKind::Char,
            CanonicalType::Float => ScalarKind::Float,
            CanonicalType::Double => ScalarKind::Double,
            CanonicalType::LongDouble => ScalarKind::LongDouble,
            CanonicalType::Pointer { pointee } => {
                let raw = slot.as_ptr().unwrap_or(0);
                return Ok(Some(Arc::new(Value::Pointer(self.pointer(
                    ctx,
                    canonical,
                    pointee,
                    raw,
                    None,
                    slot.as_ptr().is_some(),
                )))));
            }
            _ => return Ok(None),
        };

        Ok(Some(Arc::new(Value::Scalar(ScalarValue {
            ty: canonical,
            kind,
            source: ScalarSource::Register { value: *slot },
        }))))
    }

    fn scalar(
        &self,
        ctx: &ProjectionContext<'_>,
        ty: TypeId,
        address: u64,
        kind: ScalarKind,
        size: u64,
    ) -> Value {
        let region = ctx.process.memory().region(MemoryArea::new(address, size));
        Value::Scalar(ScalarValue {
            ty,
            kind,
            source: ScalarSource::Memory { region },
        })
    }

    fn pointer(
        &self,
        ctx: &ProjectionContext<'_>,
        ty: TypeId,
        pointee: Option<TypeId>,
        raw: u64,
        address: Option<u64>,
        initialized: bool,
    ) -> PointerValue {
        let types = ctx.module.types();
        let pointee_size = pointee.and_then(|p| evaluate_size(ctx, p)).unwrap_or(0);

        let mut deref_limit = if !initialized || raw == 0 || pointee_size == 0 {
            0
        } else {
            match ctx.process.memory().allocation_containing(raw) {
                Some(alloc) => (alloc.end() - raw) / pointee_size,
                None => 0,
            }
        };

        // A pointee struct with a flexible array member extends past
        // its static size, so only the first element is addressable.
        if let Some(CanonicalType::Record(rid)) = pointee.map(|p| types.canonical(p)).and_then(|p| types.get(p))
        {
            if types.record(*rid).is_some_and(|r| r.has_flexible_array_member) {
                deref_limit = deref_limit.min(1);
            }
        }

        let opaque = ctx.process.stream_at(raw).is_some() || ctx.process.dir_at(raw).is_some();

        PointerValue {
            ty,
            pointee,
            pointee_size,
            raw,
            address,
            initialized,
            deref_limit,
            opaque,
        }
    }
}

/// Statically evaluate a type's size, resolving variable-length array
/// counts against the owning frame's runtime values.
fn evaluate_size(ctx: &ProjectionContext<'_>, ty: TypeId) -> Option<u64> {
    let types = ctx.module.types();
    let canonical = types.canonical(ty);
    match types.get(canonical)? {
        CanonicalType::Array { element, count } => {
            let element_size = evaluate_size(ctx, *element)?;
            match count {
                ArrayCount::Fixed(n) => Some(element_size * n),
                ArrayCount::Incomplete => None,
                ArrayCount::Runtime(instr) => Some(element_size * runtime_count(ctx, *instr)),
            }
        }
        _ => types.size_of(canonical),
    }
}

/// Elements remaining in the allocation containing `address`.
fn remaining_elements(ctx: &ProjectionContext<'_>, address: u64, element_size: u64) -> u64 {
    match ctx.process.memory().allocation_containing(address) {
        Some(alloc) if element_size > 0 => (alloc.end() - address) / element_size,
        _ => 0,
    }
}

/// A variable-length array's element count, read from the owning
/// frame's runtime value for the size instruction.
fn runtime_count(ctx: &ProjectionContext<'_>, instr: InstrIndex) -> u64 {
    ctx.frame
        .and_then(|frame| frame.value(instr).ok())
        .and_then(|value| value.as_u64())
        .unwrap_or(0)
}
