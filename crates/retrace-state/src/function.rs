//! Per-invocation function frame state.

use std::collections::HashMap;

use retrace_core::{
    Argument, FunctionIndex, InstrIndex, MemoryArea, RuntimeError, RuntimeValue,
};
use retrace_trace::FunctionTrace;

use crate::error::StateError;

/// The result of one stack-allocation instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocaState {
    /// Index of the allocating instruction.
    pub instruction: InstrIndex,
    /// Runtime address of the allocation.
    pub address: u64,
    /// Size of one element in bytes.
    pub element_size: u64,
    /// Number of elements allocated.
    pub element_count: u64,
}

impl AllocaState {
    /// Total size of the allocation in bytes.
    pub fn total_size(&self) -> u64 {
        self.element_size * self.element_count
    }

    /// The area the allocation covers.
    pub fn area(&self) -> MemoryArea {
        MemoryArea::new(self.address, self.total_size())
    }
}

/// The backing region of one by-value aggregate argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByValArea {
    /// The formal argument this region backs.
    pub argument: Argument,
    /// The backing region.
    pub area: MemoryArea,
}

/// Provenance of a pointer value: which allocation it refers to, and
/// where inside it. Two pointers reference the same object iff their
/// `object` bases match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PointerTarget {
    /// Base address of the referenced allocation.
    pub object: u64,
    /// Byte offset of the pointer value from `object`.
    pub offset: u64,
}

/// The currently active instruction of a frame.
///
/// `complete` distinguishes an instruction whose effects are fully
/// applied from one announced by `PreInstruction` (it may yet fault).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveInstruction {
    /// Index of the active instruction.
    pub index: InstrIndex,
    /// Whether the instruction has completed.
    pub complete: bool,
}

/// A runtime error attached to a frame, pinned to the instruction
/// that was active when it was detected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachedError {
    /// The deserialized error.
    pub error: RuntimeError,
    /// The instruction the error is attached to, if one was active.
    pub instruction: Option<InstrIndex>,
}

/// State of one function invocation at a point in time.
///
/// Created on `FunctionStart`, destroyed on `FunctionEnd` during
/// forward motion; re-created on `FunctionEnd` retraction (from the
/// thread's completed-frame stash) and destroyed on `FunctionStart`
/// retraction.
#[derive(Clone, Debug)]
pub struct FunctionState {
    function: FunctionIndex,
    trace: FunctionTrace,
    values: Vec<RuntimeValue>,
    active: Option<ActiveInstruction>,
    allocas: Vec<AllocaState>,
    /// Allocas discarded by `StackRestore`, kept for its retraction.
    cleared_allocas: Vec<AllocaState>,
    byval_areas: Vec<ByValArea>,
    instr_targets: HashMap<InstrIndex, PointerTarget>,
    arg_targets: HashMap<Argument, PointerTarget>,
    runtime_errors: Vec<AttachedError>,
}

impl FunctionState {
    /// Construct a fresh frame with one unassigned value slot per
    /// instruction.
    pub fn new(function: FunctionIndex, trace: FunctionTrace, instruction_count: usize) -> Self {
        Self {
            function,
            trace,
            values: vec![RuntimeValue::Unassigned; instruction_count],
            active: None,
            allocas: Vec::new(),
            cleared_allocas: Vec::new(),
            byval_areas: Vec::new(),
            instr_targets: HashMap::new(),
            arg_targets: HashMap::new(),
            runtime_errors: Vec::new(),
        }
    }

    /// The function this frame executes.
    pub fn function(&self) -> FunctionIndex {
        self.function
    }

    /// The invocation's function-trace record.
    pub fn trace(&self) -> &FunctionTrace {
        &self.trace
    }

    /// Number of value slots (equals the function's instruction count).
    pub fn instruction_count(&self) -> usize {
        self.values.len()
    }

    // ── Runtime values ──────────────────────────────────────────

    /// The runtime value recorded for `index`.
    pub fn value(&self, index: InstrIndex) -> Result<&RuntimeValue, StateError> {
        self.values
            .get(index.0 as usize)
            .ok_or(StateError::ValueSlotOutOfRange {
                function: self.function,
                index,
            })
    }

    /// Replace the runtime value for `index`.
    pub fn set_value(&mut self, index: InstrIndex, value: RuntimeValue) -> Result<(), StateError> {
        let function = self.function;
        let slot =
            self.values
                .get_mut(index.0 as usize)
                .ok_or(StateError::ValueSlotOutOfRange { function, index })?;
        *slot = value;
        Ok(())
    }

    // ── Active instruction ──────────────────────────────────────

    /// The active instruction, if any.
    pub fn active(&self) -> Option<ActiveInstruction> {
        self.active
    }

    /// Mark `index` active and complete.
    pub fn set_active_complete(&mut self, index: InstrIndex) {
        self.active = Some(ActiveInstruction {
            index,
            complete: true,
        });
    }

    /// Mark `index` active but not yet complete.
    pub fn set_active_incomplete(&mut self, index: InstrIndex) {
        self.active = Some(ActiveInstruction {
            index,
            complete: false,
        });
    }

    /// Clear the active instruction.
    pub fn clear_active(&mut self) {
        self.active = None;
    }

    // ── Allocas ─────────────────────────────────────────────────

    /// Live stack allocations in creation order.
    pub fn allocas(&self) -> &[AllocaState] {
        &self.allocas
    }

    /// Record a new stack allocation.
    pub fn add_alloca(&mut self, alloca: AllocaState) {
        self.allocas.push(alloca);
    }

    /// Discard the newest stack allocation (for `Alloca` retraction).
    pub fn pop_alloca(&mut self) -> Option<AllocaState> {
        self.allocas.pop()
    }

    /// Discard the newest `count` allocas into the cleared stash,
    /// returning them in their original creation order.
    pub fn remove_allocas(&mut self, count: usize) -> Vec<AllocaState> {
        let keep = self.allocas.len().saturating_sub(count);
        let removed: Vec<AllocaState> = self.allocas.split_off(keep);
        self.cleared_allocas.extend(removed.iter().copied());
        removed
    }

    /// Revive the newest `count` cleared allocas (for `StackRestore`
    /// retraction), returning them in their original creation order.
    pub fn unremove_allocas(&mut self, count: usize) -> Vec<AllocaState> {
        let keep = self.cleared_allocas.len().saturating_sub(count);
        let restored: Vec<AllocaState> = self.cleared_allocas.split_off(keep);
        self.allocas.extend(restored.iter().copied());
        restored
    }

    /// Snapshot the current alloca list, returning a key for
    /// [`stack_restore`](Self::stack_restore).
    pub fn stack_save(&self) -> usize {
        self.allocas.len()
    }

    /// Discard every alloca created after the `stack_save` that
    /// produced `key`, returning the invalidated areas. The caller
    /// must remove those areas from the memory state.
    pub fn stack_restore(&mut self, key: usize) -> Vec<MemoryArea> {
        let count = self.allocas.len().saturating_sub(key);
        self.remove_allocas(count)
            .iter()
            .map(AllocaState::area)
            .collect()
    }

    // ── By-value argument regions ───────────────────────────────

    /// By-value argument regions in registration order.
    pub fn byval_areas(&self) -> &[ByValArea] {
        &self.byval_areas
    }

    /// Register a by-value argument region.
    pub fn add_byval(&mut self, byval: ByValArea) {
        self.arg_targets.insert(
            byval.argument,
            PointerTarget {
                object: byval.area.address,
                offset: 0,
            },
        );
        self.byval_areas.push(byval);
    }

    /// Forget the by-value region at `address` (for retraction).
    pub fn remove_byval(&mut self, address: u64) -> Result<ByValArea, StateError> {
        let pos = self
            .byval_areas
            .iter()
            .position(|b| b.area.address == address)
            .ok_or_else(|| StateError::StashMismatch {
                detail: format!("no by-value region at {address:#x}"),
            })?;
        let byval = self.byval_areas.remove(pos);
        self.arg_targets.remove(&byval.argument);
        Ok(byval)
    }

    // ── Pointer provenance ──────────────────────────────────────

    /// The provenance recorded for an instruction's pointer value.
    pub fn pointer_target(&self, index: InstrIndex) -> Option<PointerTarget> {
        self.instr_targets.get(&index).copied()
    }

    /// The provenance recorded for an argument's pointer value.
    pub fn arg_pointer_target(&self, argument: Argument) -> Option<PointerTarget> {
        self.arg_targets.get(&argument).copied()
    }

    /// All recorded instruction provenance, in unspecified order.
    pub fn pointer_targets(&self) -> impl Iterator<Item = (InstrIndex, PointerTarget)> + '_ {
        self.instr_targets.iter().map(|(&i, &t)| (i, t))
    }

    /// All recorded argument provenance, in unspecified order.
    pub fn arg_pointer_targets(&self) -> impl Iterator<Item = (Argument, PointerTarget)> + '_ {
        self.arg_targets.iter().map(|(&a, &t)| (a, t))
    }

    /// Record provenance for an instruction's pointer value.
    pub fn set_pointer_target(&mut self, index: InstrIndex, target: PointerTarget) {
        self.instr_targets.insert(index, target);
    }

    /// Drop provenance for an instruction (when its value is
    /// retracted to unassigned).
    pub fn clear_pointer_target(&mut self, index: InstrIndex) {
        self.instr_targets.remove(&index);
    }

    // ── Runtime errors ──────────────────────────────────────────

    /// Attached runtime errors in occurrence order.
    pub fn runtime_errors(&self) -> &[AttachedError] {
        &self.runtime_errors
    }

    /// Runtime errors attached to the currently active instruction.
    pub fn active_runtime_errors(&self) -> impl Iterator<Item = &AttachedError> {
        let active = self.active.map(|a| a.index);
        self.runtime_errors
            .iter()
            .filter(move |e| active.is_some() && e.instruction == active)
    }

    /// Attach a runtime error at the given instruction.
    pub fn add_runtime_error(&mut self, error: RuntimeError, instruction: Option<InstrIndex>) {
        self.runtime_errors.push(AttachedError { error, instruction });
    }

    /// Detach the most recently attached runtime error.
    pub fn remove_last_runtime_error(&mut self) -> Option<AttachedError> {
        self.runtime_errors.pop()
    }

    /// Detach every runtime error.
    ///
    /// Applying an instruction event clears the errors of the
    /// previously active instruction; backward movement re-reads them
    /// from the log when that instruction becomes active again.
    pub fn clear_runtime_errors(&mut self) {
        self.runtime_errors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrace_core::event::NO_OFFSET;
    use retrace_core::RuntimeErrorKind;
    use smallvec::smallvec;

    fn frame(slots: usize) -> FunctionState {
        FunctionState::new(
            FunctionIndex(0),
            FunctionTrace {
                function: FunctionIndex(0),
                start_offset: 0,
                end_offset: NO_OFFSET,
                thread_time_entered: 1,
                thread_time_exited: 0,
            },
            slots,
        )
    }

    fn alloca(i: u32, address: u64) -> AllocaState {
        AllocaState {
            instruction: InstrIndex(i),
            address,
            element_size: 4,
            element_count: 1,
        }
    }

    #[test]
    fn value_slots_are_bounded() {
        let mut f = frame(2);
        f.set_value(InstrIndex(1), RuntimeValue::U32(7)).unwrap();
        assert_eq!(f.value(InstrIndex(1)).unwrap().as_u64(), Some(7));
        assert!(!f.value(InstrIndex(0)).unwrap().is_assigned());

        let err = f.set_value(InstrIndex(2), RuntimeValue::U32(0)).unwrap_err();
        assert!(matches!(err, StateError::ValueSlotOutOfRange { .. }));
    }

    #[test]
    fn remove_and_unremove_allocas_preserve_order() {
        let mut f = frame(8);
        for (i, addr) in [(0u32, 0x10u64), (1, 0x20), (2, 0x30), (3, 0x40), (4, 0x50)] {
            f.add_alloca(alloca(i, addr));
        }

        let removed = f.remove_allocas(2);
        assert_eq!(
            removed.iter().map(|a| a.address).collect::<Vec<_>>(),
            vec![0x40, 0x50]
        );
        assert_eq!(f.allocas().len(), 3);

        let restored = f.unremove_allocas(2);
        assert_eq!(
            restored.iter().map(|a| a.address).collect::<Vec<_>>(),
            vec![0x40, 0x50]
        );
        assert_eq!(
            f.allocas().iter().map(|a| a.address).collect::<Vec<_>>(),
            vec![0x10, 0x20, 0x30, 0x40, 0x50]
        );
    }

    #[test]
    fn stack_save_restore_reports_invalidated_areas() {
        let mut f = frame(8);
        f.add_alloca(alloca(0, 0x100));
        let key = f.stack_save();
        f.add_alloca(alloca(1, 0x200));
        f.add_alloca(alloca(2, 0x300));

        let invalidated = f.stack_restore(key);
        assert_eq!(
            invalidated,
            vec![MemoryArea::new(0x200, 4), MemoryArea::new(0x300, 4)]
        );
        assert_eq!(f.allocas().len(), 1);
    }

    #[test]
    fn byval_registration_tracks_arg_provenance() {
        let mut f = frame(0);
        f.add_byval(ByValArea {
            argument: Argument(1),
            area: MemoryArea::new(0x9000, 24),
        });
        assert_eq!(
            f.arg_pointer_target(Argument(1)),
            Some(PointerTarget {
                object: 0x9000,
                offset: 0,
            })
        );
        f.remove_byval(0x9000).unwrap();
        assert!(f.arg_pointer_target(Argument(1)).is_none());
        assert!(f.remove_byval(0x9000).is_err());
    }

    #[test]
    fn active_errors_follow_the_active_instruction() {
        let mut f = frame(4);
        f.set_active_complete(InstrIndex(2));
        f.add_runtime_error(
            RuntimeError {
                kind: RuntimeErrorKind::MemoryOverflow,
                is_top_level: true,
                args: smallvec![],
            },
            Some(InstrIndex(2)),
        );
        assert_eq!(f.active_runtime_errors().count(), 1);

        f.set_active_complete(InstrIndex(3));
        assert_eq!(f.active_runtime_errors().count(), 0);
        assert_eq!(f.runtime_errors().len(), 1);
    }
}
