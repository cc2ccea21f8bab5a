//! Event-by-event state transitions.
//!
//! [`apply_next`] applies the event under a thread's cursor and
//! advances it; [`retract_previous`] steps the cursor back and inverts
//! the event there. The two are exact inverses: for any state and any
//! event, apply-then-retract restores the state bitwise — memory
//! bytes, init bits, allocations, call stacks, value slots, clocks,
//! handles, and runtime-error attachments.
//!
//! Subservient records ([`Event::RuntimeErrorArg`]) are never applied
//! or inverted on their own; the cursor steps across them and their
//! controlling `RuntimeError` reads them by range.

use retrace_core::event::Event;
use retrace_core::{Argument, InstrIndex, MemoryArea, RuntimeError, RuntimeValue, ThreadId};
use retrace_module::ModuleIndex;
use retrace_trace::{DataPool, ThreadTrace};

use crate::error::StateError;
use crate::function::{AllocaState, ByValArea, FunctionState, PointerTarget};
use crate::process::{DirState, MallocState, ProcessState, StreamState};
use crate::thread::ThreadState;

/// Everything a transition needs besides the mutable states: the
/// module index, the shared data pool, and the thread's own trace.
pub(crate) struct MoveCtx<'a> {
    pub module: &'a ModuleIndex,
    pub data: &'a DataPool,
    pub trace: &'a ThreadTrace,
}

impl MoveCtx<'_> {
    fn thread_id(&self) -> ThreadId {
        self.trace.log.thread()
    }
}

// ── Shared helpers ──────────────────────────────────────────────

/// Forward update of the shared process clock and the moving thread's
/// view of it.
///
/// The shared clock is the maximum stamp on the applied prefix across
/// all threads, so the update is max-based: applying a thread's events
/// after another thread already advanced the clock never moves it
/// backwards.
fn stamp(process: &mut ProcessState, thread: &mut ThreadState, process_time: u64) {
    process.set_process_time(process.process_time().max(process_time));
    thread.set_process_time_view(process_time);
}

/// Backward update of the time bookkeeping a stamped event did: the
/// thread's view reverts to the nearest prior stamp in its own log
/// (0 if none).
///
/// The shared process clock is restored by the session after the step.
/// Its value is the maximum stamp remaining on every thread's applied
/// prefix, which this single-thread mover cannot see; consecutive
/// stamps in one log may be far apart when other threads advanced the
/// clock in between.
fn unstamp(ctx: &MoveCtx<'_>, thread: &mut ThreadState, offset: u64) -> Result<(), StateError> {
    set_previous_view_of_process_time(ctx, thread, offset)
}

fn set_previous_view_of_process_time(
    ctx: &MoveCtx<'_>,
    thread: &mut ThreadState,
    prior_to: u64,
) -> Result<(), StateError> {
    let found = ctx
        .trace
        .log
        .rfind_before(prior_to, |ev| ev.process_time().is_some())?;
    let view = match found {
        Some((_, ev)) => ev.process_time().unwrap_or(0),
        None => 0,
    };
    thread.set_process_time_view(view);
    Ok(())
}

/// Resolve the `InstructionWithPtr` an allocation event takes its
/// address from.
fn preceding_ptr_instruction(
    ctx: &MoveCtx<'_>,
    offset: u64,
) -> Result<(InstrIndex, u64, u64), StateError> {
    match ctx.trace.log.find_preceding_ptr_instruction(offset)? {
        Some((
            _,
            Event::InstructionWithPtr {
                index,
                value,
                object,
            },
        )) => Ok((index, value, object)),
        _ => Err(StateError::MissingPtrInstruction {
            thread: ctx.thread_id(),
            offset,
        }),
    }
}

/// Write an instruction event's value into its slot, updating pointer
/// provenance. Used on forward application and when a retraction
/// re-applies the previous writer of a slot.
fn apply_value_event(frame: &mut FunctionState, event: &Event) -> Result<(), StateError> {
    match *event {
        Event::InstructionWithU8 { index, value } => {
            frame.set_value(index, RuntimeValue::U8(value))
        }
        Event::InstructionWithU16 { index, value } => {
            frame.set_value(index, RuntimeValue::U16(value))
        }
        Event::InstructionWithU32 { index, value } => {
            frame.set_value(index, RuntimeValue::U32(value))
        }
        Event::InstructionWithU64 { index, value } => {
            frame.set_value(index, RuntimeValue::U64(value))
        }
        Event::InstructionWithPtr {
            index,
            value,
            object,
        } => {
            if object != 0 {
                frame.set_pointer_target(
                    index,
                    PointerTarget {
                        object,
                        offset: value.wrapping_sub(object),
                    },
                );
            }
            frame.set_value(index, RuntimeValue::Ptr(value))
        }
        Event::InstructionWithFloat { index, value } => {
            frame.set_value(index, RuntimeValue::Float(value))
        }
        Event::InstructionWithDouble { index, value } => {
            frame.set_value(index, RuntimeValue::Double(value))
        }
        Event::InstructionWithLongDouble {
            index,
            word1,
            word2,
        } => {
            let mut bytes = [0u8; 10];
            bytes[..8].copy_from_slice(&word1.to_le_bytes());
            bytes[8..].copy_from_slice(&word2.to_le_bytes()[..2]);
            frame.set_value(index, RuntimeValue::LongDouble(bytes))
        }
        _ => Ok(()),
    }
}

/// Deserialize the subservient argument records trailing a
/// `RuntimeError` event and attach the assembled error to the top
/// frame.
fn attach_runtime_error(
    ctx: &MoveCtx<'_>,
    thread: &mut ThreadState,
    offset: u64,
    event: &Event,
) -> Result<(), StateError> {
    let Event::RuntimeError {
        kind,
        is_top_level,
        arg_count,
    } = *event
    else {
        return Ok(());
    };
    if !is_top_level {
        return Ok(());
    }

    let malformed = || StateError::MalformedErrorDetail {
        thread: ctx.thread_id(),
        offset,
    };

    let mut args = smallvec::SmallVec::new();
    let mut cursor = ctx.trace.log.next_offset(offset)?;
    for _ in 0..arg_count {
        let at = cursor.ok_or_else(malformed)?;
        match ctx.trace.log.event_at(at)? {
            Event::RuntimeErrorArg { arg_kind, data } => {
                args.push(retrace_core::RuntimeErrorArg {
                    kind: arg_kind,
                    data,
                });
            }
            _ => return Err(malformed()),
        }
        cursor = ctx.trace.log.next_offset(at)?;
    }

    let frame = thread.top_frame_mut()?;
    let instruction = frame.active().map(|a| a.index);
    frame.add_runtime_error(
        RuntimeError {
            kind,
            is_top_level,
            args,
        },
        instruction,
    );
    Ok(())
}

/// Reinstate the nearest earlier instruction of the same invocation as
/// the active one, restoring its completeness from its event kind and
/// re-attaching any runtime errors recorded between it and `prior_to`.
fn make_previous_instruction_active(
    ctx: &MoveCtx<'_>,
    thread: &mut ThreadState,
    prior_to: u64,
) -> Result<(), StateError> {
    let found = ctx
        .trace
        .log
        .rfind_in_function(&ctx.trace.functions, prior_to, |ev| {
            ev.kind().is_instruction()
        })?;

    let Some((found_offset, found_event)) = found else {
        thread.top_frame_mut()?.clear_active();
        return Ok(());
    };

    let index = found_event.index().ok_or_else(|| StateError::StashMismatch {
        detail: format!("instruction event at offset {found_offset} carries no index"),
    })?;

    {
        let frame = thread.top_frame_mut()?;
        if matches!(found_event, Event::PreInstruction { .. }) {
            frame.set_active_incomplete(index);
        } else {
            frame.set_active_complete(index);
        }
    }

    // Errors between the reinstated instruction and the retracted
    // event were cleared when execution moved past them; read them
    // back from the log.
    let mut cursor = ctx.trace.log.next_offset(found_offset)?;
    while let Some(at) = cursor {
        if at >= prior_to {
            break;
        }
        let ev = ctx.trace.log.event_at(at)?;
        if matches!(ev, Event::RuntimeError { .. }) {
            attach_runtime_error(ctx, thread, at, &ev)?;
        }
        cursor = ctx.trace.log.next_offset(at)?;
    }
    Ok(())
}

// ── Forward application ─────────────────────────────────────────

/// Apply the event under the thread's cursor and advance it.
///
/// Returns `Ok(false)` when the cursor is at end-of-log.
pub(crate) fn apply_next(
    ctx: &MoveCtx<'_>,
    process: &mut ProcessState,
    thread: &mut ThreadState,
) -> Result<bool, StateError> {
    let offset = thread.next_offset();
    if offset >= ctx.trace.log.end_offset() {
        return Ok(false);
    }
    let event = ctx.trace.log.event_at(offset)?;

    if !event.kind().is_subservient() {
        apply_event(ctx, process, thread, offset, &event)?;
    }

    let size = event.kind().record_size() as u64;
    thread.set_next_offset(offset + size);
    Ok(true)
}

fn apply_event(
    ctx: &MoveCtx<'_>,
    process: &mut ProcessState,
    thread: &mut ThreadState,
    offset: u64,
    event: &Event,
) -> Result<(), StateError> {
    match *event {
        Event::None | Event::RuntimeErrorArg { .. } => {}

        Event::FunctionStart { trace_index } => {
            let entry = *ctx.trace.functions.entry(ctx.thread_id(), trace_index)?;
            let count = ctx
                .module
                .instruction_count(entry.function)
                .ok_or(StateError::UnknownFunction {
                    function: entry.function,
                })?;
            thread.push_frame(FunctionState::new(entry.function, entry, count));
            thread.set_thread_time(entry.thread_time_entered);
        }

        Event::FunctionEnd { trace_index } => {
            let entry = *ctx.trace.functions.entry(ctx.thread_id(), trace_index)?;
            {
                let frame = thread.top_frame()?;
                if frame.function() != entry.function {
                    return Err(StateError::StashMismatch {
                        detail: format!(
                            "FunctionEnd for function {} but frame executes {}",
                            entry.function,
                            frame.function()
                        ),
                    });
                }
            }
            // Release the frame's memory: by-value regions first, then
            // allocas, matching the order their retraction reverses.
            let byvals: Vec<MemoryArea> = thread
                .top_frame()?
                .byval_areas()
                .iter()
                .map(|b| b.area)
                .collect();
            for area in byvals {
                process.memory_mut().allocation_remove(area)?;
            }
            let allocas: Vec<MemoryArea> = thread
                .top_frame()?
                .allocas()
                .iter()
                .map(AllocaState::area)
                .collect();
            for area in allocas {
                process.memory_mut().allocation_remove(area)?;
            }
            let frame = thread.pop_frame()?;
            thread.stash_completed(frame);
            thread.set_thread_time(entry.thread_time_exited);
        }

        Event::NewProcessTime { process_time } => {
            stamp(process, thread, process_time);
        }

        Event::NewThreadTime => {
            thread.top_frame()?;
            thread.set_thread_time(thread.thread_time() + 1);
        }

        Event::PreInstruction { index } => {
            let frame = thread.top_frame_mut()?;
            frame.clear_runtime_errors();
            frame.set_active_incomplete(index);
            thread.set_thread_time(thread.thread_time() + 1);
        }

        Event::Instruction { index } => {
            let frame = thread.top_frame_mut()?;
            frame.clear_runtime_errors();
            frame.set_active_complete(index);
            thread.set_thread_time(thread.thread_time() + 1);
        }

        Event::InstructionWithU8 { index, .. }
        | Event::InstructionWithU16 { index, .. }
        | Event::InstructionWithU32 { index, .. }
        | Event::InstructionWithU64 { index, .. }
        | Event::InstructionWithPtr { index, .. }
        | Event::InstructionWithFloat { index, .. }
        | Event::InstructionWithDouble { index, .. }
        | Event::InstructionWithLongDouble { index, .. } => {
            let frame = thread.top_frame_mut()?;
            frame.clear_runtime_errors();
            apply_value_event(frame, event)?;
            frame.set_active_complete(index);
            thread.set_thread_time(thread.thread_time() + 1);
        }

        Event::StackRestore { pop_count } => {
            let removed = thread.top_frame_mut()?.remove_allocas(pop_count as usize);
            for alloca in &removed {
                process.memory_mut().allocation_remove(alloca.area())?;
            }
        }

        Event::Alloca {
            element_size,
            element_count,
        } => {
            let (index, address, _) = preceding_ptr_instruction(ctx, offset)?;
            let alloca = AllocaState {
                instruction: index,
                address,
                element_size: u64::from(element_size),
                element_count: u64::from(element_count),
            };
            thread.top_frame_mut()?.add_alloca(alloca);
            process.memory_mut().allocation_add(alloca.area())?;
        }

        Event::Malloc { size, process_time } => {
            let (index, address, _) = preceding_ptr_instruction(ctx, offset)?;
            let allocator = thread
                .call_stack()
                .last()
                .map(|frame| (frame.function(), index));
            process.add_malloc(MallocState::new(address, size, allocator))?;
            process
                .memory_mut()
                .allocation_add(MemoryArea::new(address, size))?;
            stamp(process, thread, process_time);
        }

        Event::Free {
            address,
            process_time,
        } => {
            let size = process.remove_malloc(address)?;
            process
                .memory_mut()
                .allocation_remove(MemoryArea::new(address, size))?;
            stamp(process, thread, process_time);
        }

        Event::Realloc {
            address,
            old_size,
            new_size,
            process_time,
        } => {
            let allocator = match thread.call_stack().last() {
                Some(frame) => frame
                    .active()
                    .map(|active| (frame.function(), active.index)),
                None => None,
            };
            process
                .malloc_at_mut(address)
                .ok_or(StateError::UnknownMalloc { address })?
                .push_allocator(allocator, new_size);
            process
                .memory_mut()
                .allocation_resize(address, old_size, new_size)?;
            stamp(process, thread, process_time);
        }

        Event::StateUntypedSmall {
            size,
            address,
            data,
            process_time,
        } => {
            if size > 8 {
                return Err(StateError::Trace(retrace_trace::TraceError::InvalidBlock {
                    detail: format!("StateUntypedSmall size {size} exceeds inline capacity"),
                }));
            }
            let bytes = data.to_le_bytes();
            process.memory_mut().add_block(
                MemoryArea::new(address, u64::from(size)),
                &bytes[..size as usize],
            )?;
            stamp(process, thread, process_time);
        }

        Event::StateUntyped {
            address,
            data_offset,
            data_size,
            process_time,
        } => {
            let bytes = ctx.data.slice(data_offset, data_size)?.to_vec();
            process
                .memory_mut()
                .add_block(MemoryArea::new(address, data_size), &bytes)?;
            stamp(process, thread, process_time);
        }

        Event::StateMemmove {
            source,
            destination,
            size,
            process_time,
            ..
        } => {
            process.memory_mut().add_copy(source, destination, size)?;
            stamp(process, thread, process_time);
        }

        Event::StateClear {
            address,
            size,
            process_time,
        } => {
            process
                .memory_mut()
                .add_clear(MemoryArea::new(address, size))?;
            stamp(process, thread, process_time);
        }

        Event::KnownRegionAdd {
            address,
            size,
            readable,
            writable,
        } => {
            let area = MemoryArea::new(address, size);
            let permission =
                retrace_core::MemoryPermission::from_flags(readable != 0, writable != 0);
            process.add_known_region(area, permission)?;
            process.memory_mut().allocation_add(area)?;
        }

        Event::KnownRegionRemove { address, .. } => {
            let area = process.remove_known_region(address)?;
            process.memory_mut().allocation_remove(area)?;
        }

        Event::ByValRegionAdd {
            argument,
            address,
            size,
        } => {
            let area = MemoryArea::new(address, size);
            thread.top_frame_mut()?.add_byval(ByValArea {
                argument: Argument(argument),
                area,
            });
            process.memory_mut().allocation_add(area)?;
        }

        Event::FileOpen {
            file,
            filename_offset,
            mode_offset,
            process_time,
        } => {
            let filename = ctx.data.cstr(filename_offset)?.to_string();
            let mode = ctx.data.cstr(mode_offset)?.to_string();
            process.add_stream(StreamState::new(file, filename, mode))?;
            stamp(process, thread, process_time);
        }

        Event::FileWrite {
            file,
            data_offset,
            data_size,
            process_time,
        } => {
            let bytes = ctx.data.slice(data_offset, data_size)?.to_vec();
            process.write_stream(file, &bytes)?;
            stamp(process, thread, process_time);
        }

        Event::FileWriteFromMemory {
            file,
            data_address,
            data_size,
            process_time,
        } => {
            let region = process
                .memory()
                .region(MemoryArea::new(data_address, data_size));
            if data_size > 0 && !region.is_completely_initialized() {
                return Err(StateError::UninitializedWriteSource {
                    address: data_address,
                    size: data_size,
                });
            }
            let bytes = region.byte_values().to_vec();
            process.write_stream(file, &bytes)?;
            stamp(process, thread, process_time);
        }

        Event::FileClose { file, process_time } => {
            process.close_stream(file)?;
            stamp(process, thread, process_time);
        }

        Event::DirOpen {
            dir,
            dirname_offset,
            process_time,
        } => {
            let dirname = ctx.data.cstr(dirname_offset)?.to_string();
            process.add_dir(DirState::new(dir, dirname))?;
            stamp(process, thread, process_time);
        }

        Event::DirClose {
            dir, process_time, ..
        } => {
            process.remove_dir(dir)?;
            stamp(process, thread, process_time);
        }

        Event::RuntimeError { .. } => {
            attach_runtime_error(ctx, thread, offset, event)?;
        }
    }
    Ok(())
}

// ── Retraction ──────────────────────────────────────────────────

/// Step the thread's cursor back one record and invert the event
/// there.
///
/// Returns `Ok(false)` when the cursor is at the beginning of the log.
pub(crate) fn retract_previous(
    ctx: &MoveCtx<'_>,
    process: &mut ProcessState,
    thread: &mut ThreadState,
) -> Result<bool, StateError> {
    let cursor = thread.next_offset();
    let offset = if cursor >= ctx.trace.log.end_offset() {
        match ctx.trace.log.last_offset() {
            Some(last) => last,
            None => return Ok(false),
        }
    } else {
        match ctx.trace.log.prev_offset(cursor)? {
            Some(prev) => prev,
            None => return Ok(false),
        }
    };

    let event = ctx.trace.log.event_at(offset)?;
    if !event.kind().is_subservient() {
        retract_event(ctx, process, thread, offset, &event)?;
    }
    thread.set_next_offset(offset);
    Ok(true)
}

fn retract_event(
    ctx: &MoveCtx<'_>,
    process: &mut ProcessState,
    thread: &mut ThreadState,
    offset: u64,
    event: &Event,
) -> Result<(), StateError> {
    match *event {
        Event::None | Event::RuntimeErrorArg { .. } => {}

        Event::FunctionStart { trace_index } => {
            let entry = *ctx.trace.functions.entry(ctx.thread_id(), trace_index)?;
            let frame = thread.pop_frame()?;
            if frame.function() != entry.function {
                return Err(StateError::StashMismatch {
                    detail: format!(
                        "retracting FunctionStart of function {} but frame executes {}",
                        entry.function,
                        frame.function()
                    ),
                });
            }
            thread.set_thread_time(entry.thread_time_entered.saturating_sub(1));
        }

        Event::FunctionEnd { trace_index } => {
            let entry = *ctx.trace.functions.entry(ctx.thread_id(), trace_index)?;
            let frame = thread.unstash_completed()?;
            // Inverse of the forward release order: allocas in reverse
            // creation order first, then by-value regions in reverse,
            // so each unremove pops the journal entry its remove pushed.
            for alloca in frame.allocas().iter().rev() {
                process.memory_mut().allocation_unremove(alloca.area())?;
            }
            for byval in frame.byval_areas().iter().rev() {
                process.memory_mut().allocation_unremove(byval.area)?;
            }
            thread.push_frame(frame);
            thread.set_thread_time(entry.thread_time_exited.saturating_sub(1));
        }

        Event::NewProcessTime { .. } => {
            unstamp(ctx, thread, offset)?;
        }

        Event::NewThreadTime => {
            thread.set_thread_time(thread.thread_time().saturating_sub(1));
        }

        Event::PreInstruction { .. } | Event::Instruction { .. } => {
            make_previous_instruction_active(ctx, thread, offset)?;
            thread.set_thread_time(thread.thread_time().saturating_sub(1));
        }

        Event::InstructionWithU8 { index, .. }
        | Event::InstructionWithU16 { index, .. }
        | Event::InstructionWithU32 { index, .. }
        | Event::InstructionWithU64 { index, .. }
        | Event::InstructionWithPtr { index, .. }
        | Event::InstructionWithFloat { index, .. }
        | Event::InstructionWithDouble { index, .. }
        | Event::InstructionWithLongDouble { index, .. } => {
            // Restore the slot from the previous event that wrote it
            // within this invocation; absent that, unassign it.
            let kind = event.kind();
            let previous = ctx
                .trace
                .log
                .rfind_in_function(&ctx.trace.functions, offset, |ev| {
                    ev.kind() == kind && ev.index() == Some(index)
                })?;
            {
                let frame = thread.top_frame_mut()?;
                match previous {
                    Some((_, prev_event)) => apply_value_event(frame, &prev_event)?,
                    None => {
                        frame.set_value(index, RuntimeValue::Unassigned)?;
                        frame.clear_pointer_target(index);
                    }
                }
            }
            make_previous_instruction_active(ctx, thread, offset)?;
            thread.set_thread_time(thread.thread_time().saturating_sub(1));
        }

        Event::StackRestore { pop_count } => {
            let restored = thread
                .top_frame_mut()?
                .unremove_allocas(pop_count as usize);
            // Reverse order keeps the journal pops LIFO with the
            // forward removal order.
            for alloca in restored.iter().rev() {
                process.memory_mut().allocation_unremove(alloca.area())?;
            }
        }

        Event::Alloca { .. } => {
            let alloca = thread
                .top_frame_mut()?
                .pop_alloca()
                .ok_or_else(|| StateError::StashMismatch {
                    detail: "retracting Alloca with no recorded alloca".into(),
                })?;
            process.memory_mut().allocation_unadd(alloca.area())?;
        }

        Event::Malloc { size, .. } => {
            let (_, address, _) = preceding_ptr_instruction(ctx, offset)?;
            process.unadd_malloc(address)?;
            process
                .memory_mut()
                .allocation_unadd(MemoryArea::new(address, size))?;
            unstamp(ctx, thread, offset)?;
        }

        Event::Free { address, .. } => {
            let size = process.unremove_malloc(address)?;
            process
                .memory_mut()
                .allocation_unremove(MemoryArea::new(address, size))?;
            unstamp(ctx, thread, offset)?;
        }

        Event::Realloc {
            address,
            old_size,
            new_size,
            ..
        } => {
            let had_allocator = match thread.call_stack().last() {
                Some(frame) => frame.active().is_some(),
                None => false,
            };
            process
                .malloc_at_mut(address)
                .ok_or(StateError::UnknownMalloc { address })?
                .pop_allocator(had_allocator, old_size);
            process
                .memory_mut()
                .allocation_unresize(address, old_size, new_size)?;
            unstamp(ctx, thread, offset)?;
        }

        Event::StateUntypedSmall { size, address, .. } => {
            process
                .memory_mut()
                .remove_block(MemoryArea::new(address, u64::from(size)))?;
            unstamp(ctx, thread, offset)?;
        }

        Event::StateUntyped {
            address, data_size, ..
        } => {
            process
                .memory_mut()
                .remove_block(MemoryArea::new(address, data_size))?;
            unstamp(ctx, thread, offset)?;
        }

        Event::StateMemmove {
            source,
            destination,
            size,
            ..
        } => {
            process.memory_mut().remove_copy(source, destination, size)?;
            unstamp(ctx, thread, offset)?;
        }

        Event::StateClear { address, size, .. } => {
            process
                .memory_mut()
                .remove_clear(MemoryArea::new(address, size))?;
            unstamp(ctx, thread, offset)?;
        }

        Event::KnownRegionAdd { address, size, .. } => {
            let area = MemoryArea::new(address, size);
            process.remove_known_region(address)?;
            process.memory_mut().allocation_unadd(area)?;
        }

        Event::KnownRegionRemove {
            address,
            size,
            readable,
            writable,
        } => {
            let area = MemoryArea::new(address, size);
            let permission =
                retrace_core::MemoryPermission::from_flags(readable != 0, writable != 0);
            process.add_known_region(area, permission)?;
            process.memory_mut().allocation_unremove(area)?;
        }

        Event::ByValRegionAdd { address, size, .. } => {
            let area = MemoryArea::new(address, size);
            thread.top_frame_mut()?.remove_byval(address)?;
            process.memory_mut().allocation_unadd(area)?;
        }

        Event::FileOpen { file, .. } => {
            process.remove_stream(file)?;
            unstamp(ctx, thread, offset)?;
        }

        Event::FileWrite {
            file, data_size, ..
        }
        | Event::FileWriteFromMemory {
            file, data_size, ..
        } => {
            process.unwrite_stream(file, data_size)?;
            unstamp(ctx, thread, offset)?;
        }

        Event::FileClose { file, .. } => {
            process.restore_stream(file)?;
            unstamp(ctx, thread, offset)?;
        }

        Event::DirOpen { dir, .. } => {
            process.remove_dir(dir)?;
            unstamp(ctx, thread, offset)?;
        }

        Event::DirClose {
            dir,
            dirname_offset,
            ..
        } => {
            let dirname = ctx.data.cstr(dirname_offset)?.to_string();
            process.add_dir(DirState::new(dir, dirname))?;
            unstamp(ctx, thread, offset)?;
        }

        Event::RuntimeError { is_top_level, .. } => {
            if is_top_level {
                thread
                    .top_frame_mut()?
                    .remove_last_runtime_error()
                    .ok_or_else(|| StateError::StashMismatch {
                        detail: "retracting RuntimeError with none attached".into(),
                    })?;
            }
        }
    }
    Ok(())
}
