//! Per-thread replay state.

use retrace_core::ThreadId;

use crate::error::StateError;
use crate::function::FunctionState;

/// State of one traced thread: its position in the event log, its
/// clocks, and its call stack.
///
/// The completed-frame stash holds frames popped by `FunctionEnd`, in
/// completion order, so that retracting a `FunctionEnd` can revive the
/// exact frame — value slots, allocas, attached errors and all.
#[derive(Debug)]
pub struct ThreadState {
    thread: ThreadId,
    /// Offset of the next unapplied event; the log's end offset when
    /// every event is applied.
    next_offset: u64,
    thread_time: u64,
    /// This thread's view of the process time.
    process_time_view: u64,
    call_stack: Vec<FunctionState>,
    completed_frames: Vec<FunctionState>,
}

impl ThreadState {
    /// Create the initial state for `thread`, positioned before the
    /// first event.
    pub fn new(thread: ThreadId) -> Self {
        Self {
            thread,
            next_offset: 0,
            thread_time: 0,
            process_time_view: 0,
            call_stack: Vec::new(),
            completed_frames: Vec::new(),
        }
    }

    /// The thread this state belongs to.
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Offset of the next unapplied event.
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub(crate) fn set_next_offset(&mut self, offset: u64) {
        self.next_offset = offset;
    }

    /// The thread's current time.
    pub fn thread_time(&self) -> u64 {
        self.thread_time
    }

    pub(crate) fn set_thread_time(&mut self, t: u64) {
        self.thread_time = t;
    }

    /// This thread's view of the process time: the most recent
    /// process-time stamp it has observed.
    pub fn process_time_view(&self) -> u64 {
        self.process_time_view
    }

    pub(crate) fn set_process_time_view(&mut self, t: u64) {
        self.process_time_view = t;
    }

    // ── Call stack ──────────────────────────────────────────────

    /// Live frames, outermost first; the last is executing.
    pub fn call_stack(&self) -> &[FunctionState] {
        &self.call_stack
    }

    /// The currently executing frame.
    pub fn top_frame(&self) -> Result<&FunctionState, StateError> {
        self.call_stack
            .last()
            .ok_or(StateError::NoActiveFunction {
                thread: self.thread,
            })
    }

    /// The currently executing frame, mutably.
    pub fn top_frame_mut(&mut self) -> Result<&mut FunctionState, StateError> {
        self.call_stack
            .last_mut()
            .ok_or(StateError::NoActiveFunction {
                thread: self.thread,
            })
    }

    pub(crate) fn push_frame(&mut self, frame: FunctionState) {
        self.call_stack.push(frame);
    }

    pub(crate) fn pop_frame(&mut self) -> Result<FunctionState, StateError> {
        self.call_stack.pop().ok_or(StateError::NoActiveFunction {
            thread: self.thread,
        })
    }

    // ── Completed-frame stash ───────────────────────────────────

    /// Frames completed by `FunctionEnd`, oldest first.
    pub fn completed_frames(&self) -> &[FunctionState] {
        &self.completed_frames
    }

    pub(crate) fn stash_completed(&mut self, frame: FunctionState) {
        self.completed_frames.push(frame);
    }

    pub(crate) fn unstash_completed(&mut self) -> Result<FunctionState, StateError> {
        self.completed_frames
            .pop()
            .ok_or(StateError::NoCompletedFrame {
                thread: self.thread,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrace_core::event::NO_OFFSET;
    use retrace_core::FunctionIndex;
    use retrace_trace::FunctionTrace;

    fn frame() -> FunctionState {
        FunctionState::new(
            FunctionIndex(0),
            FunctionTrace {
                function: FunctionIndex(0),
                start_offset: 0,
                end_offset: NO_OFFSET,
                thread_time_entered: 1,
                thread_time_exited: 0,
            },
            0,
        )
    }

    #[test]
    fn empty_stack_errors_name_the_thread() {
        let mut t = ThreadState::new(ThreadId(4));
        assert!(matches!(
            t.top_frame(),
            Err(StateError::NoActiveFunction {
                thread: ThreadId(4)
            })
        ));
        assert!(matches!(
            t.unstash_completed(),
            Err(StateError::NoCompletedFrame {
                thread: ThreadId(4)
            })
        ));
        assert!(t.pop_frame().is_err());
    }

    #[test]
    fn stash_is_lifo() {
        let mut t = ThreadState::new(ThreadId(0));
        t.push_frame(frame());
        let popped = t.pop_frame().unwrap();
        t.stash_completed(popped);
        assert_eq!(t.completed_frames().len(), 1);
        let revived = t.unstash_completed().unwrap();
        assert_eq!(revived.function(), FunctionIndex(0));
    }
}
