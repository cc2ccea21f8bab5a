//! The replay session: one process, bidirectional movement.
//!
//! [`Session`] owns the open trace, the module index, the shared
//! [`ProcessState`], and one [`ThreadState`] per traced thread. A
//! single owning thread drives movement (`&mut self`); read-only
//! queries go through a [`StateAccessToken`] and may come from any
//! thread holding one.
//!
//! # Atomicity and poisoning
//!
//! The predicate movers (`advance_until`, `retract_until`,
//! `move_forward_until`, `move_backward_until`) are atomic: when the
//! log ends before the predicate holds, every step taken is undone and
//! the call returns `Ok(false)` with the state untouched. The
//! `move_to_*` movers instead stop at the closest reachable point.
//!
//! Any fatal error (corrupt trace, state inconsistency) poisons the
//! session: the failing call reports the error and every later
//! movement call returns [`StateError::Poisoned`].

use std::sync::Arc;

use retrace_core::ThreadId;
use retrace_module::ModuleIndex;
use retrace_trace::TraceFile;

use crate::error::StateError;
use crate::mover::{apply_next, retract_previous, MoveCtx};
use crate::process::ProcessState;
use crate::thread::ThreadState;
use crate::token::StateAccessToken;

/// Movement counters exposed by the session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionMetrics {
    /// Events applied over the session's lifetime.
    pub events_applied: u64,
    /// Events retracted over the session's lifetime.
    pub events_retracted: u64,
}

/// A replay session over one trace.
pub struct Session {
    trace: TraceFile,
    module: Arc<ModuleIndex>,
    process: ProcessState,
    threads: Vec<ThreadState>,
    token: StateAccessToken,
    generation: u64,
    poisoned: bool,
    metrics: SessionMetrics,
}

impl Session {
    /// Create a session positioned before the first event of every
    /// thread.
    pub fn new(trace: TraceFile, module: Arc<ModuleIndex>) -> Self {
        let threads = (0..trace.thread_count())
            .map(|i| ThreadState::new(ThreadId(i as u32)))
            .collect();
        Self {
            trace,
            module,
            process: ProcessState::new(),
            threads,
            token: StateAccessToken::new(0),
            generation: 0,
            poisoned: false,
            metrics: SessionMetrics::default(),
        }
    }

    // ── Read access ─────────────────────────────────────────────

    /// The current access token. Valid until the next movement.
    pub fn token(&self) -> StateAccessToken {
        self.token.clone()
    }

    /// The shared process state, gated on a live token.
    pub fn process_state(&self, token: &StateAccessToken) -> Result<&ProcessState, StateError> {
        token.check()?;
        Ok(&self.process)
    }

    /// One thread's state, gated on a live token.
    pub fn thread_state(
        &self,
        token: &StateAccessToken,
        thread: ThreadId,
    ) -> Result<&ThreadState, StateError> {
        token.check()?;
        self.threads
            .get(thread.0 as usize)
            .ok_or(StateError::UnknownThread { thread })
    }

    /// Number of traced threads.
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// The open trace.
    pub fn trace(&self) -> &TraceFile {
        &self.trace
    }

    /// The module index.
    pub fn module(&self) -> &Arc<ModuleIndex> {
        &self.module
    }

    /// Movement counters.
    pub fn metrics(&self) -> SessionMetrics {
        self.metrics
    }

    /// Whether a fatal error has poisoned the session.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    // ── Internals ───────────────────────────────────────────────

    fn ensure_live(&self) -> Result<(), StateError> {
        if self.poisoned {
            Err(StateError::Poisoned)
        } else {
            Ok(())
        }
    }

    fn refresh_token(&mut self) {
        self.token.invalidate();
        self.generation += 1;
        self.token = StateAccessToken::new(self.generation);
    }

    fn guard<T>(&mut self, result: Result<T, StateError>) -> Result<T, StateError> {
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    /// One raw forward step of `thread`, without token bookkeeping.
    fn step_forward(&mut self, thread: ThreadId) -> Result<bool, StateError> {
        let idx = thread.0 as usize;
        let state = self
            .threads
            .get_mut(idx)
            .ok_or(StateError::UnknownThread { thread })?;
        let trace = self
            .trace
            .thread(thread)
            .ok_or(StateError::UnknownThread { thread })?;
        let ctx = MoveCtx {
            module: &self.module,
            data: self.trace.data(),
            trace,
        };
        let moved = apply_next(&ctx, &mut self.process, state)?;
        if moved {
            self.metrics.events_applied += 1;
        }
        Ok(moved)
    }

    /// One raw backward step of `thread`, without token bookkeeping.
    fn step_backward(&mut self, thread: ThreadId) -> Result<bool, StateError> {
        let idx = thread.0 as usize;
        let state = self
            .threads
            .get_mut(idx)
            .ok_or(StateError::UnknownThread { thread })?;
        let trace = self
            .trace
            .thread(thread)
            .ok_or(StateError::UnknownThread { thread })?;
        let ctx = MoveCtx {
            module: &self.module,
            data: self.trace.data(),
            trace,
        };
        let moved = retract_previous(&ctx, &mut self.process, state)?;
        if moved {
            self.metrics.events_retracted += 1;
            self.restore_shared_process_time()?;
        }
        Ok(moved)
    }

    /// Recompute the shared process clock after a retraction: the
    /// maximum stamp on the applied prefix across all threads, 0 when
    /// none remains.
    ///
    /// The mover cannot do this itself — it sees only the retracted
    /// thread's log, and the stamp preceding the retracted one there
    /// may be far below stamps other threads still have applied.
    fn restore_shared_process_time(&mut self) -> Result<(), StateError> {
        let mut restored = 0;
        for i in 0..self.threads.len() {
            if let Some((stamp, _)) = self.prev_stamp(ThreadId(i as u32))? {
                restored = restored.max(stamp);
            }
        }
        self.process.set_process_time(restored);
        Ok(())
    }

    /// The next process-time stamp ahead of `thread`'s cursor, with
    /// the offset of the event carrying it.
    fn next_stamp(&self, thread: ThreadId) -> Result<Option<(u64, u64)>, StateError> {
        let state = &self.threads[thread.0 as usize];
        let trace = self
            .trace
            .thread(thread)
            .ok_or(StateError::UnknownThread { thread })?;
        for item in trace.log.iter_from(state.next_offset()) {
            let (offset, event) = item?;
            if let Some(stamp) = event.process_time() {
                return Ok(Some((stamp, offset)));
            }
        }
        Ok(None)
    }

    /// The most recent applied process-time stamp behind `thread`'s
    /// cursor, with the offset of the event carrying it.
    fn prev_stamp(&self, thread: ThreadId) -> Result<Option<(u64, u64)>, StateError> {
        let state = &self.threads[thread.0 as usize];
        let trace = self
            .trace
            .thread(thread)
            .ok_or(StateError::UnknownThread { thread })?;
        let found = trace
            .log
            .rfind_before(state.next_offset(), |ev| ev.process_time().is_some())?;
        Ok(found.map(|(offset, ev)| (ev.process_time().unwrap_or(0), offset)))
    }

    /// The thread whose next stamped event carries the smallest stamp.
    fn thread_with_min_next_stamp(&self) -> Result<Option<(ThreadId, u64, u64)>, StateError> {
        let mut best: Option<(ThreadId, u64, u64)> = None;
        for i in 0..self.threads.len() {
            let thread = ThreadId(i as u32);
            if let Some((stamp, offset)) = self.next_stamp(thread)? {
                let better = match best {
                    Some((_, best_stamp, _)) => stamp < best_stamp,
                    None => true,
                };
                if better {
                    best = Some((thread, stamp, offset));
                }
            }
        }
        Ok(best)
    }

    /// The thread whose most recent applied stamped event carries the
    /// largest stamp.
    fn thread_with_max_prev_stamp(&self) -> Result<Option<(ThreadId, u64, u64)>, StateError> {
        let mut best: Option<(ThreadId, u64, u64)> = None;
        for i in 0..self.threads.len() {
            let thread = ThreadId(i as u32);
            if let Some((stamp, offset)) = self.prev_stamp(thread)? {
                let better = match best {
                    Some((_, best_stamp, _)) => stamp > best_stamp,
                    None => true,
                };
                if better {
                    best = Some((thread, stamp, offset));
                }
            }
        }
        Ok(best)
    }

    /// Advance `thread` until the event at `offset` has been applied.
    fn advance_through(&mut self, thread: ThreadId, offset: u64) -> Result<u64, StateError> {
        let mut steps = 0;
        while self.threads[thread.0 as usize].next_offset() <= offset {
            let moved = self.step_forward(thread)?;
            if !moved {
                break;
            }
            steps += 1;
        }
        Ok(steps)
    }

    /// Retract `thread` until the event at `offset` has been undone.
    fn retract_through(&mut self, thread: ThreadId, offset: u64) -> Result<u64, StateError> {
        let mut steps = 0;
        while self.threads[thread.0 as usize].next_offset() > offset {
            let moved = self.step_backward(thread)?;
            if !moved {
                break;
            }
            steps += 1;
        }
        Ok(steps)
    }

    // ── Single-event movement ───────────────────────────────────

    /// Apply the next event of `thread`.
    ///
    /// Returns `Ok(false)` at end-of-log (state unchanged).
    pub fn advance(&mut self, thread: ThreadId) -> Result<bool, StateError> {
        self.ensure_live()?;
        let result = self.step_forward(thread);
        let moved = self.guard(result)?;
        if moved {
            self.refresh_token();
        }
        Ok(moved)
    }

    /// Invert the most recently applied event of `thread`.
    ///
    /// Returns `Ok(false)` at the beginning of the log.
    pub fn retract(&mut self, thread: ThreadId) -> Result<bool, StateError> {
        self.ensure_live()?;
        let result = self.step_backward(thread);
        let moved = self.guard(result)?;
        if moved {
            self.refresh_token();
        }
        Ok(moved)
    }

    // ── Predicate movement (atomic) ─────────────────────────────

    /// Advance `thread` until `predicate` holds on the resulting
    /// state.
    ///
    /// Atomic: if the log ends first, every step is undone and
    /// `Ok(false)` is returned with the state as if nothing moved.
    pub fn advance_until<F>(&mut self, thread: ThreadId, mut predicate: F) -> Result<bool, StateError>
    where
        F: FnMut(&ProcessState, &ThreadState) -> bool,
    {
        self.ensure_live()?;
        let mut steps = 0u64;
        loop {
            let result = self.step_forward(thread);
            let moved = self.guard(result)?;
            if !moved {
                for _ in 0..steps {
                    let result = self.step_backward(thread);
                    self.guard(result)?;
                }
                return Ok(false);
            }
            steps += 1;
            if predicate(&self.process, &self.threads[thread.0 as usize]) {
                self.refresh_token();
                return Ok(true);
            }
        }
    }

    /// Retract `thread` until `predicate` holds on the resulting
    /// state. Atomic like [`advance_until`](Self::advance_until).
    pub fn retract_until<F>(&mut self, thread: ThreadId, mut predicate: F) -> Result<bool, StateError>
    where
        F: FnMut(&ProcessState, &ThreadState) -> bool,
    {
        self.ensure_live()?;
        let mut steps = 0u64;
        loop {
            let result = self.step_backward(thread);
            let moved = self.guard(result)?;
            if !moved {
                for _ in 0..steps {
                    let result = self.step_forward(thread);
                    self.guard(result)?;
                }
                return Ok(false);
            }
            steps += 1;
            if predicate(&self.process, &self.threads[thread.0 as usize]) {
                self.refresh_token();
                return Ok(true);
            }
        }
    }

    /// Advance whichever thread carries the process forward until
    /// `predicate` holds on the process state. Steps are taken one
    /// process-time stamp at a time, in stamp order across threads.
    /// Atomic.
    pub fn move_forward_until<F>(&mut self, mut predicate: F) -> Result<bool, StateError>
    where
        F: FnMut(&ProcessState) -> bool,
    {
        self.ensure_live()?;
        // Record each raw step's thread so rollback can invert them in
        // exact reverse order (the memory journal is process-global).
        let mut taken: Vec<ThreadId> = Vec::new();
        loop {
            let next = self.thread_with_min_next_stamp();
            let next = self.guard(next)?;
            let Some((thread, _, offset)) = next else {
                for &t in taken.iter().rev() {
                    let result = self.step_backward(t);
                    self.guard(result)?;
                }
                return Ok(false);
            };
            while self.threads[thread.0 as usize].next_offset() <= offset {
                let result = self.step_forward(thread);
                if !self.guard(result)? {
                    break;
                }
                taken.push(thread);
            }
            if predicate(&self.process) {
                self.refresh_token();
                return Ok(true);
            }
        }
    }

    /// Retract whichever thread carries the process backward until
    /// `predicate` holds on the process state. Atomic.
    pub fn move_backward_until<F>(&mut self, mut predicate: F) -> Result<bool, StateError>
    where
        F: FnMut(&ProcessState) -> bool,
    {
        self.ensure_live()?;
        let mut taken: Vec<ThreadId> = Vec::new();
        loop {
            let prev = self.thread_with_max_prev_stamp();
            let prev = self.guard(prev)?;
            let Some((thread, _, offset)) = prev else {
                for &t in taken.iter().rev() {
                    let result = self.step_forward(t);
                    self.guard(result)?;
                }
                return Ok(false);
            };
            while self.threads[thread.0 as usize].next_offset() > offset {
                let result = self.step_backward(thread);
                if !self.guard(result)? {
                    break;
                }
                taken.push(thread);
            }
            if predicate(&self.process) {
                self.refresh_token();
                return Ok(true);
            }
        }
    }

    // ── Time-targeted movement ──────────────────────────────────

    /// Advance the process to the next process-time stamp.
    pub fn move_forward(&mut self) -> Result<bool, StateError> {
        self.ensure_live()?;
        let next = self.thread_with_min_next_stamp();
        let Some((thread, _, offset)) = self.guard(next)? else {
            return Ok(false);
        };
        let result = self.advance_through(thread, offset);
        let steps = self.guard(result)?;
        if steps > 0 {
            self.refresh_token();
        }
        Ok(steps > 0)
    }

    /// Retract the process to just before the most recent process-time
    /// stamp.
    pub fn move_backward(&mut self) -> Result<bool, StateError> {
        self.ensure_live()?;
        let prev = self.thread_with_max_prev_stamp();
        let Some((thread, _, offset)) = self.guard(prev)? else {
            return Ok(false);
        };
        let result = self.retract_through(thread, offset);
        let steps = self.guard(result)?;
        if steps > 0 {
            self.refresh_token();
        }
        Ok(steps > 0)
    }

    /// Move to process time `target`, or as close as reachable on the
    /// near side. Returns whether any movement occurred.
    pub fn move_to_process_time(&mut self, target: u64) -> Result<bool, StateError> {
        self.ensure_live()?;
        let mut net: u64 = 0;

        if self.process.process_time() < target {
            loop {
                let next = self.thread_with_min_next_stamp();
                let next = self.guard(next)?;
                let Some((thread, stamp, offset)) = next else {
                    break;
                };
                if stamp > target {
                    break;
                }
                let result = self.advance_through(thread, offset);
                net += self.guard(result)?;
            }
        } else if self.process.process_time() > target {
            while self.process.process_time() > target {
                let prev = self.thread_with_max_prev_stamp();
                let prev = self.guard(prev)?;
                let Some((thread, _, offset)) = prev else {
                    break;
                };
                let result = self.retract_through(thread, offset);
                net += self.guard(result)?;
            }
        }

        if net > 0 {
            self.refresh_token();
        }
        Ok(net > 0)
    }

    /// Move `thread` to thread time `target`, or as close as reachable
    /// on the near side. Returns whether any movement occurred.
    pub fn move_to_thread_time(
        &mut self,
        thread: ThreadId,
        target: u64,
    ) -> Result<bool, StateError> {
        self.ensure_live()?;
        let idx = thread.0 as usize;
        if idx >= self.threads.len() {
            return Err(StateError::UnknownThread { thread });
        }
        let mut net: i64 = 0;

        if self.threads[idx].thread_time() < target {
            while self.threads[idx].thread_time() < target {
                let result = self.step_forward(thread);
                if !self.guard(result)? {
                    break;
                }
                net += 1;
                if self.threads[idx].thread_time() > target {
                    // Overshot: this event jumped past the target, so
                    // the nearest reachable time lies before it.
                    let result = self.step_backward(thread);
                    self.guard(result)?;
                    net -= 1;
                    break;
                }
            }
        } else if self.threads[idx].thread_time() > target {
            while self.threads[idx].thread_time() > target {
                let result = self.step_backward(thread);
                if !self.guard(result)? {
                    break;
                }
                net -= 1;
                if self.threads[idx].thread_time() < target {
                    // Undershot: this event jumped below the target
                    // (function entry and exit times need not be
                    // contiguous with the surrounding events), so the
                    // nearest reachable time lies after it.
                    let result = self.step_forward(thread);
                    self.guard(result)?;
                    net += 1;
                    break;
                }
            }
        }

        if net != 0 {
            self.refresh_token();
        }
        Ok(net != 0)
    }
}
