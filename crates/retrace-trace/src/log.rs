//! The per-thread event log.
//!
//! A [`ThreadEventLog`] owns the raw bytes of one `ThreadEvents` block
//! and exposes constant-time record access plus the iteration and
//! backward-search primitives the state mover is built on. Records are
//! validated once at construction; afterwards every boundary handed
//! out by this module is known-good.

use retrace_core::event::Event;
use retrace_core::ThreadId;

use crate::codec::decode_event;
use crate::error::TraceError;
use crate::funtrace::FunctionTraceTable;

/// Read-only random-access view of one thread's event records.
#[derive(Debug)]
pub struct ThreadEventLog {
    thread: ThreadId,
    bytes: Vec<u8>,
    /// Offset of the final record; `None` for an empty log.
    last_offset: Option<u64>,
}

impl ThreadEventLog {
    /// Construct a log from a `ThreadEvents` block payload, walking
    /// every record to validate kinds, sizes, and back-links.
    pub fn new(thread: ThreadId, bytes: Vec<u8>) -> Result<Self, TraceError> {
        let mut offset = 0u64;
        let mut prev_record_size = 0u8;
        let mut last_offset = None;

        while (offset as usize) < bytes.len() {
            let (event, prev_size) = decode_event(thread, &bytes, offset)?;
            if prev_size != prev_record_size {
                return Err(TraceError::BadBackLink { thread, offset });
            }
            let size = event.kind().record_size();
            last_offset = Some(offset);
            prev_record_size = size as u8;
            offset += size as u64;
        }

        Ok(Self {
            thread,
            bytes,
            last_offset,
        })
    }

    /// The thread this log belongs to.
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Total size of the log in bytes; also the end-of-log offset.
    pub fn end_offset(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Whether the log contains no records.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Offset of the final record, if the log is non-empty.
    pub fn last_offset(&self) -> Option<u64> {
        self.last_offset
    }

    /// Decode the record at `offset`. Constant-time.
    pub fn event_at(&self, offset: u64) -> Result<Event, TraceError> {
        let (event, _) = decode_event(self.thread, &self.bytes, offset)?;
        Ok(event)
    }

    /// Offset of the record after the one at `offset`, or `None` at
    /// the end of the log.
    pub fn next_offset(&self, offset: u64) -> Result<Option<u64>, TraceError> {
        let event = self.event_at(offset)?;
        let next = offset + event.kind().record_size() as u64;
        Ok(if next >= self.end_offset() {
            None
        } else {
            Some(next)
        })
    }

    /// Offset of the record before the one at `offset`, using the
    /// header back-link, or `None` at the beginning.
    pub fn prev_offset(&self, offset: u64) -> Result<Option<u64>, TraceError> {
        let at = offset as usize;
        if at + 2 > self.bytes.len() {
            return Err(TraceError::TruncatedRecord {
                thread: self.thread,
                offset,
            });
        }
        let prev_size = self.bytes[at + 1];
        if prev_size == 0 {
            return Ok(None);
        }
        let prev = offset
            .checked_sub(prev_size as u64)
            .ok_or(TraceError::BadBackLink {
                thread: self.thread,
                offset,
            })?;
        Ok(Some(prev))
    }

    /// The record offset to begin a backward scan strictly before
    /// `offset`, where `offset` may be a record boundary or the
    /// end-of-log offset.
    fn backward_start(&self, offset: u64) -> Result<Option<u64>, TraceError> {
        if offset >= self.end_offset() {
            Ok(self.last_offset)
        } else {
            self.prev_offset(offset)
        }
    }

    /// Iterate records forward from `offset` (inclusive) to the end
    /// of the log.
    pub fn iter_from(&self, offset: u64) -> EventIter<'_> {
        EventIter {
            log: self,
            offset: Some(offset),
            end: self.end_offset(),
        }
    }

    /// Iterate records forward over `[begin, end)` offsets.
    pub fn iter_range(&self, begin: u64, end: u64) -> EventIter<'_> {
        EventIter {
            log: self,
            offset: Some(begin),
            end,
        }
    }

    /// Scan backward from the record before `prior_to`, returning the
    /// first record (greatest offset) matching `predicate`.
    ///
    /// `prior_to` may be the end-of-log offset. O(n) in the distance
    /// scanned.
    pub fn rfind_before<F>(
        &self,
        prior_to: u64,
        mut predicate: F,
    ) -> Result<Option<(u64, Event)>, TraceError>
    where
        F: FnMut(&Event) -> bool,
    {
        let mut cursor = self.backward_start(prior_to)?;
        while let Some(offset) = cursor {
            let event = self.event_at(offset)?;
            if predicate(&event) {
                return Ok(Some((offset, event)));
            }
            cursor = self.prev_offset(offset)?;
        }
        Ok(None)
    }

    /// Scan backward starting at `from` itself (inclusive).
    pub fn rfind_from<F>(
        &self,
        from: u64,
        mut predicate: F,
    ) -> Result<Option<(u64, Event)>, TraceError>
    where
        F: FnMut(&Event) -> bool,
    {
        let mut cursor = Some(from);
        while let Some(offset) = cursor {
            let event = self.event_at(offset)?;
            if predicate(&event) {
                return Ok(Some((offset, event)));
            }
            cursor = self.prev_offset(offset)?;
        }
        Ok(None)
    }

    /// Scan backward from the record before `prior_to`, staying within
    /// the current function invocation: nested invocations are skipped
    /// wholesale (a `FunctionEnd` jumps to its paired `FunctionStart`),
    /// and reaching the enclosing invocation's own `FunctionStart`
    /// terminates the search.
    pub fn rfind_in_function<F>(
        &self,
        functions: &FunctionTraceTable,
        prior_to: u64,
        mut predicate: F,
    ) -> Result<Option<(u64, Event)>, TraceError>
    where
        F: FnMut(&Event) -> bool,
    {
        let mut cursor = self.backward_start(prior_to)?;
        while let Some(offset) = cursor {
            let event = self.event_at(offset)?;
            match event {
                Event::FunctionStart { .. } => return Ok(None),
                Event::FunctionEnd { trace_index } => {
                    // Skip the whole nested invocation.
                    let entry = functions.entry(self.thread, trace_index)?;
                    cursor = self.prev_offset(entry.start_offset)?;
                    continue;
                }
                _ => {}
            }
            if predicate(&event) {
                return Ok(Some((offset, event)));
            }
            cursor = self.prev_offset(offset)?;
        }
        Ok(None)
    }

    /// Find the `InstructionWithPtr` closest before (or at) `from`.
    ///
    /// `Alloca`, `Malloc`, and `Realloc` events take their address
    /// from this record, so the state mover calls this on every one of
    /// them, in both movement directions.
    pub fn find_preceding_ptr_instruction(
        &self,
        from: u64,
    ) -> Result<Option<(u64, Event)>, TraceError> {
        self.rfind_from(from, |ev| {
            matches!(ev, Event::InstructionWithPtr { .. })
        })
    }
}

/// Forward iterator over `(offset, event)` pairs.
pub struct EventIter<'a> {
    log: &'a ThreadEventLog,
    offset: Option<u64>,
    end: u64,
}

impl Iterator for EventIter<'_> {
    type Item = Result<(u64, Event), TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.offset?;
        if offset >= self.end {
            self.offset = None;
            return None;
        }
        match self.log.event_at(offset) {
            Ok(event) => {
                self.offset = Some(offset + event.kind().record_size() as u64);
                Some(Ok((offset, event)))
            }
            Err(e) => {
                self.offset = None;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrace_core::event::NO_OFFSET;
    use retrace_core::{FunctionIndex, InstrIndex};

    use crate::codec::encode_event;
    use crate::funtrace::FunctionTrace;

    fn build_log(events: &[Event]) -> ThreadEventLog {
        let mut bytes = Vec::new();
        let mut prev = 0u8;
        for ev in events {
            encode_event(&mut bytes, ev, prev);
            prev = ev.kind().record_size() as u8;
        }
        ThreadEventLog::new(ThreadId(0), bytes).unwrap()
    }

    fn sample_events() -> Vec<Event> {
        vec![
            Event::FunctionStart { trace_index: 0 },
            Event::InstructionWithPtr {
                index: InstrIndex(7),
                value: 0x1000,
                object: 0x1000,
            },
            Event::Malloc {
                size: 16,
                process_time: 1,
            },
            Event::Instruction {
                index: InstrIndex(8),
            },
            Event::FunctionEnd { trace_index: 0 },
        ]
    }

    #[test]
    fn forward_iteration_yields_all_records() {
        let events = sample_events();
        let log = build_log(&events);
        let got: Vec<Event> = log
            .iter_from(0)
            .map(|r| r.unwrap().1)
            .collect();
        assert_eq!(got, events);
    }

    #[test]
    fn next_and_prev_are_inverse() {
        let log = build_log(&sample_events());
        let mut offsets = vec![0u64];
        while let Some(next) = log.next_offset(*offsets.last().unwrap()).unwrap() {
            offsets.push(next);
        }
        assert_eq!(offsets.len(), 5);
        for pair in offsets.windows(2) {
            assert_eq!(log.prev_offset(pair[1]).unwrap(), Some(pair[0]));
        }
        assert_eq!(log.prev_offset(0).unwrap(), None);
        assert_eq!(log.last_offset(), Some(*offsets.last().unwrap()));
    }

    #[test]
    fn rfind_before_scans_from_end() {
        let log = build_log(&sample_events());
        let (offset, event) = log
            .rfind_before(log.end_offset(), |ev| {
                matches!(ev, Event::InstructionWithPtr { .. })
            })
            .unwrap()
            .unwrap();
        assert!(matches!(event, Event::InstructionWithPtr { .. }));
        // The match is the second record.
        assert_eq!(offset, log.next_offset(0).unwrap().unwrap());
    }

    #[test]
    fn rfind_before_excludes_start_record() {
        let log = build_log(&sample_events());
        let malloc_offset = log
            .rfind_before(log.end_offset(), |ev| matches!(ev, Event::Malloc { .. }))
            .unwrap()
            .unwrap()
            .0;
        // Searching strictly before the Malloc must not see it.
        let found = log
            .rfind_before(malloc_offset, |ev| matches!(ev, Event::Malloc { .. }))
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn find_preceding_ptr_instruction_from_malloc() {
        let log = build_log(&sample_events());
        let malloc_offset = log
            .rfind_before(log.end_offset(), |ev| matches!(ev, Event::Malloc { .. }))
            .unwrap()
            .unwrap()
            .0;
        let (_, event) = log
            .find_preceding_ptr_instruction(malloc_offset)
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            Event::InstructionWithPtr {
                index: InstrIndex(7),
                value: 0x1000,
                object: 0x1000,
            }
        );
    }

    #[test]
    fn rfind_in_function_skips_nested_invocations() {
        // outer: start, instr(1), [nested: start, instr(9), end], instr(2)
        let events = vec![
            Event::FunctionStart { trace_index: 0 },
            Event::Instruction {
                index: InstrIndex(1),
            },
            Event::FunctionStart { trace_index: 1 },
            Event::Instruction {
                index: InstrIndex(9),
            },
            Event::FunctionEnd { trace_index: 1 },
            Event::Instruction {
                index: InstrIndex(2),
            },
        ];
        let log = build_log(&events);

        // Offsets of each record, in order.
        let offsets: Vec<u64> = log.iter_from(0).map(|r| r.unwrap().0).collect();

        let mut functions = FunctionTraceTable::default();
        functions.push(FunctionTrace {
            function: FunctionIndex(0),
            start_offset: offsets[0],
            end_offset: NO_OFFSET,
            thread_time_entered: 1,
            thread_time_exited: 0,
        });
        functions.push(FunctionTrace {
            function: FunctionIndex(1),
            start_offset: offsets[2],
            end_offset: offsets[4],
            thread_time_entered: 2,
            thread_time_exited: 3,
        });

        // Search backward from the last record: instr(9) belongs to the
        // nested invocation and must be skipped; instr(1) is the match.
        let (offset, event) = log
            .rfind_in_function(&functions, offsets[5], |ev| {
                matches!(ev, Event::Instruction { .. })
            })
            .unwrap()
            .unwrap();
        assert_eq!(offset, offsets[1]);
        assert_eq!(
            event,
            Event::Instruction {
                index: InstrIndex(1)
            }
        );

        // Searching for something only the nested invocation has fails
        // at the enclosing FunctionStart.
        let found = log
            .rfind_in_function(&functions, offsets[5], |ev| {
                ev.index() == Some(InstrIndex(9))
            })
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn corrupt_back_link_rejected_at_construction() {
        let mut bytes = Vec::new();
        encode_event(&mut bytes, &Event::NewThreadTime, 0);
        // Second record claims a wrong previous size.
        encode_event(
            &mut bytes,
            &Event::Instruction {
                index: InstrIndex(0),
            },
            77,
        );
        let err = ThreadEventLog::new(ThreadId(0), bytes).unwrap_err();
        assert!(matches!(err, TraceError::BadBackLink { .. }));
    }

    #[test]
    fn truncated_final_record_rejected_at_construction() {
        let mut bytes = Vec::new();
        encode_event(
            &mut bytes,
            &Event::Malloc {
                size: 1,
                process_time: 1,
            },
            0,
        );
        bytes.truncate(bytes.len() - 3);
        let err = ThreadEventLog::new(ThreadId(0), bytes).unwrap_err();
        assert!(matches!(err, TraceError::TruncatedRecord { .. }));
    }

    #[test]
    fn empty_log_is_valid() {
        let log = ThreadEventLog::new(ThreadId(2), Vec::new()).unwrap();
        assert!(log.is_empty());
        assert_eq!(log.last_offset(), None);
        assert!(log
            .rfind_before(log.end_offset(), |_| true)
            .unwrap()
            .is_none());
    }
}
