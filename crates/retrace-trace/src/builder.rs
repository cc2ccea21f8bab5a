//! In-memory construction of well-formed trace bytes.
//!
//! [`TraceBuilder`] implements the format side of the tracer contract:
//! block framing, function-trace tables, the data pool, and per-thread
//! logs with correct back-links. Tests and tools use it to fabricate
//! traces; the instrumenting tracer proper lives outside this
//! repository.
//!
//! The builder writes exactly what it is told (tests also fabricate
//! malformed traces) and panics only on misuse that would corrupt its
//! own bookkeeping, such as ending a function that was never started.

use retrace_core::event::{Event, NO_OFFSET};
use retrace_core::{FunctionIndex, ThreadId};

use crate::codec::encode_event;
use crate::file::{BlockType, FORMAT_VERSION};
use crate::funtrace::{FunctionTrace, FunctionTraceTable};

struct ThreadBuilder {
    bytes: Vec<u8>,
    last_record_size: u8,
    functions: FunctionTraceTable,
    open_invocations: Vec<u32>,
}

impl ThreadBuilder {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            last_record_size: 0,
            functions: FunctionTraceTable::default(),
            open_invocations: Vec::new(),
        }
    }

    fn push(&mut self, event: &Event) -> u64 {
        let offset = self.bytes.len() as u64;
        encode_event(&mut self.bytes, event, self.last_record_size);
        self.last_record_size = event.kind().record_size() as u8;
        offset
    }
}

/// Builds a trace file in memory.
#[derive(Default)]
pub struct TraceBuilder {
    module_bitcode: Vec<u8>,
    data: Vec<u8>,
    threads: Vec<ThreadBuilder>,
}

impl TraceBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            module_bitcode: Vec::new(),
            data: Vec::new(),
            threads: Vec::new(),
        }
    }

    /// Set the `ModuleBitcode` block payload.
    pub fn set_module_bitcode(&mut self, bytes: Vec<u8>) {
        self.module_bitcode = bytes;
    }

    /// Register a new thread, returning its id.
    pub fn add_thread(&mut self) -> ThreadId {
        let id = ThreadId(self.threads.len() as u32);
        self.threads.push(ThreadBuilder::new());
        id
    }

    /// Append raw bytes to the data pool, returning their offset.
    pub fn add_data(&mut self, bytes: &[u8]) -> u64 {
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(bytes);
        offset
    }

    /// Append a NUL-terminated string to the data pool, returning its
    /// offset.
    pub fn add_cstr(&mut self, s: &str) -> u64 {
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
        offset
    }

    /// Append an event record to `thread`'s log, returning its offset.
    ///
    /// # Panics
    ///
    /// Panics if `thread` was not created by [`add_thread`](Self::add_thread).
    pub fn push(&mut self, thread: ThreadId, event: Event) -> u64 {
        self.threads[thread.0 as usize].push(&event)
    }

    /// Record a function entry: creates the function-trace entry and
    /// appends the paired `FunctionStart` event.
    pub fn function_start(
        &mut self,
        thread: ThreadId,
        function: FunctionIndex,
        thread_time_entered: u64,
    ) -> u64 {
        let tb = &mut self.threads[thread.0 as usize];
        let trace_index = tb.functions.push(FunctionTrace {
            function,
            start_offset: tb.bytes.len() as u64,
            end_offset: NO_OFFSET,
            thread_time_entered,
            thread_time_exited: 0,
        });
        tb.open_invocations.push(trace_index);
        tb.push(&Event::FunctionStart { trace_index })
    }

    /// Record the exit of the innermost open invocation: completes its
    /// function-trace entry and appends the paired `FunctionEnd`.
    ///
    /// # Panics
    ///
    /// Panics if `thread` has no open invocation.
    pub fn function_end(&mut self, thread: ThreadId, thread_time_exited: u64) -> u64 {
        let tb = &mut self.threads[thread.0 as usize];
        let trace_index = tb
            .open_invocations
            .pop()
            .expect("function_end without matching function_start");
        let offset = tb.push(&Event::FunctionEnd { trace_index });
        let entry = tb.functions.entry_mut(trace_index);
        entry.end_offset = offset;
        entry.thread_time_exited = thread_time_exited;
        offset
    }

    /// Emit the complete trace file bytes.
    pub fn finish(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());

        let write_block = |out: &mut Vec<u8>, block_type: BlockType, payload: &[u8]| {
            out.push(block_type as u8);
            out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
            out.extend_from_slice(payload);
        };

        write_block(&mut out, BlockType::ModuleBitcode, &self.module_bitcode);

        // ProcessTrace: thread count plus per-thread function tables.
        let mut pt = Vec::new();
        pt.extend_from_slice(&(self.threads.len() as u32).to_le_bytes());
        for tb in &self.threads {
            pt.extend_from_slice(&(tb.functions.len() as u32).to_le_bytes());
            for entry in tb.functions.iter() {
                pt.extend_from_slice(&entry.function.0.to_le_bytes());
                pt.extend_from_slice(&entry.start_offset.to_le_bytes());
                pt.extend_from_slice(&entry.end_offset.to_le_bytes());
                pt.extend_from_slice(&entry.thread_time_entered.to_le_bytes());
                pt.extend_from_slice(&entry.thread_time_exited.to_le_bytes());
            }
        }
        write_block(&mut out, BlockType::ProcessTrace, &pt);

        write_block(&mut out, BlockType::ProcessData, &self.data);

        for tb in &self.threads {
            write_block(&mut out, BlockType::ThreadEvents, &tb.bytes);
        }

        out
    }
}
