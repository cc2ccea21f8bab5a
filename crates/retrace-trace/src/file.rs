//! Trace file block layout and opening.
//!
//! ```text
//! [FORMAT_VERSION u64]
//! [ModuleBitcode] [ProcessTrace] [ProcessData] [ThreadEvents]*N
//! ```
//!
//! Block framing is `[type u8][length u64][payload]`. The block set
//! and order are validated at open, as is every thread's event log.

use std::io::Read;

use retrace_core::ThreadId;

use crate::data::DataPool;
use crate::error::TraceError;
use crate::funtrace::{FunctionTrace, FunctionTraceTable};
use crate::log::ThreadEventLog;

/// Version of the trace storage format this build reads and writes.
pub const FORMAT_VERSION: u64 = 8;

/// The large blocks that make up a trace file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockType {
    /// Padding; ignored.
    Empty = 0,
    /// The instrumented module and its source mapping sidecar.
    ModuleBitcode = 1,
    /// Global schema: thread count and function-trace tables.
    ProcessTrace = 2,
    /// Shared data pool referenced by events.
    ProcessData = 3,
    /// One thread's event records.
    ThreadEvents = 4,
}

impl BlockType {
    /// Decode a block type byte.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Empty),
            1 => Some(Self::ModuleBitcode),
            2 => Some(Self::ProcessTrace),
            3 => Some(Self::ProcessData),
            4 => Some(Self::ThreadEvents),
            _ => None,
        }
    }
}

/// One thread's portion of an open trace: its event log and its
/// function-trace table.
#[derive(Debug)]
pub struct ThreadTrace {
    /// The thread's event log.
    pub log: ThreadEventLog,
    /// The thread's function-trace table.
    pub functions: FunctionTraceTable,
}

/// An open, validated trace file.
#[derive(Debug)]
pub struct TraceFile {
    module_bitcode: Vec<u8>,
    data: DataPool,
    threads: Vec<ThreadTrace>,
}

/// Read exactly `n` bytes, mapping EOF to a truncation error.
fn read_exact_vec(r: &mut dyn Read, n: usize, what: &str) -> Result<Vec<u8>, TraceError> {
    let mut buf = vec![0u8; n];
    r.read_exact(&mut buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TraceError::InvalidBlock {
                detail: format!("truncated {what}"),
            }
        } else {
            TraceError::Io(e)
        }
    })?;
    Ok(buf)
}

fn read_u32(bytes: &[u8], pos: &mut usize, what: &str) -> Result<u32, TraceError> {
    let end = *pos + 4;
    if end > bytes.len() {
        return Err(TraceError::InvalidBlock {
            detail: format!("truncated {what}"),
        });
    }
    let v = u32::from_le_bytes(bytes[*pos..end].try_into().unwrap());
    *pos = end;
    Ok(v)
}

fn read_u64(bytes: &[u8], pos: &mut usize, what: &str) -> Result<u64, TraceError> {
    let end = *pos + 8;
    if end > bytes.len() {
        return Err(TraceError::InvalidBlock {
            detail: format!("truncated {what}"),
        });
    }
    let v = u64::from_le_bytes(bytes[*pos..end].try_into().unwrap());
    *pos = end;
    Ok(v)
}

impl TraceFile {
    /// Open a trace from a byte stream, validating the format version,
    /// the block set and order, the function-trace tables, and every
    /// thread's event log.
    pub fn read(r: &mut dyn Read) -> Result<Self, TraceError> {
        let version_bytes = read_exact_vec(r, 8, "format version")?;
        let version = u64::from_le_bytes(version_bytes.as_slice().try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(TraceError::UnsupportedVersion { found: version });
        }

        let mut module_bitcode: Option<Vec<u8>> = None;
        let mut process_trace: Option<Vec<u8>> = None;
        let mut data: Option<Vec<u8>> = None;
        let mut thread_blocks: Vec<Vec<u8>> = Vec::new();

        loop {
            let mut type_byte = [0u8; 1];
            match r.read(&mut type_byte) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TraceError::Io(e)),
            }

            let block_type = BlockType::from_u8(type_byte[0]).ok_or(TraceError::InvalidBlock {
                detail: format!("unknown block type {}", type_byte[0]),
            })?;
            let len_bytes = read_exact_vec(r, 8, "block length")?;
            let length = u64::from_le_bytes(len_bytes.as_slice().try_into().unwrap());
            let payload = read_exact_vec(r, length as usize, "block payload")?;

            match block_type {
                BlockType::Empty => {}
                BlockType::ModuleBitcode => {
                    if module_bitcode.replace(payload).is_some() {
                        return Err(TraceError::DuplicateBlock {
                            block: "ModuleBitcode",
                        });
                    }
                }
                BlockType::ProcessTrace => {
                    if process_trace.replace(payload).is_some() {
                        return Err(TraceError::DuplicateBlock {
                            block: "ProcessTrace",
                        });
                    }
                }
                BlockType::ProcessData => {
                    if data.replace(payload).is_some() {
                        return Err(TraceError::DuplicateBlock {
                            block: "ProcessData",
                        });
                    }
                }
                BlockType::ThreadEvents => thread_blocks.push(payload),
            }
        }

        let module_bitcode = module_bitcode.ok_or(TraceError::MissingBlock {
            block: "ModuleBitcode",
        })?;
        let process_trace = process_trace.ok_or(TraceError::MissingBlock {
            block: "ProcessTrace",
        })?;
        let data = DataPool::new(data.ok_or(TraceError::MissingBlock {
            block: "ProcessData",
        })?);

        // Decode the ProcessTrace payload: thread count plus one
        // function-trace table per thread.
        let mut pos = 0usize;
        let thread_count = read_u32(&process_trace, &mut pos, "thread count")? as usize;
        if thread_count != thread_blocks.len() {
            return Err(TraceError::InvalidBlock {
                detail: format!(
                    "ProcessTrace names {thread_count} threads but file has {} ThreadEvents blocks",
                    thread_blocks.len()
                ),
            });
        }

        let mut threads = Vec::with_capacity(thread_count);
        for (i, block) in thread_blocks.into_iter().enumerate() {
            let thread = ThreadId(i as u32);
            let entry_count = read_u32(&process_trace, &mut pos, "function trace count")?;
            let mut functions = FunctionTraceTable::default();
            for _ in 0..entry_count {
                functions.push(FunctionTrace {
                    function: read_u32(&process_trace, &mut pos, "function index")?.into(),
                    start_offset: read_u64(&process_trace, &mut pos, "start offset")?,
                    end_offset: read_u64(&process_trace, &mut pos, "end offset")?,
                    thread_time_entered: read_u64(&process_trace, &mut pos, "entry time")?,
                    thread_time_exited: read_u64(&process_trace, &mut pos, "exit time")?,
                });
            }
            let log = ThreadEventLog::new(thread, block)?;
            threads.push(ThreadTrace { log, functions });
        }
        if pos != process_trace.len() {
            return Err(TraceError::InvalidBlock {
                detail: "trailing bytes in ProcessTrace block".into(),
            });
        }

        Ok(Self {
            module_bitcode,
            data,
            threads,
        })
    }

    /// The instrumented module bytes, for the module-index collaborator.
    pub fn module_bitcode(&self) -> &[u8] {
        &self.module_bitcode
    }

    /// The shared data pool.
    pub fn data(&self) -> &DataPool {
        &self.data
    }

    /// Number of traced threads.
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// The per-thread trace for `thread`.
    pub fn thread(&self, thread: ThreadId) -> Option<&ThreadTrace> {
        self.threads.get(thread.0 as usize)
    }

    /// Iterate all per-thread traces in thread-id order.
    pub fn threads(&self) -> impl Iterator<Item = &ThreadTrace> {
        self.threads.iter()
    }
}
