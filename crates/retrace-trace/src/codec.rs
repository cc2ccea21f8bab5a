//! Binary encode/decode for event records.
//!
//! All integers are little-endian. Every record is a 2-byte header
//! `(kind u8, previous_event_size u8)` followed by a fixed-size payload
//! determined by the kind, so record sizes are computable from the
//! header alone and the whole log can be walked without a side index.

use retrace_core::event::{Event, EventKind};
use retrace_core::rterror::{RuntimeErrorArgKind, RuntimeErrorKind};
use retrace_core::{InstrIndex, ThreadId};

use crate::error::TraceError;

/// A cursor over a record payload whose length has already been
/// checked against the kind's fixed size.
struct Payload<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Payload<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn u8(&mut self) -> u8 {
        let v = self.bytes[self.pos];
        self.pos += 1;
        v
    }

    fn u16(&mut self) -> u16 {
        let v = u16::from_le_bytes(self.bytes[self.pos..self.pos + 2].try_into().unwrap());
        self.pos += 2;
        v
    }

    fn u32(&mut self) -> u32 {
        let v = u32::from_le_bytes(self.bytes[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }

    fn u64(&mut self) -> u64 {
        let v = u64::from_le_bytes(self.bytes[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        v
    }

    fn f32(&mut self) -> f32 {
        f32::from_bits(self.u32())
    }

    fn f64(&mut self) -> f64 {
        f64::from_bits(self.u64())
    }

    fn index(&mut self) -> InstrIndex {
        InstrIndex(self.u32())
    }
}

/// Decode the record at `offset` in a thread's log bytes.
///
/// Returns the decoded event and the header's previous-record size.
/// `thread` is used only for error reporting.
pub fn decode_event(
    thread: ThreadId,
    bytes: &[u8],
    offset: u64,
) -> Result<(Event, u8), TraceError> {
    let at = offset as usize;
    if at + 2 > bytes.len() {
        return Err(TraceError::TruncatedRecord { thread, offset });
    }

    let kind = EventKind::from_u8(bytes[at]).ok_or(TraceError::UnknownEventKind {
        thread,
        offset,
        tag: bytes[at],
    })?;
    let prev_size = bytes[at + 1];

    let payload_size = kind.payload_size();
    if at + 2 + payload_size > bytes.len() {
        return Err(TraceError::TruncatedRecord { thread, offset });
    }
    let mut p = Payload::new(&bytes[at + 2..at + 2 + payload_size]);

    let event = match kind {
        EventKind::None => Event::None,
        EventKind::FunctionStart => Event::FunctionStart {
            trace_index: p.u32(),
        },
        EventKind::FunctionEnd => Event::FunctionEnd {
            trace_index: p.u32(),
        },
        EventKind::NewProcessTime => Event::NewProcessTime {
            process_time: p.u64(),
        },
        EventKind::NewThreadTime => Event::NewThreadTime,
        EventKind::PreInstruction => Event::PreInstruction { index: p.index() },
        EventKind::Instruction => Event::Instruction { index: p.index() },
        EventKind::InstructionWithU8 => Event::InstructionWithU8 {
            index: p.index(),
            value: p.u8(),
        },
        EventKind::InstructionWithU16 => Event::InstructionWithU16 {
            index: p.index(),
            value: p.u16(),
        },
        EventKind::InstructionWithU32 => Event::InstructionWithU32 {
            index: p.index(),
            value: p.u32(),
        },
        EventKind::InstructionWithU64 => Event::InstructionWithU64 {
            index: p.index(),
            value: p.u64(),
        },
        EventKind::InstructionWithPtr => Event::InstructionWithPtr {
            index: p.index(),
            value: p.u64(),
            object: p.u64(),
        },
        EventKind::InstructionWithFloat => Event::InstructionWithFloat {
            index: p.index(),
            value: p.f32(),
        },
        EventKind::InstructionWithDouble => Event::InstructionWithDouble {
            index: p.index(),
            value: p.f64(),
        },
        EventKind::InstructionWithLongDouble => Event::InstructionWithLongDouble {
            index: p.index(),
            word1: p.u64(),
            word2: p.u64(),
        },
        EventKind::StackRestore => Event::StackRestore {
            pop_count: p.u32(),
        },
        EventKind::Alloca => Event::Alloca {
            element_size: p.u32(),
            element_count: p.u32(),
        },
        EventKind::Malloc => Event::Malloc {
            size: p.u64(),
            process_time: p.u64(),
        },
        EventKind::Free => Event::Free {
            address: p.u64(),
            process_time: p.u64(),
        },
        EventKind::Realloc => Event::Realloc {
            address: p.u64(),
            old_size: p.u64(),
            new_size: p.u64(),
            process_time: p.u64(),
        },
        EventKind::StateUntypedSmall => Event::StateUntypedSmall {
            size: p.u8(),
            address: p.u64(),
            data: p.u64(),
            process_time: p.u64(),
        },
        EventKind::StateUntyped => Event::StateUntyped {
            address: p.u64(),
            data_offset: p.u64(),
            data_size: p.u64(),
            process_time: p.u64(),
        },
        EventKind::StateMemmove => Event::StateMemmove {
            source: p.u64(),
            destination: p.u64(),
            size: p.u64(),
            process_time: p.u64(),
        },
        EventKind::StateClear => Event::StateClear {
            address: p.u64(),
            size: p.u64(),
            process_time: p.u64(),
        },
        EventKind::KnownRegionAdd => Event::KnownRegionAdd {
            address: p.u64(),
            size: p.u64(),
            readable: p.u8(),
            writable: p.u8(),
        },
        EventKind::KnownRegionRemove => Event::KnownRegionRemove {
            address: p.u64(),
            size: p.u64(),
            readable: p.u8(),
            writable: p.u8(),
        },
        EventKind::ByValRegionAdd => Event::ByValRegionAdd {
            argument: p.u32(),
            address: p.u64(),
            size: p.u64(),
        },
        EventKind::FileOpen => Event::FileOpen {
            file: p.u64(),
            filename_offset: p.u64(),
            mode_offset: p.u64(),
            process_time: p.u64(),
        },
        EventKind::FileWrite => Event::FileWrite {
            file: p.u64(),
            data_offset: p.u64(),
            data_size: p.u64(),
            process_time: p.u64(),
        },
        EventKind::FileWriteFromMemory => Event::FileWriteFromMemory {
            file: p.u64(),
            data_address: p.u64(),
            data_size: p.u64(),
            process_time: p.u64(),
        },
        EventKind::FileClose => Event::FileClose {
            file: p.u64(),
            process_time: p.u64(),
        },
        EventKind::DirOpen => Event::DirOpen {
            dir: p.u64(),
            dirname_offset: p.u64(),
            process_time: p.u64(),
        },
        EventKind::DirClose => Event::DirClose {
            dir: p.u64(),
            dirname_offset: p.u64(),
            process_time: p.u64(),
        },
        EventKind::RuntimeError => {
            let kind_byte = p.u8();
            let kind = RuntimeErrorKind::from_u8(kind_byte).ok_or(TraceError::InvalidBlock {
                detail: format!("unknown runtime error kind {kind_byte}"),
            })?;
            Event::RuntimeError {
                kind,
                is_top_level: p.u8() != 0,
                arg_count: p.u8(),
            }
        }
        EventKind::RuntimeErrorArg => {
            let kind_byte = p.u8();
            let arg_kind =
                RuntimeErrorArgKind::from_u8(kind_byte).ok_or(TraceError::InvalidBlock {
                    detail: format!("unknown runtime error argument kind {kind_byte}"),
                })?;
            Event::RuntimeErrorArg {
                arg_kind,
                data: p.u64(),
            }
        }
    };

    debug_assert_eq!(p.pos, payload_size, "payload size table out of sync");
    Ok((event, prev_size))
}

/// Append an encoded record for `event` to `buf`.
///
/// `prev_size` is the total size of the previous record in the same
/// thread (0 for the first record).
pub fn encode_event(buf: &mut Vec<u8>, event: &Event, prev_size: u8) {
    let kind = event.kind();
    let start = buf.len();
    buf.push(kind.as_u8());
    buf.push(prev_size);

    match *event {
        Event::None | Event::NewThreadTime => {}
        Event::FunctionStart { trace_index } | Event::FunctionEnd { trace_index } => {
            buf.extend_from_slice(&trace_index.to_le_bytes());
        }
        Event::NewProcessTime { process_time } => {
            buf.extend_from_slice(&process_time.to_le_bytes());
        }
        Event::PreInstruction { index } | Event::Instruction { index } => {
            buf.extend_from_slice(&index.0.to_le_bytes());
        }
        Event::InstructionWithU8 { index, value } => {
            buf.extend_from_slice(&index.0.to_le_bytes());
            buf.push(value);
        }
        Event::InstructionWithU16 { index, value } => {
            buf.extend_from_slice(&index.0.to_le_bytes());
            buf.extend_from_slice(&value.to_le_bytes());
        }
        Event::InstructionWithU32 { index, value } => {
            buf.extend_from_slice(&index.0.to_le_bytes());
            buf.extend_from_slice(&value.to_le_bytes());
        }
        Event::InstructionWithU64 { index, value } => {
            buf.extend_from_slice(&index.0.to_le_bytes());
            buf.extend_from_slice(&value.to_le_bytes());
        }
        Event::InstructionWithPtr {
            index,
            value,
            object,
        } => {
            buf.extend_from_slice(&index.0.to_le_bytes());
            buf.extend_from_slice(&value.to_le_bytes());
            buf.extend_from_slice(&object.to_le_bytes());
        }
        Event::InstructionWithFloat { index, value } => {
            buf.extend_from_slice(&index.0.to_le_bytes());
            buf.extend_from_slice(&value.to_bits().to_le_bytes());
        }
        Event::InstructionWithDouble { index, value } => {
            buf.extend_from_slice(&index.0.to_le_bytes());
            buf.extend_from_slice(&value.to_bits().to_le_bytes());
        }
        Event::InstructionWithLongDouble {
            index,
            word1,
            word2,
        } => {
            buf.extend_from_slice(&index.0.to_le_bytes());
            buf.extend_from_slice(&word1.to_le_bytes());
            buf.extend_from_slice(&word2.to_le_bytes());
        }
        Event::StackRestore { pop_count } => {
            buf.extend_from_slice(&pop_count.to_le_bytes());
        }
        Event::Alloca {
            element_size,
            element_count,
        } => {
            buf.extend_from_slice(&element_size.to_le_bytes());
            buf.extend_from_slice(&element_count.to_le_bytes());
        }
        Event::Malloc { size, process_time } => {
            buf.extend_from_slice(&size.to_le_bytes());
            buf.extend_from_slice(&process_time.to_le_bytes());
        }
        Event::Free {
            address,
            process_time,
        } => {
            buf.extend_from_slice(&address.to_le_bytes());
            buf.extend_from_slice(&process_time.to_le_bytes());
        }
        Event::Realloc {
            address,
            old_size,
            new_size,
            process_time,
        } => {
            buf.extend_from_slice(&address.to_le_bytes());
            buf.extend_from_slice(&old_size.to_le_bytes());
            buf.extend_from_slice(&new_size.to_le_bytes());
            buf.extend_from_slice(&process_time.to_le_bytes());
        }
        Event::StateUntypedSmall {
            size,
            address,
            data,
            process_time,
        } => {
            buf.push(size);
            buf.extend_from_slice(&address.to_le_bytes());
            buf.extend_from_slice(&data.to_le_bytes());
            buf.extend_from_slice(&process_time.to_le_bytes());
        }
        Event::StateUntyped {
            address,
            data_offset,
            data_size,
            process_time,
        } => {
            buf.extend_from_slice(&address.to_le_bytes());
            buf.extend_from_slice(&data_offset.to_le_bytes());
            buf.extend_from_slice(&data_size.to_le_bytes());
            buf.extend_from_slice(&process_time.to_le_bytes());
        }
        Event::StateMemmove {
            source,
            destination,
            size,
            process_time,
        } => {
            buf.extend_from_slice(&source.to_le_bytes());
            buf.extend_from_slice(&destination.to_le_bytes());
            buf.extend_from_slice(&size.to_le_bytes());
            buf.extend_from_slice(&process_time.to_le_bytes());
        }
        Event::StateClear {
            address,
            size,
            process_time,
        } => {
            buf.extend_from_slice(&address.to_le_bytes());
            buf.extend_from_slice(&size.to_le_bytes());
            buf.extend_from_slice(&process_time.to_le_bytes());
        }
        Event::KnownRegionAdd {
            address,
            size,
            readable,
            writable,
        }
        | Event::KnownRegionRemove {
            address,
            size,
            readable,
            writable,
        } => {
            buf.extend_from_slice(&address.to_le_bytes());
            buf.extend_from_slice(&size.to_le_bytes());
            buf.push(readable);
            buf.push(writable);
        }
        Event::ByValRegionAdd {
            argument,
            address,
            size,
        } => {
            buf.extend_from_slice(&argument.to_le_bytes());
            buf.extend_from_slice(&address.to_le_bytes());
            buf.extend_from_slice(&size.to_le_bytes());
        }
        Event::FileOpen {
            file,
            filename_offset,
            mode_offset,
            process_time,
        } => {
            buf.extend_from_slice(&file.to_le_bytes());
            buf.extend_from_slice(&filename_offset.to_le_bytes());
            buf.extend_from_slice(&mode_offset.to_le_bytes());
            buf.extend_from_slice(&process_time.to_le_bytes());
        }
        Event::FileWrite {
            file,
            data_offset,
            data_size,
            process_time,
        } => {
            buf.extend_from_slice(&file.to_le_bytes());
            buf.extend_from_slice(&data_offset.to_le_bytes());
            buf.extend_from_slice(&data_size.to_le_bytes());
            buf.extend_from_slice(&process_time.to_le_bytes());
        }
        Event::FileWriteFromMemory {
            file,
            data_address,
            data_size,
            process_time,
        } => {
            buf.extend_from_slice(&file.to_le_bytes());
            buf.extend_from_slice(&data_address.to_le_bytes());
            buf.extend_from_slice(&data_size.to_le_bytes());
            buf.extend_from_slice(&process_time.to_le_bytes());
        }
        Event::FileClose { file, process_time } => {
            buf.extend_from_slice(&file.to_le_bytes());
            buf.extend_from_slice(&process_time.to_le_bytes());
        }
        Event::DirOpen {
            dir,
            dirname_offset,
            process_time,
        }
        | Event::DirClose {
            dir,
            dirname_offset,
            process_time,
        } => {
            buf.extend_from_slice(&dir.to_le_bytes());
            buf.extend_from_slice(&dirname_offset.to_le_bytes());
            buf.extend_from_slice(&process_time.to_le_bytes());
        }
        Event::RuntimeError {
            kind,
            is_top_level,
            arg_count,
        } => {
            buf.push(kind.as_u8());
            buf.push(u8::from(is_top_level));
            buf.push(arg_count);
        }
        Event::RuntimeErrorArg { arg_kind, data } => {
            buf.push(arg_kind.as_u8());
            buf.extend_from_slice(&data.to_le_bytes());
        }
    }

    debug_assert_eq!(
        buf.len() - start,
        kind.record_size(),
        "payload size table out of sync for {kind}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use retrace_core::Argument;

    fn arb_event() -> impl Strategy<Value = Event> {
        prop_oneof![
            Just(Event::None),
            Just(Event::NewThreadTime),
            any::<u32>().prop_map(|i| Event::FunctionStart { trace_index: i }),
            any::<u32>().prop_map(|i| Event::FunctionEnd { trace_index: i }),
            any::<u64>().prop_map(|t| Event::NewProcessTime { process_time: t }),
            any::<u32>().prop_map(|i| Event::PreInstruction {
                index: InstrIndex(i)
            }),
            any::<u32>().prop_map(|i| Event::Instruction {
                index: InstrIndex(i)
            }),
            (any::<u32>(), any::<u8>()).prop_map(|(i, v)| Event::InstructionWithU8 {
                index: InstrIndex(i),
                value: v,
            }),
            (any::<u32>(), any::<u64>()).prop_map(|(i, v)| Event::InstructionWithU64 {
                index: InstrIndex(i),
                value: v,
            }),
            (any::<u32>(), any::<u64>(), any::<u64>()).prop_map(|(i, v, o)| {
                Event::InstructionWithPtr {
                    index: InstrIndex(i),
                    value: v,
                    object: o,
                }
            }),
            (any::<u32>(), any::<u32>()).prop_map(|(i, v)| Event::InstructionWithFloat {
                index: InstrIndex(i),
                value: f32::from_bits(v),
            }),
            (any::<u32>(), any::<u64>(), any::<u64>()).prop_map(|(i, w1, w2)| {
                Event::InstructionWithLongDouble {
                    index: InstrIndex(i),
                    word1: w1,
                    word2: w2,
                }
            }),
            (any::<u64>(), any::<u64>()).prop_map(|(s, t)| Event::Malloc {
                size: s,
                process_time: t,
            }),
            (any::<u64>(), any::<u64>(), any::<u64>(), any::<u64>()).prop_map(
                |(a, o, n, t)| Event::Realloc {
                    address: a,
                    old_size: o,
                    new_size: n,
                    process_time: t,
                }
            ),
            (1u8..=8, any::<u64>(), any::<u64>(), any::<u64>()).prop_map(|(s, a, d, t)| {
                Event::StateUntypedSmall {
                    size: s,
                    address: a,
                    data: d,
                    process_time: t,
                }
            }),
            (any::<u64>(), any::<u64>(), 0u8..=1, 0u8..=1).prop_map(|(a, s, r, w)| {
                Event::KnownRegionAdd {
                    address: a,
                    size: s,
                    readable: r,
                    writable: w,
                }
            }),
            (any::<u32>(), any::<u64>(), any::<u64>()).prop_map(|(arg, a, s)| {
                Event::ByValRegionAdd {
                    argument: arg,
                    address: a,
                    size: s,
                }
            }),
            (0u8..8, any::<bool>(), 0u8..4).prop_map(|(k, top, n)| Event::RuntimeError {
                kind: RuntimeErrorKind::from_u8(k).unwrap(),
                is_top_level: top,
                arg_count: n,
            }),
            (0u8..6, any::<u64>()).prop_map(|(k, d)| Event::RuntimeErrorArg {
                arg_kind: RuntimeErrorArgKind::from_u8(k).unwrap(),
                data: d,
            }),
        ]
    }

    proptest! {
        #[test]
        fn roundtrip_event(event in arb_event(), prev in any::<u8>()) {
            let mut buf = Vec::new();
            encode_event(&mut buf, &event, prev);
            prop_assert_eq!(buf.len(), event.kind().record_size());

            let (got, got_prev) = decode_event(ThreadId(0), &buf, 0).unwrap();
            // Compare bit patterns so NaN floats round-trip.
            prop_assert_eq!(format!("{event:?}"), format!("{got:?}"));
            prop_assert_eq!(prev, got_prev);
        }
    }

    #[test]
    fn unknown_kind_rejected() {
        let buf = [0xEE, 0x00];
        let err = decode_event(ThreadId(1), &buf, 0).unwrap_err();
        assert!(matches!(
            err,
            TraceError::UnknownEventKind {
                thread: ThreadId(1),
                offset: 0,
                tag: 0xEE,
            }
        ));
    }

    #[test]
    fn truncated_payload_rejected() {
        let mut buf = Vec::new();
        encode_event(
            &mut buf,
            &Event::Malloc {
                size: 16,
                process_time: 1,
            },
            0,
        );
        buf.truncate(buf.len() - 1);
        let err = decode_event(ThreadId(0), &buf, 0).unwrap_err();
        assert!(matches!(err, TraceError::TruncatedRecord { .. }));
    }

    #[test]
    fn truncated_header_rejected() {
        let buf = [EventKind::Malloc.as_u8()];
        let err = decode_event(ThreadId(0), &buf, 0).unwrap_err();
        assert!(matches!(err, TraceError::TruncatedRecord { .. }));
    }

    #[test]
    fn byval_event_argument_is_plain_index() {
        // The wire field is a bare u32; Argument is applied at the
        // state layer.
        let ev = Event::ByValRegionAdd {
            argument: Argument(2).0,
            address: 0x3000,
            size: 24,
        };
        let mut buf = Vec::new();
        encode_event(&mut buf, &ev, 9);
        let (got, prev) = decode_event(ThreadId(0), &buf, 0).unwrap();
        assert_eq!(got, ev);
        assert_eq!(prev, 9);
    }
}
