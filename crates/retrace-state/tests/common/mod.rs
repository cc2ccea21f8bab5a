//! Shared fixtures for the state integration suites.

use std::sync::Arc;

use retrace_core::ThreadId;
use retrace_module::{
    CanonicalType, FunctionInfo, InstructionInfo, ModuleIndex, TypeTable,
};
use retrace_state::Session;
use retrace_trace::{TraceBuilder, TraceFile};

/// A module with `function_count` identical functions of 32
/// instructions each, enough for every fixture trace.
pub fn test_module(function_count: usize) -> Arc<ModuleIndex> {
    let mut types = TypeTable::new();
    let int = types.add(CanonicalType::Int {
        width_bits: 32,
        signed: true,
    });
    let functions = (0..function_count)
        .map(|i| FunctionInfo {
            name: format!("f{i}"),
            instructions: (0..32)
                .map(|_| InstructionInfo {
                    result_type: Some(int),
                    ..Default::default()
                })
                .collect(),
            arguments: vec![],
            decl: None,
        })
        .collect();
    Arc::new(ModuleIndex::new(functions, types, vec!["test.c".into()]))
}

/// Open the builder's bytes as a session over `test_module`.
pub fn session_from(builder: &TraceBuilder, function_count: usize) -> Session {
    let bytes = builder.finish();
    let trace = TraceFile::read(&mut bytes.as_slice()).expect("fixture trace must parse");
    Session::new(trace, test_module(function_count))
}

/// A stable textual digest of every observable piece of session
/// state, for bitwise reversibility comparisons.
pub fn digest(session: &Session) -> String {
    use std::fmt::Write as _;

    let token = session.token();
    let process = session.process_state(&token).unwrap();
    let mut out = String::new();

    writeln!(out, "process_time={}", process.process_time()).unwrap();

    for malloc in process.mallocs() {
        writeln!(
            out,
            "malloc {:#x} size={} allocators={:?}",
            malloc.address(),
            malloc.size(),
            malloc.allocators()
        )
        .unwrap();
    }
    for stream in process.streams() {
        writeln!(
            out,
            "stream {:#x} file={:?} mode={:?} written={:?}",
            stream.address(),
            stream.filename(),
            stream.mode(),
            stream.written()
        )
        .unwrap();
    }
    for dir in process.dirs() {
        writeln!(out, "dir {:#x} name={:?}", dir.address(), dir.dirname()).unwrap();
    }
    for (area, perm) in process.known_regions() {
        writeln!(out, "known {area} perm={perm}").unwrap();
    }

    let memory = process.memory();
    writeln!(out, "journal_depth={}", memory.journal_depth()).unwrap();
    for area in memory.allocations() {
        let region = memory.region(area);
        writeln!(
            out,
            "alloc {area} bytes={:?} init={:?}",
            region.byte_values(),
            region.init_bits()
        )
        .unwrap();
    }

    for i in 0..session.thread_count() {
        let thread = session
            .thread_state(&token, ThreadId(i as u32))
            .unwrap();
        writeln!(
            out,
            "thread {i} tt={} view={} next={}",
            thread.thread_time(),
            thread.process_time_view(),
            thread.next_offset()
        )
        .unwrap();
        for (which, frames) in [
            ("frame", thread.call_stack()),
            ("completed", thread.completed_frames()),
        ] {
            for frame in frames {
                writeln!(
                    out,
                    " {which} fn={} active={:?} allocas={:?} byvals={:?} errors={:?}",
                    frame.function(),
                    frame.active(),
                    frame.allocas(),
                    frame.byval_areas(),
                    frame.runtime_errors()
                )
                .unwrap();
                let values: Vec<String> = (0..frame.instruction_count())
                    .map(|n| {
                        format!(
                            "{:?}",
                            frame
                                .value(retrace_core::InstrIndex(n as u32))
                                .unwrap()
                        )
                    })
                    .collect();
                writeln!(out, "  values={values:?}").unwrap();
                let mut targets: Vec<_> = frame.pointer_targets().collect();
                targets.sort_by_key(|(i, _)| *i);
                writeln!(out, "  targets={targets:?}").unwrap();
                let mut arg_targets: Vec<_> = frame.arg_pointer_targets().collect();
                arg_targets.sort_by_key(|(a, _)| *a);
                writeln!(out, "  arg_targets={arg_targets:?}").unwrap();
            }
        }
    }

    out
}
