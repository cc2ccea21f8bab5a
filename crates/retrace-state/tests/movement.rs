//! Higher-level movement: time targets, predicates, atomicity,
//! poisoning, and cross-thread ordering.

mod common;

use common::{digest, session_from};

use retrace_core::event::Event;
use retrace_core::{FunctionIndex, InstrIndex, MemoryArea, ThreadId};
use retrace_state::StateError;
use retrace_trace::TraceBuilder;

/// One thread whose shared-state events stamp process times 1, 2, 5, 8.
fn gapped_stamp_trace() -> TraceBuilder {
    let mut b = TraceBuilder::new();
    let t = b.add_thread();
    b.function_start(t, FunctionIndex(0), 1);
    b.push(
        t,
        Event::InstructionWithPtr {
            index: InstrIndex(0),
            value: 0x1000,
            object: 0x1000,
        },
    );
    b.push(
        t,
        Event::Malloc {
            size: 32,
            process_time: 1,
        },
    );
    for (i, stamp) in [(0u64, 2u64), (8, 5), (16, 8)] {
        b.push(
            t,
            Event::StateUntypedSmall {
                size: 8,
                address: 0x1000 + i,
                data: 0x1111_2222_3333_4444,
                process_time: stamp,
            },
        );
    }
    b
}

#[test]
fn spec_move_to_unreachable_process_time_stops_below() {
    let mut session = session_from(&gapped_stamp_trace(), 1);

    // Stamps are {1, 2, 5, 8}; 4 is unreachable, 2 is the closest
    // reachable time below it.
    assert!(session.move_to_process_time(4).unwrap());
    {
        let token = session.token();
        assert_eq!(session.process_state(&token).unwrap().process_time(), 2);
    }

    // One forward process step crosses the next stamp.
    assert!(session.move_forward().unwrap());
    {
        let token = session.token();
        assert_eq!(session.process_state(&token).unwrap().process_time(), 5);
    }

    // Moving to the time already held reports no movement.
    assert!(!session.move_to_process_time(5).unwrap());
}

#[test]
fn move_to_process_time_backward() {
    let mut session = session_from(&gapped_stamp_trace(), 1);
    assert!(session.move_to_process_time(8).unwrap());

    assert!(session.move_to_process_time(2).unwrap());
    {
        let token = session.token();
        assert_eq!(session.process_state(&token).unwrap().process_time(), 2);
    }

    // And a backward process step retracts the current stamp.
    assert!(session.move_backward().unwrap());
    {
        let token = session.token();
        assert_eq!(session.process_state(&token).unwrap().process_time(), 1);
    }
}

#[test]
fn backward_movement_lands_on_the_prior_stamp_across_a_gap() {
    let mut session = session_from(&gapped_stamp_trace(), 1);
    assert!(session.move_to_process_time(8).unwrap());

    // Stamps are {1, 2, 5, 8}: moving back to 4 retracts 8 and 5, and
    // the clock must land on the true prior stamp 2 — not on "one
    // below the last retracted stamp", which would be 4 and would
    // drag the movement one stamp too far.
    assert!(session.move_to_process_time(4).unwrap());
    {
        let token = session.token();
        assert_eq!(session.process_state(&token).unwrap().process_time(), 2);
    }

    // Stepping forward again crosses the stamp the move stopped at.
    assert!(session.move_forward().unwrap());
    {
        let token = session.token();
        assert_eq!(session.process_state(&token).unwrap().process_time(), 5);
    }
}

#[test]
fn move_to_thread_time_forward_and_back() {
    let mut session = session_from(&gapped_stamp_trace(), 1);
    let t = ThreadId(0);

    assert!(session.move_to_thread_time(t, 2).unwrap());
    {
        let token = session.token();
        assert_eq!(session.thread_state(&token, t).unwrap().thread_time(), 2);
    }

    assert!(session.move_to_thread_time(t, 1).unwrap());
    {
        let token = session.token();
        assert_eq!(session.thread_state(&token, t).unwrap().thread_time(), 1);
    }
}

#[test]
fn advance_until_is_atomic_on_failure() {
    let mut session = session_from(&gapped_stamp_trace(), 1);
    let t = ThreadId(0);

    assert!(session.advance(t).unwrap());
    let before = digest(&session);
    let token_before = session.token();

    // Never satisfiable: the log runs out first, and every step taken
    // must be undone.
    let moved = session
        .advance_until(t, |process, _| process.process_time() > 100)
        .unwrap();
    assert!(!moved);
    assert_eq!(digest(&session), before);
    // The failed call moved nothing, so the view is still current.
    assert!(token_before.is_valid());

    // A satisfiable predicate moves and reports it.
    let moved = session
        .advance_until(t, |process, _| process.process_time() >= 5)
        .unwrap();
    assert!(moved);
    assert!(!token_before.is_valid());
}

#[test]
fn retract_until_is_atomic_on_failure() {
    let mut session = session_from(&gapped_stamp_trace(), 1);
    let t = ThreadId(0);
    while session.advance(t).unwrap() {}
    let before = digest(&session);

    let moved = session
        .retract_until(t, |_, thread| thread.thread_time() > 100)
        .unwrap();
    assert!(!moved);
    assert_eq!(digest(&session), before);

    let moved = session
        .retract_until(t, |_, thread| thread.thread_time() == 0)
        .unwrap();
    assert!(moved);
    {
        let token = session.token();
        assert_eq!(session.thread_state(&token, t).unwrap().thread_time(), 0);
    }
}

#[test]
fn process_predicate_movers_step_by_stamp() {
    let mut session = session_from(&gapped_stamp_trace(), 1);

    let moved = session
        .move_forward_until(|process| process.process_time() >= 5)
        .unwrap();
    assert!(moved);
    {
        let token = session.token();
        assert_eq!(session.process_state(&token).unwrap().process_time(), 5);
    }

    let moved = session
        .move_backward_until(|process| process.process_time() <= 1)
        .unwrap();
    assert!(moved);
    {
        let token = session.token();
        assert_eq!(session.process_state(&token).unwrap().process_time(), 1);
    }

    // Unsatisfiable backward predicate: rolls back to where it began.
    let before = digest(&session);
    let moved = session
        .move_backward_until(|process| process.process_time() > 100)
        .unwrap();
    assert!(!moved);
    assert_eq!(digest(&session), before);
}

#[test]
fn movement_invalidates_outstanding_tokens() {
    let mut session = session_from(&gapped_stamp_trace(), 1);
    let t = ThreadId(0);

    let token = session.token();
    assert!(session.process_state(&token).is_ok());

    assert!(session.advance(t).unwrap());
    assert!(matches!(
        session.process_state(&token),
        Err(StateError::StaleToken)
    ));
    assert!(matches!(
        session.thread_state(&token, t),
        Err(StateError::StaleToken)
    ));

    // The fresh token sees the new view.
    let token = session.token();
    assert!(session.process_state(&token).is_ok());
    assert!(token.generation() > 0);
}

#[test]
fn corrupt_free_poisons_the_session() {
    let mut b = TraceBuilder::new();
    let t = b.add_thread();
    b.function_start(t, FunctionIndex(0), 1);
    // Free of an address that was never allocated.
    b.push(
        t,
        Event::Free {
            address: 0xDEAD,
            process_time: 1,
        },
    );
    let mut session = session_from(&b, 1);
    let tid = ThreadId(0);

    assert!(session.advance(tid).unwrap());
    let err = session.advance(tid).unwrap_err();
    assert!(matches!(err, StateError::UnknownMalloc { address: 0xDEAD }));
    assert!(session.is_poisoned());

    // Every later movement call refuses.
    assert!(matches!(session.advance(tid), Err(StateError::Poisoned)));
    assert!(matches!(session.retract(tid), Err(StateError::Poisoned)));
    assert!(matches!(
        session.move_to_process_time(0),
        Err(StateError::Poisoned)
    ));
}

#[test]
fn spec_multithreaded_free_resolves_by_reference() {
    let mut b = TraceBuilder::new();
    let t1 = b.add_thread();
    let t2 = b.add_thread();

    b.function_start(t1, FunctionIndex(0), 1);
    b.push(
        t1,
        Event::InstructionWithPtr {
            index: InstrIndex(0),
            value: 0x4000,
            object: 0x4000,
        },
    );
    b.push(
        t1,
        Event::Malloc {
            size: 64,
            process_time: 3,
        },
    );

    b.function_start(t2, FunctionIndex(1), 1);
    b.push(
        t2,
        Event::Free {
            address: 0x4000,
            process_time: 7,
        },
    );
    // T1 later observes the time T2 advanced.
    b.push(t1, Event::NewProcessTime { process_time: 7 });

    let mut session = session_from(&b, 2);

    // Apply T1 through its Malloc (three events), then all of T2.
    for _ in 0..3 {
        assert!(session.advance(t1).unwrap());
    }
    {
        let token = session.token();
        assert_eq!(session.process_state(&token).unwrap().process_time(), 3);
        assert_eq!(
            session.thread_state(&token, t1).unwrap().process_time_view(),
            3
        );
    }
    while session.advance(t2).unwrap() {}

    {
        let token = session.token();
        let process = session.process_state(&token).unwrap();
        assert_eq!(process.mallocs().count(), 0);
        assert!(!process.memory().is_allocated(MemoryArea::new(0x4000, 64)));
        assert_eq!(process.process_time(), 7);
        // The freeing thread observed the new time; the allocating
        // thread's view is unchanged.
        assert_eq!(
            session.thread_state(&token, t2).unwrap().process_time_view(),
            7
        );
        assert_eq!(
            session.thread_state(&token, t1).unwrap().process_time_view(),
            3
        );
    }

    // T1 catches up by observing the new process time, and retracting
    // that observation restores its previous view.
    assert!(session.advance(t1).unwrap());
    {
        let token = session.token();
        assert_eq!(
            session.thread_state(&token, t1).unwrap().process_time_view(),
            7
        );
    }
    assert!(session.retract(t1).unwrap());
    {
        let token = session.token();
        assert_eq!(
            session.thread_state(&token, t1).unwrap().process_time_view(),
            3
        );
    }

    // Retract the cross-thread free: the allocation and its registry
    // entry come back, and the shared clock falls back to the largest
    // stamp still applied (T1's malloc).
    assert!(session.retract(t2).unwrap());
    {
        let token = session.token();
        let process = session.process_state(&token).unwrap();
        assert_eq!(process.malloc_at(0x4000).unwrap().size(), 64);
        assert!(process.memory().is_allocated(MemoryArea::new(0x4000, 64)));
        assert_eq!(process.process_time(), 3);
        assert_eq!(
            session.thread_state(&token, t2).unwrap().process_time_view(),
            0
        );
    }
}

#[test]
fn move_to_thread_time_backward_does_not_cross_a_jump() {
    // Entry and exit times recorded by the tracer need not be
    // contiguous with the surrounding events, so a single retraction
    // can move the thread clock down by more than one. Moving backward
    // to a target inside such a jump must stop on the near side rather
    // than retract through it.
    let mut b = TraceBuilder::new();
    let t = b.add_thread();
    b.function_start(t, FunctionIndex(0), 1);
    b.function_start(t, FunctionIndex(1), 2);
    b.function_end(t, 8);
    b.push(t, Event::NewThreadTime);

    let mut session = session_from(&b, 2);
    let tid = ThreadId(0);
    while session.advance(tid).unwrap() {}
    {
        let token = session.token();
        assert_eq!(session.thread_state(&token, tid).unwrap().thread_time(), 9);
    }

    // Retracting NewThreadTime reaches 8 and retracting the
    // FunctionEnd reaches 7; retracting the inner FunctionStart would
    // jump to 1, crossing the target, so that step is undone.
    assert!(session.move_to_thread_time(tid, 5).unwrap());
    {
        let token = session.token();
        let thread = session.thread_state(&token, tid).unwrap();
        assert_eq!(thread.call_stack().len(), 2);
        assert_eq!(thread.thread_time(), 2);
    }
}

/// Two threads whose heap events interleave by stamp: T0 stamps 1 and
/// 5, T1 stamps 3 and 9.
fn two_thread_stamp_trace() -> TraceBuilder {
    let mut b = TraceBuilder::new();
    let t0 = b.add_thread();
    let t1 = b.add_thread();

    b.function_start(t0, FunctionIndex(0), 1);
    b.function_start(t1, FunctionIndex(1), 1);
    for (thread, addr, stamp) in [
        (t0, 0x1000u64, 1u64),
        (t1, 0x2000, 3),
        (t0, 0x1008, 5),
        (t1, 0x2008, 9),
    ] {
        b.push(
            thread,
            Event::InstructionWithPtr {
                index: InstrIndex(0),
                value: addr,
                object: addr,
            },
        );
        b.push(
            thread,
            Event::Malloc {
                size: 8,
                process_time: stamp,
            },
        );
    }
    b
}

#[test]
fn cross_thread_time_targets_pick_stamp_order() {
    // Forward movement to 6 must apply stamps 1, 3, 5 and stop
    // before 9.
    let mut session = session_from(&two_thread_stamp_trace(), 2);
    assert!(session.move_to_process_time(6).unwrap());
    {
        let token = session.token();
        let process = session.process_state(&token).unwrap();
        assert_eq!(process.process_time(), 5);
        assert_eq!(process.mallocs().count(), 3);
        assert!(process.malloc_at(0x2008).is_none());
    }

    // Backward below 3 must retract stamps 5 then 3, in that order,
    // landing the clock on the remaining stamp 1.
    assert!(session.move_to_process_time(2).unwrap());
    {
        let token = session.token();
        let process = session.process_state(&token).unwrap();
        assert_eq!(process.process_time(), 1);
        assert_eq!(process.mallocs().count(), 1);
        assert!(process.malloc_at(0x1000).is_some());
    }
}

#[test]
fn backward_steps_restore_the_cross_thread_clock() {
    // The shared clock after a retraction is the maximum stamp still
    // applied across *all* threads: retracting T0's stamp-5 event must
    // fall back to T1's stamp 3, which T0's own log never saw.
    let mut session = session_from(&two_thread_stamp_trace(), 2);
    assert!(session.move_to_process_time(6).unwrap());

    assert!(session.move_backward().unwrap());
    {
        let token = session.token();
        assert_eq!(session.process_state(&token).unwrap().process_time(), 3);
    }

    assert!(session.move_backward().unwrap());
    {
        let token = session.token();
        assert_eq!(session.process_state(&token).unwrap().process_time(), 1);
    }

    assert!(session.move_backward().unwrap());
    {
        let token = session.token();
        assert_eq!(session.process_state(&token).unwrap().process_time(), 0);
    }

    // Only unstamped records remain; there is no process step left.
    assert!(!session.move_backward().unwrap());
}
