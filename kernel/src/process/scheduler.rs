//! Round-robin preemptive scheduler.
//!
//! Grounded on the original C `scheduler/preemptive.c`'s `scheduler_tick`:
//! stash the interrupted frame pointer on the outgoing process, advance
//! the cursor round-robin, hand back the incoming process's frame
//! pointer. The only addition SPEC_FULL.md makes over that original is
//! skipping `Dead` slots while scanning and falling back to an
//! always-present idle process (pid 0) if literally everything else is
//! dead — resolved explicitly as an open question rather than left
//! implicit.
//!
//! Deliberately does NOT implement a second, cooperative switching path
//! (the teacher's `Context`/`switch_context`/`user_trampoline` trio):
//! every process, kernel or user, gets a `TrapFrame`-shaped initial
//! stack and is switched purely by this module rewriting/returning
//! frame pointers that the `iretq` at the end of each trap stub
//! consumes. One mechanism, not two.

use crate::config::MAX_PROCESSES;
use crate::process::registry;
use crate::process::{Pid, ProcessState};

pub fn enqueue(pid: Pid) {
    registry::with_table(|table| {
        for slot in table.iter_mut().flatten() {
            if slot.pid == pid {
                slot.state = ProcessState::Running;
            }
        }
    });
}

fn pick_next() -> u64 {
    registry::with_table(|table| {
        let cur = registry::current_slot();
        let start = if cur == usize::MAX { 0 } else { cur };

        for step in 1..=MAX_PROCESSES {
            let idx = (start + step) % MAX_PROCESSES;
            if let Some(p) = &table[idx] {
                if p.state != ProcessState::Dead {
                    registry::set_current_slot(idx);
                    return p.frame_ptr;
                }
            }
        }

        // Nothing else runnable — idle (pid 0) must always exist and
        // never be dead; fall back to whatever is in the current slot.
        table[start]
            .as_ref()
            .map(|p| p.frame_ptr)
            .expect("no runnable process and no idle fallback")
    })
}

/// Called from the timer trap stub with the interrupted process's saved
/// frame pointer. Persists it, advances the cursor, returns the frame
/// to resume into.
pub fn tick(frame_ptr: u64) -> u64 {
    if let Some(pid) = registry::current_pid() {
        registry::set_frame_ptr(pid, frame_ptr);
    }
    pick_next()
}

/// Like `tick`, but for reschedules that don't originate from the timer
/// (a process died via `sys_exit` or a fatal fault) — the dying
/// process's frame pointer is no longer meaningful to save.
pub fn reschedule_from(_stale_frame_ptr: u64) -> u64 {
    pick_next()
}
