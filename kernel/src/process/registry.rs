//! Process registry: a fixed-size process table plus the operations
//! that create, clone, and tear down entries in it.
//!
//! Grounded on the original C `process_manager.c` (`pm_register_process`,
//! `pm_clone_process`, `pm_get_current`/`pm_set_current`) for the shape
//! of the table and the accessors, with `pm_clone_process`'s shallow
//! `page_table` copy replaced by a real `pagetable::clone_cow` per
//! SPEC_FULL.md — the original's shallow copy was an explicitly-noted
//! Phase-1 simplification, not a design this kernel keeps.

use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;
use x86_64::VirtAddr;

use crate::config::{KERNEL_STACK_SIZE, MAX_PROCESSES};
use crate::error::ProcessError;
use crate::memory::pagetable::{self, RootTable};
use crate::process::fd::FdTable;
use crate::process::trap::TrapFrame;
use crate::process::{Pid, Process, ProcessState};

static PROCESSES: Mutex<[Option<Process>; MAX_PROCESSES]> =
    Mutex::new([const { None }; MAX_PROCESSES]);
static NEXT_PID: AtomicUsize = AtomicUsize::new(1);
static CURRENT: AtomicUsize = AtomicUsize::new(usize::MAX);

fn alloc_pid() -> Pid {
    Pid(NEXT_PID.fetch_add(1, Ordering::Relaxed))
}

fn slot_for(table: &[Option<Process>; MAX_PROCESSES], pid: Pid) -> Option<usize> {
    table.iter().position(|p| p.as_ref().map(|p| p.pid) == Some(pid))
}

fn free_slot(table: &[Option<Process>; MAX_PROCESSES]) -> Option<usize> {
    table.iter().position(|p| p.is_none())
}

fn alloc_kernel_stack() -> VirtAddr {
    unsafe {
        let layout = core::alloc::Layout::from_size_align(KERNEL_STACK_SIZE, 16).unwrap();
        let ptr = alloc::alloc::alloc(layout);
        assert!(!ptr.is_null(), "failed to allocate kernel stack");
        VirtAddr::new(ptr as u64 + KERNEL_STACK_SIZE as u64)
    }
}

/// Write a `TrapFrame` at the top of a kernel stack and return the
/// pointer the scheduler should resume into — the stack now looks
/// exactly like one that just took a timer interrupt.
fn push_initial_frame(stack_top: VirtAddr, frame: TrapFrame) -> u64 {
    let frame_addr = stack_top.as_u64() - core::mem::size_of::<TrapFrame>() as u64;
    unsafe {
        core::ptr::write(frame_addr as *mut TrapFrame, frame);
    }
    frame_addr
}

/// Register the very first process: the idle/init task, running in
/// kernel mode over the kernel's own (pre-existing) root page table.
pub fn spawn_kernel(entry_point: u64, name: &str) -> Result<Pid, ProcessError> {
    let pid = alloc_pid();
    let stack_top = alloc_kernel_stack();
    let frame = TrapFrame::new_kernel(entry_point, stack_top.as_u64());
    let frame_ptr = push_initial_frame(stack_top, frame);

    let process = Process {
        pid,
        parent: None,
        state: ProcessState::New,
        page_table: RootTable::current(),
        kernel_stack_top: stack_top,
        frame_ptr,
        fds: FdTable::with_stdio().map_err(|_| ProcessError::TableFull)?,
        heap_start: 0,
        heap_end: 0,
        stack_top: stack_top.as_u64(),
        exit_code: 0,
        name: [0; 32],
    };
    insert(process, name)
}

/// Load `elf_data` into a brand new, COW-cloned address space and
/// register the resulting process as a child of `parent` (or a root
/// process if `parent` is `None`).
pub fn spawn_from_elf(
    elf_data: &[u8],
    parent: Option<Pid>,
    name: &str,
) -> Result<Pid, ProcessError> {
    let kernel_root = RootTable::current();
    let root = pagetable::clone_cow(kernel_root)?;

    let image = crate::process::elf::load(elf_data, root)?;

    let stack_pages = crate::config::USER_STACK_SIZE / 4096;
    pagetable::map_range(
        root,
        x86_64::VirtAddr::new(image.stack_top - crate::config::USER_STACK_SIZE),
        stack_pages,
        x86_64::structures::paging::PageTableFlags::PRESENT
            | x86_64::structures::paging::PageTableFlags::WRITABLE
            | x86_64::structures::paging::PageTableFlags::USER_ACCESSIBLE,
    )?;
    pagetable::mark_user_recursive(
        root,
        x86_64::VirtAddr::new(image.stack_top - 4096),
    );

    let pid = alloc_pid();
    let kernel_stack_top = alloc_kernel_stack();
    let (user_cs, user_ss) = crate::process::tss::get_user_selectors();
    let frame = TrapFrame::new_user(
        image.entry_point,
        image.stack_top - 16,
        user_cs.0 as u64,
        user_ss.0 as u64,
    );
    let frame_ptr = push_initial_frame(kernel_stack_top, frame);

    let process = Process {
        pid,
        parent,
        state: ProcessState::New,
        page_table: root,
        kernel_stack_top,
        frame_ptr,
        fds: FdTable::with_stdio().map_err(|_| ProcessError::TableFull)?,
        heap_start: image.heap_start,
        heap_end: image.heap_end,
        stack_top: image.stack_top,
        exit_code: 0,
        name: [0; 32],
    };
    insert(process, name)
}

fn insert(mut process: Process, name: &str) -> Result<Pid, ProcessError> {
    process.set_name(name);
    let pid = process.pid;
    let mut table = PROCESSES.lock();
    let slot = free_slot(&table).ok_or(ProcessError::TableFull)?;
    table[slot] = Some(process);
    if CURRENT.load(Ordering::Relaxed) == usize::MAX {
        CURRENT.store(slot, Ordering::Relaxed);
    }
    crate::process::scheduler::enqueue(pid);
    Ok(pid)
}

/// Duplicate the currently-running process: new pid, COW-shared page
/// table, forked fd table, and a trapframe that is a byte-for-byte copy
/// of the parent's except `rax = 0` (the child's `fork` return value).
pub fn fork_current() -> Result<Pid, ProcessError> {
    let mut table = PROCESSES.lock();
    let cur = CURRENT.load(Ordering::Relaxed);
    let parent = table[cur].as_ref().ok_or(ProcessError::NoSuchProcess)?;

    let child_root = pagetable::clone_cow(parent.page_table)?;
    let child_fds = parent.fds.fork().map_err(|_| ProcessError::TableFull)?;
    let parent_pid = parent.pid;
    let parent_frame = unsafe { *(parent.frame_ptr as *const TrapFrame) };
    let heap_start = parent.heap_start;
    let heap_end = parent.heap_end;
    let stack_top = parent.stack_top;

    drop(table);

    let pid = alloc_pid();
    let kernel_stack_top = alloc_kernel_stack();
    let mut child_frame = parent_frame;
    child_frame.rax = 0;
    let frame_ptr = push_initial_frame(kernel_stack_top, child_frame);

    let process = Process {
        pid,
        parent: Some(parent_pid),
        state: ProcessState::New,
        page_table: child_root,
        kernel_stack_top,
        frame_ptr,
        fds: child_fds,
        heap_start,
        heap_end,
        stack_top,
        exit_code: 0,
        name: [0; 32],
    };
    insert(process, "")
}

pub fn current_pid() -> Option<Pid> {
    let table = PROCESSES.lock();
    table[CURRENT.load(Ordering::Relaxed)].as_ref().map(|p| p.pid)
}

pub fn current_page_table() -> Option<RootTable> {
    let table = PROCESSES.lock();
    table[CURRENT.load(Ordering::Relaxed)].as_ref().map(|p| p.page_table)
}

pub fn current_kernel_stack_top() -> u64 {
    let table = PROCESSES.lock();
    table[CURRENT.load(Ordering::Relaxed)]
        .as_ref()
        .map(|p| p.kernel_stack_top.as_u64())
        .unwrap_or(0)
}

pub fn current_is_dead() -> bool {
    let table = PROCESSES.lock();
    table[CURRENT.load(Ordering::Relaxed)]
        .as_ref()
        .map(|p| p.state == ProcessState::Dead)
        .unwrap_or(true)
}

/// Mark the current process dead, record its exit code, and release its
/// file descriptors. Returns its (now stale) frame pointer — the caller
/// is expected to immediately reschedule away from it.
pub fn kill_current(exit_code: i32) -> u64 {
    let mut table = PROCESSES.lock();
    let cur = CURRENT.load(Ordering::Relaxed);
    if let Some(p) = table[cur].as_mut() {
        p.state = ProcessState::Dead;
        p.exit_code = exit_code;
        p.fds.close_all();
        return p.frame_ptr;
    }
    0
}

/// Called by `wait`: if `child` belongs to `parent` and has exited,
/// reap its slot and return its exit code.
pub fn reap_child(parent: Pid, child: Pid) -> Result<i32, ProcessError> {
    let mut table = PROCESSES.lock();
    let idx = slot_for(&table, child).ok_or(ProcessError::NoSuchProcess)?;
    let proc = table[idx].as_ref().unwrap();
    if proc.parent != Some(parent) {
        return Err(ProcessError::NotAChild);
    }
    if proc.state != ProcessState::Dead {
        return Err(ProcessError::NoSuchProcess);
    }
    let code = proc.exit_code;
    table[idx] = None;
    Ok(code)
}

pub fn current_slot() -> usize {
    CURRENT.load(Ordering::Relaxed)
}

pub fn set_current_slot(slot: usize) {
    CURRENT.store(slot, Ordering::Relaxed);
}

pub fn with_table<R>(f: impl FnOnce(&mut [Option<Process>; MAX_PROCESSES]) -> R) -> R {
    let mut table = PROCESSES.lock();
    f(&mut table)
}

pub fn find_frame_ptr(pid: Pid) -> Option<u64> {
    let table = PROCESSES.lock();
    slot_for(&table, pid).and_then(|i| table[i].as_ref()).map(|p| p.frame_ptr)
}

pub fn set_frame_ptr(pid: Pid, frame_ptr: u64) {
    let mut table = PROCESSES.lock();
    if let Some(idx) = slot_for(&table, pid) {
        if let Some(p) = table[idx].as_mut() {
            p.frame_ptr = frame_ptr;
        }
    }
}
