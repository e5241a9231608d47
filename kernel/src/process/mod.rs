// kernel/src/process/mod.rs

use x86_64::VirtAddr;

use crate::memory::pagetable::RootTable;
use crate::process::fd::FdTable;

pub mod elf;
pub mod fd;
pub mod registry;
pub mod scheduler;
pub mod syscall;
pub mod trap;
pub mod tss;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    New,
    Running,
    Sleeping,
    Dead,
}

/// Process Control Block. One of these lives in the registry's fixed
/// `[Option<Process>; MAX_PROCESSES]` slot array per `Pid`.
pub struct Process {
    pub pid: Pid,
    pub parent: Option<Pid>,
    pub state: ProcessState,
    pub page_table: RootTable,
    pub kernel_stack_top: VirtAddr,
    /// Points at this process's saved `TrapFrame` inside its kernel
    /// stack. `0` while the process has never actually been scheduled
    /// (its initial frame is still wherever `registry::spawn` built it).
    pub frame_ptr: u64,
    pub fds: FdTable,
    pub heap_start: u64,
    pub heap_end: u64,
    pub stack_top: u64,
    pub exit_code: i32,
    pub name: [u8; 32],
}

impl Process {
    pub fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        let len = bytes.len().min(self.name.len() - 1);
        self.name[..len].copy_from_slice(&bytes[..len]);
        self.name[len] = 0;
    }
}
