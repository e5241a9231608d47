//! Compile-time tunables collected in one place, the way a production
//! kernel keeps its magic numbers out of the modules that use them.

/// Window of physical memory the frame allocator's bitmap/refcount arrays
/// cover, independent of how much the bootloader actually reports usable.
pub const MAX_FRAMES: usize = 32_768; // 128 MiB at FRAME_SIZE
pub const FRAME_SIZE: usize = 4096;

/// Frames below this index are reserved at boot (kernel image, boot
/// structures, the frame bitmap itself) and never handed out.
pub const RESERVED_FRAMES: usize = 2048; // 8 MiB

/// Fixed slot count for the process registry and per-process FD table.
pub const MAX_PROCESSES: usize = 64;
pub const MAX_FDS_PER_PROCESS: usize = 16;
pub const MAX_FD_SLOTS: usize = MAX_PROCESSES * MAX_FDS_PER_PROCESS;

/// Kernel stack size handed to every process (kernel or user-mode).
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

/// Default heap window carved out for a freshly `exec`'d process.
pub const USER_HEAP_START: u64 = 0x1000_0000;
pub const USER_HEAP_SIZE: u64 = 16 * 1024 * 1024;

/// Top of the initial user stack; grows down from here.
pub const USER_STACK_TOP: u64 = 0x2000_0000;
pub const USER_STACK_SIZE: u64 = 64 * 1024;

/// PIT frequency driving scheduler preemption.
pub const TIMER_HZ: u32 = 100;

/// Double-fault IST slot index (matches the TSS/GDT setup in `process::tss`).
pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;
