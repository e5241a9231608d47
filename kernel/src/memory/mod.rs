// kernel/src/memory/mod.rs

use core::sync::atomic::{AtomicU64, Ordering};
use x86_64::VirtAddr;

pub mod frame;
pub mod pagetable;

static PHYSICAL_MEMORY_OFFSET: AtomicU64 = AtomicU64::new(0);

/// Stash the bootloader's physical-memory offset and hand it to the
/// page table walker, which needs it on every table access.
pub fn init(physical_memory_offset: VirtAddr) {
    PHYSICAL_MEMORY_OFFSET.store(physical_memory_offset.as_u64(), Ordering::Relaxed);
    pagetable::init(physical_memory_offset);
}

pub fn physical_memory_offset() -> VirtAddr {
    VirtAddr::new(PHYSICAL_MEMORY_OFFSET.load(Ordering::Relaxed))
}
