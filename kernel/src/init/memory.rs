// kernel/src/init/memory.rs
//
// Physical memory offset -> frame allocator bitmap -> kernel heap
// (buddy + slab). The frame allocator and the kernel heap are
// deliberately separate: frame.rs hands out raw 4 KiB process-address-
// space frames with refcounting for COW, while buddy/slab back
// `Box`/`Vec`/`String` inside the kernel itself.

use bootloader_api::info::{MemoryRegionKind, MemoryRegions};
use x86_64::VirtAddr;

use crate::{allocator, memory, serial_println};

pub fn init_core(phys_mem_offset: VirtAddr, memory_regions: &'static MemoryRegions) {
    serial_println!(
        "Physical memory offset: {:#x} (PML4 entry {})",
        phys_mem_offset.as_u64(),
        phys_mem_offset.as_u64() >> 39
    );

    memory::init(phys_mem_offset);

    let usable_bytes: u64 = memory_regions
        .iter()
        .filter(|r| r.kind == MemoryRegionKind::Usable)
        .map(|r| r.end - r.start)
        .sum();
    memory::frame::init(usable_bytes);
    serial_println!(
        "Frame allocator: {} frames free after reservation",
        memory::frame::frames_free()
    );

    {
        let mut buddy = allocator::buddy_allocator::BUDDY.lock();
        for region in memory_regions.iter() {
            if region.kind == MemoryRegionKind::Usable {
                unsafe {
                    buddy.add_region(region.start, region.end);
                }
            }
        }
    }

    serial_println!("Buddy stats:");
    allocator::buddy_allocator::BUDDY.lock().debug_print_stats();
}

/// Smoke-test the kernel heap (slab + buddy) before anything real uses it.
pub fn test_allocators() {
    {
        use core::alloc::Layout;
        let layout = Layout::from_size_align(8, 8).unwrap();
        let ptr = unsafe { alloc::alloc::alloc(layout) };
        assert!(!ptr.is_null(), "slab allocation failed");
        unsafe {
            *(ptr as *mut u64) = 0xDEAD_BEEF;
            assert_eq!(*(ptr as *const u64), 0xDEAD_BEEF);
            alloc::alloc::dealloc(ptr, layout);
        }
    }
    {
        use alloc::vec::Vec;
        let mut v: Vec<u8> = Vec::new();
        v.push(1);
        v.push(2);
        v.push(3);
        assert_eq!(v.len(), 3);
    }
    serial_println!("Allocator smoke test passed");
    allocator::slab::slab_stats();
}
