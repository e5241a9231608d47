//! 4-level x86-64 page table walker and copy-on-write process clone.
//!
//! Grounded on the original C `mm/pagetable.c` (`pt_clone_for_cow`,
//! `pt_mark_user_recursive`) for the COW semantics, and on the teacher's
//! `memory/page_table_manager.rs` for the idiom of hand-rolling frame
//! allocation/zeroing/mapping around the `x86_64` crate's `PageTable`
//! type rather than going through `x86_64::structures::paging::Mapper`
//! end to end (we need per-entry control the `Mapper` trait doesn't
//! expose: independent refcounting and selective write-protection of
//! leaf entries during clone).
//!
//! PML4 entries below `KERNEL_PML4_INDEX` are "user" entries: deep-copied
//! (new PDPT/PD/PT frames) on clone, with leaf data frames shared via
//! refcount and write-protected for COW. Entries at or above
//! `KERNEL_PML4_INDEX` are the kernel's own mappings: shared by pointer,
//! never copied, never write-protected — they're identical, global,
//! and outlive every process.

use x86_64::structures::paging::{PageTable, PageTableFlags as Flags};
use x86_64::{PhysAddr, VirtAddr};

use crate::error::PageTableError;
use crate::memory::frame::{self, FrameAddr};

/// First PML4 index considered kernel space; keeps clone_cow from ever
/// deep-copying (or write-protecting) the kernel's own mappings.
pub const KERNEL_PML4_INDEX: usize = 256;

static mut PHYS_OFFSET: u64 = 0;

/// Must run once, before any of the functions below, with the offset at
/// which the bootloader identity-mapped all of physical memory.
pub fn init(physical_memory_offset: VirtAddr) {
    unsafe {
        PHYS_OFFSET = physical_memory_offset.as_u64();
    }
}

fn phys_offset() -> u64 {
    unsafe { PHYS_OFFSET }
}

fn table_ptr(frame: FrameAddr) -> *mut PageTable {
    (phys_offset() + frame.0) as *mut PageTable
}

unsafe fn table_mut<'a>(frame: FrameAddr) -> &'a mut PageTable {
    &mut *table_ptr(frame)
}

unsafe fn table_ref<'a>(frame: FrameAddr) -> &'a PageTable {
    &*table_ptr(frame)
}

fn alloc_table() -> Result<FrameAddr, PageTableError> {
    let frame = frame::alloc_frame()?;
    unsafe {
        table_mut(frame).zero();
    }
    Ok(frame)
}

/// A process's root page table (PML4), owning exactly the frames it was
/// built with — `RootTable::drop` is deliberately not implemented;
/// tearing down an address space is the Process Registry's job (it
/// knows which frames are shared with a parent and which aren't).
#[derive(Debug, Clone, Copy)]
pub struct RootTable {
    pub frame: FrameAddr,
}

impl RootTable {
    /// Wrap the currently active PML4 (read from CR3) as a `RootTable`.
    /// Used once at boot, before any process exists, to seed the kernel
    /// root that every process's clone_cow eventually descends from.
    pub fn current() -> Self {
        use x86_64::registers::control::Cr3;
        let (frame, _) = Cr3::read();
        RootTable {
            frame: FrameAddr(frame.start_address().as_u64()),
        }
    }

    pub unsafe fn activate(self) {
        use x86_64::registers::control::{Cr3, Cr3Flags};
        use x86_64::structures::paging::PhysFrame;
        let (current, flags) = Cr3::read();
        if current.start_address().as_u64() != self.frame.0 {
            let frame = PhysFrame::containing_address(PhysAddr::new(self.frame.0));
            Cr3::write(frame, flags);
        }
    }
}

fn is_kernel_index(i: usize) -> bool {
    i >= KERNEL_PML4_INDEX
}

/// Deep-copy a user PML4 entry's subtree (PDPT/PD/PT), sharing leaf data
/// frames via refcount and clearing the writable bit on the leaf entry
/// in *both* copies so the next write to either faults into `handle_cow`.
///
/// Large pages (2 MiB/1 GiB) are never COW'd: both copies keep sharing
/// the same writable mapping, a documented limitation (see SPEC_FULL.md).
fn clone_subtree(level: usize, src_frame: FrameAddr) -> Result<FrameAddr, PageTableError> {
    let dst_frame = alloc_table()?;
    let src = unsafe { table_ref(src_frame) };
    let dst = unsafe { table_mut(dst_frame) };

    for i in 0..512 {
        let entry = &src[i];
        if entry.is_unused() {
            continue;
        }
        let flags = entry.flags();
        let child_phys = FrameAddr(entry.addr().as_u64());

        if level == 1 {
            // PT level: entry.addr() is a leaf data frame.
            if flags.contains(Flags::HUGE_PAGE) {
                dst[i].set_addr(entry.addr(), flags);
                continue;
            }
            frame::incref(child_phys).map_err(PageTableError::from)?;
            let ro_flags = flags & !Flags::WRITABLE;
            dst[i].set_addr(entry.addr(), ro_flags);
            unsafe {
                table_mut(src_frame)[i].set_addr(entry.addr(), ro_flags);
            }
        } else if flags.contains(Flags::HUGE_PAGE) {
            // 2 MiB page at PD level: shared, writable, not COW'd.
            dst[i].set_addr(entry.addr(), flags);
        } else {
            let child = clone_subtree(level - 1, child_phys)?;
            dst[i].set_addr(PhysAddr::new(child.0), flags);
        }
    }

    Ok(dst_frame)
}

/// Build a fresh root page table for a child process: kernel entries
/// shared by pointer, user entries deep-copied with COW semantics.
pub fn clone_cow(parent_root: RootTable) -> Result<RootTable, PageTableError> {
    let child_frame = alloc_table()?;
    let parent = unsafe { table_ref(parent_root.frame) };
    let child = unsafe { table_mut(child_frame) };

    for i in 0..512 {
        let entry = &parent[i];
        if entry.is_unused() {
            continue;
        }
        if is_kernel_index(i) {
            child[i].set_addr(entry.addr(), entry.flags());
            continue;
        }
        let src_pdpt = FrameAddr(entry.addr().as_u64());
        let dst_pdpt = clone_subtree(3, src_pdpt)?;
        child[i].set_addr(PhysAddr::new(dst_pdpt.0), entry.flags());
    }

    Ok(RootTable { frame: child_frame })
}

/// Walk down to the leaf PTE for `vaddr`, creating intermediate tables
/// (but not the leaf mapping) as needed. Returns `None` if nothing maps
/// this address at all (vs. mapped-but-read-only).
fn walk_to_pte<'a>(
    root: RootTable,
    vaddr: VirtAddr,
    create: bool,
) -> Result<Option<&'a mut x86_64::structures::paging::PageTableEntry>, PageTableError> {
    let indices = [
        vaddr.p4_index(),
        vaddr.p3_index(),
        vaddr.p2_index(),
        vaddr.p1_index(),
    ];

    let mut frame = root.frame;
    for (level, &idx) in indices.iter().enumerate() {
        let table = unsafe { table_mut(frame) };
        let idx = usize::from(idx);
        if level == 3 {
            return Ok(Some(unsafe { &mut *(&mut table[idx] as *mut _) }));
        }
        if table[idx].is_unused() {
            if !create {
                return Ok(None);
            }
            let new_frame = alloc_table()?;
            table[idx].set_addr(
                PhysAddr::new(new_frame.0),
                Flags::PRESENT | Flags::WRITABLE | Flags::USER_ACCESSIBLE,
            );
            frame = new_frame;
        } else {
            frame = FrameAddr(table[idx].addr().as_u64());
        }
    }
    unreachable!()
}

/// Map `num_pages` consecutive pages starting at `vaddr`, allocating a
/// fresh frame for each. On failure, walks back the pages already
/// mapped by this call and releases their frames/intermediate tables.
pub fn map_range(
    root: RootTable,
    vaddr: VirtAddr,
    num_pages: u64,
    flags: Flags,
) -> Result<(), PageTableError> {
    let mut mapped = alloc::vec::Vec::new();
    for i in 0..num_pages {
        let page_addr = vaddr + i * 4096u64;
        match (|| -> Result<(), PageTableError> {
            let frame = frame::alloc_frame().map_err(PageTableError::from)?;
            let entry = walk_to_pte(root, page_addr, true)?
                .ok_or(PageTableError::NotMapped)?;
            if !entry.is_unused() {
                let _ = frame::free_frame(frame);
                return Err(PageTableError::AlreadyMapped);
            }
            entry.set_addr(PhysAddr::new(frame.0), flags | Flags::PRESENT);
            mapped.push((page_addr, frame));
            Ok(())
        })() {
            Ok(()) => {}
            Err(e) => {
                for (addr, frame) in mapped {
                    if let Ok(Some(entry)) = walk_to_pte(root, addr, false) {
                        entry.set_unused();
                    }
                    let _ = frame::free_frame(frame);
                }
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Recursively mark every present entry along `vaddr`'s path as
/// user-accessible. Grounded on `pt_mark_user_recursive` in the
/// original C, used once per freshly-loaded ELF segment/stack.
pub fn mark_user_recursive(root: RootTable, vaddr: VirtAddr) {
    let indices = [
        vaddr.p4_index(),
        vaddr.p3_index(),
        vaddr.p2_index(),
        vaddr.p1_index(),
    ];
    let mut frame = root.frame;
    for &idx in indices.iter() {
        let table = unsafe { table_mut(frame) };
        let idx = usize::from(idx);
        if table[idx].is_unused() {
            return;
        }
        let flags = table[idx].flags() | Flags::USER_ACCESSIBLE;
        let addr = table[idx].addr();
        table[idx].set_addr(addr, flags);
        frame = FrameAddr(addr.as_u64());
    }
}

/// Resolve a virtual address to its mapped physical frame, if any.
pub fn translate(root: RootTable, vaddr: VirtAddr) -> Option<PhysAddr> {
    match walk_to_pte(root, vaddr, false) {
        Ok(Some(entry)) if !entry.is_unused() => Some(entry.addr()),
        _ => None,
    }
}

/// Copy-on-write fault handler: a write hit a read-only, refcounted
/// leaf page. If the frame is still shared, allocate a private copy and
/// repoint this process's PTE at it; if it's already exclusively owned
/// (refcount == 1), just flip the writable bit back on.
pub fn handle_cow(root: RootTable, vaddr: VirtAddr) -> Result<(), PageTableError> {
    let entry = walk_to_pte(root, vaddr, false)?.ok_or(PageTableError::NotMapped)?;
    if entry.is_unused() {
        return Err(PageTableError::NotMapped);
    }
    let old_frame = FrameAddr(entry.addr().as_u64());
    let flags = entry.flags();

    let count = frame::refcount(old_frame).map_err(PageTableError::from)?;
    if count <= 1 {
        entry.set_addr(entry.addr(), flags | Flags::WRITABLE);
        return Ok(());
    }

    let new_frame = frame::alloc_frame().map_err(PageTableError::from)?;
    unsafe {
        let src = (phys_offset() + old_frame.0) as *const u8;
        let dst = (phys_offset() + new_frame.0) as *mut u8;
        core::ptr::copy_nonoverlapping(src, dst, 4096);
    }
    frame::decref(old_frame).map_err(PageTableError::from)?;
    entry.set_addr(PhysAddr::new(new_frame.0), flags | Flags::WRITABLE);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn kernel_index_boundary() {
        assert!(is_kernel_index(KERNEL_PML4_INDEX));
        assert!(!is_kernel_index(KERNEL_PML4_INDEX - 1));
    }
}
