//! Minimal ELF64 loader: validates a binary, maps its PT_LOAD segments
//! into a process's address space, and hands back an entry point.
//!
//! Grounded on the original C `elf_loader.c` — `elf_validate`'s checks
//! (magic, 64-bit, little-endian, ET_EXEC/ET_DYN) and `elf_load`'s
//! "no partial load" rule (a segment's file data must fit entirely
//! inside the binary or the whole load is rejected) are carried over
//! unchanged; only the per-check error now returns a distinct
//! `ElfError` variant instead of a `serial_puts` call, the way
//! `memory::paging`'s old `MapError`/`UnmapError` collapse typed
//! failures instead of just logging them.

use x86_64::structures::paging::PageTableFlags as Flags;
use x86_64::VirtAddr;

use crate::error::ElfError;
use crate::memory::pagetable::{self, RootTable};

const EI_MAG0: u8 = 0x7f;
const EI_MAG1: u8 = b'E';
const EI_MAG2: u8 = b'L';
const EI_MAG3: u8 = b'F';
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const ET_DYN: u16 = 3;
const PT_LOAD: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy)]
struct Elf64Header {
    e_ident: [u8; 16],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u64,
    e_phoff: u64,
    e_shoff: u64,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Elf64ProgramHeader {
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_paddr: u64,
    p_filesz: u64,
    p_memsz: u64,
    p_align: u64,
}

/// The result of a successful load: where execution should begin, and
/// the default heap/stack windows a freshly-`exec`'d process gets.
pub struct LoadedImage {
    pub entry_point: u64,
    pub heap_start: u64,
    pub heap_end: u64,
    pub stack_top: u64,
}

fn header_at(data: &[u8]) -> Result<&Elf64Header, ElfError> {
    if data.len() < core::mem::size_of::<Elf64Header>() {
        return Err(ElfError::TooShort);
    }
    Ok(unsafe { &*(data.as_ptr() as *const Elf64Header) })
}

fn validate(hdr: &Elf64Header) -> Result<(), ElfError> {
    if hdr.e_ident[0] != EI_MAG0
        || hdr.e_ident[1] != EI_MAG1
        || hdr.e_ident[2] != EI_MAG2
        || hdr.e_ident[3] != EI_MAG3
    {
        return Err(ElfError::BadMagic);
    }
    if hdr.e_ident[4] != ELFCLASS64 {
        return Err(ElfError::Not64Bit);
    }
    if hdr.e_ident[5] != ELFDATA2LSB {
        return Err(ElfError::NotLittleEndian);
    }
    if hdr.e_type != ET_EXEC && hdr.e_type != ET_DYN {
        return Err(ElfError::UnsupportedType);
    }
    Ok(())
}

/// Load every `PT_LOAD` segment of `data` into `root`'s address space,
/// zeroing the BSS tail (`p_memsz > p_filesz`) of each. Rejects the
/// whole image if any segment's file-backed range would overrun the
/// binary — no partial load, matching the original C.
pub fn load(data: &[u8], root: RootTable) -> Result<LoadedImage, ElfError> {
    let hdr = *header_at(data)?;
    validate(&hdr)?;

    let ph_off = hdr.e_phoff as usize;
    let ph_count = hdr.e_phnum as usize;
    let ph_size = hdr.e_phentsize as usize;

    let mut loaded_any = false;

    for i in 0..ph_count {
        let off = ph_off + i * ph_size;
        if off + core::mem::size_of::<Elf64ProgramHeader>() > data.len() {
            return Err(ElfError::SegmentExceedsBinary);
        }
        let ph = unsafe { &*(data.as_ptr().add(off) as *const Elf64ProgramHeader) };
        if ph.p_type != PT_LOAD {
            continue;
        }

        let file_start = ph.p_offset as usize;
        let file_end = file_start
            .checked_add(ph.p_filesz as usize)
            .ok_or(ElfError::SegmentExceedsBinary)?;
        if file_end > data.len() {
            return Err(ElfError::SegmentExceedsBinary);
        }

        let vaddr = VirtAddr::new(ph.p_vaddr);
        let page_base = vaddr.align_down(4096u64);
        let offset_in_page = vaddr - page_base;
        let span = offset_in_page + ph.p_memsz;
        let num_pages = (span + 4095) / 4096;

        let mut flags = Flags::PRESENT | Flags::USER_ACCESSIBLE;
        if ph.p_flags & 0x2 != 0 {
            flags |= Flags::WRITABLE;
        }

        pagetable::map_range(root, page_base, num_pages, flags)?;

        unsafe {
            let dst = vaddr.as_mut_ptr::<u8>();
            core::ptr::copy_nonoverlapping(
                data.as_ptr().add(file_start),
                dst,
                ph.p_filesz as usize,
            );
            if ph.p_memsz > ph.p_filesz {
                core::ptr::write_bytes(
                    dst.add(ph.p_filesz as usize),
                    0,
                    (ph.p_memsz - ph.p_filesz) as usize,
                );
            }
        }
        pagetable::mark_user_recursive(root, page_base);
        loaded_any = true;
    }

    if !loaded_any {
        return Err(ElfError::NoLoadSegments);
    }

    Ok(LoadedImage {
        entry_point: hdr.e_entry,
        heap_start: crate::config::USER_HEAP_START,
        heap_end: crate::config::USER_HEAP_START + crate::config::USER_HEAP_SIZE,
        stack_top: crate::config::USER_STACK_TOP,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(magic_ok: bool, class: u8, data_enc: u8, ty: u16) -> alloc::vec::Vec<u8> {
        let mut buf = alloc::vec![0u8; core::mem::size_of::<Elf64Header>()];
        if magic_ok {
            buf[0] = EI_MAG0;
            buf[1] = EI_MAG1;
            buf[2] = EI_MAG2;
            buf[3] = EI_MAG3;
        }
        buf[4] = class;
        buf[5] = data_enc;
        let ty_bytes = ty.to_le_bytes();
        buf[16] = ty_bytes[0];
        buf[17] = ty_bytes[1];
        buf
    }

    #[test_case]
    fn rejects_bad_magic() {
        let data = header_bytes(false, ELFCLASS64, ELFDATA2LSB, ET_EXEC);
        let hdr = header_at(&data).unwrap();
        assert_eq!(validate(hdr), Err(ElfError::BadMagic));
    }

    #[test_case]
    fn rejects_32_bit() {
        let data = header_bytes(true, 1, ELFDATA2LSB, ET_EXEC);
        let hdr = header_at(&data).unwrap();
        assert_eq!(validate(hdr), Err(ElfError::Not64Bit));
    }

    #[test_case]
    fn rejects_big_endian() {
        let data = header_bytes(true, ELFCLASS64, 2, ET_EXEC);
        let hdr = header_at(&data).unwrap();
        assert_eq!(validate(hdr), Err(ElfError::NotLittleEndian));
    }

    #[test_case]
    fn accepts_valid_header() {
        let data = header_bytes(true, ELFCLASS64, ELFDATA2LSB, ET_EXEC);
        let hdr = header_at(&data).unwrap();
        assert!(validate(hdr).is_ok());
    }

    #[test_case]
    fn too_short_is_rejected() {
        let data = [0u8; 4];
        assert_eq!(header_at(&data).err(), Some(ElfError::TooShort));
    }
}
