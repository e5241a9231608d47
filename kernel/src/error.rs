//! Typed errors for the kernel's internal layers, collapsed to the `i64`
//! syscall ABI sentinel only at the outermost dispatch boundary.
//!
//! Internally every fallible operation returns `Result<T, E>` and
//! propagates with `?`; nothing below `process::syscall` ever deals in
//! bare negative numbers.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    OutOfMemory,
    DoubleFree,
    RefcountOverflow,
    OutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageTableError {
    FrameAllocation(FrameError),
    AlreadyMapped,
    NotMapped,
    Unaligned,
    HugePageCow,
}

impl From<FrameError> for PageTableError {
    fn from(e: FrameError) -> Self {
        PageTableError::FrameAllocation(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    TooShort,
    BadMagic,
    Not64Bit,
    NotLittleEndian,
    UnsupportedType,
    SegmentExceedsBinary,
    NoLoadSegments,
    Mapping(PageTableError),
}

impl From<PageTableError> for ElfError {
    fn from(e: PageTableError) -> Self {
        ElfError::Mapping(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    TableFull,
    NoSuchProcess,
    NotAChild,
    Elf(ElfError),
    PageTable(PageTableError),
    Frame(FrameError),
}

impl From<ElfError> for ProcessError {
    fn from(e: ElfError) -> Self {
        ProcessError::Elf(e)
    }
}

impl From<PageTableError> for ProcessError {
    fn from(e: PageTableError) -> Self {
        ProcessError::PageTable(e)
    }
}

impl From<FrameError> for ProcessError {
    fn from(e: FrameError) -> Self {
        ProcessError::Frame(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdError {
    TableFull,
    BadFd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    Process(ProcessError),
    Fd(FdError),
    BadArgument,
    NotImplemented,
}

impl From<ProcessError> for SyscallError {
    fn from(e: ProcessError) -> Self {
        SyscallError::Process(e)
    }
}

impl From<FdError> for SyscallError {
    fn from(e: FdError) -> Self {
        SyscallError::Fd(e)
    }
}

/// Every syscall error collapses to a single negative sentinel at the ABI
/// boundary — the spec gives syscalls no separate errno channel.
impl SyscallError {
    pub const fn to_abi(self) -> i64 {
        -1
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::OutOfMemory => write!(f, "out of physical memory"),
            FrameError::DoubleFree => write!(f, "double free of physical frame"),
            FrameError::RefcountOverflow => write!(f, "frame refcount overflow"),
            FrameError::OutOfRange => write!(f, "frame address out of range"),
        }
    }
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElfError::TooShort => write!(f, "binary shorter than an ELF64 header"),
            ElfError::BadMagic => write!(f, "bad ELF magic"),
            ElfError::Not64Bit => write!(f, "not a 64-bit ELF"),
            ElfError::NotLittleEndian => write!(f, "not little-endian"),
            ElfError::UnsupportedType => write!(f, "unsupported ELF type"),
            ElfError::SegmentExceedsBinary => write!(f, "segment exceeds binary"),
            ElfError::NoLoadSegments => write!(f, "no PT_LOAD segments"),
            ElfError::Mapping(e) => write!(f, "segment mapping failed: {:?}", e),
        }
    }
}
