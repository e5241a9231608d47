//! File descriptor table: a process-agnostic pool of refcounted
//! capability slots. The table itself has no idea what a slot
//! "is" — stdout, a pipe, a future real file — it only tracks how
//! many processes currently reference each slot, exactly the way
//! `memory::frame` tracks physical frames rather than their contents.
//!
//! `fd == 1`/`fd == 2` being "the log" is a convention the syscall
//! layer (`process::syscall`) imposes on top of this table, not a
//! property of the table.

use crate::config::{MAX_FDS_PER_PROCESS, MAX_FD_SLOTS};
use crate::error::FdError;

#[derive(Clone, Copy)]
struct Slot {
    refcount: u32,
}

pub struct FdPool {
    slots: [Option<Slot>; MAX_FD_SLOTS],
}

impl FdPool {
    const fn new() -> Self {
        Self {
            slots: [None; MAX_FD_SLOTS],
        }
    }

    fn open(&mut self) -> Result<usize, FdError> {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(Slot { refcount: 1 });
                return Ok(idx);
            }
        }
        Err(FdError::TableFull)
    }

    fn incref(&mut self, slot_idx: usize) -> Result<(), FdError> {
        let slot = self.slots.get_mut(slot_idx).ok_or(FdError::BadFd)?;
        let slot = slot.as_mut().ok_or(FdError::BadFd)?;
        slot.refcount += 1;
        Ok(())
    }

    fn decref(&mut self, slot_idx: usize) -> Result<(), FdError> {
        let slot = self.slots.get_mut(slot_idx).ok_or(FdError::BadFd)?;
        let s = slot.as_mut().ok_or(FdError::BadFd)?;
        s.refcount -= 1;
        if s.refcount == 0 {
            *slot = None;
        }
        Ok(())
    }
}

static FD_POOL: spin::Mutex<FdPool> = spin::Mutex::new(FdPool::new());

/// Per-process view: fixed-size array of fd number -> pool slot index.
#[derive(Clone, Copy)]
pub struct FdTable {
    fds: [Option<usize>; MAX_FDS_PER_PROCESS],
}

impl FdTable {
    pub const fn new() -> Self {
        Self {
            fds: [None; MAX_FDS_PER_PROCESS],
        }
    }

    /// stdin/stdout/stderr pre-opened at fd 0/1/2, matching the
    /// original C's `sys_write`'s special-casing of fd 1/2.
    pub fn with_stdio() -> Result<Self, FdError> {
        let mut table = Self::new();
        let mut pool = FD_POOL.lock();
        for fd in 0..3 {
            table.fds[fd] = Some(pool.open()?);
        }
        Ok(table)
    }

    pub fn open_new(&mut self) -> Result<usize, FdError> {
        let fd = self
            .fds
            .iter()
            .position(|f| f.is_none())
            .ok_or(FdError::TableFull)?;
        self.fds[fd] = Some(FD_POOL.lock().open()?);
        Ok(fd)
    }

    pub fn close(&mut self, fd: usize) -> Result<(), FdError> {
        let slot = self.fds.get(fd).ok_or(FdError::BadFd)?.ok_or(FdError::BadFd)?;
        FD_POOL.lock().decref(slot)?;
        self.fds[fd] = None;
        Ok(())
    }

    pub fn is_open(&self, fd: usize) -> bool {
        self.fds.get(fd).copied().flatten().is_some()
    }

    /// Duplicate this table for a forked child: every open fd keeps the
    /// same slot index, with the pool refcount bumped accordingly.
    pub fn fork(&self) -> Result<Self, FdError> {
        let mut pool = FD_POOL.lock();
        for slot in self.fds.iter().flatten() {
            pool.incref(*slot)?;
        }
        Ok(*self)
    }

    /// Release every open fd — called when a process exits.
    pub fn close_all(&mut self) {
        let mut pool = FD_POOL.lock();
        for fd in self.fds.iter_mut() {
            if let Some(slot) = fd.take() {
                let _ = pool.decref(slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn stdio_preopens_three_fds() {
        let table = FdTable::with_stdio().unwrap();
        assert!(table.is_open(0));
        assert!(table.is_open(1));
        assert!(table.is_open(2));
        assert!(!table.is_open(3));
    }

    #[test_case]
    fn close_frees_the_fd_not_the_shared_slot_early() {
        let mut a = FdTable::with_stdio().unwrap();
        let b = a.fork().unwrap();
        a.close(1).unwrap();
        assert!(!a.is_open(1));
        assert!(b.is_open(1));
    }

    #[test_case]
    fn open_new_finds_a_free_slot() {
        let mut table = FdTable::new();
        let fd = table.open_new().unwrap();
        assert_eq!(fd, 0);
        assert!(table.is_open(fd));
    }

    #[test_case]
    fn close_bad_fd_errors() {
        let mut table = FdTable::new();
        assert_eq!(table.close(0), Err(FdError::BadFd));
    }
}
