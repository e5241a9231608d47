//! Syscall dispatch: number + up to 3 args in registers, result in the
//! same register, negative on any failure — no separate errno channel.
//!
//! The numbering is taken directly from the original C `syscall.c`'s
//! dispatch switch order (exit, yield, log, mmap, fork, exec, wait,
//! read, write, open, close). This kernel has no reason to match
//! Linux's syscall ABI, so the teacher's Linux-compatible numbers
//! (read=0, write=1, exit=60, ...) are replaced wholesale.

use crate::error::SyscallError;
use crate::process::registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum SyscallNumber {
    Exit = 1,
    Yield = 2,
    Log = 3,
    Mmap = 4,
    Fork = 5,
    Exec = 6,
    Wait = 7,
    Read = 8,
    Write = 9,
    Open = 10,
    Close = 11,
}

impl SyscallNumber {
    fn from_u64(n: u64) -> Option<Self> {
        use SyscallNumber::*;
        Some(match n {
            1 => Exit,
            2 => Yield,
            3 => Log,
            4 => Mmap,
            5 => Fork,
            6 => Exec,
            7 => Wait,
            8 => Read,
            9 => Write,
            10 => Open,
            11 => Close,
            _ => return None,
        })
    }
}

/// Dispatch one syscall. Returns the ABI result: non-negative on
/// success, `-1` on any failure (`SyscallError::to_abi` always -1 —
/// the spec gives no separate errno channel).
pub fn dispatch(num: u64, arg1: u64, arg2: u64, arg3: u64) -> i64 {
    let Some(number) = SyscallNumber::from_u64(num) else {
        return SyscallError::BadArgument.to_abi();
    };

    let result: Result<i64, SyscallError> = match number {
        SyscallNumber::Exit => sys_exit(arg1 as i32),
        SyscallNumber::Yield => sys_yield(),
        SyscallNumber::Log => sys_log(arg1, arg2),
        SyscallNumber::Mmap => sys_mmap(arg1),
        SyscallNumber::Fork => sys_fork(),
        SyscallNumber::Exec => sys_exec(),
        SyscallNumber::Wait => sys_wait(arg1),
        SyscallNumber::Read => sys_read(),
        SyscallNumber::Write => sys_write(arg1, arg2, arg3),
        SyscallNumber::Open => sys_open(),
        SyscallNumber::Close => sys_close(arg1),
    };

    match result {
        Ok(v) => v,
        Err(e) => e.to_abi(),
    }
}

fn sys_exit(status: i32) -> Result<i64, SyscallError> {
    registry::kill_current(status);
    Ok(0)
}

/// The timer preempts regardless; with no blocking syscalls yet, a
/// cooperative yield has nothing extra to do.
fn sys_yield() -> Result<i64, SyscallError> {
    Ok(0)
}

/// Copies `len` bytes out of user memory and writes them to the serial
/// log with a `[user] ` prefix — matches the original C's `sys_log`,
/// which copies exactly `len` bytes rather than stopping at a NUL.
fn sys_log(ptr: u64, len: u64) -> Result<i64, SyscallError> {
    if len > 4096 {
        return Err(SyscallError::BadArgument);
    }
    let bytes = unsafe { core::slice::from_raw_parts(ptr as *const u8, len as usize) };
    crate::serial_print!("[user] ");
    for &b in bytes {
        crate::serial_print!("{}", b as char);
    }
    crate::serial_println!();
    Ok(0)
}

/// Bump-allocates `size` bytes from the current process's heap window.
/// There is no `munmap`; memory is never reclaimed. Intentional
/// Phase-1 limitation, recorded in DESIGN.md rather than left implicit.
fn sys_mmap(size: u64) -> Result<i64, SyscallError> {
    registry::with_table(|table| {
        let idx = registry::current_slot();
        let proc = table[idx]
            .as_mut()
            .ok_or(crate::error::ProcessError::NoSuchProcess)?;
        let addr = proc.heap_start;
        let new_start = addr.checked_add(size).ok_or(SyscallError::BadArgument)?;
        if new_start > proc.heap_end {
            return Err(SyscallError::BadArgument);
        }
        proc.heap_start = new_start;
        Ok(addr as i64)
    })
}

fn sys_fork() -> Result<i64, SyscallError> {
    let pid = registry::fork_current()?;
    Ok(pid.0 as i64)
}

/// ABI-complete stub: replacing the current image in place needs the
/// current address space torn down and rebuilt, which this kernel
/// doesn't do yet — spawning happens only via fork today.
fn sys_exec() -> Result<i64, SyscallError> {
    Err(SyscallError::NotImplemented)
}

fn sys_wait(pid: u64) -> Result<i64, SyscallError> {
    let parent = registry::current_pid().ok_or(crate::error::ProcessError::NoSuchProcess)?;
    let code = registry::reap_child(parent, crate::process::Pid(pid as usize))?;
    Ok(code as i64)
}

/// Stub, present only for ABI completeness — matches the original C.
fn sys_read() -> Result<i64, SyscallError> {
    Err(SyscallError::NotImplemented)
}

fn sys_write(fd: u64, ptr: u64, count: u64) -> Result<i64, SyscallError> {
    if count > 4096 {
        return Err(SyscallError::BadArgument);
    }
    if fd == 1 || fd == 2 {
        let bytes = unsafe { core::slice::from_raw_parts(ptr as *const u8, count as usize) };
        for &b in bytes {
            crate::serial_print!("{}", b as char);
        }
        return Ok(count as i64);
    }
    Err(SyscallError::BadArgument)
}

fn sys_open() -> Result<i64, SyscallError> {
    registry::with_table(|table| {
        let idx = registry::current_slot();
        let proc = table[idx]
            .as_mut()
            .ok_or(crate::error::ProcessError::NoSuchProcess)?;
        let fd = proc.fds.open_new()?;
        Ok(fd as i64)
    })
}

fn sys_close(fd: u64) -> Result<i64, SyscallError> {
    registry::with_table(|table| {
        let idx = registry::current_slot();
        let proc = table[idx]
            .as_mut()
            .ok_or(crate::error::ProcessError::NoSuchProcess)?;
        proc.fds.close(fd as usize)?;
        Ok(0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn numbering_matches_original_c_order() {
        assert_eq!(SyscallNumber::Exit as u64, 1);
        assert_eq!(SyscallNumber::Close as u64, 11);
    }

    #[test_case]
    fn unknown_number_is_bad_argument() {
        assert_eq!(dispatch(999, 0, 0, 0), SyscallError::BadArgument.to_abi());
    }
}
