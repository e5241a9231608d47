//! In-kernel test harness.
//!
//! The `[package.metadata.bootimage]` block in Cargo.toml has always
//! carried `test-args`/`test-success-exit-code`, but nothing wired it up.
//! This module is that wiring: a `#[test_runner]` that runs every
//! `#[test_case]` function and signals pass/fail to the host by writing
//! to the `isa-debug-exit` port QEMU was started with.

use x86_64::instructions::port::Port;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

pub fn exit_qemu(code: QemuExitCode) -> ! {
    unsafe {
        let mut port = Port::<u32>::new(0xf4);
        port.write(code as u32);
    }
    // The isa-debug-exit device should have already stopped the VM; this
    // is reached only when running without it (e.g. under a debugger).
    loop {
        unsafe { core::arch::asm!("hlt") };
    }
}

pub trait Testable {
    fn run(&self);
}

impl<T: Fn()> Testable for T {
    fn run(&self) {
        crate::serial_print!("{}...\t", core::any::type_name::<T>());
        self();
        crate::serial_println!("ok");
    }
}

pub fn test_runner(tests: &[&dyn Testable]) {
    crate::serial_println!("running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    exit_qemu(QemuExitCode::Success);
}

pub fn test_panic_handler(info: &core::panic::PanicInfo) -> ! {
    crate::serial_println!("FAILED");
    crate::serial_println!("error: {}", info);
    exit_qemu(QemuExitCode::Failed);
}
