// panic.rs
//
// No framebuffer in this kernel — panics go to the serial port only,
// via the lock-free writer (the locked one might itself be the thing
// that deadlocked).

use core::panic::PanicInfo;

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    unsafe {
        core::arch::asm!("cli");
    }

    crate::serial_println_raw!();
    crate::serial_println_raw!("==== KERNEL PANIC ====");
    if let Some(location) = info.location() {
        crate::serial_println_raw!(
            "  at {}:{}:{}",
            location.file(),
            location.line(),
            location.column()
        );
    }
    crate::serial_println_raw!("  {}", info.message());

    loop {
        unsafe {
            core::arch::asm!("hlt");
        }
    }
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    crate::testing::test_panic_handler(info)
}
