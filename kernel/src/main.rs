#![no_std]
#![no_main]
#![feature(abi_x86_interrupt)]
#![feature(custom_test_frameworks)]
#![test_runner(crate::testing::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

mod allocator;
mod config;
mod error;
mod init;
mod interrupts;
mod memory;
mod panic;
mod pit;
mod process;
mod serial;
mod testing;

use bootloader_api::{config::Mapping, entry_point, BootInfo, BootloaderConfig};

pub static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(Mapping::Dynamic);
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

fn kernel_main(_boot_info: &'static mut BootInfo) -> ! {
    #[cfg(test)]
    test_main();

    #[cfg(not(test))]
    init::boot(_boot_info);

    #[cfg(test)]
    loop {
        unsafe { core::arch::asm!("hlt") };
    }
}
