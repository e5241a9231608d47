// kernel/src/init/mod.rs
//
// Boot orchestration — calls sub-modules in the exact order the
// original kernel_main did, minus the framebuffer/REPL steps the
// framebuffer-free rework dropped.

pub mod devices;
pub mod memory;
pub mod processes;

use bootloader_api::BootInfo;
use x86_64::VirtAddr;

use crate::{process, serial_println};

pub fn boot(boot_info: &'static mut BootInfo) -> ! {
    devices::init_idt();

    let phys_mem_offset =
        VirtAddr::new(boot_info.physical_memory_offset.into_option().unwrap());

    memory::init_core(phys_mem_offset, &boot_info.memory_regions);
    memory::test_allocators();

    devices::init_hardware_interrupts();

    serial_println!("Initializing TSS and GDT");
    process::tss::init();

    serial_println!("Creating processes");
    processes::init_all();

    let first = process::registry::current_slot();
    let frame_ptr = process::registry::with_table(|table| {
        table[first]
            .as_ref()
            .expect("no process registered at boot")
            .frame_ptr
    });
    let kernel_stack_top = process::registry::current_kernel_stack_top();
    process::tss::set_kernel_stack(VirtAddr::new(kernel_stack_top));

    serial_println!("Entering first process");
    unsafe { process::trap::enter_first_frame(frame_ptr) }
}
