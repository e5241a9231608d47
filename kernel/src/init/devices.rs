//! Hardware init: PIC remap + PIT + IDT load.
//!
//! IDT construction itself moved to `process::trap::build_idt` — that
//! module owns the timer/syscall/exception vectors, so it's the one
//! that should build the table. This file only wires the PIC, starts
//! the PIT, and loads whatever `trap::build_idt` produced.

use spin::Once;

use crate::config::TIMER_HZ;
use crate::interrupts::idt::InterruptDescriptorTable;

static IDT: Once<InterruptDescriptorTable> = Once::new();

pub fn init_idt() {
    IDT.call_once(crate::process::trap::build_idt);
}

fn load_idt() {
    IDT.get().unwrap().load();
}

/// PIC remap + unmask timer/keyboard + PIT + load IDT.
pub fn init_hardware_interrupts() {
    crate::interrupts::pic::initialize();
    crate::interrupts::pic::enable_irq(0);
    crate::interrupts::pic::enable_irq(1);
    load_idt();
    crate::pit::init(TIMER_HZ);
}
