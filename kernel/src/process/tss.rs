// kernel/src/process/tss.rs
//
// A single static TSS, mutated in place before every scheduler switch
// so TSS.RSP0 always points at the kernel stack of whichever process
// is about to run — the ring3->ring0 transition on the next syscall or
// interrupt needs it to already be correct by the time that happens.
//
// A real per-CPU design would give each core its own TSS; this kernel
// is single-CPU, so one static, updated under interrupts-disabled, is
// enough (see SPEC_FULL.md's note on the single-CPU concurrency model).

use lazy_static::lazy_static;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::VirtAddr;

pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;

static mut TSS: TaskStateSegment = TaskStateSegment::new();

struct Selectors {
    code_selector: SegmentSelector,
    data_selector: SegmentSelector,
    user_code_selector: SegmentSelector,
    user_data_selector: SegmentSelector,
    tss_selector: SegmentSelector,
}

lazy_static! {
    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        unsafe {
            TSS.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] = {
                const STACK_SIZE: usize = 4096 * 5;
                static mut STACK: [u8; STACK_SIZE] = [0; STACK_SIZE];
                let stack_start = VirtAddr::from_ptr(&raw const STACK);
                stack_start + STACK_SIZE as u64
            };
            TSS.privilege_stack_table[0] = {
                const STACK_SIZE: usize = 4096 * 5;
                static mut STACK: [u8; STACK_SIZE] = [0; STACK_SIZE];
                let stack_start = VirtAddr::from_ptr(&raw const STACK);
                stack_start + STACK_SIZE as u64
            };
        }

        let mut gdt = GlobalDescriptorTable::new();
        let code_selector = gdt.append(Descriptor::kernel_code_segment());
        let data_selector = gdt.append(Descriptor::kernel_data_segment());
        let user_data_selector = gdt.append(Descriptor::user_data_segment());
        let user_code_selector = gdt.append(Descriptor::user_code_segment());
        let tss_selector = gdt.append(Descriptor::tss_segment(unsafe {
            &*core::ptr::addr_of!(TSS)
        }));

        (
            gdt,
            Selectors {
                code_selector,
                data_selector,
                user_code_selector,
                user_data_selector,
                tss_selector,
            },
        )
    };
}

pub fn init() {
    use x86_64::instructions::segmentation::{Segment, CS, DS};
    use x86_64::instructions::tables::load_tss;

    GDT.0.load();
    unsafe {
        CS::set_reg(GDT.1.code_selector);
        DS::set_reg(GDT.1.data_selector);
        load_tss(GDT.1.tss_selector);
    }
    crate::serial_println!("TSS and GDT initialized");
}

pub fn get_user_selectors() -> (SegmentSelector, SegmentSelector) {
    (GDT.1.user_code_selector, GDT.1.user_data_selector)
}

pub fn kernel_code_selector() -> SegmentSelector {
    GDT.1.code_selector
}

/// Point TSS.RSP0 at `stack_top` — call this every time the scheduler
/// switches to a different process, before interrupts are re-enabled.
pub fn set_kernel_stack(stack_top: VirtAddr) {
    unsafe {
        TSS.privilege_stack_table[0] = stack_top;
    }
}
