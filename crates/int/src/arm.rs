/* Copyright (c) 2017-2021 Jeremy Davis (jeremydavis519@gmail.com)
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy of this software
 * and associated documentation files (the "Software"), to deal in the Software without restriction,
 * including without limitation the rights to use, copy, modify, merge, publish, distribute,
 * sublicense, and/or sell copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in all copies or
 * substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT
 * NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
 * NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM,
 * DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
 * OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.
 */

//! The glue between the CPU and the rest of this crate. The entry stubs save the interrupted
//! registers into a `TrapFrame` on the exception mode's stack and call `ember_handle_trap`, which
//! reads the fault registers, routes the trap, and carries out whatever the handler decided.

use {
    core::{arch::{asm, global_asm}, fmt},
    io::{println, printlndebug},
    irqs::{cpu::LocalCpu, vic::Pl190},
    memory::{
        heap::KernelHeap,
        layout::{bytes_before_kernel, in_kernel_range},
        paging::HardwarePageTables
    },
    shared::{
        cpu::{enable_interrupts, halt, wait_for_interrupt},
        ffi::CStrRef,
        once::BootCell
    },
    spin::Mutex,
    crate::{
        context::{FaultRegisters, TrapFrame, TrapKind},
        exceptions::{InstructionMemory, Response},
        syscall::{ProcessManager, Services, UserMemory},
        trap::{handle_trap, FaultHardware, InterruptHardware, TrapEnvironment},
        vectors::{VectorMemory, VectorTable, VECTOR_COUNT}
    }
};

// Every stub builds the same 16-word frame: SPSR, padding, r0-r12, lr. The frame is popped with
// `ldm ... pc}^`, which also copies SPSR back into CPSR.
global_asm!(r#"
    .arm
    .section .text.ember_traps, "ax"

    .macro TRAP_ENTRY name, kind
    .global \name
    .type \name, %function
    \name:
        stmfd sp!, {{r0-r12, lr}}
        mrs r0, spsr
        sub sp, sp, #8
        str r0, [sp]
        mov r0, sp
        mov r1, #\kind
        bl ember_handle_trap
        ldr r0, [sp]
        add sp, sp, #8
        msr spsr_cxsf, r0
        ldmfd sp!, {{r0-r12, pc}}^
    .endm

    .global ember_reset_entry
    .type ember_reset_entry, %function
    ember_reset_entry:
        ldr sp, =ember_reset_stack_top
        b ember_reset_trap

    TRAP_ENTRY ember_reset_trap,     0
    TRAP_ENTRY ember_undefined_entry, 1
    TRAP_ENTRY ember_swi_entry,       2
    TRAP_ENTRY ember_prefetch_entry,  3
    TRAP_ENTRY ember_data_entry,      4
    TRAP_ENTRY ember_reserved_entry,  5
    TRAP_ENTRY ember_irq_entry,       6
    TRAP_ENTRY ember_fiq_entry,       7

    .section .bss.ember_reset_stack, "aw", %nobits
    .balign 8
    ember_reset_stack:
        .space 1024
    ember_reset_stack_top:
"#);

extern "C" {
    fn ember_reset_entry();
    fn ember_undefined_entry();
    fn ember_swi_entry();
    fn ember_prefetch_entry();
    fn ember_data_entry();
    fn ember_reserved_entry();
    fn ember_irq_entry();
    fn ember_fiq_entry();

    // The board's reset entry point.
    fn _start() -> !;
}

/// The vector table pointing at this crate's entry stubs.
pub fn kernel_vector_table() -> VectorTable {
    let stubs: [unsafe extern "C" fn(); VECTOR_COUNT] = [
        ember_reset_entry,
        ember_undefined_entry,
        ember_swi_entry,
        ember_prefetch_entry,
        ember_data_entry,
        ember_reserved_entry,
        ember_irq_entry,
        ember_fiq_entry
    ];
    VectorTable::new(stubs.map(|stub| stub as usize as u32))
}

/// The low vectors at address 0. Address 0 is a null pointer as far as Rust is concerned, so every
/// access goes through assembly.
#[derive(Debug, Default)]
pub struct LowVectors;

impl VectorMemory for LowVectors {
    fn write_word(&mut self, addr: usize, word: u32) {
        unsafe {
            asm!("str {0}, [{1}]", in(reg) word, in(reg) addr, options(nostack, preserves_flags));
        }
    }

    fn read_word(&self, addr: usize) -> u32 {
        let word: u32;
        unsafe {
            asm!("ldr {0}, [{1}]", out(reg) word, in(reg) addr, options(nostack, preserves_flags, readonly));
        }
        word
    }
}

impl LowVectors {
    /// Makes freshly written vectors visible to instruction fetches: drains the write buffer and
    /// invalidates the instruction cache.
    pub fn sync_instruction_cache(&self) {
        unsafe {
            asm!(
                "mcr p15, 0, {0}, c7, c10, 4",
                "mcr p15, 0, {0}, c7, c5, 0",
                in(reg) 0u32,
                options(nostack, preserves_flags)
            );
        }
    }
}

/// Kernel-visible memory, read one instruction word at a time.
#[derive(Debug, Default)]
pub struct KernelInstructions;

impl InstructionMemory for KernelInstructions {
    fn read_word(&self, addr: usize) -> u32 {
        // Thumb instructions are only halfword-aligned.
        unsafe { core::ptr::read_unaligned(addr as *const u32) }
    }
}

/// The calling process's memory. User and kernel share one address space, so this only has to
/// keep user code from pointing into the kernel.
#[derive(Debug, Default)]
pub struct KernelUserMemory;

impl UserMemory for KernelUserMemory {
    fn c_str(&self, addr: usize) -> Option<CStrRef<'_>> {
        if addr == 0 || in_kernel_range(addr) {
            None
        } else {
            Some(unsafe { CStrRef::from_ptr(addr as *const u8) })
        }
    }

    fn readable_len(&self, addr: usize) -> usize {
        bytes_before_kernel(addr)
    }
}

fn fault_registers() -> FaultRegisters {
    let (far, dfsr): (u32, u32);
    unsafe {
        asm!("mrc p15, 0, {0}, c6, c0, 0", out(reg) far, options(nomem, nostack, preserves_flags));
        asm!("mrc p15, 0, {0}, c5, c0, 0", out(reg) dfsr, options(nomem, nostack, preserves_flags));
    }
    FaultRegisters { far, dfsr }
}

static USER_HEAP: Mutex<KernelHeap> = Mutex::new(KernelHeap::new());
static PROCESSES: BootCell<&'static (dyn ProcessManager + Sync)> = BootCell::new();

/// Gives `EXIT` a process manager to report to. Only the first call has any effect.
///
/// # Returns
/// `false` if a process manager was already set.
pub fn set_process_manager(processes: &'static (dyn ProcessManager + Sync)) -> bool {
    PROCESSES.set(processes).is_ok()
}

struct NoProcessManager;

impl ProcessManager for NoProcessManager {
    fn exit_current(&self, status: i32) {
        println!("process exited with status {} before the scheduler started", status);
    }
}

struct Hardware {
    instructions: KernelInstructions,
    page_tables: HardwarePageTables,
    vic: Pl190,
    cpu: LocalCpu
}

impl TrapEnvironment for Hardware {
    fn fault_hardware(&mut self) -> FaultHardware<'_> {
        FaultHardware { instructions: &self.instructions, page_tables: &mut self.page_tables }
    }

    fn interrupt_hardware(&mut self) -> InterruptHardware<'_> {
        InterruptHardware { table: irqs::line_table(), controller: &self.vic, cpu: &mut self.cpu }
    }

    fn with_services<R>(&mut self, f: impl FnOnce(&mut Services) -> R) -> R {
        let processes: &dyn ProcessManager = match PROCESSES.get() {
            Some(&processes) => processes,
            None             => &NoProcessManager
        };
        let mut heap = USER_HEAP.lock();
        f(&mut Services { heap: &mut *heap, processes, user: &KernelUserMemory })
    }
}

impl fmt::Debug for Hardware {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Hardware").finish_non_exhaustive()
    }
}

#[no_mangle]
extern "C" fn ember_handle_trap(frame: &mut TrapFrame, kind: u32) {
    let kind = match TrapKind::try_from(kind) {
        Ok(kind) => kind,
        Err(e) => {
            println!("{}", e);
            halt();
        }
    };
    let regs = if kind == TrapKind::DataAbort { fault_registers() } else { FaultRegisters::default() };
    let mut hardware = Hardware {
        instructions: KernelInstructions,
        page_tables: HardwarePageTables::kernel(),
        vic: Pl190::primary(),
        cpu: LocalCpu
    };

    match handle_trap(kind, frame, regs, &mut hardware) {
        Response::Eret => {},
        Response::LeaveUserspace => {
            printlndebug!("leaving userspace");
            // Nothing to switch to yet. Let interrupts keep the rest of the kernel going.
            enable_interrupts();
            loop {
                wait_for_interrupt();
            }
        },
        Response::Reboot => unsafe { _start() },
        Response::Halt(fault) => {
            printlndebug!("halting: {:?}", fault);
            halt();
        }
    }
}
