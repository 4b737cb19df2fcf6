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

//! The one function every exception vector ends up in. It decodes the trap, picks the handler, and
//! fixes up the resume address. Everything it touches outside the frame goes through a
//! `TrapEnvironment`, so the routing can be tested without the hardware.

use {
    io::printlndebug,
    irqs::{handle_interrupt, CpuInterrupts, InterruptClass, InterruptController, LineTable, LineTableBuilder},
    memory::paging::PageTables,
    crate::{
        context::{FaultContext, FaultRegisters, TrapFrame, TrapKind},
        exceptions::{self, InstructionMemory, Response},
        syscall::{handle_system_call, Services}
    }
};

/// What the fault handlers need to read and fix up memory.
pub struct FaultHardware<'a> {
    /// Where instruction words are read from
    pub instructions: &'a dyn InstructionMemory,
    /// The page tables holding the eviction hint
    pub page_tables: &'a mut dyn PageTables
}

/// What the IRQ and FIQ handlers need.
pub struct InterruptHardware<'a> {
    /// The frozen line table, if boot has got that far
    pub table: Option<&'a LineTable>,
    /// The interrupt controller's status registers
    pub controller: &'a dyn InterruptController,
    /// The CPU's interrupt mask
    pub cpu: &'a mut dyn CpuInterrupts
}

/// The machine as seen from inside a trap.
pub trait TrapEnvironment {
    /// Lends out memory access for the fault handlers.
    fn fault_hardware(&mut self) -> FaultHardware<'_>;

    /// Lends out the interrupt hardware.
    fn interrupt_hardware(&mut self) -> InterruptHardware<'_>;

    /// Runs `f` with the services that system calls reach. Any locks those services need are only
    /// held for the duration of `f`.
    fn with_services<R>(&mut self, f: impl FnOnce(&mut Services) -> R) -> R;
}

/// Handles one trap of the given kind, described by `frame` and (for data aborts) `regs`.
///
/// # Returns
/// What the entry code should do next. If it's `Response::Eret`, `frame.lr` holds the address to
/// resume at.
pub fn handle_trap<E: TrapEnvironment + ?Sized>(kind: TrapKind, frame: &mut TrapFrame, regs: FaultRegisters, env: &mut E)
        -> Response {
    let ctx = FaultContext::decode(kind, frame, regs);

    match kind {
        TrapKind::Reset    => exceptions::reset(),
        TrapKind::Reserved => exceptions::reserved(),

        TrapKind::Undefined => {
            let hw = env.fault_hardware();
            exceptions::undefined(&ctx, hw.instructions)
        },

        TrapKind::PrefetchAbort => exceptions::prefetch_abort(&ctx),

        TrapKind::DataAbort => {
            let hw = env.fault_hardware();
            let response = exceptions::data_abort(&ctx, hw.instructions, hw.page_tables);
            if response == Response::Eret {
                // Run the faulting instruction again.
                frame.resume_at(ctx.pc);
            }
            response
        },

        TrapKind::Swi => env.with_services(|services| handle_system_call(frame, services)),

        TrapKind::Irq | TrapKind::Fiq => {
            let class = if kind == TrapKind::Irq { InterruptClass::Irq } else { InterruptClass::Fiq };
            let hw = env.interrupt_hardware();
            let empty;
            let table = match hw.table {
                Some(table) => table,
                None => {
                    printlndebug!("{:?} before the line table was installed", class);
                    empty = LineTableBuilder::new().build();
                    &empty
                }
            };
            let mut interrupted = frame.status();
            let report = handle_interrupt(class, table, hw.controller, hw.cpu, &mut interrupted);
            frame.spsr = interrupted.bits();
            if report.preempt {
                printlndebug!("ISR asked for pre-emption with no scheduler running");
            }
            frame.resume_at(ctx.pc);
            Response::Eret
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use {
        alloc::vec::Vec,
        core::ptr::NonNull,
        irqs::IsrResult,
        memory::{
            heap::{HeapError, UserHeap},
            paging::{EntryFlags, EVICTION_HINT_SLOT}
        },
        shared::{cpu::Psr, ffi::CStrRef},
        std::cell::RefCell,
        crate::{
            context::FaultStatus,
            exceptions::{tests::{capture, FakePageTables}, Fault, FATAL_SENTINEL},
            syscall::{ProcessManager, UserMemory}
        }
    };

    thread_local! {
        static LINES: RefCell<Vec<usize>> = RefCell::new(Vec::new());
    }

    fn recording_isr(line: usize) -> IsrResult {
        LINES.with(|lines| lines.borrow_mut().push(line));
        IsrResult::Serviced
    }

    struct Controller(u32);

    impl InterruptController for Controller {
        fn status(&self, _class: InterruptClass) -> u32 {
            self.0
        }
    }

    #[derive(Default)]
    struct Cpu(Vec<&'static str>);

    impl CpuInterrupts for Cpu {
        fn disable_save(&mut self, _class: InterruptClass) -> Psr {
            self.0.push("disable");
            Psr::MODE_SVC
        }

        fn restore(&mut self, _saved: Psr) {
            self.0.push("restore");
        }
    }

    #[derive(Default)]
    struct Heap(Vec<usize>);

    impl UserHeap for Heap {
        fn allocate_aligned(&mut self, size: usize, _align: usize) -> Result<NonNull<u8>, HeapError> {
            Err(HeapError::OutOfMemory(size))
        }

        fn free(&mut self, addr: usize) -> Result<(), HeapError> {
            self.0.push(addr);
            Ok(())
        }
    }

    struct Processes;

    impl ProcessManager for Processes {
        fn exit_current(&self, _status: i32) {}
    }

    struct NoStrings;

    impl UserMemory for NoStrings {
        fn c_str(&self, _addr: usize) -> Option<CStrRef<'_>> {
            None
        }
    }

    struct Machine {
        words: fn(usize) -> u32,
        page_tables: FakePageTables,
        table: Option<LineTable>,
        controller: Controller,
        cpu: Cpu,
        heap: Heap,
        services_taken: usize
    }

    impl Machine {
        fn new() -> Machine {
            Machine {
                words: |_| 0xe120_0070, // bkpt
                page_tables: FakePageTables::default(),
                table: None,
                controller: Controller(0),
                cpu: Cpu::default(),
                heap: Heap::default(),
                services_taken: 0
            }
        }
    }

    impl TrapEnvironment for Machine {
        fn fault_hardware(&mut self) -> FaultHardware<'_> {
            FaultHardware { instructions: &self.words, page_tables: &mut self.page_tables }
        }

        fn interrupt_hardware(&mut self) -> InterruptHardware<'_> {
            InterruptHardware { table: self.table.as_ref(), controller: &self.controller, cpu: &mut self.cpu }
        }

        fn with_services<R>(&mut self, f: impl FnOnce(&mut Services) -> R) -> R {
            self.services_taken += 1;
            f(&mut Services { heap: &mut self.heap, processes: &Processes, user: &NoStrings })
        }
    }

    fn data_abort_regs(dfsr: u32) -> FaultRegisters {
        FaultRegisters { far: 0x0010_2000, dfsr }
    }

    #[test]
    fn access_flag_reruns_the_instruction() {
        let mut machine = Machine::new();
        let mut frame = TrapFrame::new(0x10, 0x8010);
        let (response, text) = capture(|| handle_trap(TrapKind::DataAbort, &mut frame, data_abort_regs(0b00110), &mut machine));
        assert_eq!(response, Response::Eret);
        assert_eq!(frame.lr, 0x8008);
        assert_eq!(machine.page_tables.sets, [(EVICTION_HINT_SLOT, EntryFlags::EVICTION_HINT)]);
        assert_eq!(text, "");
    }

    #[test]
    fn translation_fault_halts() {
        let mut machine = Machine::new();
        let mut frame = TrapFrame::new(0x10, 0x8010);
        let (response, _) = capture(|| handle_trap(TrapKind::DataAbort, &mut frame, data_abort_regs(0b00111), &mut machine));
        assert_eq!(response, Response::Halt(Fault::DataAbort {
            pc: 0x8008,
            address: 0x0010_2000,
            status: FaultStatus::TRANSLATION_PAGE
        }));
        assert_eq!(frame.lr, 0x8010);
        assert!(machine.page_tables.sets.is_empty());
    }

    #[test]
    fn sentinel() {
        let mut machine = Machine::new();
        machine.words = |_| FATAL_SENTINEL;
        let mut frame = TrapFrame::new(0x13, 0xf000_0104);
        let (response, text) = capture(|| handle_trap(TrapKind::Undefined, &mut frame, FaultRegisters::default(), &mut machine));
        assert_eq!(response, Response::Halt(Fault::FatalSentinel));
        assert_eq!(text, "FATAL ERROR\n");
    }

    #[test]
    fn irq_resumes_at_the_interrupted_instruction() {
        let mut builder = LineTableBuilder::new();
        builder.register(2, recording_isr).unwrap()
            .register(9, recording_isr).unwrap();
        let mut machine = Machine::new();
        machine.table = Some(builder.build());
        machine.controller = Controller((1 << 2) | (1 << 5) | (1 << 9));

        let mut frame = TrapFrame::new(0x10 | Psr::IRQ_DISABLED.bits(), 0x8104);
        let (response, _) = capture(|| handle_trap(TrapKind::Irq, &mut frame, FaultRegisters::default(), &mut machine));
        assert_eq!(response, Response::Eret);
        assert_eq!(frame.lr, 0x8100);
        assert_eq!(LINES.with(|lines| lines.replace(Vec::new())), [2, 9]);
        // The CPU mask is only put back; IRQs come on again through the saved status.
        assert_eq!(machine.cpu.0, ["disable", "restore"]);
        assert_eq!(frame.spsr, 0x10);
    }

    #[test]
    fn fiq_before_the_line_table() {
        let mut machine = Machine::new();
        machine.controller = Controller(u32::MAX);
        let mut frame = TrapFrame::new(0x10 | Psr::IRQ_DISABLED.bits(), 0x8104);
        let (response, _) = capture(|| handle_trap(TrapKind::Fiq, &mut frame, FaultRegisters::default(), &mut machine));
        assert_eq!(response, Response::Eret);
        assert_eq!(machine.cpu.0, ["disable", "restore"]);
        assert_eq!(frame.spsr, 0x10 | Psr::IRQ_DISABLED.bits());
    }

    #[test]
    fn system_call() {
        let mut machine = Machine::new();
        let mut frame = TrapFrame::new(0x10, 0x8004);
        frame.r[0] = 0x4000;
        frame.r[7] = 16;
        let (response, _) = capture(|| handle_trap(TrapKind::Swi, &mut frame, FaultRegisters::default(), &mut machine));
        assert_eq!(response, Response::Eret);
        assert_eq!(frame.r[0], 0);
        assert_eq!(frame.lr, 0x8004);
        assert_eq!(machine.heap.0, [0x4000]);
        assert_eq!(machine.services_taken, 1);
    }

    #[test]
    fn only_system_calls_take_the_services() {
        let mut machine = Machine::new();
        for kind in [TrapKind::Reserved, TrapKind::Irq, TrapKind::Fiq, TrapKind::PrefetchAbort, TrapKind::Undefined] {
            let mut frame = TrapFrame::new(0x10, 0x8004);
            let _ = capture(|| handle_trap(kind, &mut frame, FaultRegisters::default(), &mut machine));
        }
        assert_eq!(machine.services_taken, 0);
    }

    #[test]
    fn reset_and_reserved() {
        let mut machine = Machine::new();
        let mut frame = TrapFrame::new(0x13, 0);
        let (response, text) = capture(|| handle_trap(TrapKind::Reset, &mut frame, FaultRegisters::default(), &mut machine));
        assert_eq!(response, Response::Reboot);
        assert_eq!(text, "RESET HANDLER\n");
        let (response, text) = capture(|| handle_trap(TrapKind::Reserved, &mut frame, FaultRegisters::default(), &mut machine));
        assert_eq!(response, Response::Eret);
        assert_eq!(text, "RESERVED HANDLER\n");
    }
}
