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

//! Handlers for the exceptions that aren't system calls or interrupts.
//!
//! Every handler returns a `Response` instead of acting on it. Only the ARM glue ever halts or
//! reboots the machine, so the handlers themselves can run anywhere.

use {
    io::println,
    memory::{
        layout::in_kernel_range,
        paging::{set_eviction_hint, PageTables}
    },
    crate::context::{FaultContext, FaultStatus}
};

/// An instruction word that the rest of the kernel plants on purpose to stop the machine. It's
/// permanently undefined in both ARM and Thumb-2.
pub const FATAL_SENTINEL: u32 = 0xf7f1_a2f3;

/// Tells the trap entry code what to do once a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Response {
    /// Return from the exception to the address in the trap frame's `lr`.
    Eret,
    /// The current process is gone. Don't return to it.
    LeaveUserspace,
    /// Start the kernel over from its reset entry point.
    Reboot,
    /// Stop the machine. The diagnostics have already been printed.
    Halt(Fault)
}

/// Why the machine had to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The fatal sentinel instruction was executed.
    FatalSentinel,
    /// Some other undefined instruction was executed.
    UndefinedInstruction {
        /// Where it was
        pc: usize,
        /// What it was
        word: u32
    },
    /// An instruction couldn't be fetched.
    PrefetchAbort {
        /// The address of the instruction
        pc: usize
    },
    /// A load or store failed in a way that can't be fixed up.
    DataAbort {
        /// The address of the faulting instruction
        pc: usize,
        /// The address it tried to reach
        address: usize,
        /// Why it failed
        status: FaultStatus
    }
}

/// Reads instruction words out of memory.
pub trait InstructionMemory {
    /// Reads the word at `addr`, which might only be halfword-aligned.
    fn read_word(&self, addr: usize) -> u32;
}

impl<F: Fn(usize) -> u32> InstructionMemory for F {
    fn read_word(&self, addr: usize) -> u32 {
        self(addr)
    }
}

/// Bits 27:24 of an instruction word: 0xc, 0xd, or 0xe for coprocessor instructions.
pub fn coprocessor_class(word: u32) -> u32 {
    (word & 0x0f00_0000) >> 24
}

fn is_coprocessor_class(class: u32) -> bool {
    (0xc ..= 0xe).contains(&class)
}

/// Prints the reset marker and asks for a reboot.
pub fn reset() -> Response {
    println!("RESET HANDLER");
    Response::Reboot
}

/// The reserved vector is never taken on purpose. Print a marker and carry on.
pub fn reserved() -> Response {
    println!("RESERVED HANDLER");
    Response::Eret
}

/// Handles an undefined instruction. Never resumes.
pub fn undefined<M: InstructionMemory + ?Sized>(ctx: &FaultContext, memory: &M) -> Response {
    let word = memory.read_word(ctx.pc);
    if word == FATAL_SENTINEL {
        println!("FATAL ERROR");
        return Response::Halt(Fault::FatalSentinel);
    }

    println!("UNDEFINED INSTRUCTION HANDLER");
    println!("{} mode", if ctx.is_thumb() { "THUMB" } else { "ARM" });
    if ctx.is_jazelle() {
        println!("JAZELLE enabled");
    }
    let class = coprocessor_class(word);
    if is_coprocessor_class(class) {
        println!("COPRO: {:x} (coprocessor {})", class, (word >> 8) & 0xf);
    } else {
        println!("COPRO: {:x}", class);
    }
    println!("violating instruction (at {:#x}): {:#010x}", ctx.pc, word);
    if ctx.pc_in_kernel() {
        println!("(instruction is in kernel address range)");
    }
    Response::Halt(Fault::UndefinedInstruction { pc: ctx.pc, word })
}

/// Handles a prefetch abort. Never resumes.
pub fn prefetch_abort(ctx: &FaultContext) -> Response {
    println!("PREFETCH ABORT HANDLER, violating address: {:#x}", ctx.pc);
    if ctx.pc_in_kernel() {
        println!("(instruction is in kernel address range)");
    }
    Response::Halt(Fault::PrefetchAbort { pc: ctx.pc })
}

/// Handles a data abort. An access-flag fault just means the page was touched: the eviction hint
/// is set and the faulting instruction runs again, silently. Anything else is fatal.
pub fn data_abort<M, P>(ctx: &FaultContext, memory: &M, page_tables: &mut P) -> Response
        where M: InstructionMemory + ?Sized,
              P: PageTables + ?Sized {
    let status = ctx.fault_status.unwrap_or_else(|| FaultStatus::from_code(0));
    let address = ctx.fault_address.unwrap_or(0);

    if status == FaultStatus::ACCESS_FLAG_PAGE {
        set_eviction_hint(page_tables);
        return Response::Eret;
    }

    println!("DATA ABORT HANDLER (Page Fault)");
    println!("faulting address: {:#x}", address);
    if in_kernel_range(address) {
        println!("(address is in kernel address range)");
    }
    println!("violating instruction (at {:#x}): {:#010x}", ctx.pc, memory.read_word(ctx.pc));
    println!("{} on {}", status, if ctx.write { "write" } else { "read" });
    Response::Halt(Fault::DataAbort { pc: ctx.pc, address, status })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use {
        alloc::{boxed::Box, string::String, sync::Arc, vec::Vec},
        core::fmt,
        memory::paging::EntryFlags,
        spin::Mutex,
        crate::context::{FaultRegisters, TrapFrame, TrapKind}
    };

    // The console is global, so tests that look at it take turns.
    pub(crate) static CONSOLE_LOCK: Mutex<()> = Mutex::new(());

    #[derive(Clone, Default)]
    pub(crate) struct Capture(Arc<Mutex<String>>);

    impl fmt::Write for Capture {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.0.lock().push_str(s);
            Ok(())
        }
    }

    /// Runs `f` with the console redirected, returning what it printed.
    pub(crate) fn capture<T>(f: impl FnOnce() -> T) -> (T, String) {
        let _guard = CONSOLE_LOCK.lock();
        let capture = Capture::default();
        io::set_console(Box::new(capture.clone()));
        let result = f();
        io::take_console();
        let text = capture.0.lock().clone();
        (result, text)
    }

    #[derive(Default)]
    pub(crate) struct FakePageTables {
        pub(crate) sets: Vec<(usize, EntryFlags)>
    }

    impl PageTables for FakePageTables {
        fn flags(&self, slot: usize) -> EntryFlags {
            self.sets.iter()
                .filter(|(s, _)| *s == slot)
                .fold(EntryFlags::empty(), |acc, (_, f)| acc | *f)
        }

        fn set_flags(&mut self, slot: usize, flags: EntryFlags) {
            self.sets.push((slot, flags));
        }
    }

    fn context(kind: TrapKind, spsr: u32, lr: u32, regs: FaultRegisters) -> FaultContext {
        FaultContext::decode(kind, &TrapFrame::new(spsr, lr), regs)
    }

    mod undefined {
        use super::*;

        #[test]
        fn sentinel_halts_before_diagnostics() {
            let ctx = context(TrapKind::Undefined, 0x13, 0xf000_1004, FaultRegisters::default());
            let (response, text) = capture(|| undefined(&ctx, &|_: usize| FATAL_SENTINEL));
            assert_eq!(response, Response::Halt(Fault::FatalSentinel));
            assert_eq!(text, "FATAL ERROR\n");
        }

        #[test]
        fn reads_at_decoded_pc() {
            let ctx = context(TrapKind::Undefined, 0x30, 0x8002, FaultRegisters::default());
            let (response, text) = capture(|| undefined(&ctx, &|addr: usize| if addr == 0x8000 { 0xe7f0_00f0u32 } else { 0 }));
            assert_eq!(response, Response::Halt(Fault::UndefinedInstruction { pc: 0x8000, word: 0xe7f0_00f0 }));
            assert!(text.starts_with("UNDEFINED INSTRUCTION HANDLER\nTHUMB mode\n"));
            assert!(text.contains("violating instruction (at 0x8000): 0xe7f000f0\n"));
            assert!(!text.contains("kernel address range"));
            assert!(!text.contains("FATAL"));
        }

        #[test]
        fn kernel_coprocessor_instruction() {
            let ctx = context(TrapKind::Undefined, 0x0100_0013, 0xf000_2004, FaultRegisters::default());
            let (response, text) = capture(|| undefined(&ctx, &|_: usize| 0xee07_0f15u32));
            assert!(matches!(response, Response::Halt(Fault::UndefinedInstruction { pc: 0xf000_2000, .. })));
            assert!(text.contains("ARM mode\n"));
            assert!(text.contains("JAZELLE enabled\n"));
            assert!(text.contains("COPRO: e (coprocessor 15)\n"));
            assert!(text.contains("(instruction is in kernel address range)\n"));
        }

        #[test]
        fn class_bits() {
            assert_eq!(coprocessor_class(0xee07_0f15), 0xe);
            assert_eq!(coprocessor_class(0xe7f0_00f0), 0x7);
            assert_eq!(coprocessor_class(FATAL_SENTINEL), 0x7);
        }
    }

    mod aborts {
        use super::*;

        #[test]
        fn prefetch_is_fatal() {
            let ctx = context(TrapKind::PrefetchAbort, 0x10, 0x0001_0004, FaultRegisters::default());
            let (response, text) = capture(|| prefetch_abort(&ctx));
            assert_eq!(response, Response::Halt(Fault::PrefetchAbort { pc: 0x0001_0000 }));
            assert_eq!(text, "PREFETCH ABORT HANDLER, violating address: 0x10000\n");
        }

        #[test]
        fn access_flag_sets_hint_and_resumes_silently() {
            let regs = FaultRegisters { far: 0x0002_0000, dfsr: 6 };
            let ctx = context(TrapKind::DataAbort, 0x10, 0x0001_0008, regs);
            let mut tables = FakePageTables::default();
            let (response, text) = capture(|| data_abort(&ctx, &|_: usize| 0u32, &mut tables));
            assert_eq!(response, Response::Eret);
            assert_eq!(text, "");
            assert_eq!(tables.sets, [(2, EntryFlags::EVICTION_HINT)]);
            assert_eq!(tables.flags(2).bits(), 1 << 4);
        }

        #[test]
        fn every_other_status_halts() {
            for code in 0 .. 32u32 {
                let dfsr = ((code & 0x10) << 6) | (code & 0xf);
                let regs = FaultRegisters { far: 0xf000_0040, dfsr };
                let ctx = context(TrapKind::DataAbort, 0x13, 0xf000_0108, regs);
                let mut tables = FakePageTables::default();
                let (response, text) = capture(|| data_abort(&ctx, &|_: usize| 0xe590_0000u32, &mut tables));
                if code == 0b00110 {
                    assert_eq!(response, Response::Eret);
                    continue;
                }
                assert_eq!(response, Response::Halt(Fault::DataAbort {
                    pc: 0xf000_0100,
                    address: 0xf000_0040,
                    status: FaultStatus::from_code(code as u8)
                }), "status {:#07b}", code);
                assert!(tables.sets.is_empty());
                assert!(text.starts_with("DATA ABORT HANDLER (Page Fault)\nfaulting address: 0xf0000040\n"));
                assert!(text.contains("(address is in kernel address range)\n"));
                assert!(text.contains("violating instruction (at 0xf0000100): 0xe5900000\n"));
            }
        }

        #[test]
        fn user_address_and_write() {
            let regs = FaultRegisters { far: 0x0000_0ffc, dfsr: 0x807 };
            let ctx = context(TrapKind::DataAbort, 0x10, 0x8008, regs);
            let mut tables = FakePageTables::default();
            let (_, text) = capture(|| data_abort(&ctx, &|_: usize| 0u32, &mut tables));
            assert!(!text.contains("kernel address range"));
            assert!(text.ends_with("translation fault (page) on write\n"));
        }
    }

    #[test]
    fn reset_and_reserved() {
        let (response, text) = capture(reset);
        assert_eq!(response, Response::Reboot);
        assert_eq!(text, "RESET HANDLER\n");

        let (response, text) = capture(reserved);
        assert_eq!(response, Response::Eret);
        assert_eq!(text, "RESERVED HANDLER\n");
    }
}
