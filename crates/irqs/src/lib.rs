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

//! This crate defines how the kernel deals with IRQs and FIQs: registering interrupt service
//! routines against interrupt lines and fanning a single IRQ or FIQ exception out to every line
//! that asserted it. It does not deal with CPU exceptions and software interrupts. See the `int`
//! crate for those.

#![cfg_attr(not(test), no_std)]

#![deny(warnings, missing_docs)]

pub mod cpu;
pub mod vic;

use {
    core::fmt,
    error::Error,
    io::printlndebug,
    shared::{cpu::Psr, once::BootCell}
};

/// The number of interrupt lines the controller multiplexes.
pub const MAX_LINES: usize = 32;

/// Any function that can be used as an ISR. It's told which line it's servicing, so one routine can
/// serve several lines.
pub type IsrFn = fn(line: usize) -> IsrResult;

/// The required return value of an ISR. It exists in order to allow multiple devices to share the
/// same line if necessary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum IsrResult {
    /// The interrupt has been successfully serviced.
    Serviced,
    /// The interrupt wasn't serviced because this was the wrong ISR.
    WrongIsr,
    /// The interrupt was successfully serviced, and the current thread should be pre-empted.
    PreemptThread
}

/// The two kinds of interrupt the CPU distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptClass {
    /// A normal interrupt request
    Irq,
    /// A fast interrupt request
    Fiq
}

impl InterruptClass {
    /// The CPSR bit that masks this class.
    pub fn mask(self) -> Psr {
        match self {
            InterruptClass::Irq => Psr::IRQ_DISABLED,
            InterruptClass::Fiq => Psr::FIQ_DISABLED
        }
    }
}

/// Why an interrupt line couldn't be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineError {
    /// The line number is `MAX_LINES` or more.
    OutOfRange(usize),
    /// The line already has an ISR.
    AlreadyRegistered(usize),
    /// A line table has already been installed, so it can't change any more.
    TableFrozen
}

impl Error for LineError {}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            LineError::OutOfRange(line)        => write!(f, "interrupt line {} is out of range (max {})", line, MAX_LINES - 1),
            LineError::AlreadyRegistered(line) => write!(f, "interrupt line {} already has an ISR", line),
            LineError::TableFrozen             => write!(f, "the interrupt line table has already been installed")
        }
    }
}

/// Collects ISRs during boot. Consuming it with `build` produces the table that the interrupt
/// handlers read, which can't be changed afterwards.
#[derive(Debug, Clone)]
pub struct LineTableBuilder {
    isrs: [Option<IsrFn>; MAX_LINES]
}

impl LineTableBuilder {
    /// Starts a table with no ISRs.
    pub const fn new() -> LineTableBuilder {
        LineTableBuilder { isrs: [None; MAX_LINES] }
    }

    /// Registers an ISR for the given line.
    pub fn register(&mut self, line: usize, isr: IsrFn) -> Result<&mut LineTableBuilder, LineError> {
        let slot = self.isrs.get_mut(line).ok_or(LineError::OutOfRange(line))?;
        if slot.is_some() {
            return Err(LineError::AlreadyRegistered(line));
        }
        *slot = Some(isr);
        Ok(self)
    }

    /// Freezes the table.
    pub fn build(self) -> LineTable {
        LineTable { isrs: self.isrs }
    }
}

impl Default for LineTableBuilder {
    fn default() -> LineTableBuilder {
        LineTableBuilder::new()
    }
}

/// An immutable map from interrupt lines to their ISRs.
#[derive(Debug, Clone)]
pub struct LineTable {
    isrs: [Option<IsrFn>; MAX_LINES]
}

/// What happened during one pass over the interrupt status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    /// The lines whose ISRs serviced them.
    pub serviced: u32,
    /// The lines that were asserted but had no ISR, or whose ISR declined them.
    pub ignored: u32,
    /// Whether any ISR asked for the current thread to be pre-empted.
    pub preempt: bool
}

impl LineTable {
    /// The ISR registered for the given line, if any.
    pub fn isr(&self, line: usize) -> Option<IsrFn> {
        self.isrs.get(line).copied().flatten()
    }

    /// A bitmask of every line that has an ISR.
    pub fn registered_mask(&self) -> u32 {
        self.isrs.iter()
            .enumerate()
            .filter(|(_, isr)| isr.is_some())
            .fold(0, |mask, (line, _)| mask | (1 << line))
    }

    /// Runs the ISR for every line set in `status`, lowest line first. The status is not re-read,
    /// so a line that asserts during the pass waits for the next exception.
    pub fn dispatch(&self, status: u32) -> DispatchReport {
        let mut report = DispatchReport::default();
        for line in (0 .. MAX_LINES).filter(|&line| status & (1 << line) != 0) {
            let bit = 1 << line;
            match self.isrs[line].map(|isr| isr(line)) {
                Some(IsrResult::Serviced)      => report.serviced |= bit,
                Some(IsrResult::PreemptThread) => {
                    report.serviced |= bit;
                    report.preempt = true;
                },
                Some(IsrResult::WrongIsr)      => report.ignored |= bit,
                None                           => {
                    printlndebug!("interrupt line {} asserted with no ISR", line);
                    report.ignored |= bit;
                }
            }
        }
        report
    }
}

/// Reads which lines are asserting an interrupt.
pub trait InterruptController {
    /// The pending lines of the given class, one bit per line.
    fn status(&self, class: InterruptClass) -> u32;
}

/// Masks and unmasks interrupt classes on the current CPU.
pub trait CpuInterrupts {
    /// Masks `class` and returns the status word from before.
    fn disable_save(&mut self, class: InterruptClass) -> Psr;

    /// Puts back a status word returned by `disable_save`.
    fn restore(&mut self, saved: Psr);
}

/// The whole of an IRQ or FIQ exception: mask the class, service every pending line once, and put
/// the mask back.
///
/// `interrupted` is the status word the exception will return to. For an IRQ, its IRQ mask is
/// cleared, so IRQs come back on with the exception return and never while the handler is still
/// using the IRQ-mode link register. For an FIQ it is left alone.
pub fn handle_interrupt<C, P>(class: InterruptClass, table: &LineTable, controller: &C, cpu: &mut P, interrupted: &mut Psr)
        -> DispatchReport
        where C: InterruptController + ?Sized,
              P: CpuInterrupts + ?Sized {
    let saved = cpu.disable_save(class);
    let report = table.dispatch(controller.status(class));
    cpu.restore(saved);
    if class == InterruptClass::Irq {
        interrupted.remove(Psr::IRQ_DISABLED);
    }
    report
}

static LINE_TABLE: BootCell<LineTable> = BootCell::new();

/// Makes the given table the one the interrupt handlers use, for the rest of the kernel's life.
pub fn install_line_table(table: LineTable) -> Result<&'static LineTable, LineError> {
    LINE_TABLE.set(table).map_err(|_| LineError::TableFrozen)
}

/// The installed line table, if there is one yet.
pub fn line_table() -> Option<&'static LineTable> {
    LINE_TABLE.get()
}
