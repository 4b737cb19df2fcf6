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

//! A driver for the ARM PrimeCell PL190 vectored interrupt controller, the primary interrupt
//! controller on the versatilepb board. Only its non-vectored mode is used: the kernel reads the
//! status registers and does its own fan-out.

use {
    shared::mmio::Mmio,
    crate::{InterruptClass, InterruptController}
};

/// The physical address of the primary interrupt controller on the versatilepb board.
pub const VIC_BASE: usize = 0x1014_0000;

#[derive(Debug, Clone, Copy)]
#[repr(usize)]
enum Regs {
    IrqStatus    = 0x000,
    FiqStatus    = 0x004,
    IntEnable    = 0x010
}

/// One PL190.
#[derive(Debug)]
pub struct Pl190 {
    regs: Mmio
}

impl Pl190 {
    /// Makes a driver for the controller whose registers start at `base`.
    ///
    /// # Safety
    /// `base` must be the address of a PL190's register block (or of memory pretending to be one),
    /// and no other driver may be using it.
    pub const unsafe fn new(base: usize) -> Pl190 {
        Pl190 { regs: Mmio::new(base) }
    }

    /// The board's primary interrupt controller.
    #[cfg(target_arch = "arm")]
    pub fn primary() -> Pl190 {
        unsafe { Pl190::new(VIC_BASE) }
    }

    /// Lets the lines in `mask` interrupt the CPU. Other lines are unaffected.
    pub fn enable_lines(&mut self, mask: u32) {
        // The enable register is write-one-to-set.
        self.regs.write(Regs::IntEnable as usize, mask);
    }
}

impl InterruptController for Pl190 {
    fn status(&self, class: InterruptClass) -> u32 {
        match class {
            InterruptClass::Irq => self.regs.read(Regs::IrqStatus as usize),
            InterruptClass::Fiq => self.regs.read(Regs::FiqStatus as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_status_by_class() {
        let mut regs = [0u32; 8];
        regs[0] = 0x0000_0210;
        regs[1] = 0x8000_0000;
        let vic = unsafe { Pl190::new(regs.as_mut_ptr() as usize) };
        assert_eq!(vic.status(InterruptClass::Irq), 0x0000_0210);
        assert_eq!(vic.status(InterruptClass::Fiq), 0x8000_0000);
    }

    #[test]
    fn enable_touches_only_the_enable_register() {
        let mut regs = [0u32; 8];
        let mut vic = unsafe { Pl190::new(regs.as_mut_ptr() as usize) };
        vic.enable_lines(0b1010);
        assert_eq!(regs[Regs::IntEnable as usize / 4], 0b1010);
        assert_eq!(regs.iter().filter(|&&r| r != 0).count(), 1);
    }
}
