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

//! A write-only driver for the ARM PrimeCell PL011 UART, which is what the versatilepb board wires
//! to its first serial port.

use {
    core::fmt,
    shared::mmio::Mmio
};

/// The physical address of UART0 on the versatilepb board.
pub const UART0_BASE: usize = 0x101f_1000;

// Register offsets
const DR: usize = 0x00;
const FR: usize = 0x18;

// Flag register bits
const FR_TXFF: u32 = 1 << 5;

/// Writes bytes to a PL011. QEMU's model of the UART needs no initialization for transmitting, so
/// neither does this.
#[derive(Debug)]
pub struct Pl011 {
    regs: Mmio
}

impl Pl011 {
    /// Makes a writer for the UART whose registers start at `base`.
    ///
    /// # Safety
    /// `base` must be the address of a PL011's register block (or of memory pretending to be one).
    pub const unsafe fn new(base: usize) -> Pl011 {
        Pl011 { regs: Mmio::new(base) }
    }

    /// Makes a writer for the board's first UART. Nothing stops two of these from existing at once;
    /// their bytes just interleave.
    #[cfg(target_arch = "arm")]
    pub fn uart0() -> Pl011 {
        unsafe { Pl011::new(UART0_BASE) }
    }

    /// Sends one byte, waiting for room in the transmit FIFO first.
    pub fn putb(&mut self, b: u8) {
        while self.regs.read(FR) & FR_TXFF != 0 {
            core::hint::spin_loop();
        }
        self.regs.write(DR, b.into());
    }
}

impl fmt::Write for Pl011 {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            if b == b'\n' {
                self.putb(b'\r');
            }
            self.putb(b);
        }
        Ok(())
    }
}
