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

//! Word-sized access to memory-mapped hardware registers.

use volatile::Volatile;

/// A block of 32-bit registers starting at a fixed address. Every access is volatile, so the
/// compiler can neither elide nor reorder it with respect to other register accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mmio {
    base: usize
}

impl Mmio {
    /// Describes the register block at `base`.
    ///
    /// # Safety
    /// `base` must be mapped and word-aligned, and every offset later passed to `read` or `write`
    /// must name a register (or ordinary memory) that tolerates the access.
    pub const unsafe fn new(base: usize) -> Mmio {
        Mmio { base }
    }

    /// The address of the first register.
    pub const fn base(&self) -> usize {
        self.base
    }

    /// Reads the register `offset` bytes past the base.
    pub fn read(&self, offset: usize) -> u32 {
        unsafe { (*self.register(offset)).read() }
    }

    /// Writes the register `offset` bytes past the base.
    pub fn write(&self, offset: usize, value: u32) {
        unsafe { (*self.register(offset)).write(value) }
    }

    /// Sets the given bits in a register, leaving the others as they were.
    pub fn set_bits(&self, offset: usize, bits: u32) {
        unsafe { (*self.register(offset)).update(|x| *x |= bits) }
    }

    fn register(&self, offset: usize) -> *mut Volatile<u32> {
        debug_assert_eq!(offset % 4, 0, "misaligned register offset {:#x}", offset);
        (self.base + offset) as *mut Volatile<u32>
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_and_writes_words() {
        let mut words = [0u32; 4];
        let mmio = unsafe { Mmio::new(words.as_mut_ptr() as usize) };
        mmio.write(0x8, 0xdead_beef);
        mmio.set_bits(0xc, 1 << 4);
        mmio.set_bits(0xc, 1 << 4);
        assert_eq!(mmio.read(0x8), 0xdead_beef);
        assert_eq!(mmio.read(0xc), 0x10);
        assert_eq!(words, [0, 0, 0xdead_beef, 0x10]);
    }
}
