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

//! Interrupt masking on the CPU the kernel is running on.

#[cfg(target_arch = "arm")]
use {
    shared::cpu::{read_cpsr, write_cpsr, Psr},
    crate::{CpuInterrupts, InterruptClass}
};

/// The current CPU's interrupt masks, as seen through the CPSR.
#[derive(Debug, Default)]
pub struct LocalCpu;

#[cfg(target_arch = "arm")]
impl CpuInterrupts for LocalCpu {
    fn disable_save(&mut self, class: InterruptClass) -> Psr {
        let saved = read_cpsr();
        unsafe { write_cpsr(saved | class.mask()); }
        saved
    }

    fn restore(&mut self, saved: Psr) {
        // Same mode as when it was saved, so the stack pointer doesn't move.
        unsafe { write_cpsr(saved); }
    }
}
