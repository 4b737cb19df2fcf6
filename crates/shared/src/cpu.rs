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

//! Processor status words and the handful of privileged instructions the kernel needs on 32-bit
//! ARM. Only the `Psr` type exists on other targets, so code that merely interprets a saved status
//! word can be tested on the host.

use bitflags::bitflags;

bitflags! {
    /// The bits of a CPSR or SPSR that the kernel cares about.
    #[repr(transparent)]
    pub struct Psr: u32 {
        /// The processor was in Thumb state.
        const THUMB   = 0x0000_0020;
        /// FIQs are masked.
        const FIQ_DISABLED = 0x0000_0040;
        /// IRQs are masked.
        const IRQ_DISABLED = 0x0000_0080;
        /// The processor was in Jazelle state.
        const JAZELLE = 0x0100_0000;

        /// All of the mode bits.
        const MODE   = 0x0000_001f;
        /// User mode
        const MODE_USR = 0x0000_0010;
        /// FIQ mode
        const MODE_FIQ = 0x0000_0011;
        /// IRQ mode
        const MODE_IRQ = 0x0000_0012;
        /// Supervisor mode (entered through SWI and reset)
        const MODE_SVC = 0x0000_0013;
        /// Abort mode (prefetch and data aborts)
        const MODE_ABT = 0x0000_0017;
        /// Undefined mode
        const MODE_UND = 0x0000_001b;
        /// System mode
        const MODE_SYS = 0x0000_001f;
    }
}

impl Psr {
    /// Interprets a raw status word, keeping bits that have no name here.
    pub const fn from_raw(bits: u32) -> Psr {
        // Unnamed bits (condition flags, GE, IT) must survive a save/restore.
        unsafe { Psr::from_bits_unchecked(bits) }
    }

    /// Returns just the mode bits.
    pub fn mode(self) -> Psr {
        self & Psr::MODE
    }

    /// Determines whether the status word was saved while running user code.
    pub fn is_user_mode(self) -> bool {
        self.mode() == Psr::MODE_USR
    }
}

#[cfg(target_arch = "arm")]
use core::arch::asm;

/// Puts the processor into a low-power state until an interrupt happens. It might also return
/// immediately. Calling this with interrupts disabled is a way to hang.
#[cfg(target_arch = "arm")]
#[inline(always)]
pub fn wait_for_interrupt() {
    unsafe {
        asm!("mcr p15, 0, {0}, c7, c0, 4", in(reg) 0u32, options(nomem, nostack, preserves_flags));
    }
}

/// Masks both IRQs and FIQs.
#[cfg(target_arch = "arm")]
#[inline(always)]
pub fn disable_interrupts() {
    unsafe {
        asm!("cpsid if", options(nomem, nostack, preserves_flags));
    }
}

/// Unmasks both IRQs and FIQs.
#[cfg(target_arch = "arm")]
#[inline(always)]
pub fn enable_interrupts() {
    unsafe {
        asm!("cpsie if", options(nomem, nostack, preserves_flags));
    }
}

/// Reads the current program status register.
#[cfg(target_arch = "arm")]
#[inline(always)]
pub fn read_cpsr() -> Psr {
    let bits: u32;
    unsafe {
        asm!("mrs {0}, cpsr", out(reg) bits, options(nomem, nostack, preserves_flags));
    }
    Psr::from_raw(bits)
}

/// Overwrites the control and flag fields of the current program status register.
///
/// # Safety
/// Changing the mode bits switches the banked stack pointer out from under the caller.
#[cfg(target_arch = "arm")]
#[inline(always)]
pub unsafe fn write_cpsr(psr: Psr) {
    asm!("msr cpsr_cxsf, {0}", in(reg) psr.bits(), options(nomem, nostack));
}

/// Stops the processor for good. Interrupts are masked first so nothing can wake it.
#[cfg(target_arch = "arm")]
pub fn halt() -> ! {
    disable_interrupts();
    loop {
        wait_for_interrupt();
    }
}
