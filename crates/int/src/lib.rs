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

//! This crate defines how the kernel deals with CPU exceptions and software interrupts, including
//! system calls. Each of the eight exception vectors lands in `trap::handle_trap`, which hands IRQs
//! and FIQs over to the `irqs` crate and deals with everything else here.

#![cfg_attr(not(test), no_std)]

#![deny(warnings, missing_docs)]

extern crate alloc;

pub mod context;
pub mod exceptions;
pub mod syscall;
pub mod trap;
pub mod vectors;

#[cfg(target_arch = "arm")]
pub mod arm;

pub use {
    context::{FaultContext, FaultRegisters, TrapFrame, TrapKind},
    exceptions::{Fault, Response},
    syscall::{ProcessManager, Services, SystemCall, SyscallError},
    vectors::{install_vectors, installed_vectors, VectorMemory, VectorTable}
};
