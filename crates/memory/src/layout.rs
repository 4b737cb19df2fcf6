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

//! Fixed addresses and sizes in the kernel's virtual address space on the versatilepb board.

use core::ops::Range;

/// The lowest virtual address that belongs to the kernel.
pub const KERNEL_BASE: usize = 0xf000_0000;
/// The first virtual address past the end of the kernel.
pub const KERNEL_TOP: usize = 0xfff0_0000;
/// The kernel's part of the address space.
pub const KERNEL_RANGE: Range<usize> = KERNEL_BASE .. KERNEL_TOP;

/// Where the exception vectors live. The kernel uses low vectors (SCTLR.V = 0).
pub const VECTOR_BASE: usize = 0x0000_0000;

/// The virtual address of the first second-level page table.
pub const PAGE_TABLE_BASE: usize = 0xf020_0000;
/// The size of one second-level page table in bytes (256 four-byte entries).
pub const PAGE_TABLE_SIZE: usize = 0x400;

/// The size of the kernel's own heap in bytes.
pub const KERNEL_HEAP_SIZE: usize = 0x10_0000;

/// Determines whether the given virtual address is in the kernel's part of the address space.
pub fn in_kernel_range(addr: usize) -> bool {
    KERNEL_RANGE.contains(&addr)
}

/// The number of bytes that can be read starting at `addr` before running into the kernel (or off
/// the end of the address space). Zero if `addr` is already in the kernel.
pub fn bytes_before_kernel(addr: usize) -> usize {
    if addr < KERNEL_BASE {
        KERNEL_BASE - addr
    } else if in_kernel_range(addr) {
        0
    } else {
        usize::MAX - addr
    }
}
