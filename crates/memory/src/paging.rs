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

//! Page-table entries, as far as the exception handlers need to touch them.

use {
    bitflags::bitflags,
    shared::mmio::Mmio
};
#[cfg(target_arch = "arm")]
use crate::layout::{PAGE_TABLE_BASE, PAGE_TABLE_SIZE};

bitflags! {
    /// Bits in an ARMv6 second-level (small page) descriptor.
    #[repr(transparent)]
    pub struct EntryFlags: u32 {
        /// Execute-never
        const EXECUTE_NEVER = 0x0000_0001;
        /// Marks the descriptor as a small page. Without it the entry faults.
        const SMALL_PAGE    = 0x0000_0002;
        /// Writes may be buffered.
        const BUFFERABLE    = 0x0000_0004;
        /// Accesses may be cached.
        const CACHEABLE     = 0x0000_0008;
        /// Set when a page has been touched since the eviction policy last looked. The policy
        /// clears it; the kernel only ever sets it.
        const EVICTION_HINT = 0x0000_0010;
        /// The physical page number
        const FRAME         = 0xffff_f000;
    }
}

/// Which page-table slot, counted from `PAGE_TABLE_BASE`, carries the eviction hint.
pub const EVICTION_HINT_SLOT: usize = 2;

impl EntryFlags {
    /// Interprets a raw descriptor without discarding unnamed bits.
    pub const fn from_raw(bits: u32) -> EntryFlags {
        unsafe { EntryFlags::from_bits_unchecked(bits) }
    }
}

/// Access to the page tables that the kernel is running with.
pub trait PageTables {
    /// Reads the first entry of the page table in `slot`.
    fn flags(&self, slot: usize) -> EntryFlags;

    /// Sets the given bits in the first entry of the page table in `slot`. Other bits are left
    /// alone.
    fn set_flags(&mut self, slot: usize, flags: EntryFlags);
}

/// Tells the eviction policy that memory was accessed, in response to an access-flag fault.
pub fn set_eviction_hint<P: PageTables + ?Sized>(tables: &mut P) {
    tables.set_flags(EVICTION_HINT_SLOT, EntryFlags::EVICTION_HINT);
}

/// The page tables in memory, laid out as consecutive tables of equal size.
#[derive(Debug)]
pub struct HardwarePageTables {
    tables: Mmio,
    stride: usize
}

impl HardwarePageTables {
    /// Describes page tables starting at `base`, each `stride` bytes long.
    ///
    /// # Safety
    /// The tables must be mapped, and nothing else may be relying on their contents staying the
    /// same.
    pub const unsafe fn new(base: usize, stride: usize) -> HardwarePageTables {
        HardwarePageTables { tables: Mmio::new(base), stride }
    }

    /// The page tables the kernel set up at boot.
    #[cfg(target_arch = "arm")]
    pub fn kernel() -> HardwarePageTables {
        unsafe { HardwarePageTables::new(PAGE_TABLE_BASE, PAGE_TABLE_SIZE) }
    }

    /// Where the table in `slot` starts.
    pub fn slot_address(&self, slot: usize) -> usize {
        self.tables.base() + slot * self.stride
    }
}

impl PageTables for HardwarePageTables {
    fn flags(&self, slot: usize) -> EntryFlags {
        EntryFlags::from_raw(self.tables.read(slot * self.stride))
    }

    fn set_flags(&mut self, slot: usize, flags: EntryFlags) {
        self.tables.set_bits(slot * self.stride, flags.bits());
    }
}
