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

//! The exception vector table at the bottom of memory.
//!
//! Each of the eight primary vectors is the same instruction, `LDR PC, [PC, #0x18]`, which jumps
//! through the word 0x20 bytes further on. Those eight secondary words hold the handler addresses,
//! so changing a handler never means re-encoding a branch.

use {
    memory::layout::VECTOR_BASE,
    shared::once::BootCell,
    crate::context::TrapKind
};

/// The number of exception vectors.
pub const VECTOR_COUNT: usize = 8;

/// Encodes `LDR PC, [PC, #offset]`. The PC reads 8 bytes ahead, so the load comes from
/// `offset + 8` bytes past the instruction.
pub const fn ldr_pc(offset: u32) -> u32 {
    0xe59f_f000 | (offset & 0xfff)
}

/// The instruction in every primary vector slot.
pub const PRIMARY_VECTOR: u32 = ldr_pc(0x18);

/// Somewhere the vector table can be written.
pub trait VectorMemory {
    /// Writes one word.
    fn write_word(&mut self, addr: usize, word: u32);

    /// Reads one word back.
    fn read_word(&self, addr: usize) -> u32;
}

/// The sixteen words that make up the vector table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorTable {
    handlers: [u32; VECTOR_COUNT]
}

impl VectorTable {
    /// Makes a table that sends each kind of exception to the matching handler address. The
    /// addresses are in vector order: reset, undefined, swi, prefetch abort, data abort, reserved,
    /// irq, fiq.
    pub const fn new(handlers: [u32; VECTOR_COUNT]) -> VectorTable {
        VectorTable { handlers }
    }

    /// The handler address for one kind of exception.
    pub fn handler(&self, kind: TrapKind) -> u32 {
        self.handlers[kind.index()]
    }

    /// The table's memory image: eight primary vectors, then eight handler addresses.
    pub fn words(&self) -> [u32; 2 * VECTOR_COUNT] {
        let mut words = [PRIMARY_VECTOR; 2 * VECTOR_COUNT];
        words[VECTOR_COUNT ..].copy_from_slice(&self.handlers);
        words
    }

    /// Writes the table to `VECTOR_BASE`, primary vectors first.
    pub fn write_to<M: VectorMemory + ?Sized>(&self, memory: &mut M) {
        for (i, &word) in self.words().iter().enumerate() {
            memory.write_word(VECTOR_BASE + 4 * i, word);
        }
    }

    /// Determines whether `memory` holds exactly this table.
    pub fn is_written_to<M: VectorMemory + ?Sized>(&self, memory: &M) -> bool {
        self.words().iter()
            .enumerate()
            .all(|(i, &word)| memory.read_word(VECTOR_BASE + 4 * i) == word)
    }
}

static VECTORS: BootCell<VectorTable> = BootCell::new();

/// Installs the kernel's vector table. The first table given is kept for good; installing again
/// rewrites that same table, which is harmless. Interrupts must stay disabled until this returns.
pub fn install_vectors<M: VectorMemory + ?Sized>(table: VectorTable, memory: &mut M) -> &'static VectorTable {
    let installed = match VECTORS.set(table) {
        Ok(installed) => installed,
        Err(_)        => loop {
            // Someone else is halfway through installing.
            if let Some(installed) = VECTORS.get() {
                break installed;
            }
            core::hint::spin_loop();
        }
    };
    installed.write_to(memory);
    installed
}

/// The installed vector table, if `install_vectors` has run.
pub fn installed_vectors() -> Option<&'static VectorTable> {
    VECTORS.get()
}
