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

//! The order the kernel comes up in. Each step consumes the previous state and returns the next, so
//! skipping or reordering a step doesn't compile:
//!
//! 1. install the exception vectors (interrupts still masked),
//! 2. bring up the heap, then everything that allocates,
//! 3. freeze the interrupt line table, unmask its lines, and enable interrupts,
//! 4. hand the CPU over to the scheduler.

use {
    core::{fmt, marker::PhantomData},
    error::Error,
    int::{install_vectors, VectorMemory, VectorTable},
    io::printlndebug,
    irqs::{LineError, LineTable, LineTableBuilder},
    memory::heap::HeapError
};

/// Everything the boot sequence needs from the board.
pub trait Platform {
    /// The vector table to install.
    fn vector_table(&self) -> VectorTable;

    /// Where the vector table goes.
    fn vector_memory(&mut self) -> &mut dyn VectorMemory;

    /// Called after the vectors have been written, before anything can take an exception through
    /// them.
    fn vectors_written(&mut self) {}

    /// Gives the kernel heap its memory.
    fn init_heap(&mut self) -> Result<(), HeapError>;

    /// Makes `table` the line table for good.
    fn install_line_table(&mut self, table: LineTable) -> Result<(), LineError>;

    /// Unmasks the given lines at the interrupt controller.
    fn enable_lines(&mut self, mask: u32);

    /// Unmasks IRQs and FIQs on the CPU.
    fn enable_interrupts(&mut self);

    /// Lets the scheduler take over the CPU.
    fn start_scheduler(&mut self);
}

/// Why the kernel couldn't boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// The vector table didn't read back the way it was written.
    VectorsNotWritten,
    /// The heap couldn't be set up.
    Heap(HeapError),
    /// The interrupt line table couldn't be installed.
    Lines(LineError)
}

impl Error for BootError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BootError::VectorsNotWritten => None,
            BootError::Heap(e)           => Some(e),
            BootError::Lines(e)          => Some(e)
        }
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BootError::VectorsNotWritten => write!(f, "the exception vectors did not read back correctly"),
            BootError::Heap(e)           => write!(f, "heap initialization failed: {}", e),
            BootError::Lines(e)          => write!(f, "interrupt setup failed: {}", e)
        }
    }
}

impl From<HeapError> for BootError {
    fn from(e: HeapError) -> BootError {
        BootError::Heap(e)
    }
}

impl From<LineError> for BootError {
    fn from(e: LineError) -> BootError {
        BootError::Lines(e)
    }
}

/// Nothing has been set up yet.
#[derive(Debug)]
pub enum Start {}
/// The exception vectors are in place.
#[derive(Debug)]
pub enum VectorsInstalled {}
/// The heap works.
#[derive(Debug)]
pub enum HeapReady {}
/// Interrupts are enabled.
#[derive(Debug)]
pub enum InterruptsEnabled {}
/// The scheduler owns the CPU.
#[derive(Debug)]
pub enum Scheduled {}

/// How far the kernel has got through booting.
#[derive(Debug)]
#[must_use]
pub struct Boot<State> {
    _state: PhantomData<State>
}

impl Boot<Start> {
    /// Begins booting. Interrupts must be masked.
    pub fn begin() -> Boot<Start> {
        Boot { _state: PhantomData }
    }

    /// Writes the exception vectors.
    pub fn install_vectors<P: Platform + ?Sized>(self, platform: &mut P) -> Result<Boot<VectorsInstalled>, BootError> {
        let table = platform.vector_table();
        let installed = install_vectors(table, platform.vector_memory());
        platform.vectors_written();

        #[cfg(feature = "self-test")] {
            if !installed.is_written_to(&*platform.vector_memory()) {
                return Err(BootError::VectorsNotWritten);
            }
        }
        #[cfg(not(feature = "self-test"))] {
            let _ = installed;
        }

        printlndebug!("exception vectors installed");
        Ok(Boot { _state: PhantomData })
    }
}

impl Boot<VectorsInstalled> {
    /// Sets up the heap, then the open-file table, which is the first thing that needs it.
    pub fn init_heap<P: Platform + ?Sized>(self, platform: &mut P) -> Result<Boot<HeapReady>, BootError> {
        platform.init_heap()?;
        fs::init();
        printlndebug!("heap ready");
        Ok(Boot { _state: PhantomData })
    }
}

impl Boot<HeapReady> {
    /// Freezes the line table, unmasks every line that has an ISR, and enables interrupts. No line
    /// can fire before its ISR is in the table.
    pub fn enable_interrupts<P: Platform + ?Sized>(self, platform: &mut P, lines: LineTableBuilder)
            -> Result<Boot<InterruptsEnabled>, BootError> {
        let table = lines.build();
        let mask = table.registered_mask();
        platform.install_line_table(table)?;
        platform.enable_lines(mask);
        platform.enable_interrupts();
        printlndebug!("interrupts enabled (lines {:#010x})", mask);
        Ok(Boot { _state: PhantomData })
    }
}

impl Boot<InterruptsEnabled> {
    /// Hands over to the scheduler.
    pub fn start_scheduler<P: Platform + ?Sized>(self, platform: &mut P) -> Boot<Scheduled> {
        platform.start_scheduler();
        Boot { _state: PhantomData }
    }
}

/// Runs the whole boot sequence.
pub fn boot<P: Platform + ?Sized>(platform: &mut P, lines: LineTableBuilder) -> Result<Boot<Scheduled>, BootError> {
    Ok(Boot::begin()
        .install_vectors(platform)?
        .init_heap(platform)?
        .enable_interrupts(platform, lines)?
        .start_scheduler(platform))
}
