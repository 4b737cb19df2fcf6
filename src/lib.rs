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

//! This crate and its dependencies comprise the Ember kernel: the trap layer of a small ARM kernel
//! for the Versatile board family, and the boot sequence that brings it up.

#![cfg_attr(not(test), no_std)]

#![deny(warnings, missing_docs)]

pub mod boot;

use {
    int::ProcessManager,
    io::println
};

#[cfg(all(target_arch = "arm", not(test)))]
use {
    int::{
        arm::{kernel_vector_table, set_process_manager, LowVectors},
        VectorMemory,
        VectorTable
    },
    irqs::{vic::Pl190, LineError, LineTable, LineTableBuilder},
    memory::heap::{init_kernel_heap, HeapError},
    shared::{cpu, KERNEL_VERSION},
    boot::Platform
};

/// Stands in for the scheduler until there is one: it reports processes that exit and otherwise
/// leaves the CPU idle.
#[derive(Debug, Default)]
pub struct IdleScheduler;

impl ProcessManager for IdleScheduler {
    fn exit_current(&self, status: i32) {
        println!("process exited with status {}", status);
    }
}

/// The Versatile board, as the boot sequence sees it.
#[cfg(all(target_arch = "arm", not(test)))]
struct Versatile {
    vectors: LowVectors,
    vic: Pl190
}

#[cfg(all(target_arch = "arm", not(test)))]
impl Platform for Versatile {
    fn vector_table(&self) -> VectorTable {
        kernel_vector_table()
    }

    fn vector_memory(&mut self) -> &mut dyn VectorMemory {
        &mut self.vectors
    }

    fn vectors_written(&mut self) {
        self.vectors.sync_instruction_cache();
    }

    fn init_heap(&mut self) -> Result<(), HeapError> {
        init_kernel_heap()
    }

    fn install_line_table(&mut self, table: LineTable) -> Result<(), LineError> {
        irqs::install_line_table(table).map(|_| ())
    }

    fn enable_lines(&mut self, mask: u32) {
        self.vic.enable_lines(mask);
    }

    fn enable_interrupts(&mut self) {
        cpu::enable_interrupts();
    }

    fn start_scheduler(&mut self) {
        static SCHEDULER: IdleScheduler = IdleScheduler;
        if !set_process_manager(&SCHEDULER) {
            println!("a process manager was already running");
        }
    }
}

/// The entry point from the board's reset code, which sets up the mode stacks and maps the kernel.
/// Interrupts must be masked.
#[cfg(all(target_arch = "arm", not(test)))]
#[no_mangle]
pub extern "C" fn kmain() -> ! {
    println!("Ember kernel {}", KERNEL_VERSION.unwrap_or("(unknown version)"));

    let mut board = Versatile { vectors: LowVectors, vic: Pl190::primary() };
    // No device drivers register ISRs yet.
    match boot::boot(&mut board, LineTableBuilder::new()) {
        Ok(_) => loop {
            cpu::wait_for_interrupt();
        },
        Err(e) => {
            println!("boot failed: {}", e);
            cpu::halt();
        }
    }
}

#[cfg(all(target_arch = "arm", not(test)))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    println!("kernel panic: {}", info);
    shared::cpu::halt();
}
