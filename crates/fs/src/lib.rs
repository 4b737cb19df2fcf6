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

//! This crate holds the kernel's view of open files. The filesystem itself isn't reachable from
//! user code yet; the open-file table is kept ready for when the file system calls are wired up.

#![cfg_attr(not(test), no_std)]

#![deny(warnings, missing_docs)]

extern crate alloc;

pub mod open_table;

use {
    io::printlndebug,
    spin::Mutex,
    open_table::OpenTable
};

pub use open_table::{Descriptor, Inode, OpenTableError, Permission, SYSTEM_SIZE};

static OPEN_FILES: Mutex<Option<OpenTable>> = Mutex::new(None);

/// Creates the system-wide open-file table. Needs the heap. Calling it again replaces the table,
/// closing everything that was open, including files that users never closed.
pub fn init() {
    if let Some(mut old) = OPEN_FILES.lock().replace(OpenTable::new()) {
        old.clear();
        printlndebug!("open-file table re-initialized");
    }
}

/// Runs `f` on the system-wide open-file table.
///
/// # Returns
/// `None` if `init` hasn't been called, else whatever `f` returns.
pub fn with_open_table<T, F: FnOnce(&mut OpenTable) -> T>(f: F) -> Option<T> {
    OPEN_FILES.lock().as_mut().map(f)
}
