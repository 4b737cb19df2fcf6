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

//! Set-once cells for tables that are built during boot and never change afterwards.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU8, Ordering};

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const READY: u8 = 2;

/// A value that is written exactly once, normally during boot, and read any number of times
/// afterwards without locking. Unlike `spin::Once`, a second writer is never made to wait: it gets
/// its value back instead, so an interrupt handler can never deadlock on a half-built table.
#[derive(Debug)]
pub struct BootCell<T> {
    value: UnsafeCell<Option<T>>,
    state: AtomicU8
}

unsafe impl<T: Send> Send for BootCell<T> {}
unsafe impl<T: Send + Sync> Sync for BootCell<T> {}

impl<T> BootCell<T> {
    /// Creates an empty cell.
    pub const fn new() -> BootCell<T> {
        BootCell {
            value: UnsafeCell::new(None),
            state: AtomicU8::new(EMPTY)
        }
    }

    /// Stores the value if nothing else has been stored yet.
    ///
    /// # Returns
    /// A reference to the stored value, or `Err(value)` if the cell was already filled (or is being
    /// filled right now by someone else).
    pub fn set(&self, value: T) -> Result<&T, T> {
        if self.state.compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed).is_err() {
            return Err(value);
        }
        // Only the thread that won the exchange above can reach this slot until `READY` is stored.
        let stored = unsafe { (*self.value.get()).insert(value) as &T };
        self.state.store(READY, Ordering::Release);
        Ok(stored)
    }

    /// Returns the stored value, if it's ready.
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == READY {
            unsafe { (*self.value.get()).as_ref() }
        } else {
            None
        }
    }

    /// Determines whether a value has been stored.
    pub fn is_set(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }
}

impl<T> Default for BootCell<T> {
    fn default() -> BootCell<T> {
        BootCell::new()
    }
}
