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

//! The heap that user programs allocate from through system calls, and the kernel's own global
//! allocator underneath it.

use {
    alloc::{
        alloc::{alloc, dealloc, Layout},
        collections::BTreeMap
    },
    core::{
        fmt,
        ptr::NonNull,
        sync::atomic::{AtomicBool, Ordering}
    },
    error::Error,
    io::printlndebug
};

/// The alignment `allocate` gives when the caller doesn't ask for one.
pub const DEFAULT_ALIGN: usize = 8;

/// Why a heap operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// There isn't enough free memory for a block of this size.
    OutOfMemory(usize),
    /// The requested alignment isn't a power of two.
    BadAlignment(usize),
    /// The address given to `free` isn't the start of a live block.
    UnknownBlock(usize),
    /// The kernel heap has already been set up.
    AlreadyInitialized
}

impl Error for HeapError {}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            HeapError::OutOfMemory(size)   => write!(f, "out of memory allocating {} bytes", size),
            HeapError::BadAlignment(align) => write!(f, "invalid alignment {}", align),
            HeapError::UnknownBlock(addr)  => write!(f, "{:#x} is not an allocated block", addr),
            HeapError::AlreadyInitialized  => write!(f, "the kernel heap is already initialized")
        }
    }
}

/// The allocation interface offered to user programs.
pub trait UserHeap {
    /// Allocates at least `size` bytes with the default alignment.
    fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        self.allocate_aligned(size, DEFAULT_ALIGN)
    }

    /// Allocates at least `size` bytes starting at a multiple of `align`.
    fn allocate_aligned(&mut self, size: usize, align: usize) -> Result<NonNull<u8>, HeapError>;

    /// Releases the block that starts at `addr`. Freeing address 0 does nothing.
    fn free(&mut self, addr: usize) -> Result<(), HeapError>;
}

/// A user heap carved out of the kernel's global allocator. It remembers the layout of every block
/// it hands out, so a bad pointer from user code is refused instead of corrupting the allocator.
#[derive(Debug, Default)]
pub struct KernelHeap {
    blocks: BTreeMap<usize, Layout>
}

impl KernelHeap {
    /// Creates a heap with no live blocks.
    pub const fn new() -> KernelHeap {
        KernelHeap { blocks: BTreeMap::new() }
    }

    /// The number of blocks that have been allocated and not yet freed.
    pub fn live_blocks(&self) -> usize {
        self.blocks.len()
    }
}

impl UserHeap for KernelHeap {
    fn allocate_aligned(&mut self, size: usize, align: usize) -> Result<NonNull<u8>, HeapError> {
        // Zero-sized requests still get a unique address.
        // With a valid alignment, the only way to fail is a size too big for any allocation.
        let layout = Layout::from_size_align(size.max(1), align)
            .map_err(|_| if align.is_power_of_two() { HeapError::OutOfMemory(size) } else { HeapError::BadAlignment(align) })?;
        let block = NonNull::new(unsafe { alloc(layout) })
            .ok_or(HeapError::OutOfMemory(size))?;
        self.blocks.insert(block.as_ptr() as usize, layout);
        Ok(block)
    }

    fn free(&mut self, addr: usize) -> Result<(), HeapError> {
        if addr == 0 {
            return Ok(());
        }
        let layout = self.blocks.remove(&addr).ok_or(HeapError::UnknownBlock(addr))?;
        unsafe { dealloc(addr as *mut u8, layout); }
        Ok(())
    }
}

impl Drop for KernelHeap {
    fn drop(&mut self) {
        if !self.blocks.is_empty() {
            printlndebug!("releasing {} user blocks that were never freed", self.blocks.len());
        }
        for (&addr, &layout) in self.blocks.iter() {
            unsafe { dealloc(addr as *mut u8, layout); }
        }
    }
}

static KERNEL_HEAP_READY: AtomicBool = AtomicBool::new(false);

/// Hands the kernel heap region to the global allocator. Nothing may allocate before this.
///
/// # Returns
/// `Err(HeapError::AlreadyInitialized)` on every call after the first.
pub fn init_kernel_heap() -> Result<(), HeapError> {
    if KERNEL_HEAP_READY.swap(true, Ordering::AcqRel) {
        return Err(HeapError::AlreadyInitialized);
    }
    #[cfg(all(target_arch = "arm", not(test)))]
    unsafe { global::init(); }
    Ok(())
}

/// Determines whether `init_kernel_heap` has run.
pub fn kernel_heap_ready() -> bool {
    KERNEL_HEAP_READY.load(Ordering::Acquire)
}

#[cfg(all(target_arch = "arm", not(test)))]
mod global {
    use {
        core::ptr::addr_of_mut,
        linked_list_allocator::LockedHeap,
        crate::layout::KERNEL_HEAP_SIZE
    };

    #[global_allocator]
    static ALLOCATOR: LockedHeap = LockedHeap::empty();

    static mut KERNEL_HEAP: [u8; KERNEL_HEAP_SIZE] = [0; KERNEL_HEAP_SIZE];

    // Must be called exactly once.
    pub(super) unsafe fn init() {
        ALLOCATOR.lock().init(addr_of_mut!(KERNEL_HEAP) as *mut u8, KERNEL_HEAP_SIZE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod user_heap {
        use super::*;

        #[test]
        fn allocate_and_free() {
            let mut heap = KernelHeap::new();
            let a = heap.allocate(24).unwrap();
            let b = heap.allocate(24).unwrap();
            assert_ne!(a, b);
            assert_eq!(a.as_ptr() as usize % DEFAULT_ALIGN, 0);
            assert_eq!(heap.live_blocks(), 2);
            assert_eq!(heap.free(a.as_ptr() as usize), Ok(()));
            assert_eq!(heap.free(b.as_ptr() as usize), Ok(()));
            assert_eq!(heap.live_blocks(), 0);
        }

        #[test]
        fn aligned() {
            let mut heap = KernelHeap::new();
            let mut rng = oorandom::Rand32::new(42);
            for _ in 0 .. 32 {
                let align = 1 << rng.rand_range(0 .. 13);
                let size = rng.rand_range(0 .. 5000) as usize;
                let block = heap.allocate_aligned(size, align).unwrap();
                assert_eq!(block.as_ptr() as usize % align, 0);
            }
            assert_eq!(heap.live_blocks(), 32);
        }

        #[test]
        fn bad_alignment() {
            let mut heap = KernelHeap::new();
            assert_eq!(heap.allocate_aligned(16, 0), Err(HeapError::BadAlignment(0)));
            assert_eq!(heap.allocate_aligned(16, 24), Err(HeapError::BadAlignment(24)));
            assert_eq!(heap.allocate_aligned(usize::MAX, 3), Err(HeapError::BadAlignment(3)));
            assert_eq!(heap.live_blocks(), 0);
        }

        #[test]
        fn oversized_requests_run_out_of_memory() {
            let mut heap = KernelHeap::new();
            assert_eq!(heap.allocate_aligned(usize::MAX - 8, 8), Err(HeapError::OutOfMemory(usize::MAX - 8)));
            assert_eq!(heap.allocate(usize::MAX), Err(HeapError::OutOfMemory(usize::MAX)));
            assert_eq!(heap.live_blocks(), 0);
        }

        #[test]
        fn free_null_is_noop() {
            let mut heap = KernelHeap::new();
            assert_eq!(heap.free(0), Ok(()));
        }

        #[test]
        fn double_free_is_refused() {
            let mut heap = KernelHeap::new();
            let addr = heap.allocate(8).unwrap().as_ptr() as usize;
            assert_eq!(heap.free(addr), Ok(()));
            assert_eq!(heap.free(addr), Err(HeapError::UnknownBlock(addr)));
            assert_eq!(heap.free(addr + 1), Err(HeapError::UnknownBlock(addr + 1)));
        }
    }

    #[test]
    fn kernel_heap_initializes_once() {
        // The flag is global, so this is the only test that touches it.
        let first = init_kernel_heap();
        assert!(kernel_heap_ready());
        assert!(first.is_ok());
        assert_eq!(init_kernel_heap(), Err(HeapError::AlreadyInitialized));
    }
}
