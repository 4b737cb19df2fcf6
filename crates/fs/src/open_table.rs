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

//! The system-wide table of open files.
//!
//! Each slot either is empty or holds a descriptor: an access mode, a byte offset, and a shared
//! reference to the file's inode. Opening a file that's already open makes the new descriptor share
//! the existing inode, and the inode is dropped when its last descriptor is deleted.

use {
    alloc::{boxed::Box, sync::Arc, vec::Vec},
    core::fmt,
    error::Error,
    io::printlndebug,
    shared::ffi_enum
};

/// The number of files that can be open at once, across the whole system.
pub const SYSTEM_SIZE: usize = 512;

const WORD_BITS: usize = u32::BITS as usize;

ffi_enum! {
    #[repr(u8)]
    /// How a file was opened. The representation is the character user code passes in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Permission {
        /// Read-only
        Read   = b'r',
        /// Write from the start of the file
        Write  = b'w',
        /// Write from the end of the file
        Append = b'a'
    }
}

/// The parts of an inode that the open-file table needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    /// The inode number, unique within the filesystem
    pub inum: u32,
    /// The file's length in bytes
    pub size: usize
}

impl Inode {
    /// Describes inode number `inum`, which is `size` bytes long.
    pub fn new(inum: u32, size: usize) -> Inode {
        Inode { inum, size }
    }
}

/// One open file.
#[derive(Debug)]
pub struct Descriptor {
    permission: Permission,
    offset: usize,
    linked_file: Arc<Inode>
}

impl Descriptor {
    /// How the file was opened.
    pub fn permission(&self) -> Permission {
        self.permission
    }

    /// Where the next read or write happens, in bytes from the start of the file.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Moves the read/write position.
    pub fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    /// The inode this descriptor refers to, shared with every other descriptor for the same file.
    pub fn inode(&self) -> &Arc<Inode> {
        &self.linked_file
    }
}

/// Why an open-file-table operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenTableError {
    /// All `SYSTEM_SIZE` slots are in use.
    TableFull,
    /// The descriptor index is out of range or refers to an empty slot.
    NotOpen(isize),
    /// The permission character isn't one of `r`, `w`, or `a`.
    BadPermission(u8)
}

impl Error for OpenTableError {}

impl fmt::Display for OpenTableError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            OpenTableError::TableFull          => write!(f, "too many open files (max {})", SYSTEM_SIZE),
            OpenTableError::NotOpen(fd)        => write!(f, "file descriptor {} is not open", fd),
            OpenTableError::BadPermission(p)   => write!(f, "invalid file permission {:?}", char::from(p))
        }
    }
}

// One bit per slot, set while the slot is taken.
#[derive(Debug)]
struct SlotBitmap {
    words: [u32; SYSTEM_SIZE / WORD_BITS]
}

impl SlotBitmap {
    const fn new() -> SlotBitmap {
        SlotBitmap { words: [0; SYSTEM_SIZE / WORD_BITS] }
    }

    fn first_free(&self) -> Option<usize> {
        self.words.iter()
            .enumerate()
            .find(|(_, word)| **word != u32::MAX)
            .map(|(i, &word)| i * WORD_BITS + (!word).trailing_zeros() as usize)
    }

    fn set(&mut self, index: usize) {
        self.words[index / WORD_BITS] |= 1 << (index % WORD_BITS);
    }

    fn clear(&mut self, index: usize) {
        self.words[index / WORD_BITS] &= !(1 << (index % WORD_BITS));
    }

    fn clear_all(&mut self) {
        self.words = [0; SYSTEM_SIZE / WORD_BITS];
    }
}

/// A fixed-capacity table of open files, always handing out the lowest free index.
#[derive(Debug)]
pub struct OpenTable {
    slots: Box<[Option<Descriptor>]>,
    taken: SlotBitmap
}

impl OpenTable {
    /// Creates an empty table.
    pub fn new() -> OpenTable {
        OpenTable {
            slots: (0 .. SYSTEM_SIZE).map(|_| None).collect::<Vec<_>>().into_boxed_slice(),
            taken: SlotBitmap::new()
        }
    }

    /// Adds a descriptor for `inode`. If the same inode number is already open, the new descriptor
    /// shares that inode and `inode` itself is dropped. In append mode the offset starts at the end
    /// of the file; otherwise it starts at 0.
    ///
    /// # Returns
    /// The index of the new descriptor, or `Err(TableFull)`.
    pub fn add(&mut self, inode: Inode, permission: Permission) -> Result<usize, OpenTableError> {
        let fd = self.taken.first_free().ok_or(OpenTableError::TableFull)?;
        let linked_file = match self.find_inode(inode.inum) {
            Some(shared) => shared,
            None         => Arc::new(inode)
        };
        let offset = match permission {
            Permission::Append => linked_file.size,
            Permission::Read | Permission::Write => 0
        };
        self.taken.set(fd);
        self.slots[fd] = Some(Descriptor { permission, offset, linked_file });
        Ok(fd)
    }

    /// Removes the descriptor at `fd`. The inode goes with it if no other descriptor shares it.
    pub fn delete(&mut self, fd: isize) -> Result<(), OpenTableError> {
        let index = self.open_index(fd)?;
        if let Some(descriptor) = self.slots[index].take() {
            if Arc::strong_count(&descriptor.linked_file) == 1 {
                printlndebug!("closing inode {}", descriptor.linked_file.inum);
            }
        }
        self.taken.clear(index);
        Ok(())
    }

    /// The descriptor at `fd`, if it's open.
    pub fn get_descriptor(&self, fd: isize) -> Option<&Descriptor> {
        let index = self.open_index(fd).ok()?;
        self.slots[index].as_ref()
    }

    /// The descriptor at `fd`, if it's open, for changing its offset.
    pub fn get_descriptor_mut(&mut self, fd: isize) -> Option<&mut Descriptor> {
        let index = self.open_index(fd).ok()?;
        self.slots[index].as_mut()
    }

    /// Determines whether `fd` refers to an open file. Anything outside `0 .. SYSTEM_SIZE` doesn't.
    pub fn file_is_open(&self, fd: isize) -> bool {
        self.open_index(fd).is_ok()
    }

    /// The number of descriptors sharing the inode behind `fd`.
    pub fn inode_refs(&self, fd: isize) -> Option<usize> {
        self.get_descriptor(fd).map(|d| Arc::strong_count(&d.linked_file))
    }

    /// The number of open descriptors.
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Closes every descriptor, including the ones users forgot about.
    pub fn clear(&mut self) {
        let forgotten = self.open_count();
        if forgotten > 0 {
            printlndebug!("closing {} files that were left open", forgotten);
        }
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.taken.clear_all();
    }

    /// `add` for callers that speak in raw numbers: the permission is a character, and the result
    /// is the new index or -1.
    pub fn add_to_opentable(&mut self, inode: Inode, permission: u8) -> isize {
        Permission::try_from(permission)
            .map_err(|_| OpenTableError::BadPermission(permission))
            .and_then(|permission| self.add(inode, permission))
            .map_or(-1, |fd| fd as isize)
    }

    /// `delete` for callers that speak in raw numbers: 0 on success or -1.
    pub fn delete_from_opentable(&mut self, fd: isize) -> isize {
        self.delete(fd).map_or(-1, |()| 0)
    }

    fn open_index(&self, fd: isize) -> Result<usize, OpenTableError> {
        usize::try_from(fd).ok()
            .filter(|&index| index < SYSTEM_SIZE && self.slots[index].is_some())
            .ok_or(OpenTableError::NotOpen(fd))
    }

    fn find_inode(&self, inum: u32) -> Option<Arc<Inode>> {
        self.slots.iter()
            .flatten()
            .find(|d| d.linked_file.inum == inum)
            .map(|d| Arc::clone(&d.linked_file))
    }
}

impl Default for OpenTable {
    fn default() -> OpenTable {
        OpenTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Weak;

    mod add {
        use super::*;

        #[test]
        fn lowest_free_index() {
            let mut table = OpenTable::new();
            assert_eq!(table.add(Inode::new(1, 0), Permission::Read), Ok(0));
            assert_eq!(table.add(Inode::new(2, 0), Permission::Read), Ok(1));
            assert_eq!(table.add(Inode::new(3, 0), Permission::Read), Ok(2));
            table.delete(1).unwrap();
            assert_eq!(table.add(Inode::new(4, 0), Permission::Write), Ok(1));
            assert_eq!(table.add(Inode::new(5, 0), Permission::Write), Ok(3));
        }

        #[test]
        fn offsets() {
            let mut table = OpenTable::new();
            let r = table.add(Inode::new(1, 300), Permission::Read).unwrap() as isize;
            let w = table.add(Inode::new(2, 300), Permission::Write).unwrap() as isize;
            let a = table.add(Inode::new(3, 300), Permission::Append).unwrap() as isize;
            assert_eq!(table.get_descriptor(r).map(Descriptor::offset), Some(0));
            assert_eq!(table.get_descriptor(w).map(Descriptor::offset), Some(0));
            assert_eq!(table.get_descriptor(a).map(Descriptor::offset), Some(300));
        }

        #[test]
        fn append_to_shared_inode_starts_at_end() {
            let mut table = OpenTable::new();
            let first = table.add(Inode::new(8, 64), Permission::Read).unwrap() as isize;
            let second = table.add(Inode::new(8, 64), Permission::Append).unwrap() as isize;
            assert_eq!(table.get_descriptor(first).unwrap().offset(), 0);
            assert_eq!(table.get_descriptor(second).unwrap().offset(), 64);
            assert_eq!(table.get_descriptor(second).unwrap().permission(), Permission::Append);
        }

        #[test]
        fn full() {
            let mut table = OpenTable::new();
            for i in 0 .. SYSTEM_SIZE {
                assert_eq!(table.add(Inode::new(i as u32, 0), Permission::Read), Ok(i));
            }
            assert_eq!(table.add(Inode::new(9999, 0), Permission::Read), Err(OpenTableError::TableFull));
            assert_eq!(table.add_to_opentable(Inode::new(9999, 0), b'r'), -1);
            table.delete(200).unwrap();
            assert_eq!(table.add_to_opentable(Inode::new(9999, 0), b'r'), 200);
        }

        #[test]
        fn raw_permissions() {
            let mut table = OpenTable::new();
            assert_eq!(table.add_to_opentable(Inode::new(1, 5), b'a'), 0);
            assert_eq!(table.get_descriptor(0).unwrap().offset(), 5);
            assert_eq!(table.add_to_opentable(Inode::new(2, 5), b'x'), -1);
            assert_eq!(table.open_count(), 1);
        }
    }

    mod shared_inodes {
        use super::*;

        #[test]
        fn refcount_follows_descriptors() {
            let mut table = OpenTable::new();
            let a = table.add(Inode::new(42, 10), Permission::Read).unwrap() as isize;
            let b = table.add(Inode::new(42, 10), Permission::Write).unwrap() as isize;
            assert_ne!(a, b);
            assert!(Arc::ptr_eq(table.get_descriptor(a).unwrap().inode(), table.get_descriptor(b).unwrap().inode()));
            assert_eq!(table.inode_refs(a), Some(2));

            let inode: Weak<Inode> = Arc::downgrade(table.get_descriptor(a).unwrap().inode());
            assert_eq!(table.delete(a), Ok(()));
            assert_eq!(table.inode_refs(b), Some(1));
            assert!(inode.upgrade().is_some());

            assert_eq!(table.delete_from_opentable(b), 0);
            assert!(inode.upgrade().is_none());
        }

        #[test]
        fn different_inodes_stay_separate() {
            let mut table = OpenTable::new();
            let a = table.add(Inode::new(1, 0), Permission::Read).unwrap() as isize;
            let b = table.add(Inode::new(2, 0), Permission::Read).unwrap() as isize;
            assert_eq!(table.inode_refs(a), Some(1));
            assert_eq!(table.inode_refs(b), Some(1));
        }
    }

    mod lookup {
        use super::*;

        #[test]
        fn file_is_open_bounds() {
            let mut table = OpenTable::new();
            table.add(Inode::new(1, 0), Permission::Read).unwrap();
            assert!(table.file_is_open(0));
            assert!(!table.file_is_open(1));
            assert!(!table.file_is_open(-1));
            assert!(!table.file_is_open(isize::MIN));
            assert!(!table.file_is_open(SYSTEM_SIZE as isize));
            assert!(!table.file_is_open(isize::MAX));
            assert!(table.get_descriptor(-1).is_none());
            assert!(table.get_descriptor(7).is_none());
        }

        #[test]
        fn delete_errors() {
            let mut table = OpenTable::new();
            assert_eq!(table.delete(0), Err(OpenTableError::NotOpen(0)));
            assert_eq!(table.delete(-3), Err(OpenTableError::NotOpen(-3)));
            assert_eq!(table.delete_from_opentable(SYSTEM_SIZE as isize), -1);
            let fd = table.add(Inode::new(1, 0), Permission::Read).unwrap() as isize;
            assert_eq!(table.delete(fd), Ok(()));
            assert_eq!(table.delete(fd), Err(OpenTableError::NotOpen(fd)));
        }

        #[test]
        fn seek() {
            let mut table = OpenTable::new();
            let fd = table.add(Inode::new(1, 100), Permission::Write).unwrap() as isize;
            table.get_descriptor_mut(fd).unwrap().set_offset(37);
            assert_eq!(table.get_descriptor(fd).unwrap().offset(), 37);
        }
    }

    #[test]
    fn clear_drops_everything() {
        let mut table = OpenTable::new();
        table.add(Inode::new(1, 0), Permission::Read).unwrap();
        table.add(Inode::new(1, 0), Permission::Read).unwrap();
        let inode = Arc::downgrade(table.get_descriptor(0).unwrap().inode());
        table.clear();
        assert_eq!(table.open_count(), 0);
        assert!(inode.upgrade().is_none());
        assert_eq!(table.add(Inode::new(2, 0), Permission::Read), Ok(0));
    }
}
