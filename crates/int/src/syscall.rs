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

//! This module defines how the kernel responds to system calls.
//!
//! User code puts the call number in r7 and up to four arguments in r0 through r3, then executes
//! `SWI`. Exactly one word comes back in r0. Negative values mean failure for calls that can fail.

use {
    core::{fmt, str},
    error::Error,
    io::{print, println, printlndebug},
    memory::heap::UserHeap,
    shared::{ffi::CStrRef, ffi_enum},
    crate::{
        context::TrapFrame,
        exceptions::Response
    }
};

/// The longest string `PRINTF` will print in one call.
pub const PRINTF_MAX_LEN: usize = 4096;

ffi_enum! {
    #[repr(u32)]
    /// Every system call number, as user code knows them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SystemCall {
        /// Ends the calling process.
        Exit         = 0,
        /// Does nothing and returns 0.
        Dummy        = 1,
        /// Creates a file.
        Create       = 2,
        /// Deletes a file.
        Delete       = 3,
        /// Opens a file.
        Open         = 4,
        /// Creates a directory.
        Mkdir        = 5,
        /// Reads from an open file.
        Read         = 6,
        /// Writes to an open file.
        Write        = 7,
        /// Closes an open file.
        Close        = 8,
        /// Moves an open file's offset.
        Seek         = 9,
        /// Copies a file.
        Copy         = 10,
        /// Lists a directory.
        Ls           = 11,
        /// Changes a file's permissions.
        SetPerm      = 12,
        /// Maps memory.
        MemMap       = 13,
        /// Allocates memory.
        Malloc       = 14,
        /// Allocates aligned memory.
        AlignedAlloc = 15,
        /// Frees memory.
        Free         = 16,
        /// Prints a string.
        Printf       = 17
    }
}

/// The number of system calls.
pub const SYSCALL_COUNT: usize = 18;

impl SystemCall {
    /// The call's name, for logging.
    pub fn name(self) -> &'static str {
        match self {
            SystemCall::Exit         => "exit",
            SystemCall::Dummy        => "dummy",
            SystemCall::Create       => "create",
            SystemCall::Delete       => "delete",
            SystemCall::Open         => "open",
            SystemCall::Mkdir        => "mkdir",
            SystemCall::Read         => "read",
            SystemCall::Write        => "write",
            SystemCall::Close        => "close",
            SystemCall::Seek         => "seek",
            SystemCall::Copy         => "copy",
            SystemCall::Ls           => "ls",
            SystemCall::SetPerm      => "set permission",
            SystemCall::MemMap       => "memory map",
            SystemCall::Malloc       => "malloc",
            SystemCall::AlignedAlloc => "aligned_alloc",
            SystemCall::Free         => "free",
            SystemCall::Printf       => "printf"
        }
    }
}

/// How a system call can fail. Each error has a fixed negative value that user code sees in r0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    /// The call exists, but the subsystem behind it is switched off.
    Unavailable(SystemCall),
    /// No call has this number.
    UnknownCall(u32),
    /// An argument made no sense, such as a null string pointer.
    BadArgument
}

impl SyscallError {
    /// The value returned to user code.
    pub fn as_raw(self) -> i32 {
        match self {
            SyscallError::Unavailable(_) => -1,
            SyscallError::UnknownCall(_) => -2,
            SyscallError::BadArgument    => -3
        }
    }
}

impl Error for SyscallError {}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SyscallError::Unavailable(call)   => write!(f, "the {} system call is not available", call.name()),
            SyscallError::UnknownCall(number) => write!(f, "there is no system call {}", number),
            SyscallError::BadArgument         => write!(f, "bad system call argument")
        }
    }
}

/// What a system call handler finished with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Return this word to the caller.
    Return(u32),
    /// The caller is gone. Nothing to return to.
    ProcessExited
}

/// The process manager's side of `EXIT`.
pub trait ProcessManager {
    /// Ends the process that made the current system call.
    fn exit_current(&self, status: i32);
}

/// Access to the calling process's memory.
pub trait UserMemory {
    /// Views the null-terminated string at `addr`.
    ///
    /// # Returns
    /// `None` if `addr` can't be a user string (null, or in kernel space).
    fn c_str(&self, addr: usize) -> Option<CStrRef<'_>>;

    /// How many bytes starting at `addr` user code is allowed to have the kernel read. A string
    /// with no terminator in that range is cut off there.
    fn readable_len(&self, _addr: usize) -> usize {
        usize::MAX
    }
}

/// Everything outside the trap layer that system calls can reach.
pub struct Services<'a> {
    /// The user heap, for `MALLOC`, `ALIGNED_ALLOC`, and `FREE`
    pub heap: &'a mut dyn UserHeap,
    /// The process manager, for `EXIT`
    pub processes: &'a dyn ProcessManager,
    /// The caller's memory, for `PRINTF`
    pub user: &'a dyn UserMemory
}

impl fmt::Debug for Services<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

/// A function that carries out one system call.
pub type Handler = fn(args: &[u32; 4], services: &mut Services) -> Result<Completion, SyscallError>;

/// One slot in the system call table.
#[derive(Clone, Copy)]
pub enum Entry {
    /// The call does something.
    Implemented(Handler),
    /// The call is recognized but switched off. It always fails with `SyscallError::Unavailable`.
    Unavailable
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Entry::Implemented(_) => f.write_str("Implemented"),
            Entry::Unavailable    => f.write_str("Unavailable")
        }
    }
}

/// Every system call, indexed by number. The filesystem calls stay switched off until the
/// filesystem is wired up to the open-file table.
pub const SYSCALL_TABLE: [(SystemCall, Entry); SYSCALL_COUNT] = [
    (SystemCall::Exit,         Entry::Implemented(exit)),
    (SystemCall::Dummy,        Entry::Implemented(dummy)),
    (SystemCall::Create,       Entry::Unavailable),
    (SystemCall::Delete,       Entry::Unavailable),
    (SystemCall::Open,         Entry::Unavailable),
    (SystemCall::Mkdir,        Entry::Unavailable),
    (SystemCall::Read,         Entry::Unavailable),
    (SystemCall::Write,        Entry::Unavailable),
    (SystemCall::Close,        Entry::Unavailable),
    (SystemCall::Seek,         Entry::Unavailable),
    (SystemCall::Copy,         Entry::Unavailable),
    (SystemCall::Ls,           Entry::Unavailable),
    (SystemCall::SetPerm,      Entry::Unavailable),
    (SystemCall::MemMap,       Entry::Unavailable),
    (SystemCall::Malloc,       Entry::Implemented(malloc)),
    (SystemCall::AlignedAlloc, Entry::Implemented(aligned_alloc)),
    (SystemCall::Free,         Entry::Implemented(free)),
    (SystemCall::Printf,       Entry::Implemented(printf))
];

/// Looks up and runs one system call. An unknown number fails without touching any service.
pub fn dispatch(number: u32, args: &[u32; 4], services: &mut Services) -> Result<Completion, SyscallError> {
    let call = SystemCall::try_from(number).map_err(|e| SyscallError::UnknownCall(e.value()))?;
    match SYSCALL_TABLE[call as usize].1 {
        Entry::Implemented(handler) => handler(args, services),
        Entry::Unavailable          => {
            println!("{} system call called, but it is not implemented yet", call.name());
            Err(SyscallError::Unavailable(call))
        }
    }
}

/// Handles a `SWI` from user code: runs the call, then puts the result in r0.
pub fn handle_system_call(frame: &mut TrapFrame, services: &mut Services) -> Response {
    let number = frame.syscall_number();
    let args = frame.syscall_args();
    printlndebug!("syscall {} ({:#x}, {:#x}, {:#x}, {:#x})", number, args[0], args[1], args[2], args[3]);

    match dispatch(number, &args, services) {
        Ok(Completion::Return(value)) => {
            frame.set_return_value(value);
            Response::Eret
        },
        Ok(Completion::ProcessExited) => Response::LeaveUserspace,
        Err(e) => {
            if let SyscallError::UnknownCall(_) = e {
                println!("{}", e);
            }
            frame.set_return_value(e.as_raw() as u32);
            Response::Eret
        }
    }
}

fn exit(args: &[u32; 4], services: &mut Services) -> Result<Completion, SyscallError> {
    services.processes.exit_current(args[0] as i32);
    Ok(Completion::ProcessExited)
}

fn dummy(_args: &[u32; 4], _services: &mut Services) -> Result<Completion, SyscallError> {
    Ok(Completion::Return(0))
}

// Allocation failures come back as a null pointer, not an error code.
fn malloc(args: &[u32; 4], services: &mut Services) -> Result<Completion, SyscallError> {
    let size = args[0] as usize;
    let ptr = services.heap.allocate(size).map_or(0, |p| p.as_ptr() as usize);
    printlndebug!("malloc({}) = {:#x}", size, ptr);
    Ok(Completion::Return(ptr as u32))
}

fn aligned_alloc(args: &[u32; 4], services: &mut Services) -> Result<Completion, SyscallError> {
    let (size, align) = (args[0] as usize, args[1] as usize);
    let ptr = services.heap.allocate_aligned(size, align).map_or(0, |p| p.as_ptr() as usize);
    printlndebug!("aligned_alloc({}, {}) = {:#x}", size, align, ptr);
    Ok(Completion::Return(ptr as u32))
}

fn free(args: &[u32; 4], services: &mut Services) -> Result<Completion, SyscallError> {
    if let Err(e) = services.heap.free(args[0] as usize) {
        println!("free: {}", e);
    }
    Ok(Completion::Return(0))
}

fn printf(args: &[u32; 4], services: &mut Services) -> Result<Completion, SyscallError> {
    let addr = args[0] as usize;
    let string = services.user.c_str(addr).ok_or(SyscallError::BadArgument)?;
    let cap = PRINTF_MAX_LEN.min(services.user.readable_len(addr));
    let bytes = string.as_bytes_capped(cap);
    let text = match str::from_utf8(bytes) {
        Ok(text) => text,
        // The cap cut the last character in half. Print everything before it.
        Err(e) if e.error_len().is_none() && bytes.len() == cap => {
            str::from_utf8(&bytes[.. e.valid_up_to()]).map_err(|_| SyscallError::BadArgument)?
        },
        Err(_) => return Err(SyscallError::BadArgument)
    };
    print!("{}", text);
    Ok(Completion::Return(0))
}
